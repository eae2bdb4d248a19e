//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` is cheap to clone; every session task holds one.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`
//! - Read-only queries fall back to empty values when the actor is gone

use tokio::sync::{mpsc, oneshot};

use relay_protocol::Command;

use super::commands::{BroadcastReceipt, RegistryCommand, RegistryError, RegistryStats};
use super::subscriber::{SessionId, Subscriber};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// # Usage
///
/// ```ignore
/// let replay = handle.register(session_id, subscriber).await?;
/// for command in replay {
///     // write to the client
/// }
///
/// handle.broadcast_and_record(command).await?;
/// handle.unregister(session_id).await?;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Adds a session to the active set and returns the history to replay.
    ///
    /// The returned snapshot and the commands later queued to the
    /// subscriber's outbox together cover the history exactly once.
    ///
    /// # Errors
    ///
    /// - `RegistryError::SessionAlreadyExists` if the id is already active
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(
        &self,
        session_id: SessionId,
        subscriber: Subscriber,
    ) -> Result<Vec<Command>, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                session_id,
                subscriber,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Removes a session from the active set.
    ///
    /// Returns `Ok(false)` if the session was not active; calling this twice
    /// is harmless.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn unregister(&self, session_id: SessionId) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Unregister {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Copies the full history in append order.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn snapshot_history(&self) -> Vec<Command> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::SnapshotHistory { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Appends a validated command to history and queues it for every
    /// active session, the sender included.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn broadcast_and_record(
        &self,
        command: Command,
    ) -> Result<BroadcastReceipt, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::BroadcastAndRecord {
                command,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Current session count and history length.
    ///
    /// Returns zeroes if communication with the actor fails.
    pub async fn stats(&self) -> RegistryStats {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Stats { respond_to: tx })
            .await
            .is_err()
        {
            return RegistryStats::default();
        }

        rx.await.unwrap_or_default()
    }

    /// Returns `true` if the command channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
