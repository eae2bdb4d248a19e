//! Registry actor - owns the active session set and the command history.
//!
//! The RegistryActor is the single owner of shared relay state. It receives
//! commands via an mpsc channel and answers over oneshot channels.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures are ignored (the caller went away)
//! - Delivery failures to one session never affect the others

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relay_protocol::Command;

use super::commands::{
    BroadcastReceipt, RegistryCommand, RegistryError, RegistryStats, RemovalReason,
};
use super::subscriber::{Delivery, SessionId, Subscriber};

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all shared state.
///
/// # Ownership
///
/// The actor owns:
/// - `sessions`: active sessions keyed by id
/// - `history`: every accepted command, in broadcast order
///
/// # Ordering
///
/// Commands are processed sequentially in a single task. A broadcast
/// appends and queues to every outbox before the next command is looked
/// at, so all sessions observe the same order, and a session registered
/// between two broadcasts gets the first in its replay and the second in
/// its outbox.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Active sessions
    sessions: HashMap<SessionId, Subscriber>,

    /// Append-only command history
    history: Vec<Command>,
}

impl RegistryActor {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            history: Vec::new(),
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped).
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            sessions = self.sessions.len(),
            history = self.history.len(),
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                session_id,
                subscriber,
                respond_to,
            } => {
                let result = self.handle_register(session_id, subscriber);
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unregister {
                session_id,
                respond_to,
            } => {
                let removed = self.handle_unregister(session_id);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::SnapshotHistory { respond_to } => {
                let _ = respond_to.send(self.history.clone());
            }
            RegistryCommand::BroadcastAndRecord {
                command,
                respond_to,
            } => {
                let receipt = self.handle_broadcast(command);
                let _ = respond_to.send(receipt);
            }
            RegistryCommand::Stats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(
        &mut self,
        session_id: SessionId,
        subscriber: Subscriber,
    ) -> Result<Vec<Command>, RegistryError> {
        if self.sessions.contains_key(&session_id) {
            debug!(session_id = %session_id, "Session already registered, rejecting");
            return Err(RegistryError::SessionAlreadyExists(session_id));
        }

        self.sessions.insert(session_id, subscriber);

        info!(
            session_id = %session_id,
            total_sessions = self.sessions.len(),
            replay = self.history.len(),
            "Session registered"
        );

        Ok(self.history.clone())
    }

    fn handle_unregister(&mut self, session_id: SessionId) -> bool {
        let removed = self.sessions.remove(&session_id).is_some();

        if removed {
            debug!(
                session_id = %session_id,
                reason = %RemovalReason::Unregistered,
                total_sessions = self.sessions.len(),
                "Session removed"
            );
        }

        removed
    }

    /// Appends `command`, then queues it for every active session.
    ///
    /// Sessions whose outbox is closed are dropped quietly. Sessions whose
    /// outbox is full are evicted: a client that misses a command would
    /// render a different canvas from everyone else, so it is disconnected
    /// and can rejoin through replay.
    fn handle_broadcast(&mut self, command: Command) -> BroadcastReceipt {
        let sequence = self.history.len() as u64;
        self.history.push(command.clone());

        let mut delivered = 0;
        let mut dropped = Vec::new();

        for (session_id, subscriber) in &self.sessions {
            if !subscriber.is_live() {
                dropped.push((*session_id, RemovalReason::Disconnected));
                continue;
            }

            match subscriber.offer(&command) {
                Delivery::Queued => delivered += 1,
                Delivery::Closed => dropped.push((*session_id, RemovalReason::Disconnected)),
                Delivery::Full => dropped.push((*session_id, RemovalReason::Lagged)),
            }
        }

        let mut evicted = 0;
        for (session_id, reason) in dropped {
            let Some(subscriber) = self.sessions.remove(&session_id) else {
                continue;
            };

            if reason == RemovalReason::Lagged {
                subscriber.evict();
                evicted += 1;
                warn!(
                    session_id = %session_id,
                    sequence,
                    "Client fell behind, disconnecting"
                );
            } else {
                debug!(session_id = %session_id, reason = %reason, "Session removed");
            }
        }

        debug!(sequence, delivered, evicted, "Command recorded");

        BroadcastReceipt {
            sequence,
            delivered,
            evicted,
        }
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_sessions: self.sessions.len(),
            history_len: self.history.len(),
        }
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
