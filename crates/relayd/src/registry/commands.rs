//! Registry actor commands, errors, and results.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `BroadcastReceipt` / `RegistryStats`: Results returned to callers

use std::fmt;

use relay_protocol::Command;
use thiserror::Error;
use tokio::sync::oneshot;

use super::subscriber::{SessionId, Subscriber};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command carries a oneshot channel for the response. The actor
/// handles commands one at a time, which is what makes append-and-fan-out
/// atomic with respect to registration and snapshots.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Add a session to the active set.
    ///
    /// Responds with the history the session must replay. Everything
    /// recorded after this point is queued in the subscriber's outbox.
    ///
    /// # Errors
    /// - `RegistryError::SessionAlreadyExists` if the id is already active
    Register {
        session_id: SessionId,
        subscriber: Subscriber,
        respond_to: oneshot::Sender<Result<Vec<Command>, RegistryError>>,
    },

    /// Remove a session from the active set.
    ///
    /// Responds `true` if the session was active, `false` otherwise.
    Unregister {
        session_id: SessionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Copy the full history in append order.
    SnapshotHistory {
        respond_to: oneshot::Sender<Vec<Command>>,
    },

    /// Append a command to history and queue it for every active session.
    BroadcastAndRecord {
        command: Command,
        respond_to: oneshot::Sender<BroadcastReceipt>,
    },

    /// Report current sizes.
    Stats {
        respond_to: oneshot::Sender<RegistryStats>,
    },
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of one `BroadcastAndRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReceipt {
    /// Zero-based position of the command in history
    pub sequence: u64,

    /// Sessions the command was queued for
    pub delivered: usize,

    /// Sessions disconnected because their outbox was full
    pub evicted: usize,
}

/// Snapshot of registry sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_sessions: usize,
    pub history_len: usize,
}

/// Why a session left the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The session unregistered itself.
    Unregistered,

    /// The session's outbox was already closed during a broadcast.
    Disconnected,

    /// The session's outbox was full during a broadcast.
    Lagged,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered => write!(f, "unregistered"),
            Self::Disconnected => write!(f, "outbox closed"),
            Self::Lagged => write!(f, "outbox full"),
        }
    }
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// A session with this ID is already active.
    #[error("session already exists: {0}")]
    SessionAlreadyExists(SessionId),

    /// The actor stopped before answering.
    ///
    /// This only happens while the process is shutting down.
    #[error("response channel closed")]
    ChannelClosed,
}
