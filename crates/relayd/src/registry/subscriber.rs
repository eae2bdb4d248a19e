//! Session identity and the capability a session hands to the registry.

use std::fmt;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use relay_protocol::{Command, Outbound};

/// Identifier of one client connection, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// What the registry holds for each active session.
///
/// The registry never sees the socket. It can only queue lines into the
/// session's bounded outbox and, when the session falls too far behind,
/// cancel it.
#[derive(Debug, Clone)]
pub struct Subscriber {
    outbox: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

/// Result of offering one command to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    /// Outbox receiver dropped.
    Closed,
    /// Outbox at capacity.
    Full,
}

impl Subscriber {
    pub fn new(outbox: mpsc::Sender<Outbound>, cancel: CancellationToken) -> Self {
        Self { outbox, cancel }
    }

    /// Returns `true` while the session is still reading from its outbox.
    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.outbox.is_closed()
    }

    /// Queues a command without waiting. Callers check [`is_live`] first.
    ///
    /// [`is_live`]: Subscriber::is_live
    pub(crate) fn offer(&self, command: &Command) -> Delivery {
        match self.outbox.try_send(Outbound::Command(command.clone())) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Forces the session to close.
    pub(crate) fn evict(&self) {
        self.cancel.cancel();
    }
}
