//! Canvas registry using the Actor pattern.
//!
//! The registry owns the two pieces of shared state in the relay: the set of
//! connected sessions and the append-only command history. Sessions talk to
//! it through a [`RegistryHandle`]; the actor processes one command at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  RegistryCommand   ┌─────────────────┐  try_send   ┌──────────────┐
//! │ Session task │───────────────────▶│  RegistryActor  │────────────▶│ Session outbox│
//! └──────────────┘   (mpsc channel)   └─────────────────┘  (bounded)  └──────────────┘
//!                                      sessions + history
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or fall back to empty values
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;
mod subscriber;

pub use actor::RegistryActor;
pub use commands::{BroadcastReceipt, RegistryCommand, RegistryError, RegistryStats, RemovalReason};
pub use handle::RegistryHandle;
pub use subscriber::{SessionId, Subscriber};

/// Command channel buffer size
const COMMAND_BUFFER: usize = 256;

/// Spawns the registry actor and returns a handle for interaction.
///
/// The actor stops once every handle has been dropped.
///
/// # Example
///
/// ```no_run
/// use relayd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry();
///     let history = handle.snapshot_history().await;
///     assert!(history.is_empty());
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx)
}
