//! TCP server for the canvas relay.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Spawns a `Session` task for each client
//! - Logs a summary when each session ends
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │     Session     │────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └───────┬─────────┘     └────────┬────────┘
//!         │ outbox                 │ try_send
//!         ▼                        │
//! ┌─────────────────┐              │
//! │   Writer task   │◀─────────────┘
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the loop continues
//! - A failing session never takes down the listener

mod session;

pub use session::{
    CloseReason, Session, SessionError, SessionSettings, SessionState, SessionSummary,
};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relay_protocol::Validator;

use crate::config::{ConfigError, RelayConfig};
use crate::registry::{RegistryHandle, SessionId};

/// Pause after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long shutdown waits for sessions before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// TCP server for the relay.
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,

    /// Handle to the canvas registry
    registry: RegistryHandle,

    /// Shared by every session
    validator: Arc<Validator>,
    settings: SessionSettings,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Next session number; ids start at `client-1`
    next_session: u64,
}

impl RelayServer {
    /// Binds the listening socket described by `config`.
    ///
    /// Port `0` binds an ephemeral port; see [`RelayServer::local_addr`].
    /// An invalid `config` is rejected before anything is bound.
    pub async fn bind(
        config: &RelayConfig,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let address = config.bind_address();
        let bind_error = |e: std::io::Error| ServerError::Bind {
            address: address.clone(),
            error: e.to_string(),
        };

        let listener = TcpListener::bind(address.as_str()).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        Ok(Self {
            listener,
            local_addr,
            registry,
            validator: Arc::new(config.validator()),
            settings: SessionSettings::from_config(config),
            cancel_token,
            next_session: 1,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered, then
    /// waits for open sessions to close. Does not return until shutdown.
    pub async fn run(mut self) {
        info!(
            address = %self.local_addr,
            shape_tools = ?self.validator.shape_tools(),
            "Relay server listening"
        );

        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_end(joined);
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.spawn_session(&mut sessions, stream, peer),
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        drain_sessions(sessions).await;

        let stats = self.registry.stats().await;
        info!(history = stats.history_len, "Relay server stopped");
    }

    fn spawn_session(
        &mut self,
        sessions: &mut JoinSet<SessionSummary>,
        stream: TcpStream,
        peer: SocketAddr,
    ) {
        let id = SessionId::new(self.next_session);
        self.next_session += 1;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(session_id = %id, error = %e, "Failed to set TCP_NODELAY");
        }

        info!(session_id = %id, peer = %peer, "Client connected");

        let (reader, writer) = stream.into_split();
        let session = Session::new(
            id,
            peer,
            self.registry.clone(),
            Arc::clone(&self.validator),
            self.settings,
            self.cancel_token.child_token(),
        );

        sessions.spawn(session.run(reader, writer));
    }
}

/// Waits for sessions to finish after shutdown, aborting stragglers.
async fn drain_sessions(mut sessions: JoinSet<SessionSummary>) {
    if sessions.is_empty() {
        return;
    }

    info!(sessions = sessions.len(), "Waiting for sessions to close");

    let wait_all = async {
        while let Some(joined) = sessions.join_next().await {
            log_session_end(joined);
        }
    };

    if timeout(SHUTDOWN_GRACE, wait_all).await.is_err() {
        warn!(
            remaining = sessions.len(),
            "Sessions did not close in time, aborting"
        );
        sessions.abort_all();
    }
}

fn log_session_end(joined: Result<SessionSummary, JoinError>) {
    match joined {
        Ok(summary) => info!(
            session_id = %summary.id,
            peer = %summary.peer,
            received = summary.received,
            accepted = summary.accepted,
            rejected = summary.rejected,
            reason = %summary.reason,
            connected_ms = summary.connected_for.num_milliseconds(),
            "Client disconnected"
        ),
        Err(e) => warn!(error = %e, "Session task ended abnormally"),
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {error}")]
    Bind { address: String, error: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
