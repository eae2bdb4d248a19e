//! Session handler for individual client connections.
//!
//! Each client connection gets its own `Session` that:
//! - Registers with the registry and replays the canvas history
//! - Reads lines, validates them and records accepted commands
//! - Answers malformed lines with `ERROR;INVALID_FORMAT`
//! - Hands its outgoing traffic to a dedicated writer task
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Transport errors end this session only; other clients are unaffected

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relay_protocol::{Command, Notice, Outbound, Validator};

use crate::config::RelayConfig;
use crate::registry::{RegistryError, RegistryHandle, SessionId, Subscriber};

/// Replay lines written per socket write.
const REPLAY_CHUNK: usize = 256;

/// Most outbox lines coalesced into one socket write.
const WRITE_BATCH: usize = 64;

// ============================================================================
// Settings and Results
// ============================================================================

/// Per-connection limits, derived from [`RelayConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub write_timeout: Duration,
    pub outbox_capacity: usize,
    pub max_line_length: usize,
}

impl SessionSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            write_timeout: config.write_timeout(),
            outbox_capacity: config.outbox_capacity,
            max_line_length: config.max_line_length,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Replaying,
    Listening,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// The client closed its side of the connection.
    PeerClosed,

    /// The session was evicted or the server is shutting down.
    Cancelled,

    /// Reading, writing or registration failed.
    Failed(SessionError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// What happened on one connection, returned when it closes.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub peer: SocketAddr,

    /// Non-blank lines read from the client
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,

    pub reason: CloseReason,
    pub connected_for: chrono::Duration,
}

/// Errors that end a session.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Handler for a single client connection.
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    registry: RegistryHandle,
    validator: Arc<Validator>,
    settings: SessionSettings,

    /// Fired by the registry on eviction or by the server on shutdown
    cancel: CancellationToken,

    state: SessionState,
    connected_at: DateTime<Utc>,
    received: u64,
    accepted: u64,
    rejected: u64,
}

impl Session {
    pub fn new(
        id: SessionId,
        peer: SocketAddr,
        registry: RegistryHandle,
        validator: Arc<Validator>,
        settings: SessionSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer,
            registry,
            validator,
            settings,
            cancel,
            state: SessionState::Connected,
            connected_at: Utc::now(),
            received: 0,
            accepted: 0,
            rejected: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session until the client disconnects or the session is
    /// cancelled.
    ///
    /// `reader` and `writer` are the two halves of the client transport.
    pub async fn run<R, W>(mut self, reader: R, writer: W) -> SessionSummary
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        debug!(session_id = %self.id, peer = %self.peer, "Session starting");

        let reason = self.serve(reader, writer).await;
        self.transition(SessionState::Closed);

        SessionSummary {
            id: self.id,
            peer: self.peer,
            received: self.received,
            accepted: self.accepted,
            rejected: self.rejected,
            reason,
            connected_for: Utc::now() - self.connected_at,
        }
    }

    async fn serve<R, W>(&mut self, reader: R, writer: W) -> CloseReason
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox_tx, outbox_rx) = mpsc::channel(self.settings.outbox_capacity);
        let subscriber = Subscriber::new(outbox_tx.clone(), self.cancel.clone());

        let replay = match self.registry.register(self.id, subscriber).await {
            Ok(replay) => replay,
            Err(e) => return CloseReason::Failed(e.into()),
        };

        self.transition(SessionState::Replaying);
        debug!(session_id = %self.id, commands = replay.len(), "Replaying history");

        let (replayed_tx, replayed_rx) = oneshot::channel();
        let delivery = tokio::spawn(deliver(
            self.id,
            LineWriter::new(writer, self.settings.write_timeout),
            replay,
            outbox_rx,
            replayed_tx,
            self.cancel.clone(),
        ));

        // Input is not read until the whole replay is on the wire.
        let replayed = tokio::select! {
            _ = self.cancel.cancelled() => false,
            ack = replayed_rx => ack.is_ok(),
        };

        let listened = if replayed {
            self.transition(SessionState::Listening);
            self.listen(reader, &outbox_tx).await
        } else {
            Ok(CloseReason::Cancelled)
        };

        // Teardown: leave the active set, then let the writer finish.
        if let Err(e) = self.registry.unregister(self.id).await {
            debug!(session_id = %self.id, error = %e, "Unregister failed");
        }
        drop(outbox_tx);

        // A peer that closed cleanly still gets what was already queued.
        if !matches!(listened, Ok(CloseReason::PeerClosed)) {
            self.cancel.cancel();
        }

        let written = match delivery.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::Io(format!("writer task failed: {e}"))),
        };

        match (listened, written) {
            (Err(e), _) => CloseReason::Failed(e),
            (Ok(CloseReason::Cancelled), Err(e)) => CloseReason::Failed(e),
            (Ok(reason), _) => reason,
        }
    }

    /// Reads lines until EOF, cancellation or a transport error.
    async fn listen<R>(
        &mut self,
        reader: R,
        outbox: &mpsc::Sender<Outbound>,
    ) -> Result<CloseReason, SessionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = LineReader::new(reader, self.settings.max_line_length);

        loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(CloseReason::Cancelled),
                read = lines.next_line() => read?,
            };

            match read {
                ReadLine::Eof => return Ok(CloseReason::PeerClosed),
                ReadLine::TooLong => {
                    self.received += 1;
                    self.rejected += 1;
                    debug!(
                        session_id = %self.id,
                        max = self.settings.max_line_length,
                        "Rejected over-long line"
                    );
                    self.notify(outbox, Notice::InvalidFormat).await;
                }
                ReadLine::Line(line) => self.handle_line(&line, outbox).await?,
            }
        }
    }

    async fn handle_line(
        &mut self,
        line: &str,
        outbox: &mpsc::Sender<Outbound>,
    ) -> Result<(), SessionError> {
        if line.trim().is_empty() {
            return Ok(());
        }
        self.received += 1;

        match self.validator.accept(line) {
            Ok(command) => {
                let receipt = self.registry.broadcast_and_record(command).await?;
                self.accepted += 1;
                debug!(
                    session_id = %self.id,
                    sequence = receipt.sequence,
                    delivered = receipt.delivered,
                    "Command accepted"
                );
            }
            Err(e) => {
                self.rejected += 1;
                debug!(session_id = %self.id, error = %e, line = %line, "Rejected line");
                self.notify(outbox, Notice::InvalidFormat).await;
            }
        }

        Ok(())
    }

    /// Queues a notice for this client only.
    async fn notify(&self, outbox: &mpsc::Sender<Outbound>, notice: Notice) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            sent = outbox.send(notice.into()) => {
                if sent.is_err() {
                    debug!(session_id = %self.id, "Outbox closed, notice dropped");
                }
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session_id = %self.id, from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }
}

// ============================================================================
// Writer Task
// ============================================================================

/// Writes the replay, acknowledges it, then drains the outbox.
///
/// Stops when the outbox closes (all senders dropped) or the session is
/// cancelled. A write failure cancels the session so the reader stops too.
async fn deliver<W>(
    id: SessionId,
    mut writer: LineWriter<W>,
    replay: Vec<Command>,
    mut outbox: mpsc::Receiver<Outbound>,
    replayed: oneshot::Sender<()>,
    cancel: CancellationToken,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let result = pump(&mut writer, &replay, &mut outbox, replayed, &cancel).await;

    if let Err(e) = &result {
        warn!(session_id = %id, error = %e, "Write to client failed");
        cancel.cancel();
    }

    writer.shutdown().await;
    result
}

async fn pump<W>(
    writer: &mut LineWriter<W>,
    replay: &[Command],
    outbox: &mut mpsc::Receiver<Outbound>,
    replayed: oneshot::Sender<()>,
    cancel: &CancellationToken,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    for chunk in replay.chunks(REPLAY_CHUNK) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            written = writer.write_lines(chunk.iter().map(Command::as_str)) => written?,
        }
    }
    let _ = replayed.send(());

    let mut batch = Vec::with_capacity(WRITE_BATCH);
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            next = outbox.recv() => next,
        };

        // None: every sender is gone and the queue is drained.
        let Some(first) = next else {
            return Ok(());
        };
        batch.push(first);
        while batch.len() < WRITE_BATCH {
            match outbox.try_recv() {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            written = writer.write_lines(batch.iter().map(Outbound::as_line)) => written?,
        }
        batch.clear();
    }
}

// ============================================================================
// Line Framing
// ============================================================================

/// One framed read from the client.
#[derive(Debug, PartialEq, Eq)]
enum ReadLine {
    Line(String),
    /// A line longer than the limit; its bytes were discarded.
    TooLong,
    Eof,
}

/// `\n`-delimited reader with a length limit.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            max_len,
        }
    }

    /// Reads the next line without its terminator.
    ///
    /// A trailing `\r` is stripped, invalid UTF-8 is replaced, and a final
    /// line without `\n` is returned before `Eof`.
    async fn next_line(&mut self) -> io::Result<ReadLine> {
        self.buf.clear();

        // One extra byte for the newline itself.
        let limit = (self.max_len as u64).saturating_add(1);
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;

        if read == 0 {
            return Ok(ReadLine::Eof);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        } else if read as u64 == limit {
            self.discard_line().await?;
            return Ok(ReadLine::TooLong);
        }

        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }

        Ok(ReadLine::Line(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    /// Skips input up to and including the next `\n`, or to EOF.
    async fn discard_line(&mut self) -> io::Result<()> {
        loop {
            let (consumed, done) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    return Ok(());
                }
                match available.iter().position(|&b| b == b'\n') {
                    Some(pos) => (pos + 1, true),
                    None => (available.len(), false),
                }
            };

            self.reader.consume(consumed);
            if done {
                return Ok(());
            }
        }
    }
}

/// Buffered line writer with a per-batch timeout.
struct LineWriter<W> {
    writer: BufWriter<W>,
    timeout: Duration,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    fn new(writer: W, timeout: Duration) -> Self {
        Self {
            writer: BufWriter::new(writer),
            timeout,
        }
    }

    /// Writes each line followed by `\n`, then flushes.
    async fn write_lines<'a, I>(&mut self, lines: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let writer = &mut self.writer;
        let write = async {
            for line in lines {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            writer.flush().await
        };

        match timeout(self.timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SessionError::WriteTimeout(self.timeout)),
        }
    }

    async fn shutdown(&mut self) {
        let _ = timeout(self.timeout, self.writer.shutdown()).await;
    }
}
