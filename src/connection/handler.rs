//! Connection Handler Module
//!
//! This module handles individual client connections to ledgerkv.
//! Each client gets its own handler task that runs in a loop,
//! reading commands and sending responses.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read one command        │◄├── shutdown / idle timeout
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Execute command         │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send response           │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. EOF, QUIT, malformed frame, idle timeout or server shutdown
//!        │
//!        ▼
//! 5. Handler task ends
//! ```
//!
//! Invalid commands (wrong arity, bad TTL, unknown name) get an error reply
//! and the loop continues. A malformed frame cannot be resynchronised, so
//! it gets one `-ERR Protocol error` reply and the connection is closed.

use crate::commands::{is_quit, CommandHandler};
use crate::protocol::{CommandReader, ReadError, RespValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// How long a reply may keep writing once shutdown has been signalled
pub const SHUTDOWN_WRITE_GRACE: Duration = Duration::from_millis(500);

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// Generic over the transport so that sessions can be driven by a
/// `TcpStream` in production and by in-memory streams in tests.
pub struct ConnectionHandler<S> {
    /// Decodes commands from the read half
    reader: CommandReader<ReadHalf<S>>,

    /// Buffered write half
    writer: BufWriter<WriteHalf<S>>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// Flips to `true` when the server is shutting down
    shutdown: watch::Receiver<bool>,

    /// Close the connection if no command completes within this time
    idle_timeout: Option<Duration>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ConnectionHandler<S> {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The transport for this connection
    /// * `addr` - The client's socket address
    /// * `command_handler` - The command handler for executing commands
    /// * `stats` - Shared connection statistics
    /// * `shutdown` - Server-wide shutdown signal
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        stats.connection_opened();

        let (read_half, write_half) = tokio::io::split(stream);

        Self {
            reader: CommandReader::new(read_half),
            writer: BufWriter::new(write_half),
            addr,
            command_handler,
            stats,
            shutdown,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Runs the main connection loop.
    ///
    /// This method reads commands from the client, executes them,
    /// and sends back responses until the session ends.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(ConnectionError::IdleTimeout(limit)) => {
                debug!(client = %self.addr, idle_secs = limit.as_secs(), "Closing idle connection")
            }
            Err(ConnectionError::WriteStalled) => {
                warn!(client = %self.addr, "Client stopped reading, dropping reply for shutdown")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.bytes_read(self.reader.take_bytes_read());
        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            let next = tokio::select! {
                next = read_next(&mut self.reader, self.idle_timeout) => next,
                _ = self.shutdown.changed() => {
                    debug!(client = %self.addr, "Closing connection for shutdown");
                    return Ok(());
                }
            };
            self.stats.bytes_read(self.reader.take_bytes_read());

            let command = match next {
                Ok(Some(command)) => command,
                Ok(None) => return Ok(()),
                Err(ConnectionError::Read(e @ (ReadError::Parse(_) | ReadError::BufferFull))) => {
                    warn!(client = %self.addr, error = %e, "Malformed frame, closing connection");
                    self.send_response(&RespValue::error(format!("ERR {}", e)))
                        .await?;
                    return Err(e.into());
                }
                Err(e) => return Err(e),
            };

            trace!(client = %self.addr, args = command.len(), "Parsed command");

            let response = self.command_handler.execute(&command);
            self.stats.command_processed();
            self.send_response(&response).await?;

            if is_quit(&command) {
                return Ok(());
            }
        }
    }

    /// Sends a response to the client.
    ///
    /// A client that stops reading can hold the write open indefinitely.
    /// Once shutdown is signalled the write gets [`SHUTDOWN_WRITE_GRACE`] to
    /// finish before the session is abandoned.
    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        tokio::select! {
            written = write_reply(&mut self.writer, &bytes) => written?,
            _ = shutdown_grace(&mut self.shutdown) => return Err(ConnectionError::WriteStalled),
        }
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }
}

/// Reads the next command, giving up after `idle_timeout` if one is set.
async fn read_next<R: AsyncRead + Unpin>(
    reader: &mut CommandReader<R>,
    idle_timeout: Option<Duration>,
) -> Result<Option<Vec<bytes::Bytes>>, ConnectionError> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, reader.read_command())
            .await
            .map_err(|_| ConnectionError::IdleTimeout(limit))?
            .map_err(ConnectionError::from),
        None => Ok(reader.read_command().await?),
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Resolves [`SHUTDOWN_WRITE_GRACE`] after the shutdown flag is set, or
/// never if the sender is gone without setting it.
async fn shutdown_grace(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(SHUTDOWN_WRITE_GRACE).await;
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error while writing a reply
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading the next command failed
    #[error(transparent)]
    Read(#[from] ReadError),

    /// No command arrived within the idle timeout
    #[error("idle for more than {0:?}")]
    IdleTimeout(Duration),

    /// A reply could not be delivered before shutdown
    #[error("reply not delivered before shutdown")]
    WriteStalled,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
///
/// # Arguments
///
/// * `stream` - The TCP stream for this connection
/// * `addr` - The client's socket address
/// * `command_handler` - The command handler for executing commands
/// * `stats` - Shared connection statistics
/// * `shutdown` - Server-wide shutdown signal
/// * `idle_timeout` - Optional limit on time spent waiting for a command
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    shutdown: watch::Receiver<bool>,
    idle_timeout: Option<Duration>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats, shutdown)
        .with_idle_timeout(idle_timeout);
    if let Err(e) = handler.run().await {
        debug!(client = %addr, error = %e, "Connection ended with error");
    }
}
