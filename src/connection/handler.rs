//! Connection Handler
//!
//! Reads newline-terminated commands off a TLS stream, dispatches them
//! through the command registry, and writes the reply lines back. The
//! handler runs until the client disconnects, an I/O error occurs, a line
//! exceeds the size cap, or the server shuts down.
//!
//! ## Framing
//!
//! TCP is a stream, so a single read may deliver a partial command or
//! several commands at once. Incoming bytes accumulate in a `BytesMut`
//! buffer; a command is complete when a `\n` shows up. The buffer is capped
//! at 64 KiB; a longer line gets `ERR line too long` and the connection is
//! closed.
//!
//! ## Admission rules applied per command
//!
//! - When a rate limit is configured, each command waits for a tick of an
//!   interval running at `1s / limit`.
//! - When authentication is enabled, only `AUTH` is dispatched until the
//!   session has authenticated; everything else gets
//!   `ERR authentication required`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_rustls::server::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::commands::{CommandRegistry, Reply, Session};

/// Hard cap on a single request line.
const MAX_LINE_LEN: usize = 64 * 1024;

/// Initial read buffer capacity.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Network-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed mid-line.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// A request line exceeded the size cap.
    #[error("request line exceeded {MAX_LINE_LEN} bytes")]
    LineTooLong,
}

/// Serves one authenticated-or-not client over its TLS stream.
pub struct ConnectionHandler {
    stream: BufWriter<TlsStream<TcpStream>>,
    addr: SocketAddr,
    buffer: BytesMut,
    registry: Arc<CommandRegistry>,
    session: Session,
    auth_enabled: bool,
    limiter: Option<Interval>,
    shutdown: CancellationToken,
}

impl ConnectionHandler {
    /// Creates a handler for an accepted, handshaken stream.
    ///
    /// `rate_limit` is commands per second; `0` disables the gate.
    pub fn new(
        stream: TlsStream<TcpStream>,
        addr: SocketAddr,
        registry: Arc<CommandRegistry>,
        auth_enabled: bool,
        rate_limit: u32,
        shutdown: CancellationToken,
    ) -> Self {
        let limiter = (rate_limit > 0).then(|| {
            let mut interval = tokio::time::interval(Duration::from_secs(1) / rate_limit);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            registry,
            session: Session::new(),
            auth_enabled,
            limiter,
            shutdown,
        }
    }

    /// Runs the read-dispatch-reply loop to completion.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "client connected");

        loop {
            if let Some(limiter) = &mut self.limiter {
                tokio::select! {
                    _ = limiter.tick() => {}
                    _ = self.shutdown.cancelled() => return Ok(()),
                }
            }

            let result = tokio::select! {
                result = read_line(&mut self.stream, &mut self.buffer) => result,
                _ = self.shutdown.cancelled() => return Ok(()),
            };
            let line = match result {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!(client = %self.addr, "client disconnected");
                    return Ok(());
                }
                Err(ConnectionError::LineTooLong) => {
                    // Tell the client why before hanging up.
                    self.write_reply(&Reply::error("line too long")).await?;
                    warn!(client = %self.addr, "request line exceeded the cap, closing");
                    return Err(ConnectionError::LineTooLong);
                }
                Err(e) => return Err(e),
            };

            let reply = self.dispatch(line.trim_end());
            if reply.is_error() {
                warn!(client = %self.addr, reply = %reply.lines()[0], "client error");
            }
            self.write_reply(&reply).await?;
        }
    }

    /// Resolves one trimmed request line to its reply.
    fn dispatch(&mut self, line: &str) -> Reply {
        let mut fields = line.split_ascii_whitespace();
        let Some(head) = fields.next() else {
            return Reply::error("invalid command");
        };
        let name = head.to_ascii_uppercase();

        if self.auth_enabled && !self.session.authenticated && name != "AUTH" {
            return Reply::error("authentication required");
        }

        let args: Vec<&str> = fields.collect();
        match self.registry.get(&name) {
            Some(command) => command.execute(&mut self.session, &args),
            None => Reply::error("unknown command"),
        }
    }

    async fn write_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        for line in reply.lines() {
            self.stream.write_all(line.as_bytes()).await?;
            self.stream.write_all(b"\n").await?;
        }
        self.stream.flush().await?;
        Ok(())
    }
}

/// Reads one `\n`-terminated line, buffering across partial reads.
///
/// Returns `Ok(None)` on a clean disconnect between lines.
async fn read_line(
    stream: &mut BufWriter<TlsStream<TcpStream>>,
    buffer: &mut BytesMut,
) -> Result<Option<String>, ConnectionError> {
    loop {
        if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line = buffer.split_to(pos + 1);
            return Ok(Some(String::from_utf8_lossy(&line[..pos]).into_owned()));
        }

        if buffer.len() >= MAX_LINE_LEN {
            return Err(ConnectionError::LineTooLong);
        }

        let n = stream.get_mut().read_buf(buffer).await?;
        if n == 0 {
            return if buffer.is_empty() {
                Ok(None)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }
    }
}
