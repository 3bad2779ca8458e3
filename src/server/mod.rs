//! TLS Connection Server
//!
//! The [`Server`] owns everything the accept loop needs: the TLS acceptor,
//! the command registry, the keyspace, and the admission state. There are
//! no process-wide singletons; constructing two servers in one process is
//! perfectly fine (the tests do it constantly).
//!
//! ## Lifecycle
//!
//! 1. [`Server::new`] loads the TLS material, registers the commands, and
//!    (when configured) replays the append-only log. Replay always
//!    finishes before any connection is accepted.
//! 2. [`Server::run`] drives the accept loop over a pre-bound listener and
//!    spawns the expiry sweeper.
//! 3. [`Server::shutdown`] signals every worker, closes the listener, and
//!    waits for the workers to drain, or gives up at the deadline.
//!
//! ## Admission
//!
//! The connection counter is checked and incremented under one mutex
//! acquisition, so the cap cannot be overshot by racing accepts. A
//! connection over the cap is closed immediately without being served.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::commands::{CommandContext, CommandRegistry};
use crate::config::Config;
use crate::connection::ConnectionHandler;
use crate::persistence::{self, AolWriter};
use crate::storage::{Keyspace, Sweeper};
use crate::tls::{self, TlsError};

/// Errors starting or stopping the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown deadline exceeded with connections still open")]
    ShutdownTimedOut,
}

/// The database server: keyspace, registry, acceptor and admission state.
pub struct Server {
    config: Config,
    keyspace: Arc<Keyspace>,
    registry: Arc<CommandRegistry>,
    acceptor: TlsAcceptor,
    connections: Arc<ConnectionGauge>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Server {
    /// Builds a server from its configuration, keyspace and optional AOL
    /// writer, replaying the log when configured.
    ///
    /// Replay happens here, before the caller ever binds a listener, so
    /// clients can never observe a partially rebuilt keyspace.
    pub fn new(
        config: Config,
        keyspace: Arc<Keyspace>,
        aol: Option<Arc<AolWriter>>,
    ) -> Result<Self, ServerError> {
        let acceptor = tls::build_acceptor(&config.server.tls_cert, &config.server.tls_key)?;

        let registry = Arc::new(CommandRegistry::new(Arc::new(CommandContext {
            keyspace: Arc::clone(&keyspace),
            aol,
            password: config.server.password.clone(),
            benchmark_key_prefix: config.server.benchmark_key_prefix.clone(),
        })));

        if !config.server.persistent_aof_path.is_empty() && config.server.replay_aof_on_startup {
            // A missing or unreadable log is worth a warning, not a refusal
            // to start: the writer has already been opened successfully.
            if let Err(e) =
                persistence::replay(&config.server.persistent_aof_path, &registry, &keyspace)
            {
                warn!(error = %e, "failed to replay the append-only log");
            }
        }

        let connections = Arc::new(ConnectionGauge::new(config.server.max_connections));

        Ok(Self {
            config,
            keyspace,
            registry,
            acceptor,
            connections,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Accepts connections on `listener` until shutdown is signaled.
    ///
    /// Also spawns the expiry sweeper; it stops when this returns.
    pub async fn run(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!(address = %listener.local_addr()?, "secure server listening");
        let _sweeper = Sweeper::start(Arc::clone(&self.keyspace));

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.admit(stream, addr),
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                }
            }
        }

        info!("accept loop stopped");
        Ok(())
    }

    /// Admits one accepted connection, or closes it if the cap is reached.
    fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        if !self.connections.try_acquire() {
            warn!(
                client = %addr,
                max_connections = self.config.server.max_connections,
                "connection cap reached, closing unserved"
            );
            return; // dropping the stream closes it
        }

        let acceptor = self.acceptor.clone();
        let registry = Arc::clone(&self.registry);
        let connections = Arc::clone(&self.connections);
        let shutdown = self.shutdown.clone();
        let auth_enabled = self.config.server.auth_enabled;
        let rate_limit = self.config.server.rate_limit;

        self.tracker.spawn(async move {
            // The handshake is driven explicitly so its failures are
            // distinguishable from read failures in the logs.
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    let handler = ConnectionHandler::new(
                        tls_stream,
                        addr,
                        registry,
                        auth_enabled,
                        rate_limit,
                        shutdown,
                    );
                    if let Err(e) = handler.run().await {
                        debug!(client = %addr, error = %e, "connection ended with error");
                    }
                }
                Err(e) => warn!(client = %addr, error = %e, "TLS handshake failed"),
            }
            connections.release();
        });
    }

    /// Signals shutdown, closes every live connection, and waits for the
    /// workers to drain within `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        info!(active = self.connections.active(), "shutting down");
        self.shutdown.cancel();
        self.tracker.close();
        tokio::time::timeout(deadline, self.tracker.wait())
            .await
            .map_err(|_| ServerError::ShutdownTimedOut)
    }

    /// Number of currently served connections.
    pub fn active_connections(&self) -> usize {
        self.connections.active()
    }
}

/// Connection counter with an optional cap.
///
/// Check-and-increment happens under a single lock acquisition.
#[derive(Debug)]
struct ConnectionGauge {
    active: Mutex<usize>,
    cap: usize,
}

impl ConnectionGauge {
    /// `cap` of zero means unlimited.
    fn new(cap: usize) -> Self {
        Self {
            active: Mutex::new(0),
            cap,
        }
    }

    fn try_acquire(&self) -> bool {
        let mut active = self.active.lock().unwrap();
        if self.cap != 0 && *active >= self.cap {
            return false;
        }
        *active += 1;
        true
    }

    fn release(&self) {
        *self.active.lock().unwrap() -= 1;
    }

    fn active(&self) -> usize {
        *self.active.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_enforces_its_cap() {
        let gauge = ConnectionGauge::new(2);
        assert!(gauge.try_acquire());
        assert!(gauge.try_acquire());
        assert!(!gauge.try_acquire());

        gauge.release();
        assert!(gauge.try_acquire());
        assert_eq!(gauge.active(), 2);
    }

    #[test]
    fn zero_cap_means_unlimited() {
        let gauge = ConnectionGauge::new(0);
        for _ in 0..1000 {
            assert!(gauge.try_acquire());
        }
        assert_eq!(gauge.active(), 1000);
    }

    #[test]
    fn gauge_is_never_overshot_by_racing_acquires() {
        use std::thread;

        let gauge = Arc::new(ConnectionGauge::new(10));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gauge = Arc::clone(&gauge);
            handles.push(thread::spawn(move || {
                (0..100).filter(|_| gauge.try_acquire()).count()
            }));
        }

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
        assert_eq!(gauge.active(), 10);
    }
}
