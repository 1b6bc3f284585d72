//! TCP database server.
//!
//! # Connection lifecycle
//!
//! 1. **Authentication**: the client sends `AuthRequest`s until one
//!    succeeds and a session slot is free. Database requests sent before
//!    that are answered with an `ErrorResponse`.
//! 2. **Operation**: each request is executed on the [`ThreadPool`] against
//!    the shared backend. Replies go through the connection's send buffer
//!    and may leave in a different order than the requests arrived.
//! 3. **Close**: when the client disconnects the session slot is released.
//!    Requests still executing finish and their replies are dropped.
//!
//! # Architecture
//!
//! Networking runs on tokio. Each connection has a reader task and a writer
//! task joined by an unbounded channel; request execution is synchronous
//! because `get_when` blocks its thread until the condition holds.

pub mod auth;
mod connection;
pub mod pool;
pub mod transport;

use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, ThreadPoolConfig};
use crate::store::KeyValueDb;

pub use auth::{Session, SessionManager, UserRegistry};
pub use pool::ThreadPool;

/// Serves a [`KeyValueDb`] to authenticated TCP clients.
pub struct DatabaseServer {
    backend: Arc<dyn KeyValueDb>,
    backend_name: String,
    pool: Arc<ThreadPool>,
    users: UserRegistry,
    sessions: Arc<SessionManager>,
    max_frame_size: usize,
}

impl DatabaseServer {
    /// Creates a server for `backend`.
    ///
    /// `backend_name` is only used in logs.
    #[must_use]
    pub fn new(
        server: &ServerConfig,
        thread_pool: &ThreadPoolConfig,
        backend: Arc<dyn KeyValueDb>,
        backend_name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            backend_name: backend_name.into(),
            pool: Arc::new(ThreadPool::new(Duration::from_secs(
                thread_pool.shrink_interval_secs,
            ))),
            users: UserRegistry::new(),
            sessions: SessionManager::new(server.max_connections),
            max_frame_size: server.max_frame_size,
        })
    }

    /// Binds a listener to the configured address and port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or binding fails.
    pub async fn bind(server: &ServerConfig) -> io::Result<TcpListener> {
        let ip: IpAddr = server
            .bind_address
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        TcpListener::bind(SocketAddr::new(ip, server.port)).await
    }

    /// Number of users with an open session.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.active_sessions()
    }

    /// Accepts connections until SIGINT or SIGTERM (Ctrl+C on Windows).
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be installed.
    #[cfg(unix)]
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(io::Error::other)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(io::Error::other)?;

        self.serve_until(listener, async move {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
            }
        })
        .await
    }

    /// Accepts connections until SIGINT or SIGTERM (Ctrl+C on Windows).
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handler cannot be installed.
    #[cfg(windows)]
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        self.serve_until(listener, async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
            }
        })
        .await
    }

    /// Accepts connections until `shutdown` completes.
    ///
    /// Connections that are open at that point are not waited for.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's address cannot be read.
    pub async fn serve_until<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            address = %listener.local_addr()?,
            backend = %self.backend_name,
            "Accepting connections"
        );

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Connection accepted");
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer, error = %e, "Failed to disable Nagle's algorithm");
                        }
                        let server = Arc::clone(&self);
                        tokio::spawn(connection::serve(server, stream, peer));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
            }
        }

        self.pool.shutdown();
        info!("Server stopped accepting connections");
        Ok(())
    }
}

impl fmt::Display for DatabaseServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatabaseServer(backend={})", self.backend_name)
    }
}

impl fmt::Debug for DatabaseServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseServer")
            .field("backend", &self.backend_name)
            .field("pool", &self.pool)
            .field("sessions", &self.sessions.active_sessions())
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}
