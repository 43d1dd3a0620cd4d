//! Loopback TCP server for the statistics bridge.
//!
//! Owns the accept loop:
//! - accept a client
//! - one bounded read
//! - run the request pipeline (on the blocking pool, it calls the engine)
//! - write the response and close
//!
//! By default clients are served strictly one after another. A slow client
//! delays everyone behind it until the read timeout fires.

mod connection;
mod listener;

pub use connection::{read_request, write_response};

use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use pgscale_core::executor::{ExecutorError, QueryExecutor};
use pgscale_core::pipeline::{Handled, Pipeline};

/// Errors that end the server loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to create socket for {addr}: {source}")]
    Socket {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("can't bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("can't listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("statistics engine failed: {0}")]
    Engine(#[from] ExecutorError),
}

/// How accepted connections are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServeMode {
    /// Handle each connection to completion before accepting the next.
    #[default]
    Sequential,
    /// Spawn a task per connection.
    PerConnection,
}

/// Pause before accepting again after `accept` itself failed (e.g. EMFILE).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Default cap on connections handled at once in per-connection mode.
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Everything the server needs besides the engine.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub backlog: u32,
    pub read_timeout: Option<Duration>,
    pub mode: ServeMode,
    /// Connections handled concurrently in [`ServeMode::PerConnection`].
    /// Further clients wait in the accept queue.
    pub max_connections: usize,
    pub pipeline: Pipeline,
}

/// State shared by every connection handler.
struct Shared {
    pipeline: Arc<Pipeline>,
    executor: Arc<dyn QueryExecutor>,
    read_timeout: Option<Duration>,
}

/// A bound bridge server, ready to run.
pub struct Server {
    listener: TcpListener,
    mode: ServeMode,
    slots: Arc<Semaphore>,
    shared: Arc<Shared>,
}

impl Server {
    /// Bind the listening socket. Failure here is fatal to the caller.
    pub fn bind(
        settings: ServerSettings,
        executor: Arc<dyn QueryExecutor>,
    ) -> Result<Self, ServerError> {
        let listener = listener::bind(settings.addr, settings.backlog)?;
        let shared = Shared {
            pipeline: Arc::new(settings.pipeline),
            executor,
            read_timeout: settings.read_timeout,
        };
        Ok(Self {
            listener,
            mode: settings.mode,
            slots: Arc::new(Semaphore::new(settings.max_connections.max(1))),
            shared: Arc::new(shared),
        })
    }

    /// Address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` resolves or the engine reports a fatal error.
    ///
    /// Shutdown is only observed while waiting for the next client; a
    /// connection being handled is always finished first.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<ExecutorError>();

        if let Ok(addr) = self.local_addr() {
            info!("pgscale bridge listening on http://{} ({:?})", addr, self.mode);
        }

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, closing listener");
                    return Ok(());
                }
                Some(e) = fatal_rx.recv() => {
                    return Err(ServerError::Engine(e));
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            match self.mode {
                ServeMode::Sequential => {
                    if let Some(e) = serve_connection(Arc::clone(&self.shared), stream, peer).await {
                        return Err(ServerError::Engine(e));
                    }
                }
                ServeMode::PerConnection => {
                    if self.slots.available_permits() == 0 {
                        debug!(%peer, "All connection slots busy, waiting");
                    }
                    let Ok(permit) = Arc::clone(&self.slots).acquire_owned().await else {
                        return Ok(());
                    };
                    let shared = Arc::clone(&self.shared);
                    let fatal_tx = fatal_tx.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Some(e) = serve_connection(shared, stream, peer).await {
                            let _ = fatal_tx.send(e);
                        }
                    });
                }
            }
        }
    }
}

/// Handle one client from first read to close. Returns the engine failure
/// if the bridge has to stop.
async fn serve_connection(
    shared: Arc<Shared>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Option<ExecutorError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("connection", %request_id, %peer);

    async move {
        info!("Client connected");

        let raw =
            read_request(&mut stream, shared.pipeline.buffer_size(), shared.read_timeout).await;
        debug!(">>>>>>>>>\n{}>>>>>>>>>", String::from_utf8_lossy(&raw));

        let pipeline = Arc::clone(&shared.pipeline);
        let executor = Arc::clone(&shared.executor);
        let blocking = tokio::task::spawn_blocking(move || pipeline.handle(&raw, &*executor));
        let handled = match blocking.await {
            Ok(handled) => handled,
            Err(e) => {
                error!("Request handler did not complete: {}", e);
                Handled::internal_error()
            }
        };

        info!(status = handled.response.status().code(), "Responding");
        trace!(
            "<<<<<<<<<\n{}<<<<<<<<<",
            String::from_utf8_lossy(&handled.response.to_bytes())
        );
        write_response(&mut stream, &handled.response).await;

        handled.fatal
    }
    .instrument(span)
    .await
}
