//! Ingest listener
//!
//! Accepts publisher connections over TCP and runs one pipeline per
//! connection until the server is told to shut down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::pipeline::{Connection, DRAIN_TIMEOUT};
use crate::state::AppState;

/// How long shutdown waits for live connections to finish tearing down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(DRAIN_TIMEOUT.as_secs() * 3);

/// Delay after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct IngestServer {
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
}

impl IngestServer {
    /// Bind the configured listen address
    pub async fn bind(
        state: Arc<AppState>,
        shutdown: CancellationToken,
    ) -> Result<Self, ServerError> {
        let addr = state.config.socket_addr();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            ServerError::Config(format!("cannot listen on {}: {}", addr, e))
        })?;
        Ok(Self {
            listener,
            state,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept publishers until shutdown, then wait for live connections
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            listener,
            state,
            shutdown,
        } = self;
        tracing::info!("Accepting publishers on {}", listener.local_addr()?);

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                        }
                        tasks.spawn(serve_connection(
                            state.clone(),
                            stream,
                            peer,
                            shutdown.child_token(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        state.shutdown();
        drop(listener);
        tracing::info!(
            "Listener closed, waiting for {} connection(s)",
            state.active_count()
        );

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                "{} connection(s) still running after {:?}, aborting",
                tasks.len(),
                SHUTDOWN_GRACE
            );
            tasks.shutdown().await;
        }

        tracing::info!(
            "Ingest server stopped after {} connection(s)",
            state.accepted_count()
        );
        Ok(())
    }
}

async fn serve_connection(
    state: Arc<AppState>,
    stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) {
    // Accepted in the same instant the listener was told to stop
    if state.is_shutdown() {
        tracing::debug!("Refusing publisher {} during shutdown", peer);
        return;
    }

    let connection = Connection::new(peer.to_string(), stream, cancel);
    let _registration = state.register(&connection.info);
    tracing::info!(
        "Publisher connected: {} from {} ({} active)",
        connection.info.id,
        peer,
        state.active_count()
    );

    let outcome = state.supervisor.handle(connection).await;
    tracing::debug!("Connection from {} finished: {}", peer, outcome);
}
