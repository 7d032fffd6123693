// Server: exposes the engine's ingestion and query APIs over a Unix socket

mod ipc;
mod signals;

pub use ipc::{read_frame, write_frame, IpcClient, IpcRequest, IpcResponse, IpcServer, MAX_FRAME_SIZE};
pub use signals::{ShutdownSignal, SignalHandler};

use crate::config::{expand_tilde, ServerConfig};
use crate::engine::SearchEngine;
use crate::error::{ErrorKind, QuarryError, Result};
use crate::retrieval::SearchQuery;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Accept loop over a shared engine
pub struct Server {
    engine: Arc<SearchEngine>,
    config: ServerConfig,
}

impl Server {
    pub fn new(engine: Arc<SearchEngine>, config: ServerConfig) -> Self {
        Self { engine, config }
    }

    /// Serve until SIGTERM, SIGINT or SIGHUP
    pub async fn run(self) -> Result<()> {
        let mut signal_handler = SignalHandler::new()?;
        self.run_until(async move {
            signal_handler.wait().await;
        })
        .await
    }

    /// Serve until `shutdown` completes, then drain in-flight requests
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut ipc_server = IpcServer::new(expand_tilde(&self.config.socket_path));
        ipc_server.bind().await?;

        let permits = Arc::new(Semaphore::new(self.config.max_connections.max(1)));
        let timeout = self.config.request_timeout();
        let mut connections = JoinSet::new();
        let mut accept_failures = 0u32;
        tokio::pin!(shutdown);

        tracing::info!(
            "Server started (max {} connections, {:?} request timeout)",
            self.config.max_connections,
            timeout
        );

        loop {
            tokio::select! {
                accepted = ipc_server.accept() => {
                    let mut stream = match accepted {
                        Ok(stream) => stream,
                        Err(e) => {
                            accept_failures = accept_failures.saturating_add(1);
                            let delay = accept_backoff(accept_failures);
                            tracing::warn!("Accept failed: {} (retrying in {:?})", e, delay);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    };
                    accept_failures = 0;

                    let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                        tracing::warn!("Connection limit reached, rejecting client");
                        connections.spawn(async move {
                            let busy = QuarryError::Unavailable("server busy, retry later".to_string());
                            if let Err(e) = write_frame(&mut stream, &IpcResponse::failure(&busy)).await {
                                tracing::debug!("Failed to notify rejected client: {}", e);
                            }
                        });
                        continue;
                    };

                    let engine = Arc::clone(&self.engine);
                    connections.spawn(async move {
                        let _permit = permit;
                        if let Err(e) = handle_client(stream, engine, timeout).await {
                            tracing::error!("Client handler error: {}", e);
                        }
                    });
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }

                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
            }
        }

        ipc_server.shutdown()?;
        while connections.join_next().await.is_some() {}
        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// One request, one response
async fn handle_client(
    mut stream: UnixStream,
    engine: Arc<SearchEngine>,
    timeout: Duration,
) -> Result<()> {
    let request: IpcRequest = match read_frame(&mut stream).await {
        Ok(request) => request,
        Err(e @ QuarryError::Json { .. }) => {
            tracing::debug!("Malformed request: {}", e);
            return write_frame(&mut stream, &IpcResponse::failure(&e)).await;
        }
        Err(e) => return Err(e),
    };

    let name = request.name();
    tracing::debug!("Handling {} request", name);

    let response = match tokio::time::timeout(timeout, dispatch(&engine, request)).await {
        Ok(Ok(data)) => IpcResponse::success_with_data(data),
        Ok(Err(e)) => {
            if e.kind() == ErrorKind::Internal {
                tracing::error!("{} request failed: {}", name, e);
            } else {
                tracing::debug!("{} request failed: {}", name, e);
            }
            IpcResponse::failure(&e)
        }
        Err(_) => {
            tracing::warn!("{} request timed out after {:?}", name, timeout);
            IpcResponse::failure(&QuarryError::timeout(name, timeout.as_millis() as u64))
        }
    };

    write_frame(&mut stream, &response).await
}

async fn dispatch(engine: &SearchEngine, request: IpcRequest) -> Result<serde_json::Value> {
    match request {
        IpcRequest::Index(ingest) => to_data(&engine.ingest(ingest).await?),
        IpcRequest::Clear { scope } => to_data(&engine.clear(scope).await?),
        IpcRequest::Search(search) => to_data(&engine.search(&SearchQuery::from(search)).await?),
        IpcRequest::Get { id } => to_data(&engine.get(&id).await?),
        IpcRequest::Delete { id } => {
            engine.delete(&id).await?;
            Ok(serde_json::json!({ "deleted": id }))
        }
        IpcRequest::Refresh => {
            engine.refresh().await;
            Ok(serde_json::json!({ "refreshed": true }))
        }
        IpcRequest::Status => to_data(&engine.status().await?),
    }
}

fn to_data<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| QuarryError::Internal(format!("Failed to encode response: {}", e)))
}

/// Delay before the next accept after `failures` consecutive errors
///
/// Doubles from 50ms and stops at 1s, so a persistent error such as fd
/// exhaustion cannot spin the loop.
fn accept_backoff(failures: u32) -> Duration {
    const BASE_MS: u64 = 50;
    const MAX_MS: u64 = 1000;
    let exponent = failures.saturating_sub(1).min(10);
    Duration::from_millis((BASE_MS << exponent).min(MAX_MS))
}
