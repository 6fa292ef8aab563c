//! Listener, outbound dialer and active-connection registry (spec §4.5).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

use crate::config::{ConnectionConfig, TlsConfig};
use crate::error::{NetworkError, NetworkResult};
use crate::peer::PeerManager;
use crate::protocol::Endpoint;
use crate::transport::connection::{PeerConnection, Stream};
use crate::transport::tls;

/// Owns the listening socket, the outbound dialer, and the registry of
/// currently active links. Enforces `max_connections` on both inbound and
/// outbound paths.
pub struct ConnectionManager {
    config: ConnectionConfig,
    tls_config: TlsConfig,
    peer_manager: Arc<PeerManager>,
    connections: RwLock<HashMap<String, Arc<PeerConnection>>>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, tls_config: TlsConfig, peer_manager: Arc<PeerManager>) -> Arc<Self> {
        Arc::new(Self {
            config,
            tls_config,
            peer_manager,
            connections: RwLock::new(HashMap::new()),
            listener_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// Bind `listen_endpoint` and launch the accept loop as a background
    /// task. Calling `stop` cancels it and closes every active link.
    #[instrument(skip(self), fields(endpoint = %listen_endpoint))]
    pub async fn start(self: &Arc<Self>, listen_endpoint: Endpoint) -> NetworkResult<()> {
        let listener = TcpListener::bind(SocketAddr::from(listen_endpoint)).await?;
        let manager = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            tracing::info!("connection manager accept loop shutting down");
                            break;
                        }
                        accepted = listener.accept() => {
                            match accepted {
                                Ok((stream, addr)) => manager.handle_inbound(stream, addr.into()).await,
                                Err(e) => {
                                    tracing::warn!(error = %e, "accept failed, pausing before retry");
                                    tokio::time::sleep(manager.config.retry_delay).await;
                                }
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );
        *self.listener_task.lock().await = Some(handle);
        Ok(())
    }

    async fn handle_inbound(self: &Arc<Self>, stream: TcpStream, endpoint: Endpoint) {
        if self.connections.read().await.len() >= self.config.max_connections {
            tracing::debug!(%endpoint, "inbound connection rejected: at capacity");
            drop(stream);
            return;
        }

        let stream = if self.tls_config.enabled {
            match tls::build_acceptor(&self.tls_config) {
                Ok(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => Stream::TlsServer(Box::new(tls_stream)),
                    Err(e) => {
                        tracing::warn!(%endpoint, error = %e, "TLS accept failed");
                        return;
                    }
                },
                Err(e) => {
                    tracing::warn!(%endpoint, error = %e, "TLS acceptor unavailable");
                    return;
                }
            }
        } else {
            Stream::Plain(stream)
        };

        let id = uuid::Uuid::new_v4().to_string();
        let conn = Arc::new(PeerConnection::new(id.clone(), endpoint, stream));
        self.connections.write().await.insert(id.clone(), conn);
        self.peer_manager.add(&id, endpoint).await;
        self.peer_manager.update_connection_status(&id, true).await;
        tracing::info!(%endpoint, peer = %id, "inbound connection accepted");
    }

    /// Dial `endpoint`. Returns `Ok(None)` if at capacity, `Err(Timeout)`
    /// if the connect deadline elapses.
    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub async fn connect(
        self: &Arc<Self>,
        endpoint: Endpoint,
        timeout: Duration,
    ) -> NetworkResult<Option<Arc<PeerConnection>>> {
        if self.connections.read().await.len() >= self.config.max_connections {
            return Ok(None);
        }

        let tcp = match tokio::time::timeout(timeout, TcpStream::connect(SocketAddr::from(endpoint))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(NetworkError::Timeout),
        };

        let stream = if self.tls_config.enabled {
            let connector = tls::build_connector(&self.tls_config)?;
            let server_name = tokio_rustls::rustls::ServerName::IpAddress(endpoint.ip);
            let tls_stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| NetworkError::Tls(e.to_string()))?;
            Stream::TlsClient(Box::new(tls_stream))
        } else {
            Stream::Plain(tcp)
        };

        let id = uuid::Uuid::new_v4().to_string();
        let conn = Arc::new(PeerConnection::new(id.clone(), endpoint, stream));
        self.connections.write().await.insert(id.clone(), Arc::clone(&conn));
        self.peer_manager.add(&id, endpoint).await;
        self.peer_manager.update_connection_status(&id, true).await;
        tracing::info!(%endpoint, peer = %id, "outbound connection established");
        Ok(Some(conn))
    }

    /// Snapshot of every currently registered link.
    pub async fn get_active_connections(&self) -> Vec<Arc<PeerConnection>> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn get_connection(&self, id: &str) -> Option<Arc<PeerConnection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Remove and close a link by peer id. A no-op for unknown ids.
    pub async fn disconnect(&self, id: &str) {
        let conn = self.connections.write().await.remove(id);
        if let Some(conn) = conn {
            conn.close().await;
            self.peer_manager.update_connection_status(id, false).await;
        }
    }

    /// Cancel the accept loop and close every active connection.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.listener_task.lock().await.take() {
            let _ = handle.await;
        }
        let conns: Vec<Arc<PeerConnection>> = self.connections.write().await.drain().map(|(_, v)| v).collect();
        for conn in conns {
            conn.close().await;
        }
    }
}
