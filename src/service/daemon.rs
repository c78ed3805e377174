use crate::config::Settings;
use crate::network::peer::PeerConnection;
use crate::network::registry::PeerRegistry;
use crate::service::{dispatcher, storage::FileStore};
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// The relay server: accepts connections, registers them, and runs one
/// dispatcher task per peer.
pub struct RelayDaemon {
    settings: Arc<Settings>,
    registry: Arc<PeerRegistry>,
    storage: Arc<FileStore>,
    listener: TcpListener,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayDaemon {
    /// Bind the listen socket and prepare shared state. Port 0 binds an
    /// ephemeral port, observable through `local_addr`.
    pub async fn bind(settings: Settings) -> Result<Self> {
        let settings = Arc::new(settings);
        let (shutdown_tx, _) = broadcast::channel(1);
        let storage = Arc::new(FileStore::new(settings.storage_dir()?).await?);
        let listener = TcpListener::bind(settings.bind_address()).await?;
        info!("Relay listening on {}", listener.local_addr()?);

        Ok(Self {
            settings,
            registry: Arc::new(PeerRegistry::new()),
            storage,
            listener,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Sending on this channel stops the accept loop. In-flight dispatcher
    /// tasks are not torn down; each drains on its next read.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        if let Err(e) = self.accept_peer(stream).await {
                            warn!("Failed to set up connection from {}: {}", addr, e);
                        }
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Register the peer, then hand it its own dispatcher task. No
    /// handshake: the request kind is decided per message, so one
    /// connection can alternate store and broadcast freely.
    async fn accept_peer(&self, stream: TcpStream) -> Result<()> {
        let conn = Arc::new(PeerConnection::new(
            stream,
            self.settings.network.max_frame_len,
        )?);
        self.registry.register(conn.clone()).await;

        let registry = self.registry.clone();
        let storage = self.storage.clone();
        tokio::spawn(async move {
            dispatcher::run(conn, registry, storage).await;
        });
        Ok(())
    }
}
