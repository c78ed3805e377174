use crate::network::peer::PeerConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Process-wide map of live connections.
///
/// All mutation and snapshot production happens inside one lock, so a
/// broadcast never observes a half-added or half-removed peer. Sending to
/// the snapshot happens outside the lock.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<Uuid, Arc<PeerConnection>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, conn: Arc<PeerConnection>) {
        let mut peers = self.peers.write().await;
        debug!("Registered peer {} ({})", conn.id(), conn.addr());
        peers.insert(conn.id(), conn);
    }

    pub async fn unregister(&self, id: Uuid) -> Option<Arc<PeerConnection>> {
        let mut peers = self.peers.write().await;
        let removed = peers.remove(&id);
        if removed.is_some() {
            debug!("Unregistered peer {}", id);
        }
        removed
    }

    /// Point-in-time member list without `id`, sorted by connection id for
    /// a deterministic fan-out order. Returns live handles, not copies.
    pub async fn snapshot_excluding(&self, id: Uuid) -> Vec<Arc<PeerConnection>> {
        let peers = self.peers.read().await;
        let mut snapshot: Vec<_> = peers
            .values()
            .filter(|conn| conn.id() != id)
            .cloned()
            .collect();
        snapshot.sort_by_key(|conn| conn.id());
        snapshot
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }
}
