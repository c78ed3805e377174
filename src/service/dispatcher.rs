use crate::network::peer::PeerConnection;
use crate::network::protocol::{self, Ack, FileMessage, Frame, Request};
use crate::network::registry::PeerRegistry;
use crate::service::storage::FileStore;
use crate::{RelayError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-connection request loop.
///
/// Reads one frame at a time and dispatches it until the peer disconnects
/// or sends something unusable, then unregisters the connection and
/// releases it. Frames from one peer are processed strictly in arrival
/// order.
pub async fn run(conn: Arc<PeerConnection>, registry: Arc<PeerRegistry>, storage: Arc<FileStore>) {
    let peer_id = conn.id();

    loop {
        let bytes = match conn.receive_frame().await {
            Ok(bytes) => bytes,
            Err(e) if e.is_disconnect() => {
                debug!("Peer {} disconnected", peer_id);
                break;
            }
            Err(RelayError::Decode(e)) => {
                warn!("Rejecting frame from peer {}: {}", peer_id, e);
                send_error_ack(&conn, &e.to_string()).await;
                break;
            }
            Err(e) => {
                warn!("Read error on peer {}: {}", peer_id, e);
                break;
            }
        };

        let request = match protocol::decode(&bytes, conn.max_payload_len()) {
            Ok(Frame::Request(request)) => request,
            Ok(Frame::Ack(_)) => {
                warn!("Peer {} sent an ack where a request was expected", peer_id);
                send_error_ack(&conn, "Expected a request frame").await;
                break;
            }
            Err(e) => {
                warn!("Malformed frame from peer {}: {}", peer_id, e);
                send_error_ack(&conn, &e.to_string()).await;
                break;
            }
        };

        let outcome = match request {
            Request::Store(message) => handle_store(&conn, &storage, message).await,
            Request::Broadcast(message) => handle_broadcast(&conn, &registry, message).await,
        };
        if let Err(e) = outcome {
            if e.is_disconnect() {
                debug!("Peer {} disconnected mid-request", peer_id);
            } else {
                warn!("Closing connection to peer {}: {}", peer_id, e);
            }
            break;
        }
    }

    registry.unregister(peer_id).await;
    conn.close().await;
}

/// Persist the file and ack. A storage failure is reported back as an
/// error ack; the connection stays open for further requests.
async fn handle_store(
    conn: &PeerConnection,
    storage: &FileStore,
    message: FileMessage,
) -> Result<()> {
    let ack = match storage
        .store(&message.file_name, &message.file_type, &message.content)
        .await
    {
        Ok(_path) => Ack::ok("stored"),
        Err(e) => {
            warn!("Store from peer {} failed: {}", conn.id(), e);
            Ack::error(e.to_string())
        }
    };
    send_ack(conn, ack).await
}

/// Fan the message out to every other registered peer, then summarize the
/// outcome to the originator.
async fn handle_broadcast(
    conn: &PeerConnection,
    registry: &PeerRegistry,
    message: FileMessage,
) -> Result<()> {
    let peers = registry.snapshot_excluding(conn.id()).await;
    let total = peers.len();
    let frame = protocol::encode(&Frame::Request(Request::Broadcast(message)))?;

    let delivered = broadcast_to(&peers, &frame).await;
    info!(
        "Broadcast from peer {}: delivered {}/{}",
        conn.id(),
        delivered,
        total
    );

    let summary = format!("delivered {}/{}", delivered, total);
    let ack = if delivered == total {
        Ack::ok(summary)
    } else {
        Ack::error(summary)
    };
    send_ack(conn, ack).await
}

/// Best-effort fan-out: a failed delivery is logged and skipped so the
/// remaining peers still get the frame. Returns the delivered count.
pub(crate) async fn broadcast_to(peers: &[Arc<PeerConnection>], frame: &[u8]) -> usize {
    let mut delivered = 0;
    for peer in peers {
        match peer.send(frame).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!("Failed to deliver broadcast to peer {}: {}", peer.id(), e),
        }
    }
    delivered
}

async fn send_ack(conn: &PeerConnection, ack: Ack) -> Result<()> {
    let frame = protocol::encode(&Frame::Ack(ack))?;
    conn.send(&frame).await
}

/// Best-effort diagnostic before closing; failure to send it is ignored.
async fn send_error_ack(conn: &PeerConnection, message: &str) {
    if let Err(e) = send_ack(conn, Ack::error(message)).await {
        debug!("Could not send error ack to peer {}: {}", conn.id(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::peer::testing::tcp_pair;
    use crate::network::protocol::DEFAULT_MAX_PAYLOAD_LEN;
    use std::time::Duration;

    #[tokio::test]
    async fn test_broadcast_skips_broken_peer_and_still_delivers() {
        let (client_b, server_b) = tcp_pair().await;
        let (client_c, server_c) = tcp_pair().await;
        let b = Arc::new(PeerConnection::new(server_b, DEFAULT_MAX_PAYLOAD_LEN).unwrap());
        let c = Arc::new(PeerConnection::new(server_c, DEFAULT_MAX_PAYLOAD_LEN).unwrap());

        // Break B's transport hard: linger(0) turns the drop into an RST,
        // so the server side sees a dead socket rather than a clean FIN.
        client_b.set_linger(Some(Duration::ZERO)).unwrap();
        drop(client_b);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let frame = protocol::encode(&Frame::Request(Request::Broadcast(FileMessage::new(
            "b.png",
            "png",
            vec![7u8; 17],
        ))))
        .unwrap();

        // B comes first so the failure must not short-circuit C.
        let delivered = broadcast_to(&[b, c], &frame).await;
        assert_eq!(delivered, 1);

        let receiver = PeerConnection::new(client_c, DEFAULT_MAX_PAYLOAD_LEN).unwrap();
        let received = receiver.receive_frame().await.unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn test_partial_delivery_is_reported_as_error_ack() {
        let (client_a, server_a) = tcp_pair().await;
        let (client_b, server_b) = tcp_pair().await;
        let (client_c, server_c) = tcp_pair().await;
        let a = Arc::new(PeerConnection::new(server_a, DEFAULT_MAX_PAYLOAD_LEN).unwrap());
        let b = Arc::new(PeerConnection::new(server_b, DEFAULT_MAX_PAYLOAD_LEN).unwrap());
        let c = Arc::new(PeerConnection::new(server_c, DEFAULT_MAX_PAYLOAD_LEN).unwrap());

        let registry = PeerRegistry::new();
        registry.register(a.clone()).await;
        registry.register(b).await;
        registry.register(c).await;

        client_b.set_linger(Some(Duration::ZERO)).unwrap();
        drop(client_b);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let message = FileMessage::new("b.png", "png", vec![7u8; 17]);
        handle_broadcast(&a, &registry, message.clone())
            .await
            .unwrap();

        let originator = PeerConnection::new(client_a, DEFAULT_MAX_PAYLOAD_LEN).unwrap();
        let bytes = originator.receive_frame().await.unwrap();
        match protocol::decode(&bytes, DEFAULT_MAX_PAYLOAD_LEN).unwrap() {
            Frame::Ack(ack) => {
                assert_eq!(ack.status, crate::network::protocol::AckStatus::Error);
                assert_eq!(ack.message, "delivered 1/2");
            }
            other => panic!("expected ack, got {}", other.kind_name()),
        }

        let survivor = PeerConnection::new(client_c, DEFAULT_MAX_PAYLOAD_LEN).unwrap();
        let bytes = survivor.receive_frame().await.unwrap();
        match protocol::decode(&bytes, DEFAULT_MAX_PAYLOAD_LEN).unwrap() {
            Frame::Request(Request::Broadcast(received)) => assert_eq!(received, message),
            other => panic!("expected broadcast, got {}", other.kind_name()),
        }
    }

    #[tokio::test]
    async fn test_broadcast_to_nobody_delivers_nothing() {
        let frame =
            protocol::encode(&Frame::Request(Request::Broadcast(FileMessage::new(
                "a", "txt", &b"x"[..],
            ))))
            .unwrap();
        assert_eq!(broadcast_to(&[], &frame).await, 0);
    }
}
