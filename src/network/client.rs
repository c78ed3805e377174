use crate::network::peer::PeerConnection;
use crate::network::protocol::{self, Ack, FileMessage, Frame, Request, DEFAULT_MAX_PAYLOAD_LEN};
use crate::{RelayError, Result};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::info;

/// Outbound side of the relay protocol: dials the server and runs the same
/// framed request/ack dialog over the shared codec. Requests are strictly
/// sequential; the frame after a request must be its ack.
pub struct RelayClient {
    conn: PeerConnection,
}

impl RelayClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let conn = PeerConnection::new(stream, DEFAULT_MAX_PAYLOAD_LEN)?;
        info!("Connected to relay at {}", conn.addr());
        Ok(Self { conn })
    }

    /// Push a file to the server for storage.
    pub async fn store(&self, message: FileMessage) -> Result<Ack> {
        self.request(Request::Store(message)).await
    }

    /// Ask the server to relay a file to every other connected peer.
    pub async fn broadcast(&self, message: FileMessage) -> Result<Ack> {
        self.request(Request::Broadcast(message)).await
    }

    /// Wait for a file relayed by some other peer.
    pub async fn next_broadcast(&self) -> Result<FileMessage> {
        match self.next_frame().await? {
            Frame::Request(Request::Broadcast(message)) => Ok(message),
            other => Err(RelayError::Protocol(format!(
                "Expected a broadcast frame, got {}",
                other.kind_name()
            ))),
        }
    }

    pub async fn close(&self) {
        self.conn.close().await;
    }

    async fn request(&self, request: Request) -> Result<Ack> {
        let frame = protocol::encode(&Frame::Request(request))?;
        self.conn.send(&frame).await?;
        match self.next_frame().await? {
            Frame::Ack(ack) => Ok(ack),
            other => Err(RelayError::Protocol(format!(
                "Expected an ack frame, got {}",
                other.kind_name()
            ))),
        }
    }

    async fn next_frame(&self) -> Result<Frame> {
        let bytes = self.conn.receive_frame().await?;
        Ok(protocol::decode(&bytes, self.conn.max_payload_len())?)
    }
}
