use crate::network::protocol::{self, DecodeError, HEADER_LEN};
use crate::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// One live transport to a peer.
///
/// The read side is only ever touched by the connection's own dispatcher.
/// The write side is shared with every other dispatcher doing broadcast
/// fan-out, so writes go through a lock held for the whole frame.
pub struct PeerConnection {
    id: Uuid,
    addr: SocketAddr,
    max_payload_len: usize,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: AtomicBool,
}

impl PeerConnection {
    pub fn new(stream: TcpStream, max_payload_len: usize) -> Result<Self> {
        let addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            id: Uuid::new_v4(),
            addr,
            max_payload_len,
            reader: Mutex::new(read_half),
            writer: Mutex::new(write_half),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    /// Read one complete frame, header plus payload. `read_exact` keeps
    /// reading until every byte has arrived, so a message split across
    /// reads is reassembled and a message larger than one read chunk is
    /// never truncated. Oversized length prefixes are rejected before the
    /// payload is allocated.
    pub async fn receive_frame(&self) -> Result<Vec<u8>> {
        let mut reader = self.reader.lock().await;

        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;

        let len = protocol::payload_len(&header);
        if len > self.max_payload_len {
            return Err(DecodeError::Oversized {
                len,
                max: self.max_payload_len,
            }
            .into());
        }

        let mut frame = vec![0u8; HEADER_LEN + len];
        frame[..HEADER_LEN].copy_from_slice(&header);
        reader.read_exact(&mut frame[HEADER_LEN..]).await?;
        Ok(frame)
    }

    /// Write one already-encoded frame. The lock is held across the whole
    /// write and flush, so a direct reply and a concurrently arriving
    /// broadcast never interleave their bytes.
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut down the write half. Calling this more than once is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of connection {} returned: {}", self.id, e);
        }
    }
}
