pub mod client;
pub mod peer;
pub mod protocol;
pub mod registry;

pub use client::RelayClient;
pub use peer::PeerConnection;
pub use protocol::{Ack, AckStatus, FileMessage, Frame, Request};
pub use registry::PeerRegistry;
