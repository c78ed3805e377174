use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] crate::network::protocol::DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] crate::network::protocol::EncodeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RelayError {
    /// True when the underlying cause is the peer going away. Disconnects
    /// are the normal end of a connection, not a fault.
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            RelayError::Network(e) => matches!(
                e.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
