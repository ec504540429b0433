//! Network error taxonomy

use thiserror::Error;

/// Errors surfaced by the framing and connection layer
#[derive(Debug, Error)]
pub enum NetError {
    /// Peer closed the stream, or a read/write/flush failed.
    /// Always fatal to the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The length header could not be decoded. Fatal to the connection.
    #[error("frame decode error: {0}")]
    FrameDecode(String),

    /// A well-formed frame carried a payload that is not a valid message.
    /// The message is dropped and the connection stays open.
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

impl NetError {
    /// Whether this error must tear the connection down
    pub fn is_fatal(&self) -> bool {
        !matches!(self, NetError::Protocol(_))
    }
}

impl From<std::io::Error> for NetError {
    fn from(_: std::io::Error) -> Self {
        NetError::ConnectionClosed
    }
}
