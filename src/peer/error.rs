use thiserror::Error;

/// Errors that can occur on a peer connection.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a malformed handshake.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The handshake carried a different peer id than expected.
    #[error("peer id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: u32, actual: u32 },

    /// An inbound handshake named a peer that is not in the roster.
    #[error("unknown peer id: {0}")]
    UnknownPeer(u32),

    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Received an unknown message type byte.
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,
}
