use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("piece {0} not available")]
    PieceUnavailable(u32),

    #[error("invalid length for piece {piece}: expected {expected}, got {actual}")]
    InvalidPieceLength {
        piece: u32,
        expected: u64,
        actual: usize,
    },
}
