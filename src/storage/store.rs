use super::error::StorageError;
use crate::peer::Bitfield;
use bytes::Bytes;
use parking_lot::RwLock;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// On-disk store for the pieces of the shared file.
///
/// A seed opens the existing file with a full bitfield; a leecher
/// creates (or extends) the file to its final length with an empty
/// bitfield. Piece writes are synced to stable storage before the
/// corresponding bitfield bit is set, so a set bit always refers to
/// durable data.
#[derive(Debug)]
pub struct PieceStore {
    file: Mutex<File>,
    bits: RwLock<Bitfield>,
    file_size: u64,
    piece_size: u64,
    piece_count: u32,
}

impl PieceStore {
    /// Opens the store inside `dir`, creating the directory if needed.
    pub async fn open(
        dir: &Path,
        file_name: &str,
        file_size: u64,
        piece_size: u64,
        has_file: bool,
    ) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(file_name);
        let piece_count = file_size.div_ceil(piece_size) as u32;

        let file = if has_file {
            if !tokio::fs::try_exists(&path).await? {
                return Err(StorageError::FileNotFound(path.display().to_string()));
            }
            OpenOptions::new().read(true).write(true).open(&path).await?
        } else {
            let f = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .await?;
            f.set_len(file_size).await?;
            f
        };

        let bits = if has_file {
            Bitfield::full(piece_count as usize)
        } else {
            Bitfield::new(piece_count as usize)
        };

        Ok(Self {
            file: Mutex::new(file),
            bits: RwLock::new(bits),
            file_size,
            piece_size,
            piece_count,
        })
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    /// Length of the piece at `index`; only the last piece may be short.
    pub fn piece_len(&self, index: u32) -> u64 {
        if index + 1 == self.piece_count {
            let remainder = self.file_size % self.piece_size;
            if remainder == 0 {
                self.piece_size
            } else {
                remainder
            }
        } else {
            self.piece_size
        }
    }

    pub fn has(&self, index: u32) -> bool {
        self.bits.read().has(index as usize)
    }

    /// Number of pieces currently held.
    pub fn count(&self) -> usize {
        self.bits.read().count()
    }

    pub fn is_complete(&self) -> bool {
        self.bits.read().is_complete()
    }

    /// Snapshot of the local bitfield.
    pub fn bitfield(&self) -> Bitfield {
        self.bits.read().clone()
    }

    /// Reads a piece we hold.
    pub async fn read_piece(&self, index: u32) -> Result<Bytes, StorageError> {
        if index >= self.piece_count {
            return Err(StorageError::InvalidPieceIndex(index));
        }
        if !self.has(index) {
            return Err(StorageError::PieceUnavailable(index));
        }

        let len = self.piece_len(index) as usize;
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(index as u64 * self.piece_size))
            .await?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Writes a piece and marks it held.
    ///
    /// Returns `false` without touching the file when the piece is
    /// already present, so duplicate deliveries are idempotent.
    pub async fn write_piece(&self, index: u32, data: &[u8]) -> Result<bool, StorageError> {
        if index >= self.piece_count {
            return Err(StorageError::InvalidPieceIndex(index));
        }

        let expected = self.piece_len(index);
        if data.len() as u64 != expected {
            return Err(StorageError::InvalidPieceLength {
                piece: index,
                expected,
                actual: data.len(),
            });
        }

        if self.has(index) {
            return Ok(false);
        }

        {
            let mut file = self.file.lock().await;
            file.seek(SeekFrom::Start(index as u64 * self.piece_size))
                .await?;
            file.write_all(data).await?;
            file.sync_data().await?;
        }

        let mut bits = self.bits.write();
        if bits.has(index as usize) {
            return Ok(false);
        }
        bits.set(index as usize);
        Ok(true)
    }
}
