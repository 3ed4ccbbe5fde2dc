use super::bitfield::Bitfield;
use super::error::PeerError;
use super::message::{Message, PeerId};
use super::transport::MessageWriter;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::Rng as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::net::tcp::OwnedWriteHalf;

/// State for one connected remote peer.
///
/// A link owns the write half of the socket (the read half lives with
/// the link's receive loop) together with the four choke/interest flags,
/// the remote's bitfield, and the byte counter used for download-rate
/// measurement.
///
/// All flag-bearing send methods emit a message only when the flag
/// actually changes, so redundant CHOKE/UNCHOKE/INTERESTED traffic is
/// never put on the wire even when two schedulers race.
pub struct PeerLink {
    id: PeerId,
    writer: tokio::sync::Mutex<MessageWriter<OwnedWriteHalf>>,
    /// Remote has choked us; we must not send REQUEST.
    am_choked: AtomicBool,
    /// We have advertised interest to the remote.
    am_interested: AtomicBool,
    /// We have choked the remote; we must not serve PIECE.
    peer_choked: AtomicBool,
    /// Remote has advertised interest to us.
    peer_interested: AtomicBool,
    pieces: RwLock<Bitfield>,
    downloaded: AtomicU64,
    last_reset: Mutex<Instant>,
}

impl PeerLink {
    /// Creates a link for a freshly handshaken connection.
    ///
    /// Both sides start choked and not interested.
    pub fn new(id: PeerId, writer: MessageWriter<OwnedWriteHalf>, piece_count: usize) -> Self {
        Self {
            id,
            writer: tokio::sync::Mutex::new(writer),
            am_choked: AtomicBool::new(true),
            am_interested: AtomicBool::new(false),
            peer_choked: AtomicBool::new(true),
            peer_interested: AtomicBool::new(false),
            pieces: RwLock::new(Bitfield::new(piece_count)),
            downloaded: AtomicU64::new(0),
            last_reset: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Sends a message on this link.
    ///
    /// The writer lock serializes sends so frames never interleave.
    pub async fn send(&self, message: &Message) -> Result<(), PeerError> {
        self.writer.lock().await.send_message(message).await
    }

    pub fn am_choked(&self) -> bool {
        self.am_choked.load(Ordering::SeqCst)
    }

    pub fn set_am_choked(&self, choked: bool) {
        self.am_choked.store(choked, Ordering::SeqCst);
    }

    pub fn am_interested(&self) -> bool {
        self.am_interested.load(Ordering::SeqCst)
    }

    pub fn peer_choked(&self) -> bool {
        self.peer_choked.load(Ordering::SeqCst)
    }

    pub fn peer_interested(&self) -> bool {
        self.peer_interested.load(Ordering::SeqCst)
    }

    pub fn set_peer_interested(&self, interested: bool) {
        self.peer_interested.store(interested, Ordering::SeqCst);
    }

    /// Chokes the remote. Emits CHOKE only if it was unchoked.
    pub async fn send_choke(&self) -> Result<(), PeerError> {
        if self
            .peer_choked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.send(&Message::Choke).await?;
        }
        Ok(())
    }

    /// Unchokes the remote. Emits UNCHOKE only if it was choked.
    pub async fn send_unchoke(&self) -> Result<(), PeerError> {
        if self
            .peer_choked
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.send(&Message::Unchoke).await?;
        }
        Ok(())
    }

    /// Recomputes whether the remote holds anything we lack and, if the
    /// answer differs from what we last advertised, sends the matching
    /// INTERESTED / NOT_INTERESTED.
    pub async fn update_interest(&self, ours: &Bitfield) -> Result<(), PeerError> {
        let wants = self.has_interesting(ours);
        let flipped = if wants {
            self.am_interested
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        } else {
            self.am_interested
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        };

        if flipped {
            let msg = if wants {
                Message::Interested
            } else {
                Message::NotInterested
            };
            self.send(&msg).await?;
        }
        Ok(())
    }

    /// Replaces the remote bitfield from a received BITFIELD payload.
    pub fn apply_bitfield(&self, payload: Bytes) {
        let piece_count = self.pieces.read().len();
        *self.pieces.write() = Bitfield::from_bytes(payload, piece_count);
    }

    /// Marks one piece in the remote bitfield from a received HAVE.
    pub fn apply_have(&self, piece: u32) {
        self.pieces.write().set(piece as usize);
    }

    /// Snapshot of the remote bitfield.
    pub fn peer_bitfield(&self) -> Bitfield {
        self.pieces.read().clone()
    }

    /// Number of pieces the remote is known to hold.
    pub fn peer_piece_count(&self) -> usize {
        self.pieces.read().count()
    }

    /// Returns true if the remote holds at least one piece we lack.
    pub fn has_interesting(&self, ours: &Bitfield) -> bool {
        let peer = self.pieces.read();
        (0..peer.len()).any(|i| peer.has(i) && !ours.has(i))
    }

    /// Picks uniformly at random a piece the remote has, we lack, and
    /// that is not in `excluded`.
    pub fn random_interesting(&self, ours: &Bitfield, excluded: &[u32]) -> Option<u32> {
        let candidates: Vec<u32> = {
            let peer = self.pieces.read();
            peer.missing_pieces(ours)
                .into_iter()
                .map(|i| i as u32)
                .filter(|i| !excluded.contains(i))
                .collect()
        };

        if candidates.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..candidates.len());
        Some(candidates[idx])
    }

    /// Credits piece-payload bytes received from this peer.
    pub fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Bytes of piece payload received since the last reset.
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Zeroes the download counter at a choke-scheduler tick.
    pub fn reset_downloaded(&self) {
        self.downloaded.store(0, Ordering::SeqCst);
        *self.last_reset.lock() = Instant::now();
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("id", &self.id)
            .field("am_choked", &self.am_choked())
            .field("am_interested", &self.am_interested())
            .field("peer_choked", &self.peer_choked())
            .field("peer_interested", &self.peer_interested())
            .finish()
    }
}
