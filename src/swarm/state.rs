use crate::journal::Journal;
use crate::peer::{Message, PeerError, PeerId, PeerLink};
use crate::storage::{PieceStore, StorageError};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced while handling a received message.
///
/// Peer errors are fatal for that link only; storage errors are fatal
/// for the whole process.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Process-wide view of the swarm.
///
/// Holds the registry of live peer links, the scheduler selections
/// (preferred set and optimistic slot), the outstanding-request map
/// that gates one in-flight REQUEST per peer, and handles to the piece
/// store and event journal shared by every collaborator.
pub struct Swarm {
    local_id: PeerId,
    store: Arc<PieceStore>,
    journal: Arc<Journal>,
    links: DashMap<PeerId, Arc<PeerLink>>,
    preferred: Mutex<HashSet<PeerId>>,
    optimistic: Mutex<Option<PeerId>>,
    outstanding: Mutex<HashMap<PeerId, u32>>,
    /// Peers whose link closed after their bitfield was already full.
    /// The completion monitor counts them as done so a departed seed
    /// cannot wedge shutdown.
    departed_complete: Mutex<HashSet<PeerId>>,
}

impl Swarm {
    pub fn new(local_id: PeerId, store: Arc<PieceStore>, journal: Arc<Journal>) -> Self {
        Self {
            local_id,
            store,
            journal,
            links: DashMap::new(),
            preferred: Mutex::new(HashSet::new()),
            optimistic: Mutex::new(None),
            outstanding: Mutex::new(HashMap::new()),
            departed_complete: Mutex::new(HashSet::new()),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn store(&self) -> &Arc<PieceStore> {
        &self.store
    }

    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    pub fn insert_link(&self, link: Arc<PeerLink>) {
        self.links.insert(link.id(), link);
    }

    /// Tears down bookkeeping for a dead link.
    pub fn remove_link(&self, id: PeerId) {
        if let Some((_, link)) = self.links.remove(&id) {
            if link.peer_piece_count() == self.store.piece_count() as usize {
                self.departed_complete.lock().insert(id);
            }
        }
        self.outstanding.lock().remove(&id);
    }

    pub fn link(&self, id: PeerId) -> Option<Arc<PeerLink>> {
        self.links.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of all live links.
    pub fn links(&self) -> Vec<Arc<PeerLink>> {
        self.links.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Drops every link, closing the owned write halves.
    pub fn clear_links(&self) {
        self.links.clear();
    }

    pub fn preferred_ids(&self) -> HashSet<PeerId> {
        self.preferred.lock().clone()
    }

    pub fn set_preferred(&self, peers: &[PeerId]) {
        *self.preferred.lock() = peers.iter().copied().collect();
    }

    pub fn optimistic_id(&self) -> Option<PeerId> {
        *self.optimistic.lock()
    }

    pub fn set_optimistic(&self, peer: Option<PeerId>) {
        *self.optimistic.lock() = peer;
    }

    pub(crate) fn outstanding(&self) -> &Mutex<HashMap<PeerId, u32>> {
        &self.outstanding
    }

    pub(crate) fn departed_complete_ids(&self) -> HashSet<PeerId> {
        self.departed_complete.lock().clone()
    }

    /// Dispatches one received message on `link`.
    pub async fn handle_message(
        &self,
        link: &Arc<PeerLink>,
        message: Message,
    ) -> Result<(), SwarmError> {
        match message {
            Message::Choke => {
                link.set_am_choked(true);
                self.journal.choked_by(link.id());
            }
            Message::Unchoke => {
                link.set_am_choked(false);
                self.journal.unchoked_by(link.id());
            }
            Message::Interested => {
                link.set_peer_interested(true);
                self.journal.interested_received(link.id());
            }
            Message::NotInterested => {
                link.set_peer_interested(false);
                self.journal.not_interested_received(link.id());
            }
            Message::Have { piece } => {
                link.apply_have(piece);
                self.journal.have_received(link.id(), piece);
                link.update_interest(&self.store.bitfield()).await?;
            }
            Message::Bitfield(payload) => {
                link.apply_bitfield(payload);
                link.update_interest(&self.store.bitfield()).await?;
            }
            Message::Request { piece } => {
                self.handle_request(link, piece).await?;
            }
            Message::Piece { piece, data } => {
                self.handle_piece(link, piece, data).await?;
            }
        }
        Ok(())
    }

    /// Serves a REQUEST if the requester is unchoked and we hold the
    /// piece; otherwise the request is silently dropped and the remote
    /// retries after its next unchoke.
    async fn handle_request(&self, link: &Arc<PeerLink>, piece: u32) -> Result<(), SwarmError> {
        if link.peer_choked() {
            return Ok(());
        }
        if !self.store.has(piece) {
            return Ok(());
        }

        let data = self.store.read_piece(piece).await?;
        link.send(&Message::Piece { piece, data }).await?;
        Ok(())
    }

    /// Ingests a received PIECE: store it, credit the sender, gossip
    /// HAVE, and re-evaluate interest everywhere.
    async fn handle_piece(
        &self,
        link: &Arc<PeerLink>,
        piece: u32,
        data: Bytes,
    ) -> Result<(), SwarmError> {
        // The request to this peer is satisfied either way.
        self.outstanding.lock().remove(&link.id());

        // A nonsense index or length is a protocol violation by the
        // sender, fatal for this link but not for the process.
        if piece >= self.store.piece_count() {
            return Err(PeerError::InvalidMessage(format!("piece {} out of range", piece)).into());
        }
        if data.len() as u64 != self.store.piece_len(piece) {
            return Err(PeerError::InvalidMessage(format!(
                "piece {} has wrong length {}",
                piece,
                data.len()
            ))
            .into());
        }

        if self.store.has(piece) {
            return Ok(());
        }

        let newly_stored = self.store.write_piece(piece, &data).await?;
        if !newly_stored {
            return Ok(());
        }

        self.journal
            .piece_downloaded(piece, link.id(), self.store.count());
        link.add_downloaded(data.len() as u64);

        // HAVE goes to every link, the sender included: the completion
        // monitor needs the gossip to reach the piece's source too.
        let ours = self.store.bitfield();
        for peer in self.links() {
            if let Err(e) = peer.send(&Message::Have { piece }).await {
                debug!(peer = peer.id(), error = %e, "have broadcast failed");
            }
        }
        for peer in self.links() {
            if let Err(e) = peer.update_interest(&ours).await {
                debug!(peer = peer.id(), error = %e, "interest update failed");
            }
        }

        if ours.is_complete() {
            self.journal.download_complete();
        }
        Ok(())
    }
}
