//! The per-peer event journal.
//!
//! Every protocol-visible event is appended to `log_<peerId>.log` as a
//! timestamped English sentence. The file is truncated on start and
//! every line is flushed as it is written, so the journal stays usable
//! even if the process is killed.

use crate::peer::PeerId;
use chrono::Local;
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct Journal {
    peer_id: PeerId,
    out: Mutex<BufWriter<File>>,
}

impl Journal {
    /// Creates (truncating) the journal file.
    pub fn create(path: &Path, peer_id: PeerId) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        Ok(Self {
            peer_id,
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    fn record(&self, event: fmt::Arguments<'_>) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut out = self.out.lock();
        if writeln!(out, "{}: Peer {} {}", timestamp, self.peer_id, event).is_ok() {
            let _ = out.flush();
        }
    }

    /// Outbound TCP connection established to `peer`.
    pub fn connection_to(&self, peer: PeerId) {
        self.record(format_args!("makes a connection to Peer {}.", peer));
    }

    /// Inbound TCP connection accepted from `peer`.
    pub fn connection_from(&self, peer: PeerId) {
        self.record(format_args!("is connected from Peer {}.", peer));
    }

    /// Preferred-neighbor set replaced.
    pub fn preferred_neighbors(&self, peers: &[PeerId]) {
        let list = peers
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.record(format_args!("has the preferred neighbors [{}].", list));
    }

    /// Optimistically unchoked neighbor changed.
    pub fn optimistic_neighbor(&self, peer: PeerId) {
        self.record(format_args!(
            "has the optimistically unchoked neighbor {}.",
            peer
        ));
    }

    pub fn unchoked_by(&self, peer: PeerId) {
        self.record(format_args!("is unchoked by {}.", peer));
    }

    pub fn choked_by(&self, peer: PeerId) {
        self.record(format_args!("is choked by {}.", peer));
    }

    pub fn have_received(&self, peer: PeerId, piece: u32) {
        self.record(format_args!(
            "received the 'have' message from {} for the piece {}.",
            peer, piece
        ));
    }

    pub fn interested_received(&self, peer: PeerId) {
        self.record(format_args!("received the 'interested' message from {}.", peer));
    }

    pub fn not_interested_received(&self, peer: PeerId) {
        self.record(format_args!(
            "received the 'not interested' message from {}.",
            peer
        ));
    }

    /// A piece arrived and was stored; `have_count` is the new total.
    pub fn piece_downloaded(&self, piece: u32, from: PeerId, have_count: usize) {
        self.record(format_args!(
            "has downloaded the piece {} from {}. Now the number of pieces it has is {}.",
            piece, from, have_count
        ));
    }

    pub fn download_complete(&self) {
        self.record(format_args!("has downloaded the complete file."));
    }
}
