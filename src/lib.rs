//! pshare - fixed-roster peer-to-peer file distribution
//!
//! A predetermined roster of peers exchanges a single file divided into
//! fixed-size pieces. Each peer starts either with the complete file (a
//! seed) or with nothing; a tit-for-tat choking discipline plus an
//! optimistic unchoking slot drives every peer to completion.
//!
//! # Modules
//!
//! - [`config`] - `Common.cfg` / `PeerInfo.cfg` run parameters
//! - [`peer`] - wire protocol, framed transport, and per-peer links
//! - [`storage`] - on-disk piece store with a local bitfield
//! - [`swarm`] - process-wide state and the scheduling loops
//! - [`session`] - connection lifecycle and shutdown
//! - [`journal`] - the mandated per-peer event log

pub mod config;
pub mod journal;
pub mod peer;
pub mod session;
pub mod storage;
pub mod swarm;

pub use config::{CommonConfig, ConfigError, PeerEntry};
pub use journal::Journal;
pub use peer::{
    Bitfield, Handshake, Message, MessageId, MessageReader, MessageWriter, PeerError, PeerId,
    PeerLink,
};
pub use session::{Session, SessionError};
pub use storage::{PieceStore, StorageError};
pub use swarm::{Swarm, SwarmError};
