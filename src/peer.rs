//! Peer wire protocol and per-connection state.
//!
//! This module implements the handshake and framed message codec, the
//! exact-length stream transport, and the per-peer link that carries
//! choke/interest flags, the remote bitfield, and rate accounting.

mod bitfield;
mod error;
mod link;
mod message;
mod transport;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use link::PeerLink;
pub use message::{Handshake, Message, MessageId, PeerId, HANDSHAKE_LEN, PROTOCOL};
pub use transport::{MessageReader, MessageWriter};
