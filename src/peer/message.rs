use super::error::PeerError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The 18-byte ASCII literal that opens every handshake.
pub const PROTOCOL: &[u8] = b"P2PFILESHARINGPROJ";
/// Length of the handshake record in bytes.
pub const HANDSHAKE_LEN: usize = 32;

/// A peer id as configured in the roster and carried on the wire.
pub type PeerId = u32;

/// Message type identifiers in the wire protocol.
///
/// Each message has a one-byte type following the length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    /// Stop serving piece requests from the peer.
    Choke = 0,
    /// Ready to serve piece requests from the peer.
    Unchoke = 1,
    /// Want pieces from the peer.
    Interested = 2,
    /// Don't want pieces from the peer.
    NotInterested = 3,
    /// Announce a newly-acquired piece.
    Have = 4,
    /// Announce all available pieces.
    Bitfield = 5,
    /// Request a piece.
    Request = 6,
    /// Send piece data.
    Piece = 7,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            _ => Err(PeerError::InvalidMessageType(value)),
        }
    }
}

/// The fixed 32-byte handshake record.
///
/// Layout: the 18-byte [`PROTOCOL`] literal, 10 zero bytes, then the
/// sender's peer id as a 4-byte big-endian integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// The sender's peer id.
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(peer_id: PeerId) -> Self {
        Self { peer_id }
    }

    /// Encodes the handshake to bytes for transmission.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_slice(PROTOCOL);
        buf.put_bytes(0, 10);
        buf.put_u32(self.peer_id);
        buf.freeze()
    }

    /// Decodes a handshake, rejecting anything that is not exactly 32
    /// bytes or does not open with the protocol literal.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() != HANDSHAKE_LEN {
            return Err(PeerError::InvalidHandshake);
        }

        if &data[..PROTOCOL.len()] != PROTOCOL {
            return Err(PeerError::InvalidHandshake);
        }

        let peer_id = u32::from_be_bytes([data[28], data[29], data[30], data[31]]);
        Ok(Self { peer_id })
    }
}

/// A framed wire message.
///
/// On the wire a message is a 4-byte big-endian length followed by a
/// 1-byte type and the payload; the length covers the type byte plus
/// payload. There is no zero-length frame in this protocol.
#[derive(Debug, Clone)]
pub enum Message {
    /// We are choking the peer (not serving piece requests).
    Choke,
    /// We are unchoking the peer (ready to serve piece requests).
    Unchoke,
    /// We want pieces the peer has.
    Interested,
    /// We want nothing the peer has.
    NotInterested,
    /// Announce that we have a piece.
    Have { piece: u32 },
    /// Bitfield of all pieces we have, MSB-first.
    Bitfield(Bytes),
    /// Request a whole piece.
    Request { piece: u32 },
    /// Piece data.
    Piece { piece: u32, data: Bytes },
}

impl Message {
    /// Encodes the message to bytes for transmission.
    ///
    /// The output includes the 4-byte length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Message::Choke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Choke as u8);
            }
            Message::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Unchoke as u8);
            }
            Message::Interested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Interested as u8);
            }
            Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::NotInterested as u8);
            }
            Message::Have { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(*piece);
            }
            Message::Piece { piece, data } => {
                buf.put_u32(5 + data.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*piece);
                buf.put_slice(data);
            }
        }

        buf.freeze()
    }

    /// Decodes a complete frame, length prefix included.
    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.len() < 4 {
            return Err(PeerError::InvalidMessage("too short".into()));
        }

        let length = data.get_u32() as usize;

        if length == 0 {
            return Err(PeerError::InvalidMessage("zero-length frame".into()));
        }

        if data.remaining() < length {
            return Err(PeerError::InvalidMessage("incomplete message".into()));
        }

        let id = MessageId::try_from(data.get_u8())?;

        match id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                if data.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("have too short".into()));
                }
                Ok(Message::Have {
                    piece: data.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(data.copy_to_bytes(length - 1))),
            MessageId::Request => {
                if data.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("request too short".into()));
                }
                Ok(Message::Request {
                    piece: data.get_u32(),
                })
            }
            MessageId::Piece => {
                if data.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("piece too short".into()));
                }
                let piece = data.get_u32();
                let payload = data.copy_to_bytes(length - 5);
                Ok(Message::Piece {
                    piece,
                    data: payload,
                })
            }
        }
    }
}
