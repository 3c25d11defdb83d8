//! The unit value this layer moves: opaque to everything except the fields
//! it needs to provide reliability, ordering, and handshake dispatch.

use bytes::Bytes;
use tokio::time::Instant;

use crate::ids::{PeerId, PeerKey};

/// Handshake and data kinds this layer interprets.
///
/// Payload bytes are never inspected here beyond this tag; the rest of a
/// `Data` packet's contents (audio, positional metadata, chat text, ...) are
/// meaningless to the reliability/ordering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketKind {
    /// Sent by a connecting peer to a previously unknown endpoint.
    Login,
    /// Sent by the accepting side; carries the identifiers it assigned.
    Accept { id: PeerId, key: PeerKey },
    /// Sent by the accepting side to refuse a login.
    Deny,
    /// Acknowledges receipt of a reliable packet.
    Ack { id: PeerId, sequence: u32 },
    /// Ordinary application payload, reliable or not.
    Data,
}

/// A packet moving through the reliability/ordering layer.
///
/// `sequence`, `retries`, and `resend_deadline` are meaningful only when
/// `is_reliable` is true; they are left at their defaults otherwise.
#[derive(Debug, Clone)]
pub struct Packet {
    pub kind: PacketKind,
    pub is_reliable: bool,
    pub sequence: u32,
    pub retries: u32,
    pub resend_deadline: Instant,
    pub payload: Bytes,
}

impl Packet {
    /// Build an unreliable packet (no sequencing, no acknowledgement).
    pub fn unreliable(kind: PacketKind, payload: Bytes) -> Self {
        Self {
            kind,
            is_reliable: false,
            sequence: 0,
            retries: 0,
            resend_deadline: Instant::now(),
            payload,
        }
    }

    /// Build a reliable packet. `sequence` and `resend_deadline` are filled
    /// in by [`crate::peer::Peer::enqueue`], so placeholder values are fine
    /// here.
    pub fn reliable(kind: PacketKind, payload: Bytes) -> Self {
        Self {
            kind,
            is_reliable: true,
            sequence: 0,
            retries: 0,
            resend_deadline: Instant::now(),
            payload,
        }
    }
}
