//! Wire encoding for packet *envelopes* -- not an encoding of application
//! payload content, which stays opaque to this crate.
//!
//! Binary layout (all integers big-endian):
//!
//! ```text
//! +------+-----------+----------+---------+-------------+-----------------+
//! | kind |  sequence | retries  | id (8)  | key/seq (2) | payload_len (4) |
//! | (1B) |    (4B)    |   (4B)   |  *(A)   |    *(B)     |     + payload   |
//! +------+-----------+----------+---------+-------------+-----------------+
//! ```
//!
//! Fields marked `*` are only present for the kinds that carry them (Accept
//! carries id+key, Ack carries id+sequence); `sequence`/`retries` are the
//! reliability envelope fields and are always present. `is_reliable` is
//! folded into the kind tag's high bit.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::time::Instant;

use crate::error::CodecError;
use crate::ids::{PeerId, PeerKey};
use crate::packet::{Packet, PacketKind};

const RELIABLE_BIT: u8 = 0x80;

const TAG_LOGIN: u8 = 0x01;
const TAG_ACCEPT: u8 = 0x02;
const TAG_DENY: u8 = 0x03;
const TAG_ACK: u8 = 0x04;
const TAG_DATA: u8 = 0x05;

/// Encodes/decodes the envelope fields this layer needs: reliability flag,
/// sequence, retries, kind, and any identifiers a given kind carries.
/// Application payload bytes pass through untouched.
pub trait PacketCodec: Send + Sync {
    fn encode(&self, packet: &Packet) -> Bytes;
    fn decode(&self, bytes: &[u8]) -> Result<Packet, CodecError>;
}

/// Reference codec: the smallest envelope that lets ingress/egress
/// round-trip end to end. Not a claim about what a production wire format
/// should look like -- that belongs to the external codec this layer only
/// depends on the interface of.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinimalCodec;

impl PacketCodec for MinimalCodec {
    fn encode(&self, packet: &Packet) -> Bytes {
        let mut buf = BytesMut::with_capacity(16 + packet.payload.len());

        let mut tag = match &packet.kind {
            PacketKind::Login => TAG_LOGIN,
            PacketKind::Accept { .. } => TAG_ACCEPT,
            PacketKind::Deny => TAG_DENY,
            PacketKind::Ack { .. } => TAG_ACK,
            PacketKind::Data => TAG_DATA,
        };
        if packet.is_reliable {
            tag |= RELIABLE_BIT;
        }
        buf.put_u8(tag);
        buf.put_u32(packet.sequence);
        buf.put_u32(packet.retries);

        match &packet.kind {
            PacketKind::Accept { id, key } => {
                buf.put_i64(id.get());
                buf.put_i16(key.get());
            }
            PacketKind::Ack { id, sequence } => {
                buf.put_i64(id.get());
                buf.put_u32(*sequence);
            }
            PacketKind::Login | PacketKind::Deny | PacketKind::Data => {}
        }

        buf.put_u32(packet.payload.len() as u32);
        buf.put_slice(&packet.payload);
        buf.freeze()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Packet, CodecError> {
        let mut data = bytes;
        ensure_len(data, 9, "header")?;
        let raw_tag = data.get_u8();
        let is_reliable = raw_tag & RELIABLE_BIT != 0;
        let tag = raw_tag & !RELIABLE_BIT;
        let sequence = data.get_u32();
        let retries = data.get_u32();

        let kind = match tag {
            TAG_LOGIN => PacketKind::Login,
            TAG_DENY => PacketKind::Deny,
            TAG_DATA => PacketKind::Data,
            TAG_ACCEPT => {
                ensure_len(data, 10, "accept body")?;
                let id = PeerId::new(data.get_i64());
                let key = PeerKey::new(data.get_i16());
                PacketKind::Accept { id, key }
            }
            TAG_ACK => {
                ensure_len(data, 12, "ack body")?;
                let id = PeerId::new(data.get_i64());
                let seq = data.get_u32();
                PacketKind::Ack { id, sequence: seq }
            }
            other => return Err(CodecError::UnknownKind(other)),
        };

        ensure_len(data, 4, "payload length")?;
        let payload_len = data.get_u32() as usize;
        ensure_len(data, payload_len, "payload")?;
        let payload = Bytes::copy_from_slice(&data[..payload_len]);

        Ok(Packet {
            kind,
            is_reliable,
            sequence,
            retries,
            resend_deadline: Instant::now(),
            payload,
        })
    }
}

fn ensure_len(data: &[u8], needed: usize, context: &str) -> Result<(), CodecError> {
    if data.len() < needed {
        Err(CodecError::TooShort {
            expected: needed,
            actual: data.len(),
        })
    } else {
        let _ = context;
        Ok(())
    }
}
