//! Event channel the application observes instead of a multicast delegate.
//!
//! A per-peer outbound channel composes with the parallel scheduling model
//! better than an injected listener trait would, since the ingress, tick,
//! and egress tasks can each push events without sharing a `&dyn Listener`.

use crate::ids::{PeerId, PeerKey};
use crate::packet::Packet;

/// Why a peer was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// A reliable packet hit `MAX_SEND_RETRIES` unacknowledged.
    Unreachable,
    /// No inbound traffic for longer than the liveness window.
    Timeout,
    /// The peer (or this host) sent/received `Deny`.
    Denied,
    /// Explicit disconnect requested by the host or application.
    Explicit,
    /// The receive buffer overflowed with out-of-order packets.
    BufferOverflow,
}

/// Events a [`crate::peer::Peer`] or [`crate::transport::Transport`] emits
/// for the application to observe. Every variant carries the local `peer`
/// identifier so a host fanning events in from many peers onto one channel
/// can tell them apart.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Fired for every in-order reliable packet and every unreliable packet
    /// once.
    PacketReceived { peer: PeerId, packet: Packet },
    /// Fired when `connected` transitions true. `assigned_id`/`assigned_key`
    /// are `peer`'s own identifiers on the accepting side's `accept_login`
    /// path; on the initiating side's `confirm_connected` path they are
    /// whatever the remote's `Accept` carried.
    Connected {
        peer: PeerId,
        assigned_id: PeerId,
        assigned_key: PeerKey,
    },
    /// Fired on eviction.
    Disconnected { peer: PeerId, reason: DisconnectReason },
}
