//! Reliability, ordering, and handshake layer for an unordered, unreliable
//! datagram channel (UDP or equivalent).
//!
//! A [`peer::Peer`] tracks one remote endpoint's send sequencing,
//! retransmission, and receive reordering; a [`transport::Transport`] owns
//! the socket, demuxes inbound datagrams onto peers, and drives the
//! periodic resend/liveness sweep. Application payload bytes are opaque to
//! both -- only the envelope fields needed for reliability and ordering are
//! interpreted here.

pub mod codec;
pub mod config;
pub mod error;
pub mod ids;
pub mod listener;
pub mod packet;
pub mod peer;
pub mod socket;
pub mod transport;

pub use config::TransportConfig;
pub use error::{CodecError, PeerError, TransportError};
pub use ids::{PeerId, PeerKey};
pub use listener::{DisconnectReason, PeerEvent};
pub use packet::{Packet, PacketKind};
pub use peer::Peer;
pub use transport::{AcceptAllPolicy, LoginDecision, LoginPolicy, Transport};
