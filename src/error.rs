use thiserror::Error;

/// Errors a [`crate::peer::Peer`] operation can return.
///
/// These never cross the ingress or tick boundary as panics or unwound
/// errors -- the [`crate::transport::Transport`] translates them into
/// eviction decisions or simply drops the offending datagram.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PeerError {
    #[error("peer used after disposal")]
    UsedAfterDisposal,
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;

/// Errors produced while decoding a datagram into a [`crate::packet::Packet`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("datagram too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("unknown packet kind tag: 0x{0:02x}")]
    UnknownKind(u8),
}

/// Errors surfaced by the [`crate::transport::Transport`] host itself.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no peer registered for endpoint {0}")]
    UnknownEndpoint(std::net::SocketAddr),

    #[error("no peer registered for id {0:?}")]
    UnknownPeerId(crate::ids::PeerId),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;
