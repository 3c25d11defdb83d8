//! The underlying datagram channel: presumed unordered, unreliable,
//! bounded-size, but otherwise not mandated by this layer. A real UDP
//! implementation and an in-memory one (for tests that want two
//! [`crate::transport::Transport`] instances talking without a socket) are
//! both provided behind the same trait.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Maximum datagram size this layer will attempt to read in one shot.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// The transport is generic over this trait (rather than boxing it as
/// `dyn`), so a plain `async fn` here is enough on this edition's MSRV --
/// no need for an `async-trait`-style shim.
pub trait DatagramSocket: Send + Sync {
    fn send_to(
        &self,
        buf: &[u8],
        addr: SocketAddr,
    ) -> impl std::future::Future<Output = std::io::Result<usize>> + Send;

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl std::future::Future<Output = std::io::Result<(usize, SocketAddr)>> + Send;
}

/// A real UDP socket.
pub struct UdpDatagramSocket {
    inner: UdpSocket,
}

impl UdpDatagramSocket {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        Ok(Self {
            inner: UdpSocket::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl DatagramSocket for UdpDatagramSocket {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> std::io::Result<usize> {
        self.inner.send_to(buf, addr).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }
}

/// An in-memory datagram channel for tests: a pair of these, wired to each
/// other's `peer_addr`, behave like two ends of a loopback UDP socket
/// without binding a real port.
pub struct ChannelDatagramSocket {
    local_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
}

impl ChannelDatagramSocket {
    /// Build a connected pair: `a`'s sends become `b`'s receives and vice
    /// versa, each one reporting the given local address as its source.
    pub fn pair(addr_a: SocketAddr, addr_b: SocketAddr) -> (Self, Self) {
        let (tx_a_to_b, rx_a_to_b) = mpsc::unbounded_channel();
        let (tx_b_to_a, rx_b_to_a) = mpsc::unbounded_channel();

        let a = Self {
            local_addr: addr_a,
            outbound: tx_a_to_b,
            inbound: tokio::sync::Mutex::new(rx_b_to_a),
        };
        let b = Self {
            local_addr: addr_b,
            outbound: tx_b_to_a,
            inbound: tokio::sync::Mutex::new(rx_a_to_b),
        };
        (a, b)
    }

    /// A second local identity that shares this socket's outbound channel:
    /// models the same client rebinding to a new local port (e.g. a NAT
    /// rebind) while still reaching the same paired peer. The returned
    /// socket has no inbound channel of its own -- it is send-only.
    pub fn rebind(&self, new_local_addr: SocketAddr) -> Self {
        let (_tx, rx) = mpsc::unbounded_channel();
        Self {
            local_addr: new_local_addr,
            outbound: self.outbound.clone(),
            inbound: tokio::sync::Mutex::new(rx),
        }
    }
}

impl DatagramSocket for ChannelDatagramSocket {
    async fn send_to(&self, buf: &[u8], _addr: SocketAddr) -> std::io::Result<usize> {
        let len = buf.len();
        let _ = self.outbound.send((buf.to_vec(), self.local_addr));
        Ok(len)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        let mut guard = self.inbound.lock().await;
        match guard.recv().await {
            Some((data, from)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, from))
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "channel datagram socket closed",
            )),
        }
    }
}
