//! The host: owns the socket, demuxes inbound datagrams onto `Peer`s, drains
//! their outbound queues, and drives the periodic resend/liveness sweep.
//!
//! Three `tokio::task`s per `Transport` -- ingress, egress, tick -- run as
//! independent, concurrently scheduled loops. None of the three ever
//! touches another's half of a `Peer`'s state directly; they only call
//! `Peer`'s own operations, which are each internally synchronized.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Notify};
use tokio::time::{self, Duration};
use tracing::{debug, info, trace, warn};

use crate::codec::PacketCodec;
use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::ids::PeerId;
use crate::listener::{DisconnectReason, PeerEvent};
use crate::packet::{Packet, PacketKind};
use crate::peer::Peer;
use crate::socket::DatagramSocket;

/// A host's decision on an inbound `Login` from a previously unknown
/// endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginDecision {
    Accept,
    Deny,
}

/// Pluggable accept/deny policy for new connections. `AcceptAllPolicy` is
/// the default for hosts that don't need gating.
pub trait LoginPolicy: Send + Sync {
    fn decide(&self, addr: SocketAddr, login: &Packet) -> LoginDecision;
}

/// Accepts every login unconditionally.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllPolicy;

impl LoginPolicy for AcceptAllPolicy {
    fn decide(&self, _addr: SocketAddr, _login: &Packet) -> LoginDecision {
        LoginDecision::Accept
    }
}

/// The connection-reliability host.
///
/// Generic over the datagram channel and the wire codec rather than boxing
/// either as `dyn`: `DatagramSocket` relies on native async-fn-in-trait
/// methods, which aren't object-safe, and genericity here is cheaper than
/// reaching for an `async-trait` shim the reference codebase doesn't use.
pub struct Transport<S: DatagramSocket, C: PacketCodec> {
    socket: S,
    codec: C,
    config: TransportConfig,
    login_policy: Box<dyn LoginPolicy>,

    peers_by_endpoint: RwLock<HashMap<SocketAddr, Arc<Peer>>>,
    peers_by_id: RwLock<HashMap<PeerId, Arc<Peer>>>,

    egress_wake: Arc<Notify>,
    shutdown: Arc<Notify>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
}

impl<S, C> Transport<S, C>
where
    S: DatagramSocket + 'static,
    C: PacketCodec + 'static,
{
    /// Build a new host. Returns the event receiver the application drains
    /// separately, since `Transport` itself is shared (via `Arc`) across its
    /// three background tasks.
    pub fn new(
        socket: S,
        codec: C,
        config: TransportConfig,
        login_policy: Box<dyn LoginPolicy>,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Self {
            socket,
            codec,
            config,
            login_policy,
            peers_by_endpoint: RwLock::new(HashMap::new()),
            peers_by_id: RwLock::new(HashMap::new()),
            egress_wake: Arc::new(Notify::new()),
            shutdown: Arc::new(Notify::new()),
            events_tx,
        };
        (transport, events_rx)
    }

    /// Snapshot of every currently registered peer.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers_by_endpoint.read().values().cloned().collect()
    }

    pub fn peer_by_id(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.peers_by_id.read().get(&id).cloned()
    }

    pub fn peer_by_endpoint(&self, addr: SocketAddr) -> Option<Arc<Peer>> {
        self.peers_by_endpoint.read().get(&addr).cloned()
    }

    /// Originate a connection to a remote endpoint: registers a `Peer` for
    /// it and enqueues a `Login`. The caller drives the three background
    /// loops (`spawn` below) to actually send it and process the `Accept`
    /// that comes back.
    pub fn connect(&self, addr: SocketAddr) -> TransportResult<Arc<Peer>> {
        let peer = self.register_peer(addr);
        peer.enqueue(Packet::reliable(PacketKind::Login, Bytes::new()))
            .map_err(|_| TransportError::UnknownEndpoint(addr))?;
        Ok(peer)
    }

    /// Request eviction of a peer the application no longer wants, e.g. a
    /// graceful quit. Fires `DisconnectReason::Explicit`.
    pub async fn disconnect(&self, id: PeerId) {
        if let Some(peer) = self.peer_by_id(id) {
            self.evict(&peer, DisconnectReason::Explicit).await;
        }
    }

    /// Stop all three background loops.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    fn register_peer(&self, addr: SocketAddr) -> Arc<Peer> {
        let peer = Arc::new(Peer::new(
            addr,
            Arc::clone(&self.egress_wake),
            self.events_tx.clone(),
        ));
        self.peers_by_endpoint.write().insert(addr, Arc::clone(&peer));
        self.peers_by_id.write().insert(peer.id(), Arc::clone(&peer));
        info!(%addr, id = %peer.id(), "peer registered");
        peer
    }

    async fn evict(&self, peer: &Arc<Peer>, reason: DisconnectReason) {
        peer.dispose();
        self.peers_by_endpoint
            .write()
            .retain(|_, candidate| !Arc::ptr_eq(candidate, peer));
        self.peers_by_id.write().remove(&peer.id());
        info!(id = %peer.id(), ?reason, "peer evicted");
        let _ = self.events_tx.send(PeerEvent::Disconnected {
            peer: peer.id(),
            reason,
        });
    }

    /// By-endpoint lookup, falling back to by-id (rewriting the endpoint on
    /// a match -- an id-based rebind, e.g. after a NAT remap) when the
    /// packet's kind carries an id. Unknown endpoints with no id match
    /// return `None`.
    fn resolve(&self, from: SocketAddr, packet: &Packet) -> Option<Arc<Peer>> {
        if let Some(peer) = self.peers_by_endpoint.read().get(&from).cloned() {
            return Some(peer);
        }

        let id = match &packet.kind {
            PacketKind::Accept { id, .. } | PacketKind::Ack { id, .. } => Some(*id),
            _ => None,
        }?;
        if id.is_none() {
            return None;
        }

        let peer = self.peers_by_id.read().get(&id).cloned()?;
        peer.set_endpoint(from);
        self.peers_by_endpoint.write().insert(from, Arc::clone(&peer));
        debug!(%from, %id, "peer endpoint rebound");
        Some(peer)
    }

    async fn handle_login(&self, from: SocketAddr, login: &Packet) {
        let peer = self.register_peer(from);
        match self.login_policy.decide(from, login) {
            LoginDecision::Accept => {
                let _ = peer.accept_login();
            }
            LoginDecision::Deny => {
                // Sent directly rather than through `enqueue` + the egress
                // loop: `evict` disposes the peer immediately afterward,
                // which would otherwise race the egress drain for this
                // one-shot packet.
                let deny = Packet::reliable(PacketKind::Deny, Bytes::new());
                let bytes = self.codec.encode(&deny);
                if let Err(err) = self.socket.send_to(&bytes, from).await {
                    warn!(%from, error = %err, "failed to send deny");
                }
                self.evict(&peer, DisconnectReason::Denied).await;
            }
        }
    }

    /// Handshake dispatch that runs after a successful `ingest`: an
    /// `Ack` clears the corresponding retransmit entry, an `Accept`
    /// completes the initiator side of the handshake, and a `Deny` evicts.
    async fn post_ingest(&self, peer: &Arc<Peer>, packet: &Packet) {
        match &packet.kind {
            PacketKind::Ack { sequence, .. } => {
                let _ = peer.acknowledge(*sequence);
            }
            PacketKind::Accept { id, key } => {
                let _ = peer.confirm_connected(*id, *key);
            }
            PacketKind::Deny => {
                self.evict(peer, DisconnectReason::Denied).await;
            }
            PacketKind::Login | PacketKind::Data => {}
        }
    }

    async fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let packet = match self.codec.decode(data) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(%from, error = %err, "dropping undecodable datagram");
                return;
            }
        };

        if let Some(peer) = self.resolve(from, &packet) {
            match peer.ingest(packet.clone()) {
                Ok(true) => self.post_ingest(&peer, &packet).await,
                Ok(false) => {
                    warn!(id = %peer.id(), "receive buffer overflow");
                    self.evict(&peer, DisconnectReason::BufferOverflow).await;
                }
                Err(_) => {
                    // Raced with our own eviction of this peer; nothing to do.
                }
            }
            return;
        }

        if matches!(packet.kind, PacketKind::Login) {
            self.handle_login(from, &packet).await;
        } else {
            trace!(%from, "dropping datagram from unknown endpoint");
        }
    }

    /// Receive datagrams and demux them onto peers until `shutdown()` fires.
    pub async fn run_ingress(self: Arc<Self>) {
        let mut buf = vec![0u8; crate::socket::MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => return,
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
                        Err(err) => warn!(error = %err, "ingress recv failed"),
                    }
                }
            }
        }
    }

    /// Wait for any peer activity, then drain every peer's `send_queue` and
    /// transmit. Doesn't distinguish fresh sends from `tick_resends`
    /// re-enqueues.
    pub async fn run_egress(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => return,
                _ = self.egress_wake.notified() => {}
            }

            for peer in self.peers() {
                for packet in peer.drain_send_queue() {
                    let bytes = self.codec.encode(&packet);
                    if let Err(err) = self.socket.send_to(&bytes, peer.endpoint()).await {
                        warn!(id = %peer.id(), error = %err, "egress send failed");
                    }
                }
            }
        }
    }

    /// Resend overdue reliable packets and sweep for dead peers on
    /// `TransportConfig::tick_interval`.
    pub async fn run_tick(self: Arc<Self>) {
        let mut ticker = time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => return,
                _ = ticker.tick() => {}
            }

            for peer in self.peers() {
                if peer.is_disposed() {
                    continue;
                }
                if peer.tick_resends().is_err() {
                    continue;
                }
                if peer.has_exhausted_retries() {
                    self.evict(&peer, DisconnectReason::Unreachable).await;
                } else if peer.is_idle_past(self.config.liveness_window) {
                    self.evict(&peer, DisconnectReason::Timeout).await;
                }
            }
        }
    }

    /// Spawn all three loops and return their join handles.
    pub fn spawn(self: Arc<Self>) -> [tokio::task::JoinHandle<()>; 3] {
        [
            tokio::spawn(Arc::clone(&self).run_ingress()),
            tokio::spawn(Arc::clone(&self).run_egress()),
            tokio::spawn(Arc::clone(&self).run_tick()),
        ]
    }
}
