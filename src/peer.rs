//! Per-remote-endpoint reliability, ordering, and liveness state.
//!
//! A `Peer` is accessed concurrently from at least three roles: an ingress
//! reader calling [`Peer::ingest`], an application producer calling
//! [`Peer::enqueue`], and a tick task calling [`Peer::tick_resends`]; the
//! egress drainer is a fourth. None of these suspend -- `send_queue` is a
//! lock-free MPSC queue, `reliability_queue` and the receive-ordering state
//! are each guarded by a `parking_lot::Mutex` (a per-peer mutex around an
//! ordinary map is plenty cheap at this bound), and `send_sequence` is a
//! plain atomic counter.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use crossbeam_queue::SegQueue;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Duration, Instant};

use crate::config::{MAX_RECV_BUFFER_SIZE, MAX_SEND_RETRIES, RESEND_TIME, RETRY_RESEND_TIME};
use crate::error::{PeerError, PeerResult};
use crate::ids::{PeerId, PeerKey};
use crate::listener::PeerEvent;
use crate::packet::Packet;

/// In-order delivery state: the next sequence expected, and the bounded
/// reorder buffer of reliable arrivals waiting for their predecessors.
///
/// Kept in a single lock so the insert-then-drain critical section is
/// always serialized as one unit per peer, never split across two locks.
struct ReceiveState {
    expected_sequence: u32,
    buffer: BTreeMap<u32, Packet>,
}

/// Per-remote-endpoint reliability, ordering, and liveness state.
pub struct Peer {
    endpoint: RwLock<SocketAddr>,
    id: PeerId,
    key: PeerKey,
    connected: AtomicBool,
    disposed: AtomicBool,

    send_sequence: AtomicU32,
    send_queue: SegQueue<Packet>,
    reliability_queue: Mutex<HashMap<u32, Packet>>,
    receive: Mutex<ReceiveState>,
    last_active: Mutex<Instant>,

    /// Fired by `dispose()`; loops observing this peer select on it to
    /// terminate promptly.
    cancel: Arc<Notify>,
    /// Fired whenever a packet is pushed to `send_queue`, so the egress
    /// drainer can wait instead of polling every peer on a fixed interval.
    egress_wake: Arc<Notify>,
    /// The event channel the host drains; `None` once disposed, so no event
    /// handler fires for a disposed peer.
    events: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
}

impl Peer {
    /// Create a new, not-yet-connected peer for `endpoint`. `id` and `key`
    /// are drawn uniformly at random, excluding their sentinels.
    pub fn new(
        endpoint: SocketAddr,
        egress_wake: Arc<Notify>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            endpoint: RwLock::new(endpoint),
            id: PeerId::generate(),
            key: PeerKey::generate(),
            connected: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            send_sequence: AtomicU32::new(0),
            send_queue: SegQueue::new(),
            reliability_queue: Mutex::new(HashMap::new()),
            receive: Mutex::new(ReceiveState {
                expected_sequence: 0,
                buffer: BTreeMap::new(),
            }),
            last_active: Mutex::new(Instant::now()),
            cancel: Arc::new(Notify::new()),
            egress_wake,
            events: Mutex::new(Some(events)),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn key(&self) -> PeerKey {
        self.key
    }

    pub fn endpoint(&self) -> SocketAddr {
        *self.endpoint.read()
    }

    /// Rewrite the remote endpoint, e.g. after an id-matched rebind (client
    /// roaming to a new source address or port).
    pub fn set_endpoint(&self, addr: SocketAddr) {
        *self.endpoint.write() = addr;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    /// Whether this peer has gone longer than `window` without accepted
    /// inbound traffic.
    pub fn is_idle_past(&self, window: Duration) -> bool {
        self.last_active().elapsed() > window
    }

    /// Whether any unacknowledged reliable packet has reached the retry
    /// ceiling -- a terminal, unreachable-peer condition the transport
    /// checks after every `tick_resends` call.
    pub fn has_exhausted_retries(&self) -> bool {
        self.reliability_queue
            .lock()
            .values()
            .any(|p| p.retries >= MAX_SEND_RETRIES)
    }

    /// A cancellation handle that resolves once `dispose()` has run.
    pub fn cancelled(&self) -> Arc<Notify> {
        Arc::clone(&self.cancel)
    }

    fn ensure_live(&self) -> PeerResult<()> {
        if self.is_disposed() {
            Err(PeerError::UsedAfterDisposal)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: PeerEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            // The receiver may have been dropped by a shutting-down host;
            // that is not this peer's problem to report.
            let _ = tx.send(event);
        }
    }

    fn wake_egress(&self) {
        self.egress_wake.notify_one();
    }

    /// Assign a sequence number (reliable packets only) and queue for send.
    pub fn enqueue(&self, mut packet: Packet) -> PeerResult<()> {
        self.ensure_live()?;

        if packet.is_reliable {
            let seq = self.send_sequence.fetch_add(1, Ordering::AcqRel);
            packet.sequence = seq;
            packet.resend_deadline = Instant::now() + RESEND_TIME;
            self.reliability_queue
                .lock()
                .entry(seq)
                .or_insert_with(|| packet.clone());
        }

        self.send_queue.push(packet);
        self.wake_egress();
        Ok(())
    }

    /// Admit an inbound packet: dedup, order, and (for unreliable packets)
    /// pass through immediately.
    ///
    /// Returns `Ok(false)` when the reorder buffer is saturated by a
    /// genuinely out-of-order arrival -- the transport host decides what to
    /// do with that; it's recoverable here, not fatal.
    pub fn ingest(&self, packet: Packet) -> PeerResult<bool> {
        self.ensure_live()?;
        *self.last_active.lock() = Instant::now();

        if !packet.is_reliable {
            self.emit(PeerEvent::PacketReceived {
                peer: self.id,
                packet,
            });
            return Ok(true);
        }

        let seq = packet.sequence;
        let mut state = self.receive.lock();

        if state.buffer.len() >= MAX_RECV_BUFFER_SIZE && seq != state.expected_sequence {
            return Ok(false);
        }

        // A packet at or after `expected_sequence` is buffered for ordered
        // delivery; anything older is a late duplicate of something already
        // delivered and must not re-enter the buffer (invariant 2), but is
        // still acknowledged below so the sender stops retransmitting it.
        if seq >= state.expected_sequence {
            state.buffer.entry(seq).or_insert(packet);
        }

        self.send_queue.push(Packet::unreliable(
            crate::packet::PacketKind::Ack {
                id: self.id,
                sequence: seq,
            },
            Bytes::new(),
        ));
        self.wake_egress();

        // Drain until a full pass makes no progress, rather than stopping
        // after a single pass, so a race between two near-simultaneous
        // insertions can't leave a deliverable entry stranded in the buffer.
        loop {
            match state.buffer.remove(&state.expected_sequence) {
                Some(next) => {
                    state.expected_sequence = state.expected_sequence.wrapping_add(1);
                    self.emit(PeerEvent::PacketReceived {
                        peer: self.id,
                        packet: next,
                    });
                }
                None => break,
            }
        }

        Ok(true)
    }

    /// Resend every reliable packet whose deadline has passed, rescheduling
    /// it and bumping its retry count. Entries are never removed here --
    /// only `acknowledge` removes them. Callers should follow up with
    /// [`Peer::has_exhausted_retries`] to decide whether this peer is now a
    /// terminal failure.
    pub fn tick_resends(&self) -> PeerResult<()> {
        self.ensure_live()?;
        let now = Instant::now();

        let mut queue = self.reliability_queue.lock();
        for packet in queue.values_mut() {
            if packet.resend_deadline <= now {
                packet.resend_deadline = now + RETRY_RESEND_TIME;
                packet.retries += 1;
                self.send_queue.push(packet.clone());
            }
        }
        drop(queue);

        self.wake_egress();
        Ok(())
    }

    /// Remove a reliable packet from the retransmit set; a no-op if `sequence`
    /// is unknown (already acknowledged, or never ours).
    pub fn acknowledge(&self, sequence: u32) -> PeerResult<()> {
        self.ensure_live()?;
        self.reliability_queue.lock().remove(&sequence);
        Ok(())
    }

    /// The host-decision path: accept this peer's login, sending our own
    /// `Accept` (carrying `id`/`key`) so the remote learns its assigned
    /// identifiers. Idempotent: `connected` only transitions false to true
    /// once, and a repeat call is a no-op.
    pub fn accept_login(&self) -> PeerResult<()> {
        self.ensure_live()?;
        if self.connected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.enqueue(Packet::reliable(
            crate::packet::PacketKind::Accept {
                id: self.id,
                key: self.key,
            },
            Bytes::new(),
        ))?;
        self.emit(PeerEvent::Connected {
            peer: self.id,
            assigned_id: self.id,
            assigned_key: self.key,
        });
        Ok(())
    }

    /// The initiator-side counterpart of `accept_login`: the remote's
    /// `Accept` arrived on this peer, so we transition to connected too,
    /// but without re-emitting another `Accept` -- doing so would ping-pong
    /// the handshake forever. The identifiers carried on the inbound packet
    /// are forwarded on the `Connected` event rather than overwriting this
    /// peer's own `id`/`key`, which are fixed at construction.
    pub fn confirm_connected(&self, remote_assigned_id: PeerId, remote_assigned_key: PeerKey) -> PeerResult<()> {
        self.ensure_live()?;
        if self.connected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.emit(PeerEvent::Connected {
            peer: self.id,
            assigned_id: remote_assigned_id,
            assigned_key: remote_assigned_key,
        });
        Ok(())
    }

    /// Empty all three queues and rewind both sequence counters; `connected`,
    /// `id`, `key`, and `endpoint` are untouched.
    pub fn reset(&self) -> PeerResult<()> {
        self.ensure_live()?;
        while self.send_queue.pop().is_some() {}
        self.reliability_queue.lock().clear();
        {
            let mut state = self.receive.lock();
            state.buffer.clear();
            state.expected_sequence = 0;
        }
        self.send_sequence.store(0, Ordering::Release);
        Ok(())
    }

    /// Drain every packet currently queued for transmission. Called by the
    /// transport's egress drainer; does not distinguish fresh sends from
    /// `tick_resends` re-enqueues.
    pub fn drain_send_queue(&self) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Some(packet) = self.send_queue.pop() {
            out.push(packet);
        }
        out
    }

    /// Fire the cancellation signal, empty the queues, mark disconnected,
    /// and drop the event channel. Every operation after this fails with
    /// `UsedAfterDisposal`, and no event handler fires again.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.connected.store(false, Ordering::Release);
        while self.send_queue.pop().is_some() {}
        self.reliability_queue.lock().clear();
        {
            let mut state = self.receive.lock();
            state.buffer.clear();
        }
        *self.events.lock() = None;
        self.cancel.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketKind;

    fn new_peer() -> (Peer, mpsc::UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Peer::new(
            "127.0.0.1:9000".parse().unwrap(),
            Arc::new(Notify::new()),
            tx,
        );
        (peer, rx)
    }

    fn reliable_data(payload: &'static [u8]) -> Packet {
        Packet::reliable(PacketKind::Data, Bytes::from_static(payload))
    }

    fn unreliable_data(payload: &'static [u8]) -> Packet {
        Packet::unreliable(PacketKind::Data, Bytes::from_static(payload))
    }

    fn drain_received(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PeerEvent::PacketReceived { packet, .. } = event {
                out.push(String::from_utf8(packet.payload.to_vec()).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn ingest_reorders_out_of_order_arrivals() {
        let (peer, mut rx) = new_peer();
        let mut packets: Vec<Packet> = (0..5u32)
            .map(|i| {
                let mut p = Packet::reliable(PacketKind::Data, Bytes::from(i.to_string()));
                p.sequence = i;
                p
            })
            .collect();

        for &i in &[2usize, 0, 1, 4, 3] {
            let p = std::mem::replace(&mut packets[i], reliable_data(b""));
            assert!(peer.ingest(p).unwrap());
        }

        let received = drain_received(&mut rx);
        assert_eq!(received, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(peer.receive.lock().expected_sequence, 5);
        assert!(peer.receive.lock().buffer.is_empty());
    }

    #[tokio::test]
    async fn duplicate_reliable_arrivals_emit_once() {
        let (peer, mut rx) = new_peer();
        let mut acks = 0usize;
        for seq in [0u32, 0, 1, 1, 2] {
            let mut p = reliable_data(b"x");
            p.sequence = seq;
            assert!(peer.ingest(p).unwrap());
        }
        // Drain both kinds of events; count Ack sends via the send queue.
        let sent = peer.drain_send_queue();
        for packet in &sent {
            if matches!(packet.kind, PacketKind::Ack { .. }) {
                acks += 1;
            }
        }
        assert_eq!(acks, 5);

        let received: Vec<_> = {
            let mut out = Vec::new();
            while let Ok(event) = rx.try_recv() {
                if matches!(event, PeerEvent::PacketReceived { .. }) {
                    out.push(event);
                }
            }
            out
        };
        assert_eq!(received.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_resends_backs_off_and_eventually_exhausts_retries() {
        let (peer, _rx) = new_peer();
        peer.enqueue(reliable_data(b"P")).unwrap();

        tokio::time::advance(Duration::from_millis(199)).await;
        peer.tick_resends().unwrap();
        assert_eq!(peer.reliability_queue.lock().get(&0).unwrap().retries, 0);
        assert!(!peer.has_exhausted_retries());

        tokio::time::advance(Duration::from_millis(1)).await; // t=200
        peer.tick_resends().unwrap();
        assert_eq!(peer.reliability_queue.lock().get(&0).unwrap().retries, 1);

        tokio::time::advance(Duration::from_millis(500)).await; // t=700
        peer.tick_resends().unwrap();
        assert_eq!(peer.reliability_queue.lock().get(&0).unwrap().retries, 2);

        for _ in 0..18 {
            tokio::time::advance(Duration::from_millis(500)).await;
            peer.tick_resends().unwrap();
        }
        assert_eq!(peer.reliability_queue.lock().get(&0).unwrap().retries, 20);

        tokio::time::advance(Duration::from_millis(500)).await;
        peer.tick_resends().unwrap();
        assert!(peer.has_exhausted_retries());
    }

    #[tokio::test]
    async fn ingest_rejects_arrivals_once_reorder_buffer_is_full() {
        let (peer, mut rx) = new_peer();

        for seq in 1..=30u32 {
            let mut p = reliable_data(b"x");
            p.sequence = seq;
            assert!(peer.ingest(p).unwrap(), "seq {seq} should be accepted");
        }
        assert_eq!(peer.receive.lock().buffer.len(), 30);

        let mut overflow = reliable_data(b"x");
        overflow.sequence = 31;
        assert!(!peer.ingest(overflow).unwrap());

        let mut zero = reliable_data(b"x");
        zero.sequence = 0;
        assert!(peer.ingest(zero).unwrap());

        assert!(peer.receive.lock().buffer.is_empty());
        assert_eq!(peer.receive.lock().expected_sequence, 31);
        let received = drain_received(&mut rx);
        assert_eq!(received.len(), 31);
    }

    #[tokio::test]
    async fn accept_login_is_idempotent() {
        let (peer, mut rx) = new_peer();
        peer.accept_login().unwrap();
        peer.accept_login().unwrap();
        assert!(peer.is_connected());

        let sent = peer.drain_send_queue();
        let accepts = sent
            .iter()
            .filter(|p| matches!(p.kind, PacketKind::Accept { .. }))
            .count();
        assert_eq!(accepts, 1);

        let connects = {
            let mut n = 0;
            while let Ok(event) = rx.try_recv() {
                if matches!(event, PeerEvent::Connected { .. }) {
                    n += 1;
                }
            }
            n
        };
        assert_eq!(connects, 1);
    }

    #[tokio::test]
    async fn unreliable_packets_bypass_ordering_of_reliable_ones() {
        let (peer, mut rx) = new_peer();
        let mut p0 = reliable_data(b"0");
        p0.sequence = 0;
        let mut p1 = reliable_data(b"1");
        p1.sequence = 1;

        peer.ingest(unreliable_data(b"U1")).unwrap();
        peer.ingest(p1).unwrap();
        peer.ingest(unreliable_data(b"U2")).unwrap();
        peer.ingest(p0).unwrap();

        let received = drain_received(&mut rx);
        assert_eq!(received, vec!["U1", "U2", "0", "1"]);
    }

    #[test]
    fn acknowledge_unknown_sequence_is_noop() {
        let (peer, _rx) = new_peer();
        peer.enqueue(reliable_data(b"A")).unwrap();
        assert_eq!(peer.reliability_queue.lock().len(), 1);
        peer.acknowledge(999).unwrap();
        assert_eq!(peer.reliability_queue.lock().len(), 1);
        peer.acknowledge(0).unwrap();
        assert!(peer.reliability_queue.lock().is_empty());
    }

    #[test]
    fn reset_rewinds_counters_without_touching_identity() {
        let (peer, _rx) = new_peer();
        peer.enqueue(reliable_data(b"A")).unwrap();
        peer.enqueue(reliable_data(b"B")).unwrap();
        peer.accept_login().unwrap();
        let id_before = peer.id();
        let key_before = peer.key();

        peer.reset().unwrap();

        assert_eq!(peer.id(), id_before);
        assert_eq!(peer.key(), key_before);
        assert!(peer.is_connected()); // reset does not touch `connected`
        assert!(peer.reliability_queue.lock().is_empty());

        peer.enqueue(reliable_data(b"C")).unwrap();
        assert_eq!(peer.reliability_queue.lock().keys().next(), Some(&0));
    }

    #[test]
    fn dispose_fails_every_subsequent_operation() {
        let (peer, _rx) = new_peer();
        peer.dispose();
        assert!(matches!(
            peer.enqueue(reliable_data(b"x")),
            Err(PeerError::UsedAfterDisposal)
        ));
        assert!(matches!(
            peer.ingest(reliable_data(b"x")),
            Err(PeerError::UsedAfterDisposal)
        ));
        assert!(matches!(
            peer.tick_resends(),
            Err(PeerError::UsedAfterDisposal)
        ));
        assert!(matches!(
            peer.acknowledge(0),
            Err(PeerError::UsedAfterDisposal)
        ));
        assert!(matches!(
            peer.accept_login(),
            Err(PeerError::UsedAfterDisposal)
        ));
        assert!(matches!(peer.reset(), Err(PeerError::UsedAfterDisposal)));
    }

    #[test]
    fn enqueue_assigns_monotonic_sequence() {
        let (peer, _rx) = new_peer();
        for expected in 0..5u32 {
            peer.enqueue(reliable_data(b"x")).unwrap();
            assert!(peer.reliability_queue.lock().contains_key(&expected));
        }
        assert_eq!(peer.reliability_queue.lock().len(), 5);
    }
}
