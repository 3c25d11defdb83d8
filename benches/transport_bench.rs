// Peer reliability-layer benchmarks using criterion.
//
// Measures:
//   - Envelope encode / decode throughput
//   - Peer::enqueue throughput (sequence assignment + retransmit bookkeeping)
//   - Peer::ingest throughput, in-order and out-of-order

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::sync::{mpsc, Notify};

use vocalink::codec::{MinimalCodec, PacketCodec};
use vocalink::packet::{Packet, PacketKind};
use vocalink::peer::Peer;

fn addr() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

fn new_peer() -> Peer {
    let (tx, _rx) = mpsc::unbounded_channel();
    Peer::new(addr(), Arc::new(Notify::new()), tx)
}

fn bench_codec_encode(c: &mut Criterion) {
    let sizes: &[usize] = &[64, 1024, 8192];
    let codec = MinimalCodec;

    let mut group = c.benchmark_group("codec_encode");
    for &size in sizes {
        let packet = Packet::reliable(PacketKind::Data, Bytes::from(vec![0xABu8; size]));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{size}B")),
            &packet,
            |b, p| {
                b.iter(|| black_box(codec.encode(p)));
            },
        );
    }
    group.finish();
}

fn bench_codec_decode(c: &mut Criterion) {
    let sizes: &[usize] = &[64, 1024, 8192];
    let codec = MinimalCodec;

    let mut group = c.benchmark_group("codec_decode");
    for &size in sizes {
        let packet = Packet::reliable(PacketKind::Data, Bytes::from(vec![0xABu8; size]));
        let encoded = codec.encode(&packet);
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{size}B")),
            &encoded,
            |b, data| {
                b.iter(|| black_box(codec.decode(black_box(data)).unwrap()));
            },
        );
    }
    group.finish();
}

fn bench_peer_enqueue(c: &mut Criterion) {
    c.bench_function("peer_enqueue_reliable", |b| {
        let peer = new_peer();
        b.iter(|| {
            peer.enqueue(Packet::reliable(PacketKind::Data, Bytes::from_static(b"x")))
                .unwrap();
            black_box(peer.drain_send_queue());
        });
    });
}

fn bench_peer_ingest_in_order(c: &mut Criterion) {
    c.bench_function("peer_ingest_in_order", |b| {
        b.iter(|| {
            let peer = new_peer();
            for seq in 0..100u32 {
                let mut packet = Packet::reliable(PacketKind::Data, Bytes::from_static(b"x"));
                packet.sequence = seq;
                black_box(peer.ingest(packet).unwrap());
            }
        });
    });
}

fn bench_peer_ingest_reordered(c: &mut Criterion) {
    c.bench_function("peer_ingest_reordered", |b| {
        b.iter(|| {
            let peer = new_peer();
            // Deliver odd sequences first, then even, forcing every packet
            // through the reorder buffer before the final drain.
            for seq in (1..100u32).step_by(2) {
                let mut packet = Packet::reliable(PacketKind::Data, Bytes::from_static(b"x"));
                packet.sequence = seq;
                black_box(peer.ingest(packet).unwrap());
            }
            for seq in (0..100u32).step_by(2) {
                let mut packet = Packet::reliable(PacketKind::Data, Bytes::from_static(b"x"));
                packet.sequence = seq;
                black_box(peer.ingest(packet).unwrap());
            }
        });
    });
}

criterion_group! {
    name = transport_benches;
    config = Criterion::default()
        .sample_size(100)
        .measurement_time(std::time::Duration::from_secs(5));
    targets =
        bench_codec_encode,
        bench_codec_decode,
        bench_peer_enqueue,
        bench_peer_ingest_in_order,
        bench_peer_ingest_reordered,
}

criterion_main!(transport_benches);
