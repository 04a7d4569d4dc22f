//! Criterion benchmarks for the lanlink binary codec.
//!
//! Measures encoding and decoding latency for the descriptor-bearing
//! messages, which dominate discovery traffic (every advertisement and
//! probe response carries a full 0x480-byte descriptor).
//!
//! Run with:
//! ```bash
//! cargo bench --package lanlink-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lanlink_core::domain::descriptor::{NetworkInfo, NodeInfo, SecurityMode};
use lanlink_core::domain::session::ConnectRequest;
use lanlink_core::protocol::codec::{decode_message, encode_message};
use lanlink_core::protocol::messages::LanMessage;
use std::net::Ipv4Addr;
use uuid::Uuid;

// ── Message fixtures ──────────────────────────────────────────────────────────

fn full_descriptor() -> NetworkInfo {
    let mut info = NetworkInfo {
        local_communication_id: 0x1122_3344_5566_7788,
        scene_id: 3,
        session_id: Uuid::new_v4(),
        local_communication_version: 2,
        security_mode: SecurityMode::SharedKey,
        network_name: "bench-session".to_string(),
        host_port: 11453,
        security_key: vec![0xAA; 32],
        node_count_max: 8,
        ..NetworkInfo::default()
    };
    for i in 0..8u8 {
        info.add_node(NodeInfo {
            ipv4: Ipv4Addr::new(10, 0, 0, i + 1),
            mac: [0x02, 0, 0, 0, 0, i],
            nickname: format!("node-{i}"),
            local_communication_version: 2,
            ..NodeInfo::default()
        })
        .unwrap();
    }
    info.set_advertise_data(&vec![0x5A; 0x180]).unwrap();
    info
}

fn make_advertise() -> LanMessage {
    LanMessage::Advertise(full_descriptor())
}

fn make_join() -> LanMessage {
    LanMessage::Join(ConnectRequest {
        security_mode: SecurityMode::SharedKey,
        key: vec![0xAA; 32],
        nickname: "bench-station".to_string(),
        local_communication_version: 2,
        option: 0,
    })
}

fn make_ping() -> LanMessage {
    LanMessage::Ping(42)
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for (name, msg) in [
        ("advertise", make_advertise()),
        ("join", make_join()),
        ("ping", make_ping()),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &msg, |b, msg| {
            b.iter(|| encode_message(black_box(msg), 0, 0).unwrap());
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for (name, msg) in [
        ("advertise", make_advertise()),
        ("join", make_join()),
        ("ping", make_ping()),
    ] {
        let bytes = encode_message(&msg, 0, 0).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), &bytes, |b, bytes| {
            b.iter(|| decode_message(black_box(bytes)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
