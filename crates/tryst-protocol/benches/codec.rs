//! Codec benchmarks for tryst-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tryst_protocol::{codec, Event, MatchId, StoredMessage, UserId};

fn bench_encode_new_message(c: &mut Criterion) {
    let stored = StoredMessage::text(MatchId::new_v4(), UserId::new_v4(), "x".repeat(64));
    let event = Event::new_message(&stored);
    let size = codec::encode(&event).unwrap().len();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("new_message_64B", |b| {
        b.iter(|| codec::encode(black_box(&event)))
    });
    group.finish();
}

fn bench_decode_inbound(c: &mut Criterion) {
    let encoded = codec::encode(&Event::send_message(MatchId::new_v4(), "x".repeat(64))).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("send_message_64B", |b| {
        b.iter(|| codec::decode_inbound(black_box(&encoded)))
    });
    group.finish();
}

fn bench_presence_fanout_encode(c: &mut Criterion) {
    let user = UserId::new_v4();

    c.bench_function("user_status", |b| {
        b.iter(|| {
            let event = Event::user_status(black_box(user), tryst_protocol::PresenceStatus::Online);
            codec::encode(&event).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_new_message,
    bench_decode_inbound,
    bench_presence_fanout_encode
);
criterion_main!(benches);
