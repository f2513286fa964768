//! Hot-path benchmarks for strata-reliable.
//!
//! Measures the per-item cost of:
//! - WireUnit encode/decode (various segment counts)
//! - SendController.on_send()
//! - SendController.on_ack_received() over a full window
//! - ReceiveController.on_unit_received() in order and with a gap
//!
//! Run with: cargo bench --package strata-reliable

use bytes::Bytes;
use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};

use strata_reliable::ReliabilityConfig;
use strata_reliable::receiver::ReceiveController;
use strata_reliable::sender::SendController;
use strata_reliable::seq::Seq;
use strata_reliable::wire::{Segment, WireUnit};

const ITEMS: usize = 64;

fn segments(count: usize, payload_len: usize) -> Vec<Segment> {
    let payload = Bytes::from(vec![0xAB; payload_len]);
    (0..count)
        .map(|i| Segment::new(Seq::new(i as u16), Seq::new(i as u16), payload.clone()))
        .collect()
}

// ─── Wire ────────────────────────────────────────────────────────────────

fn bench_wire(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_unit");

    for count in [1usize, 8, 32] {
        let unit = WireUnit {
            ack: Seq::new(1000),
            ack_bitmap: 0xFFFF_0F0F,
            segments: segments(count, 1200),
        };
        let encoded = unit.encode().freeze();
        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_function(format!("encode_{count}seg"), |b| {
            b.iter(|| black_box(black_box(&unit).encode()));
        });
        group.bench_function(format!("decode_{count}seg"), |b| {
            b.iter(|| {
                let mut buf = black_box(encoded.clone());
                black_box(WireUnit::decode(&mut buf).ok());
            });
        });
    }

    group.finish();
}

// ─── Sender ──────────────────────────────────────────────────────────────

fn bench_sender(c: &mut Criterion) {
    let (clock, _mock) = quanta::Clock::mock();
    let config = ReliabilityConfig::default();
    let payload = Bytes::from(vec![0u8; 1200]);

    let mut group = c.benchmark_group("sender");
    group.throughput(Throughput::Elements(ITEMS as u64));

    group.bench_function("on_send", |b| {
        b.iter_batched(
            || SendController::new(&config),
            |mut tx| {
                for _ in 0..ITEMS {
                    black_box(tx.on_send(payload.clone(), clock.now()).ok());
                }
                tx
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("on_ack_received", |b| {
        b.iter_batched(
            || {
                let mut tx = SendController::new(&config);
                for _ in 0..ITEMS {
                    let _ = tx.on_send(payload.clone(), clock.now());
                }
                tx
            },
            |mut tx| {
                // Acks arrive one per item, each carrying the full bitmap.
                for i in 0..ITEMS {
                    black_box(tx.on_ack_received(Seq::new(i as u16), u32::MAX, clock.now()));
                }
                tx
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

// ─── Receiver ────────────────────────────────────────────────────────────

fn bench_receiver(c: &mut Criterion) {
    let (clock, _mock) = quanta::Clock::mock();
    let config = ReliabilityConfig::default();
    let units: Vec<WireUnit> = segments(ITEMS, 1200)
        .into_iter()
        .map(|s| WireUnit {
            ack: Seq::new(0),
            ack_bitmap: 0,
            segments: vec![s],
        })
        .collect();

    let mut group = c.benchmark_group("receiver");
    group.throughput(Throughput::Elements(ITEMS as u64));

    group.bench_function("in_order", |b| {
        b.iter_batched(
            || ReceiveController::new(&config),
            |mut rx| {
                for unit in &units {
                    black_box(rx.on_unit_received(unit, clock.now()));
                }
                rx
            },
            BatchSize::SmallInput,
        );
    });

    // First item arrives last, so everything else is buffered until the
    // gap closes.
    group.bench_function("head_of_line_gap", |b| {
        b.iter_batched(
            || ReceiveController::new(&config),
            |mut rx| {
                for unit in units.iter().skip(1).chain(units.iter().take(1)) {
                    black_box(rx.on_unit_received(unit, clock.now()));
                }
                rx
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_wire, bench_sender, bench_receiver);
criterion_main!(benches);
