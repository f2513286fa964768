//! # Integration tests: Endpoint ↔ Endpoint through the wire format
//!
//! Two endpoints exchange encoded wire units through an in-memory channel.
//! No network I/O: impairment (loss, reorder, duplication) is applied to the
//! datagrams in the middle, driven by a seeded RNG so every run is the same.

use bytes::Bytes;
use quanta::{Clock, Mock};
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use strata_reliable::receiver::ReceiveController;
use strata_reliable::sender::SendController;
use strata_reliable::wire::WireUnit;
use strata_reliable::{
    Endpoint, EndpointEvent, PayloadCodec, RawCodec, ReceiveEvent, ReliabilityConfig, Seq,
    UnackedReason,
};

// ─── Helpers ────────────────────────────────────────────────────────────────

type RawEndpoint = Endpoint<Clock, RawCodec, Vec<Bytes>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn endpoint(config: &ReliabilityConfig) -> (RawEndpoint, Arc<Mock>) {
    let (clock, mock) = Clock::mock();
    let ep = Endpoint::new(config.clone(), clock, RawCodec, Vec::new()).unwrap();
    (ep, mock)
}

/// Datagram impairment applied between two endpoints.
struct Channel {
    rng: StdRng,
    loss: f64,
    duplicate: f64,
    reorder: f64,
}

impl Channel {
    fn perfect() -> Self {
        Channel::lossy(0, 0.0, 0.0, 0.0)
    }

    fn lossy(seed: u64, loss: f64, duplicate: f64, reorder: f64) -> Self {
        Channel {
            rng: StdRng::seed_from_u64(seed),
            loss,
            duplicate,
            reorder,
        }
    }

    /// Move everything `from` has sent into `to`.
    fn carry(&mut self, from: &mut RawEndpoint, to: &mut RawEndpoint) {
        let mut in_flight: Vec<Bytes> = Vec::new();
        for datagram in from.transport_mut().drain(..) {
            if self.rng.random::<f64>() < self.loss {
                continue;
            }
            if self.rng.random::<f64>() < self.duplicate {
                in_flight.push(datagram.clone());
            }
            in_flight.push(datagram);
        }
        for i in 1..in_flight.len() {
            if self.rng.random::<f64>() < self.reorder {
                let j = self.rng.random_range(0..i);
                in_flight.swap(i, j);
            }
        }
        for datagram in in_flight {
            to.receive(&datagram).unwrap();
        }
    }
}

/// Per-side record of what the application saw.
#[derive(Default)]
struct Observed {
    ordered: Vec<Seq>,
    unordered: Vec<Seq>,
    acked: Vec<Seq>,
    unacked: Vec<(Seq, UnackedReason)>,
}

impl Observed {
    fn collect(&mut self, ep: &mut RawEndpoint) {
        for event in ep.drain_events() {
            match event {
                EndpointEvent::Ordered { data_id, .. } => self.ordered.push(data_id),
                EndpointEvent::Unordered { data_id, .. } => self.unordered.push(data_id),
                EndpointEvent::Acked { data_id, .. } => self.acked.push(data_id),
                EndpointEvent::Unacked {
                    data_id, reason, ..
                } => self.unacked.push((data_id, reason)),
            }
        }
    }
}

/// One step of the exchange: `a` sends, `b` acks.
fn round(
    a: &mut RawEndpoint,
    b: &mut RawEndpoint,
    forward: &mut Channel,
    backward: &mut Channel,
    clocks: &[&Arc<Mock>],
    step: Duration,
) {
    for clock in clocks {
        clock.increment(step);
    }
    a.tick();
    a.flush().unwrap();
    forward.carry(a, b);
    b.flush().unwrap();
    backward.carry(b, a);
}

// ─── Concrete Scenario ─────────────────────────────────────────────────────

#[test]
fn lost_middle_item_is_recovered() {
    let config = ReliabilityConfig {
        initial_transmission_id: Seq::new(100),
        initial_rto: Duration::from_millis(100),
        ..Default::default()
    };
    let (clock, mock) = Clock::mock();
    let mut tx = SendController::new(&config);
    let mut rx = ReceiveController::new(&config);

    let segments: Vec<_> = [b"zero", b"one!", b"two!"]
        .into_iter()
        .map(|p| tx.on_send(Bytes::from_static(p), clock.now()).unwrap().segment)
        .collect();
    let ids: Vec<(u16, u16)> = segments
        .iter()
        .map(|s| (s.data_id.value(), s.transmission_ids[0].value()))
        .collect();
    assert_eq!(ids, vec![(0, 100), (1, 101), (2, 102)]);

    // 101 is lost.
    let unit = WireUnit {
        ack: Seq::new(0),
        ack_bitmap: 0,
        segments: vec![segments[0].clone(), segments[2].clone()],
    };
    let events = rx.on_datagram(&unit.encode(), clock.now()).unwrap().events;
    assert_eq!(
        events,
        vec![
            ReceiveEvent::Unordered {
                data_id: Seq::new(0),
                payload: Bytes::from_static(b"zero"),
            },
            ReceiveEvent::Unordered {
                data_id: Seq::new(2),
                payload: Bytes::from_static(b"two!"),
            },
            ReceiveEvent::Ordered {
                data_id: Seq::new(0),
                payload: Bytes::from_static(b"zero"),
            },
        ]
    );
    assert_eq!(rx.cursor(), Seq::new(0));

    let ack = rx.build_ack_fields();
    assert_eq!(ack.ack, Seq::new(102));
    assert_eq!(ack.bitmap & 0b01, 0, "101 not received");
    assert_eq!(ack.bitmap & 0b10, 0b10, "100 received");

    mock.increment(Duration::from_millis(20));
    let acked: Vec<u16> = tx
        .on_ack_received(ack.ack, ack.bitmap, clock.now())
        .iter()
        .map(|e| e.data_id().value())
        .collect();
    assert_eq!(acked, vec![2, 0]);
    assert!(tx.is_pending(Seq::new(1)));

    mock.increment(Duration::from_millis(200));
    let out = tx.retransmit(clock.now());
    assert_eq!(out.segments.len(), 1);
    assert_eq!(out.segments[0].data_id, Seq::new(1));
    assert_eq!(
        out.segments[0].transmission_ids,
        vec![Seq::new(101), Seq::new(103)]
    );

    let unit = WireUnit {
        ack: Seq::new(0),
        ack_bitmap: 0,
        segments: out.segments,
    };
    let events = rx.on_datagram(&unit.encode(), clock.now()).unwrap().events;
    let ordered: Vec<u16> = events
        .iter()
        .filter(|e| e.is_ordered())
        .map(|e| e.data_id().value())
        .collect();
    assert_eq!(ordered, vec![1, 2]);
    assert_eq!(rx.cursor(), Seq::new(2));
    assert_eq!(rx.buffered(), 0);

    let ack = rx.build_ack_fields();
    let events = tx.on_ack_received(ack.ack, ack.bitmap, clock.now());
    assert_eq!(events.len(), 1);
    assert!(events[0].is_acked());
    assert_eq!(tx.pending_len(), 0);
}

// ─── Perfect Network ───────────────────────────────────────────────────────

#[test]
fn perfect_network_delivers_everything_in_order() {
    init_tracing();
    let config = ReliabilityConfig::default();
    let (mut a, ma) = endpoint(&config);
    let (mut b, mb) = endpoint(&config);
    let mut forward = Channel::perfect();
    let mut backward = Channel::perfect();
    let mut at_a = Observed::default();
    let mut at_b = Observed::default();

    for chunk in 0..25u16 {
        for i in 0..4u16 {
            a.send(&Bytes::from(format!("item-{}", chunk * 4 + i))).unwrap();
        }
        round(&mut a, &mut b, &mut forward, &mut backward, &[&ma, &mb], Duration::from_millis(5));
        at_a.collect(&mut a);
        at_b.collect(&mut b);
    }

    let expected: Vec<Seq> = (0..100).map(Seq::new).collect();
    assert_eq!(at_b.ordered, expected);
    assert_eq!(at_b.unordered, expected);
    assert_eq!(at_a.acked.len(), 100);
    assert!(at_a.unacked.is_empty());
    assert_eq!(a.sender().pending_len(), 0);
    assert_eq!(a.sender_stats().retransmissions, 0);
    assert_eq!(b.receiver_stats().duplicates, 0);
}

// ─── Impaired Network ──────────────────────────────────────────────────────

#[test]
fn lossy_network_resolves_every_item_once() {
    init_tracing();
    let config = ReliabilityConfig {
        initial_rto: Duration::from_millis(50),
        packet_retransmit_limit: 20,
        ..Default::default()
    };
    let (mut a, ma) = endpoint(&config);
    let (mut b, mb) = endpoint(&config);
    let mut forward = Channel::lossy(0x5EED, 0.2, 0.05, 0.3);
    let mut backward = Channel::lossy(0xACC, 0.2, 0.05, 0.3);
    let mut at_a = Observed::default();
    let mut at_b = Observed::default();

    let total = 300u16;
    let mut sent = 0u16;
    for _ in 0..5_000 {
        if sent < total {
            for _ in 0..3 {
                a.send(&Bytes::from(sent.to_be_bytes().to_vec())).unwrap();
                sent += 1;
            }
        }
        round(&mut a, &mut b, &mut forward, &mut backward, &[&ma, &mb], Duration::from_millis(10));
        at_a.collect(&mut a);
        at_b.collect(&mut b);
        if sent == total && a.sender().pending_len() == 0 {
            break;
        }
    }

    assert_eq!(a.sender().pending_len(), 0, "every item resolved");

    // Each item resolves exactly once, as acked or unacked.
    let acked: HashSet<Seq> = at_a.acked.iter().copied().collect();
    let unacked: HashSet<Seq> = at_a.unacked.iter().map(|(id, _)| *id).collect();
    assert_eq!(acked.len(), at_a.acked.len());
    assert_eq!(unacked.len(), at_a.unacked.len());
    assert!(acked.is_disjoint(&unacked));
    assert_eq!(acked.len() + unacked.len(), total as usize);

    // Nothing is acked that the peer did not get.
    let received: HashSet<Seq> = at_b.unordered.iter().copied().collect();
    assert_eq!(received.len(), at_b.unordered.len(), "unordered at most once");
    assert!(acked.is_subset(&received));

    // Ordered delivery is an increasing run without repeats.
    let ordered: BTreeSet<u16> = at_b.ordered.iter().map(|s| s.value()).collect();
    assert_eq!(ordered.len(), at_b.ordered.len(), "ordered at most once");
    assert!(at_b.ordered.windows(2).all(|w| w[0].is_before(w[1])));
    assert_eq!(at_b.ordered.first(), Some(&Seq::new(0)));

    assert!(a.sender_stats().retransmissions > 0);
    assert!(b.receiver_stats().duplicates > 0);
}

#[test]
fn retransmission_bound_fires_unacked_once() {
    let config = ReliabilityConfig {
        initial_rto: Duration::from_millis(100),
        packet_retransmit_limit: 4,
        ..Default::default()
    };
    let (mut a, ma) = endpoint(&config);
    let (mut b, mb) = endpoint(&config);
    let mut black_hole = Channel::lossy(1, 1.0, 0.0, 0.0);
    let mut backward = Channel::perfect();
    let mut at_a = Observed::default();

    a.send(&Bytes::from_static(b"never arrives")).unwrap();
    let mut transmissions = 0;
    for _ in 0..20 {
        round(&mut a, &mut b, &mut black_hole, &mut backward, &[&ma, &mb], Duration::from_millis(100));
        at_a.collect(&mut a);
        transmissions = a.sender_stats().transmissions;
    }

    assert_eq!(transmissions, 5, "original plus four retries");
    assert_eq!(at_a.unacked, vec![(Seq::new(0), UnackedReason::RetransmitLimit)]);
    assert!(at_a.acked.is_empty());
    assert_eq!(a.sender().pending_len(), 0);
}

#[test]
fn ack_loss_beyond_window_gives_up() {
    let config = ReliabilityConfig::default();
    let (mut a, ma) = endpoint(&config);
    let (mut b, mb) = endpoint(&config);
    let mut forward = Channel::perfect();
    let mut black_hole = Channel::lossy(2, 1.0, 0.0, 0.0);
    let mut backward = Channel::perfect();
    let mut at_a = Observed::default();

    // 40 items in one unit; b's acks are all lost.
    for i in 0..40u8 {
        a.send(&Bytes::from(vec![i])).unwrap();
    }
    round(&mut a, &mut b, &mut forward, &mut black_hole, &[&ma, &mb], Duration::from_millis(1));
    at_a.collect(&mut a);
    assert!(at_a.acked.is_empty());

    // The next ack only covers the newest 33 transmission ids.
    a.send(&Bytes::from_static(b"last")).unwrap();
    round(&mut a, &mut b, &mut forward, &mut backward, &[&ma, &mb], Duration::from_millis(1));
    at_a.collect(&mut a);
    assert_eq!(at_a.acked.len(), 33);
    let out_of_window: Vec<u16> = at_a
        .unacked
        .iter()
        .map(|&(id, reason)| {
            assert_eq!(reason, UnackedReason::OutOfWindow);
            id.value()
        })
        .collect();
    assert_eq!(out_of_window, (0..8).collect::<Vec<_>>());
    assert_eq!(a.sender().pending_len(), 0);
}

// ─── Typed Payloads ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Telemetry {
    link: u8,
    rtt_ms: f64,
    label: String,
}

struct JsonCodec;

impl PayloadCodec for JsonCodec {
    type Item = Telemetry;

    fn encode(&self, item: &Telemetry) -> anyhow::Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(item)?))
    }

    fn decode(&self, payload: Bytes) -> anyhow::Result<Telemetry> {
        Ok(serde_json::from_slice(&payload)?)
    }
}

#[test]
fn typed_items_roundtrip_through_codec() {
    let config = ReliabilityConfig::from_toml_str(
        r#"
        version = 1
        [reliability]
        max_segments_per_unit = 1
        "#,
    )
    .unwrap();
    let (ca, _ma) = Clock::mock();
    let (cb, _mb) = Clock::mock();
    let mut a = Endpoint::new(config.clone(), ca, JsonCodec, Vec::<Bytes>::new()).unwrap();
    let mut b = Endpoint::new(config, cb, JsonCodec, Vec::<Bytes>::new()).unwrap();

    let items: Vec<Telemetry> = (0..3)
        .map(|i| Telemetry {
            link: i,
            rtt_ms: 12.5 * f64::from(i),
            label: format!("modem-{i}"),
        })
        .collect();
    for item in &items {
        a.send(item).unwrap();
    }
    assert_eq!(a.flush().unwrap(), 3, "one segment per unit");

    // Deliver in reverse.
    let datagrams: Vec<Bytes> = a.transport_mut().drain(..).rev().collect();
    for d in &datagrams {
        b.receive(d).unwrap();
    }
    let ordered: Vec<Telemetry> = b
        .drain_events()
        .filter_map(|e| match e {
            EndpointEvent::Ordered { item, .. } => Some(item),
            _ => None,
        })
        .collect();
    assert_eq!(ordered, items);

    b.flush().unwrap();
    for d in b.transport_mut().drain(..).collect::<Vec<_>>() {
        a.receive(&d).unwrap();
    }
    let acked: Vec<Telemetry> = a.drain_events().map(|e| e.item().clone()).collect();
    assert_eq!(acked.len(), 3);
    assert!(items.iter().all(|i| acked.contains(i)));
}
