//! # Send Controller
//!
//! Pure logic, no I/O. Assigns data and transmission ids, keeps every sent
//! item until the peer acknowledges it or it is given up on, samples RTT from
//! acks and decides what to retransmit.
//!
//! ## Lifecycle of an item
//!
//! ```text
//!   on_send ──▶ pending ──ack──────────────────────▶ Acked
//!                 │ ▲
//!         RTO     │ │ new transmission id
//!                 ▼ │
//!              retransmit ──limit / timeout / window──▶ Unacked
//! ```
//!
//! Every transmission of an item goes out under a fresh transmission id and
//! the item is reachable under all of them, so an ack for any copy resolves
//! it. Each item resolves exactly once, as either `Acked` or `Unacked`.

use bytes::Bytes;
use quanta::Instant;
use std::fmt;
use std::time::Duration;

use crate::config::ReliabilityConfig;
use crate::error::CapacityError;
use crate::rtt::RttEstimator;
use crate::seq::{Seq, SequenceGenerator, HALF_SPACE};
use crate::stats::SenderStats;
use crate::store::{AssociationStore, RecordHandle};
use crate::window::{BitWindow, WIRE_BITMAP_WIDTH};
use crate::wire::{Segment, MAX_PAYLOAD_LEN};

// ─── Events ─────────────────────────────────────────────────────────────────

/// Why an item was given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnackedReason {
    /// Its latest transmission fell behind the range the peer's ack covers.
    OutOfWindow,
    /// It was retransmitted `packet_retransmit_limit` times already.
    RetransmitLimit,
    /// It stayed pending longer than `packet_queue_timeout`.
    QueueTimeout,
    /// The queue was full when a new item was sent.
    QueueOverflow,
}

impl fmt::Display for UnackedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnackedReason::OutOfWindow => "out of window",
            UnackedReason::RetransmitLimit => "retransmit limit",
            UnackedReason::QueueTimeout => "queue timeout",
            UnackedReason::QueueOverflow => "queue overflow",
        };
        f.write_str(s)
    }
}

/// Resolution of a sent item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendEvent {
    Acked {
        data_id: Seq,
        payload: Bytes,
    },
    Unacked {
        data_id: Seq,
        payload: Bytes,
        reason: UnackedReason,
    },
}

impl SendEvent {
    pub fn data_id(&self) -> Seq {
        match self {
            SendEvent::Acked { data_id, .. } | SendEvent::Unacked { data_id, .. } => *data_id,
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            SendEvent::Acked { payload, .. } | SendEvent::Unacked { payload, .. } => payload,
        }
    }

    pub fn is_acked(&self) -> bool {
        matches!(self, SendEvent::Acked { .. })
    }
}

/// A freshly sent item, plus anything the send displaced.
#[derive(Debug)]
pub struct SendOutcome {
    pub segment: Segment,
    /// `Unacked` events for items evicted to make room.
    pub events: Vec<SendEvent>,
}

/// Segments to re-frame, plus items given up on.
#[derive(Debug, Default)]
pub struct RetransmitOutcome {
    pub segments: Vec<Segment>,
    pub events: Vec<SendEvent>,
}

// ─── Pending Item ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PendingItem {
    payload: Bytes,
    retransmissions: u32,
    first_sent_at: Instant,
}

// ─── Send Controller ────────────────────────────────────────────────────────

/// Send-side reliability state for one peer.
#[derive(Debug)]
pub struct SendController {
    /// Items in flight, keyed by every transmission id they went out under.
    /// A record's `touched_at` is its last send time.
    pending: AssociationStore<PendingItem>,
    data_ids: SequenceGenerator,
    transmission_ids: SequenceGenerator,
    rtt: RttEstimator,
    queue_limit: usize,
    queue_timeout: Option<Duration>,
    retransmit_limit: u32,
    stats: SenderStats,
}

impl SendController {
    pub fn new(config: &ReliabilityConfig) -> Self {
        let rtt = RttEstimator::new(config);
        let stats = SenderStats {
            rto_us: rtt.rto().as_micros() as u64,
            ..Default::default()
        };
        SendController {
            pending: AssociationStore::with_capacity(config.packet_queue_limit),
            data_ids: SequenceGenerator::new(config.initial_data_id),
            transmission_ids: SequenceGenerator::new(config.initial_transmission_id),
            rtt,
            queue_limit: config.packet_queue_limit,
            queue_timeout: config.packet_queue_timeout,
            retransmit_limit: config.packet_retransmit_limit,
            stats,
        }
    }

    /// Register a new item and return its first segment.
    ///
    /// A full queue first gives up on its oldest item.
    pub fn on_send(&mut self, payload: Bytes, now: Instant) -> Result<SendOutcome, CapacityError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CapacityError::PayloadTooLarge {
                len: payload.len(),
                limit: MAX_PAYLOAD_LEN,
            });
        }

        let mut events = Vec::new();
        while self.pending.len() >= self.queue_limit {
            let Some(oldest) = self.oldest() else {
                break;
            };
            self.give_up(oldest, UnackedReason::QueueOverflow, &mut events);
        }

        let data_id = self.data_ids.next();
        let tx = self.transmission_ids.next();
        let len = payload.len();
        let handle = self.pending.create(
            data_id,
            PendingItem {
                payload: payload.clone(),
                retransmissions: 0,
                first_sent_at: now,
            },
            now,
        );
        match self.pending.insert(tx, handle) {
            Ok(Some(displaced)) => self.drop_if_orphaned(displaced, &mut events),
            Ok(None) => {}
            Err(e) => {
                self.pending.remove_record(handle);
                return Err(e);
            }
        }

        self.stats.items_sent += 1;
        self.stats.transmissions += 1;
        self.stats.bytes_sent += len as u64;
        self.refresh_stats();
        tracing::trace!(data_id = %data_id, tx = %tx, len, "sending item");

        Ok(SendOutcome {
            segment: Segment::new(data_id, tx, payload),
            events,
        })
    }

    /// Apply the peer's ack fields.
    ///
    /// `ack` and every id set in `bitmap` are acknowledged. Items whose latest
    /// transmission id is older than the 32 ids the bitmap can describe are
    /// given up on; older transmission ids of items still in flight are
    /// forgotten.
    pub fn on_ack_received(&mut self, ack: Seq, bitmap: u32, now: Instant) -> Vec<SendEvent> {
        let mut events = Vec::new();
        let newest_sent = self.transmission_ids.current().retreat(1);
        if !ack.is_at_or_before(newest_sent) {
            tracing::debug!(ack = %ack, newest_sent = %newest_sent, "ignoring ack for unsent id");
            return events;
        }

        let window = BitWindow::from_wire(ack, bitmap);
        for tx in window.observed() {
            let Some(handle) = self.pending.get(tx) else {
                continue;
            };
            let Some(record) = self.pending.remove_record(handle) else {
                continue;
            };

            // Only the latest transmission has an unambiguous send time.
            if record.latest_key() == Some(tx) {
                match now.checked_duration_since(record.touched_at()) {
                    Some(sample) => {
                        self.rtt.observe(sample);
                        self.stats.rtt_samples += 1;
                        self.stats.last_rtt_us = sample.as_micros() as u64;
                    }
                    None => {
                        self.stats.rtt_samples_discarded += 1;
                        tracing::debug!(tx = %tx, "discarding negative rtt sample");
                    }
                }
            }

            self.stats.acked += 1;
            tracing::trace!(data_id = %record.primary(), tx = %tx, "item acked");
            events.push(SendEvent::Acked {
                data_id: record.primary(),
                payload: record.value.payload,
            });
        }

        self.prune_behind(ack.retreat(WIRE_BITMAP_WIDTH as u16), &mut events);
        self.refresh_stats();
        events
    }

    /// Walk keys older than `threshold`: items whose latest transmission is
    /// there are lost, other keys are just detached.
    fn prune_behind(&mut self, threshold: Seq, events: &mut Vec<SendEvent>) {
        // First id (in wrap order) that is strictly before `threshold`.
        let origin = threshold.advance(HALF_SPACE + 1);
        let mut lost = Vec::new();
        let mut walk = self.pending.cursor(origin);
        while let Some((key, handle)) = walk.next() {
            if !key.is_before(threshold) {
                break;
            }
            let is_latest = walk
                .store()
                .record(handle)
                .is_some_and(|r| r.latest_key() == Some(key));
            if is_latest {
                lost.push(handle);
            } else {
                walk.remove_current();
            }
        }
        for handle in lost {
            self.give_up(handle, UnackedReason::OutOfWindow, events);
        }
    }

    /// Retransmit every item whose last send is older than the RTO.
    ///
    /// Items past the queue timeout or out of retransmissions are given up
    /// on instead. Items are visited oldest first.
    pub fn retransmit(&mut self, now: Instant) -> RetransmitOutcome {
        let mut out = RetransmitOutcome::default();
        let rto = self.rtt.rto();

        let next_data = self.data_ids.current();
        let mut order: Vec<(u16, RecordHandle)> = self
            .pending
            .records()
            .map(|(h, r)| (r.primary().distance_to(next_data), h))
            .collect();
        order.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        for (_, handle) in order {
            let Some(record) = self.pending.record(handle) else {
                continue;
            };

            if let Some(timeout) = self.queue_timeout {
                if now.saturating_duration_since(record.value.first_sent_at) >= timeout {
                    self.give_up(handle, UnackedReason::QueueTimeout, &mut out.events);
                    continue;
                }
            }
            if now.saturating_duration_since(record.touched_at()) < rto {
                continue;
            }
            if record.value.retransmissions >= self.retransmit_limit {
                self.give_up(handle, UnackedReason::RetransmitLimit, &mut out.events);
                continue;
            }

            let tx = self.transmission_ids.next();
            match self.pending.insert(tx, handle) {
                Ok(Some(displaced)) => self.drop_if_orphaned(displaced, &mut out.events),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(tx = %tx, error = %e, "cannot register retransmission");
                    self.give_up(handle, UnackedReason::RetransmitLimit, &mut out.events);
                    continue;
                }
            }
            self.pending.touch(handle, now);

            let Some(record) = self.pending.record_mut(handle) else {
                continue;
            };
            record.value.retransmissions += 1;
            tracing::debug!(
                data_id = %record.primary(),
                tx = %tx,
                attempt = record.value.retransmissions,
                rto_ms = rto.as_millis() as u64,
                "retransmitting item"
            );
            out.segments.push(Segment {
                data_id: record.primary(),
                transmission_ids: record.keys().to_vec(),
                payload: record.value.payload.clone(),
            });
            self.stats.retransmissions += 1;
            self.stats.transmissions += 1;
        }

        self.refresh_stats();
        out
    }

    /// Remove an item and report it unacked.
    fn give_up(&mut self, handle: RecordHandle, reason: UnackedReason, events: &mut Vec<SendEvent>) {
        let Some(record) = self.pending.remove_record(handle) else {
            return;
        };
        self.stats.record_unacked(reason);
        tracing::debug!(data_id = %record.primary(), %reason, "giving up on item");
        events.push(SendEvent::Unacked {
            data_id: record.primary(),
            payload: record.value.payload,
            reason,
        });
    }

    /// A record that lost its last transmission id to a wrapped id can no
    /// longer be acked.
    fn drop_if_orphaned(&mut self, handle: RecordHandle, events: &mut Vec<SendEvent>) {
        let orphaned = self
            .pending
            .record(handle)
            .is_some_and(|r| r.keys().is_empty());
        if orphaned {
            self.give_up(handle, UnackedReason::OutOfWindow, events);
        }
    }

    /// Pending item with the oldest data id.
    fn oldest(&self) -> Option<RecordHandle> {
        let next_data = self.data_ids.current();
        self.pending
            .records()
            .max_by_key(|(_, r)| r.primary().distance_to(next_data))
            .map(|(h, _)| h)
    }

    fn refresh_stats(&mut self) {
        self.stats.pending = self.pending.len();
        self.stats.srtt_us = self.rtt.srtt().map_or(0, |d| d.as_micros() as u64);
        self.stats.rto_us = self.rtt.rto().as_micros() as u64;
    }

    /// Items awaiting acknowledgment.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether `data_id` is still awaiting acknowledgment.
    pub fn is_pending(&self, data_id: Seq) -> bool {
        self.pending.records().any(|(_, r)| r.primary() == data_id)
    }

    /// Data id the next item will get.
    pub fn next_data_id(&self) -> Seq {
        self.data_ids.current()
    }

    /// Transmission id the next segment will go out under.
    pub fn next_transmission_id(&self) -> Seq {
        self.transmission_ids.current()
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }
}
