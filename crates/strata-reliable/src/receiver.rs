//! # Receive Controller
//!
//! Pure logic, no I/O. Ingests wire units from the peer, records which
//! transmission ids arrived (for the ack fields sent back), drops duplicate
//! data and rebuilds the sender's data-id order.
//!
//! ## Delivery
//!
//! Every new item is delivered once as [`ReceiveEvent::Unordered`] the moment
//! it arrives. Items are also delivered once as [`ReceiveEvent::Ordered`]
//! when they and every predecessor have arrived:
//!
//! ```text
//!   cursor ─┐        gap
//!           ▼         ▼
//!   ... [0] [1] [2] [ ] [4] [5]      arrive 3 → Ordered 3, 4, 5
//! ```
//!
//! When the cursor lags the newest data id by more than
//! `packet_offset_limit`, the missing ids are given up on: the cursor jumps
//! forward and buffered items passed on the way come out as `Ordered`.

use bytes::Bytes;
use quanta::Instant;

use crate::config::ReliabilityConfig;
use crate::error::WireError;
use crate::seq::Seq;
use crate::stats::ReceiverStats;
use crate::store::{AssociationStore, Record};
use crate::window::BitWindow;
use crate::wire::{Segment, WireUnit};

// ─── Events ─────────────────────────────────────────────────────────────────

/// Data handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// The item and all its predecessors have arrived.
    Ordered { data_id: Seq, payload: Bytes },
    /// A new item arrived; predecessors may still be missing.
    Unordered { data_id: Seq, payload: Bytes },
}

impl ReceiveEvent {
    pub fn data_id(&self) -> Seq {
        match self {
            ReceiveEvent::Ordered { data_id, .. } | ReceiveEvent::Unordered { data_id, .. } => {
                *data_id
            }
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            ReceiveEvent::Ordered { payload, .. } | ReceiveEvent::Unordered { payload, .. } => {
                payload
            }
        }
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, ReceiveEvent::Ordered { .. })
    }
}

/// Ack fields describing what this side has received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFields {
    pub ack: Seq,
    pub bitmap: u32,
}

/// Result of ingesting one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    /// The peer's ack fields, for the local send controller.
    pub peer_ack: AckFields,
    pub events: Vec<ReceiveEvent>,
}

// ─── Receive Controller ─────────────────────────────────────────────────────

/// Receive-side reliability state for one peer.
#[derive(Debug)]
pub struct ReceiveController {
    /// Transmission ids seen, anchored at the newest.
    ack_window: Option<BitWindow>,
    /// Data ids seen, anchored at the newest.
    received: Option<BitWindow>,
    /// Last data id delivered in order.
    cursor: Seq,
    /// Items that arrived ahead of a gap, keyed by data id.
    pending: AssociationStore<Bytes>,
    initial_transmission_id: Seq,
    offset_limit: u16,
    ack_due: bool,
    stats: ReceiverStats,
}

impl ReceiveController {
    pub fn new(config: &ReliabilityConfig) -> Self {
        let cursor = config.initial_data_id.retreat(1);
        ReceiveController {
            ack_window: None,
            received: None,
            cursor,
            pending: AssociationStore::new(),
            initial_transmission_id: config.initial_transmission_id,
            offset_limit: config.packet_offset_limit,
            ack_due: false,
            stats: ReceiverStats {
                cursor: cursor.value(),
                ..Default::default()
            },
        }
    }

    /// Decode and ingest one datagram.
    ///
    /// A malformed datagram is rejected as a whole and leaves the controller
    /// untouched.
    pub fn on_datagram(&mut self, datagram: &[u8], now: Instant) -> Result<Incoming, WireError> {
        let unit = match WireUnit::decode(&mut &datagram[..]) {
            Ok(unit) => unit,
            Err(e) => {
                self.stats.malformed_units += 1;
                tracing::debug!(error = %e, len = datagram.len(), "dropping malformed wire unit");
                return Err(e);
            }
        };
        let events = self.on_unit_received(&unit, now);
        Ok(Incoming {
            peer_ack: AckFields {
                ack: unit.ack,
                bitmap: unit.ack_bitmap,
            },
            events,
        })
    }

    /// Ingest every segment of a decoded unit and return deliveries in
    /// order: all `Unordered` events of the unit first, then the `Ordered`
    /// run it completed.
    pub fn on_unit_received(&mut self, unit: &WireUnit, now: Instant) -> Vec<ReceiveEvent> {
        self.stats.units_received += 1;
        let mut events = Vec::new();
        for segment in &unit.segments {
            self.ingest(segment, now, &mut events);
        }
        self.deliver_ordered(&mut events);
        self.stats.buffered = self.pending.len();
        self.stats.cursor = self.cursor.value();
        events
    }

    fn ingest(&mut self, segment: &Segment, now: Instant, events: &mut Vec<ReceiveEvent>) {
        self.stats.segments_received += 1;
        for &tx in &segment.transmission_ids {
            self.ack_window = Some(match self.ack_window {
                Some(w) => w.mark(tx),
                None => BitWindow::new(tx),
            });
        }
        if !segment.transmission_ids.is_empty() {
            self.ack_due = true;
        }

        let data_id = segment.data_id;
        if self.is_duplicate(data_id) {
            self.stats.duplicates += 1;
            tracing::trace!(data_id = %data_id, "duplicate segment");
            return;
        }

        self.received = Some(match self.received {
            Some(w) => w.mark(data_id),
            None => BitWindow::new(data_id),
        });
        let handle = self.pending.create(data_id, segment.payload.clone(), now);
        if let Err(e) = self.pending.insert(data_id, handle) {
            // A fresh record holds no keys yet.
            tracing::warn!(data_id = %data_id, error = %e, "failed to buffer segment");
            self.pending.remove_record(handle);
            return;
        }

        self.stats.bytes_received += segment.payload.len() as u64;
        self.stats.delivered_unordered += 1;
        tracing::trace!(data_id = %data_id, len = segment.payload.len(), "new segment");
        events.push(ReceiveEvent::Unordered {
            data_id,
            payload: segment.payload.clone(),
        });
    }

    fn is_duplicate(&self, data_id: Seq) -> bool {
        data_id.is_at_or_before(self.cursor)
            || self.cursor.compare(data_id).is_none()
            || self.received.is_some_and(|w| w.contains(data_id))
            || self.pending.contains_key(data_id)
    }

    fn deliver_ordered(&mut self, events: &mut Vec<ReceiveEvent>) {
        if let Some(highest) = self.highest_data_id() {
            if highest.is_after(self.cursor) && self.cursor.distance_to(highest) > self.offset_limit
            {
                self.skip_to(highest.retreat(self.offset_limit), events);
            }
        }

        loop {
            let next = self.cursor.next();
            let Some(handle) = self.pending.get(next) else {
                break;
            };
            if let Some(record) = self.pending.remove_record(handle) {
                self.emit_ordered(record, events);
            }
            self.cursor = next;
        }
    }

    /// Force the cursor to `target`, delivering whatever is buffered on the
    /// way and giving up on the rest.
    fn skip_to(&mut self, target: Seq, events: &mut Vec<ReceiveEvent>) {
        let origin = self.cursor.next();
        let span = origin.distance_to(target);

        let mut passed = Vec::new();
        let mut walk = self.pending.cursor(origin);
        while let Some((key, _)) = walk.next() {
            if origin.distance_to(key) > span {
                break;
            }
            if let Some(record) = walk.remove_current_record() {
                passed.push(record);
            }
        }

        let skipped = (span as u64 + 1) - passed.len() as u64;
        self.stats.skipped += skipped;
        tracing::debug!(
            from = %self.cursor,
            to = %target,
            skipped,
            delivered = passed.len(),
            "offset limit exceeded, skipping gap"
        );

        for record in passed {
            self.emit_ordered(record, events);
        }
        self.cursor = target;
    }

    fn emit_ordered(&mut self, record: Record<Bytes>, events: &mut Vec<ReceiveEvent>) {
        self.stats.delivered_ordered += 1;
        events.push(ReceiveEvent::Ordered {
            data_id: record.primary(),
            payload: record.value,
        });
    }

    /// Ack fields for the next outgoing unit.
    ///
    /// Before anything has arrived the ack names the id just before the
    /// peer's first transmission id, with an empty bitmap.
    pub fn build_ack_fields(&self) -> AckFields {
        match self.ack_window {
            Some(w) => AckFields {
                ack: w.anchor(),
                bitmap: w.to_wire(),
            },
            None => AckFields {
                ack: self.initial_transmission_id.retreat(1),
                bitmap: 0,
            },
        }
    }

    /// Whether data arrived since the last [`ack_sent`](Self::ack_sent).
    pub fn ack_due(&self) -> bool {
        self.ack_due
    }

    pub fn ack_sent(&mut self) {
        self.ack_due = false;
    }

    /// Last data id delivered in order.
    pub fn cursor(&self) -> Seq {
        self.cursor
    }

    /// Newest data id received.
    pub fn highest_data_id(&self) -> Option<Seq> {
        self.received.map(|w| w.anchor())
    }

    /// Newest transmission id received.
    pub fn highest_transmission_id(&self) -> Option<Seq> {
        self.ack_window.map(|w| w.anchor())
    }

    /// Items waiting behind a gap.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }
}
