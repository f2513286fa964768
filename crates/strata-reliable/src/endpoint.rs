//! # Endpoint
//!
//! Per-peer glue around one [`SendController`] and one
//! [`ReceiveController`]. The endpoint owns no socket and no timer: the
//! clock, the payload codec and the datagram transport are injected, and
//! the caller drives it.
//!
//! ```text
//!   send(item) ─▶ codec.encode ─▶ SendController ─▶ outbox ─┐
//!   tick()     ─▶ SendController::retransmit ─────▶ outbox ─┤
//!                                                           ▼
//!   flush()    ─▶ WireUnitBuilder (+ ack fields) ─▶ transport.send
//!
//!   receive(datagram) ─▶ ReceiveController ─▶ Ordered / Unordered
//!                      └▶ peer ack ─▶ SendController ─▶ Acked / Unacked
//! ```
//!
//! Events are queued and handed out through [`Endpoint::drain_events`].

use bytes::Bytes;
use quanta::Instant;
use std::collections::VecDeque;

use crate::config::ReliabilityConfig;
use crate::error::{ConfigError, EndpointError};
use crate::receiver::{ReceiveController, ReceiveEvent};
use crate::sender::{SendController, SendEvent, UnackedReason};
use crate::seq::Seq;
use crate::stats::{ReceiverStats, SenderStats};
use crate::wire::{Segment, WireUnitBuilder};

// ─── Collaborators ──────────────────────────────────────────────────────────

/// Time source.
pub trait Clock {
    fn now(&self) -> Instant;
}

impl Clock for quanta::Clock {
    fn now(&self) -> Instant {
        quanta::Clock::now(self)
    }
}

/// Converts application items to and from segment payloads.
pub trait PayloadCodec {
    type Item;

    fn encode(&self, item: &Self::Item) -> anyhow::Result<Bytes>;
    fn decode(&self, payload: Bytes) -> anyhow::Result<Self::Item>;
}

/// Identity codec over raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl PayloadCodec for RawCodec {
    type Item = Bytes;

    fn encode(&self, item: &Bytes) -> anyhow::Result<Bytes> {
        Ok(item.clone())
    }

    fn decode(&self, payload: Bytes) -> anyhow::Result<Bytes> {
        Ok(payload)
    }
}

/// Datagram send primitive.
pub trait Transport {
    fn send(&mut self, datagram: Bytes) -> anyhow::Result<()>;
}

/// Collects datagrams in memory.
impl Transport for Vec<Bytes> {
    fn send(&mut self, datagram: Bytes) -> anyhow::Result<()> {
        self.push(datagram);
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, datagram: Bytes) -> anyhow::Result<()> {
        (**self).send(datagram)
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// Typed event for the application.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent<I> {
    /// Received, with every predecessor.
    Ordered { data_id: Seq, item: I },
    /// Received, possibly ahead of a gap.
    Unordered { data_id: Seq, item: I },
    /// Confirmed by the peer.
    Acked { data_id: Seq, item: I },
    /// Given up on.
    Unacked {
        data_id: Seq,
        item: I,
        reason: UnackedReason,
    },
}

impl<I> EndpointEvent<I> {
    pub fn data_id(&self) -> Seq {
        match self {
            EndpointEvent::Ordered { data_id, .. }
            | EndpointEvent::Unordered { data_id, .. }
            | EndpointEvent::Acked { data_id, .. }
            | EndpointEvent::Unacked { data_id, .. } => *data_id,
        }
    }

    pub fn item(&self) -> &I {
        match self {
            EndpointEvent::Ordered { item, .. }
            | EndpointEvent::Unordered { item, .. }
            | EndpointEvent::Acked { item, .. }
            | EndpointEvent::Unacked { item, .. } => item,
        }
    }
}

// ─── Endpoint ───────────────────────────────────────────────────────────────

/// Reliable channel to one peer.
pub struct Endpoint<C, K: PayloadCodec, T> {
    clock: C,
    codec: K,
    transport: T,
    sender: SendController,
    receiver: ReceiveController,
    outbox: VecDeque<Segment>,
    events: VecDeque<EndpointEvent<K::Item>>,
    max_segments_per_unit: usize,
}

impl<C, K, T> Endpoint<C, K, T>
where
    C: Clock,
    K: PayloadCodec,
    T: Transport,
{
    pub fn new(
        config: ReliabilityConfig,
        clock: C,
        codec: K,
        transport: T,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Endpoint {
            clock,
            codec,
            transport,
            sender: SendController::new(&config),
            receiver: ReceiveController::new(&config),
            outbox: VecDeque::new(),
            events: VecDeque::new(),
            max_segments_per_unit: config.max_segments_per_unit,
        })
    }

    /// Queue an item for the next [`flush`](Self::flush). Returns its data id.
    pub fn send(&mut self, item: &K::Item) -> Result<Seq, EndpointError> {
        let payload = self.codec.encode(item).map_err(EndpointError::Codec)?;
        let outcome = self.sender.on_send(payload, self.clock.now())?;
        let data_id = outcome.segment.data_id;
        self.outbox.push_back(outcome.segment);
        self.push_send_events(outcome.events);
        Ok(data_id)
    }

    /// Frame queued segments with the current ack fields and hand the units
    /// to the transport. Sends a bare ack when data arrived but nothing is
    /// queued. Returns the number of datagrams sent.
    ///
    /// If the transport fails, the segments of the failed unit go back to
    /// the front of the outbox and the next flush retries them.
    pub fn flush(&mut self) -> Result<usize, EndpointError> {
        if self.outbox.is_empty() && !self.receiver.ack_due() {
            return Ok(0);
        }

        let ack = self.receiver.build_ack_fields();
        let mut sent = 0;
        loop {
            let mut builder =
                WireUnitBuilder::with_limit(ack.ack, ack.bitmap, self.max_segments_per_unit);
            while !builder.is_full() {
                let Some(segment) = self.outbox.pop_front() else {
                    break;
                };
                if let Err(e) = builder.push(segment) {
                    tracing::warn!(error = %e, "dropping unframeable segment");
                    self.requeue(builder.finish().segments);
                    return Err(e.into());
                }
            }

            let unit = builder.finish();
            if let Err(e) = self.transport.send(unit.encode().freeze()) {
                tracing::debug!(error = %e, segments = unit.segments.len(), "requeueing unsent unit");
                self.requeue(unit.segments);
                return Err(EndpointError::Transport(e));
            }
            sent += 1;
            if self.outbox.is_empty() {
                break;
            }
        }

        self.receiver.ack_sent();
        tracing::trace!(units = sent, ack = %ack.ack, "flushed");
        Ok(sent)
    }

    /// Put segments back at the head of the outbox, keeping their order.
    fn requeue(&mut self, segments: Vec<Segment>) {
        for segment in segments.into_iter().rev() {
            self.outbox.push_front(segment);
        }
    }

    /// Ingest one datagram from the peer. Returns the number of new events.
    pub fn receive(&mut self, datagram: &[u8]) -> Result<usize, EndpointError> {
        let now = self.clock.now();
        let before = self.events.len();
        let incoming = self.receiver.on_datagram(datagram, now)?;

        for event in incoming.events {
            let (data_id, payload, ordered) = match event {
                ReceiveEvent::Ordered { data_id, payload } => (data_id, payload, true),
                ReceiveEvent::Unordered { data_id, payload } => (data_id, payload, false),
            };
            let Some(item) = self.decode_item(data_id, payload) else {
                continue;
            };
            self.events.push_back(if ordered {
                EndpointEvent::Ordered { data_id, item }
            } else {
                EndpointEvent::Unordered { data_id, item }
            });
        }

        let acks = self
            .sender
            .on_ack_received(incoming.peer_ack.ack, incoming.peer_ack.bitmap, now);
        self.push_send_events(acks);
        Ok(self.events.len() - before)
    }

    /// Run retransmission. Due segments are queued for the next flush.
    /// Returns the number of segments queued.
    pub fn tick(&mut self) -> usize {
        let out = self.sender.retransmit(self.clock.now());
        let queued = out.segments.len();
        self.outbox.extend(out.segments);
        self.push_send_events(out.events);
        queued
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = EndpointEvent<K::Item>> + '_ {
        self.events.drain(..)
    }

    fn push_send_events(&mut self, events: Vec<SendEvent>) {
        for event in events {
            let (data_id, payload, reason) = match event {
                SendEvent::Acked { data_id, payload } => (data_id, payload, None),
                SendEvent::Unacked {
                    data_id,
                    payload,
                    reason,
                } => (data_id, payload, Some(reason)),
            };
            let Some(item) = self.decode_item(data_id, payload) else {
                continue;
            };
            self.events.push_back(match reason {
                None => EndpointEvent::Acked { data_id, item },
                Some(reason) => EndpointEvent::Unacked {
                    data_id,
                    item,
                    reason,
                },
            });
        }
    }

    fn decode_item(&self, data_id: Seq, payload: Bytes) -> Option<K::Item> {
        match self.codec.decode(payload) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(data_id = %data_id, error = %e, "failed to decode payload");
                None
            }
        }
    }

    /// Segments waiting for the next flush.
    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    pub fn sender(&self) -> &SendController {
        &self.sender
    }

    pub fn receiver(&self) -> &ReceiveController {
        &self.receiver
    }

    pub fn sender_stats(&self) -> &SenderStats {
        self.sender.stats()
    }

    pub fn receiver_stats(&self) -> &ReceiverStats {
        self.receiver.stats()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
