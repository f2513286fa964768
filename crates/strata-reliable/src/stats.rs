//! # Reliability Statistics
//!
//! Counters kept by the send and receive controllers. All stats serialize
//! to JSON for export.

use serde::Serialize;

use crate::sender::UnackedReason;

// ─── Sender Stats ───────────────────────────────────────────────────────────

/// Send-side counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SenderStats {
    /// Items handed to the sender.
    pub items_sent: u64,
    /// Segments framed, originals plus retransmissions.
    pub transmissions: u64,
    /// Retransmissions triggered by RTO expiry.
    pub retransmissions: u64,
    /// Payload bytes of original sends.
    pub bytes_sent: u64,
    /// Items confirmed by the peer.
    pub acked: u64,
    /// Latest transmission fell behind the peer's ack window.
    pub unacked_out_of_window: u64,
    /// Gave up after the retransmit limit.
    pub unacked_retransmit_limit: u64,
    /// Exceeded the queue timeout.
    pub unacked_queue_timeout: u64,
    /// Force-evicted by a full queue.
    pub unacked_queue_overflow: u64,
    /// RTT samples fed to the estimator.
    pub rtt_samples: u64,
    /// Samples dropped because the clock went backwards.
    pub rtt_samples_discarded: u64,
    /// Last accepted RTT sample in µs.
    pub last_rtt_us: u64,
    /// Smoothed RTT in µs.
    pub srtt_us: u64,
    /// Current retransmission timeout in µs.
    pub rto_us: u64,
    /// Records awaiting acknowledgment.
    pub pending: usize,
}

impl SenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items given up on, over all reasons.
    pub fn unacked(&self) -> u64 {
        self.unacked_out_of_window
            + self.unacked_retransmit_limit
            + self.unacked_queue_timeout
            + self.unacked_queue_overflow
    }

    pub(crate) fn record_unacked(&mut self, reason: UnackedReason) {
        match reason {
            UnackedReason::OutOfWindow => self.unacked_out_of_window += 1,
            UnackedReason::RetransmitLimit => self.unacked_retransmit_limit += 1,
            UnackedReason::QueueTimeout => self.unacked_queue_timeout += 1,
            UnackedReason::QueueOverflow => self.unacked_queue_overflow += 1,
        }
    }

    /// Share of resolved items that were never confirmed.
    pub fn loss_rate(&self) -> f64 {
        let resolved = self.acked + self.unacked();
        if resolved == 0 {
            0.0
        } else {
            self.unacked() as f64 / resolved as f64
        }
    }

    /// Retransmission overhead ratio.
    pub fn retransmit_ratio(&self) -> f64 {
        if self.transmissions == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.transmissions as f64
        }
    }
}

// ─── Receiver Stats ─────────────────────────────────────────────────────────

/// Receive-side counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReceiverStats {
    /// Wire units ingested.
    pub units_received: u64,
    /// Wire units rejected by the decoder.
    pub malformed_units: u64,
    /// Segments ingested, duplicates included.
    pub segments_received: u64,
    /// Payload bytes of new items.
    pub bytes_received: u64,
    /// Segments whose data id was already seen.
    pub duplicates: u64,
    /// Immediate deliveries.
    pub delivered_unordered: u64,
    /// In-order deliveries.
    pub delivered_ordered: u64,
    /// Data ids given up on by the offset limit.
    pub skipped: u64,
    /// Items waiting behind a gap.
    pub buffered: usize,
    /// Last data id delivered in order.
    pub cursor: u16,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of received segments that carried new data.
    pub fn goodput_ratio(&self) -> f64 {
        if self.segments_received == 0 {
            0.0
        } else {
            (self.segments_received - self.duplicates) as f64 / self.segments_received as f64
        }
    }

    /// Share of data ids passed by the cursor that were never received.
    pub fn skip_ratio(&self) -> f64 {
        let passed = self.delivered_ordered + self.skipped;
        if passed == 0 {
            0.0
        } else {
            self.skipped as f64 / passed as f64
        }
    }
}
