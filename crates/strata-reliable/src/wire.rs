//! # Wire Unit Format
//!
//! One datagram carries one wire unit: the sender's view of what it has
//! received from the peer, followed by a chain of data segments.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Ack (i16)            |     Ack Bitmap (high 16)      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Ack Bitmap (low 16)       |     Segment Count (u16)       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Each segment then follows:
//!
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Data Id (u16)          |     Tx Id Count (u16)         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Tx Id 0 (u16)          |        Tx Id 1 ...            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Payload Length (u16)     |        Payload ...            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Bit `i` of the ack bitmap means `ack - (i + 1)` was received. All fields
//! are big-endian; payload bytes are opaque.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CapacityError, WireError};
use crate::seq::Seq;
use crate::store::MAX_KEYS_PER_RECORD;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Maximum segments chained into one wire unit.
pub const MAX_SEGMENTS_PER_UNIT: usize = 256;

/// Maximum transmission ids listed on one segment.
pub const MAX_TRANSMISSION_IDS: usize = MAX_KEYS_PER_RECORD;

/// Maximum payload carried by one segment (64 KiB - 1).
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Unit header: 2 (ack) + 4 (bitmap) + 2 (segment count).
pub const UNIT_HEADER_LEN: usize = 8;

/// Fixed part of a segment: 2 (data id) + 2 (tx count) + 2 (payload len).
pub const SEGMENT_OVERHEAD: usize = 6;

// ─── Segment ─────────────────────────────────────────────────────────────────

/// One data item as framed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Logical data id assigned by the sender.
    pub data_id: Seq,
    /// Transmission ids this item has gone out under, oldest first.
    pub transmission_ids: Vec<Seq>,
    pub payload: Bytes,
}

impl Segment {
    /// A segment sent under a single transmission id.
    pub fn new(data_id: Seq, transmission_id: Seq, payload: Bytes) -> Self {
        Segment {
            data_id,
            transmission_ids: vec![transmission_id],
            payload,
        }
    }

    /// The transmission id this copy of the segment went out under.
    pub fn latest_transmission_id(&self) -> Option<Seq> {
        self.transmission_ids.last().copied()
    }

    pub fn encoded_len(&self) -> usize {
        SEGMENT_OVERHEAD + 2 * self.transmission_ids.len() + self.payload.len()
    }

    fn encode(&self, buf: &mut impl BufMut) {
        debug_assert!(
            (1..=MAX_TRANSMISSION_IDS).contains(&self.transmission_ids.len()),
            "segment {} has {} transmission ids",
            self.data_id,
            self.transmission_ids.len()
        );
        debug_assert!(
            self.payload.len() <= MAX_PAYLOAD_LEN,
            "segment {} payload of {} bytes",
            self.data_id,
            self.payload.len()
        );
        buf.put_u16(self.data_id.value());
        buf.put_u16(self.transmission_ids.len() as u16);
        for id in &self.transmission_ids {
            buf.put_u16(id.value());
        }
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
    }

    fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        ensure(buf, 4)?;
        let data_id = Seq::new(buf.get_u16());
        let count = buf.get_u16() as usize;
        if count == 0 {
            return Err(WireError::NoTransmissionIds { data_id });
        }
        if count > MAX_TRANSMISSION_IDS {
            return Err(WireError::TooManyTransmissionIds {
                data_id,
                count,
                limit: MAX_TRANSMISSION_IDS,
            });
        }

        ensure(buf, 2 * count + 2)?;
        let transmission_ids = (0..count).map(|_| Seq::new(buf.get_u16())).collect();
        let payload_len = buf.get_u16() as usize;
        ensure(buf, payload_len)?;
        let payload = buf.copy_to_bytes(payload_len);

        Ok(Segment {
            data_id,
            transmission_ids,
            payload,
        })
    }
}

// ─── Wire Unit ───────────────────────────────────────────────────────────────

/// Ack fields plus a chain of segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireUnit {
    /// Newest transmission id received from the peer.
    pub ack: Seq,
    /// Receipts of the 32 ids before `ack`.
    pub ack_bitmap: u32,
    pub segments: Vec<Segment>,
}

impl WireUnit {
    /// A unit carrying only ack fields.
    pub fn ack_only(ack: Seq, ack_bitmap: u32) -> Self {
        WireUnit {
            ack,
            ack_bitmap,
            segments: Vec::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        UNIT_HEADER_LEN + self.segments.iter().map(Segment::encoded_len).sum::<usize>()
    }

    /// Serialize into a new `BytesMut`.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Units assembled by hand must respect the same bounds that
    /// [`WireUnitBuilder`] enforces; debug builds assert them.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        debug_assert!(
            self.segments.len() <= MAX_SEGMENTS_PER_UNIT,
            "{} segments in one unit",
            self.segments.len()
        );
        buf.put_i16(self.ack.value() as i16);
        buf.put_u32(self.ack_bitmap);
        buf.put_u16(self.segments.len() as u16);
        for segment in &self.segments {
            segment.encode(buf);
        }
    }

    /// Parse a complete unit. The buffer must hold exactly one unit.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        ensure(buf, UNIT_HEADER_LEN)?;
        let ack = Seq::new(buf.get_i16() as u16);
        let ack_bitmap = buf.get_u32();
        let count = buf.get_u16() as usize;
        if count > MAX_SEGMENTS_PER_UNIT {
            return Err(WireError::TooManySegments {
                count,
                limit: MAX_SEGMENTS_PER_UNIT,
            });
        }

        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            segments.push(Segment::decode(buf)?);
        }
        if buf.has_remaining() {
            return Err(WireError::TrailingBytes(buf.remaining()));
        }

        Ok(WireUnit {
            ack,
            ack_bitmap,
            segments,
        })
    }
}

#[inline]
fn ensure(buf: &impl Buf, needed: usize) -> Result<(), WireError> {
    if buf.remaining() < needed {
        return Err(WireError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

// ─── Builder ────────────────────────────────────────────────────────────────

/// Accumulates segments for one unit and refuses to overfill it.
#[derive(Debug)]
pub struct WireUnitBuilder {
    unit: WireUnit,
    limit: usize,
}

impl WireUnitBuilder {
    pub fn new(ack: Seq, ack_bitmap: u32) -> Self {
        Self::with_limit(ack, ack_bitmap, MAX_SEGMENTS_PER_UNIT)
    }

    /// Builder with a lower segment bound. Values above
    /// [`MAX_SEGMENTS_PER_UNIT`] are capped.
    pub fn with_limit(ack: Seq, ack_bitmap: u32, limit: usize) -> Self {
        WireUnitBuilder {
            unit: WireUnit::ack_only(ack, ack_bitmap),
            limit: limit.min(MAX_SEGMENTS_PER_UNIT),
        }
    }

    /// Append a segment.
    pub fn push(&mut self, segment: Segment) -> Result<(), CapacityError> {
        if self.unit.segments.len() >= self.limit {
            return Err(CapacityError::TooManySegments { limit: self.limit });
        }
        if segment.payload.len() > MAX_PAYLOAD_LEN {
            return Err(CapacityError::PayloadTooLarge {
                len: segment.payload.len(),
                limit: MAX_PAYLOAD_LEN,
            });
        }
        if segment.transmission_ids.is_empty() {
            return Err(CapacityError::NoTransmissionIds {
                data_id: segment.data_id,
            });
        }
        if segment.transmission_ids.len() > MAX_TRANSMISSION_IDS {
            return Err(CapacityError::TooManyKeys {
                primary: segment.data_id,
                limit: MAX_TRANSMISSION_IDS,
            });
        }
        self.unit.segments.push(segment);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.unit.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unit.segments.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.unit.segments.len() >= self.limit
    }

    pub fn encoded_len(&self) -> usize {
        self.unit.encoded_len()
    }

    pub fn finish(self) -> WireUnit {
        self.unit
    }
}
