//! # Sliding Bit Window
//!
//! Receipt history for the most recent sequence ids, anchored at the newest
//! id observed.
//!
//! ```text
//!   offset:   63  ...   3   2   1   0
//!   seq:    a-63 ...  a-3 a-2 a-1   a      (a = anchor)
//! ```
//!
//! The window is a `Copy` value. Every transform returns a new window, so
//! the receive controller can compute the next state before committing it.
//!
//! Internally the window is 64 bits wide while the wire carries 32. Packing
//! happens only in [`BitWindow::to_fixed_width_bitmap`], so history between
//! the two widths survives until the point it is flushed.

use crate::seq::Seq;

/// Number of ids the window remembers, anchor included.
pub const WINDOW_CAPACITY: u32 = 64;

/// Width of the ack bitmap on the wire.
pub const WIRE_BITMAP_WIDTH: u32 = 32;

/// Fixed-capacity receipt bitmap anchored at the newest observed id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitWindow {
    anchor: Seq,
    bits: u64,
}

impl BitWindow {
    /// A window whose anchor has been observed and nothing else.
    pub fn new(anchor: Seq) -> Self {
        BitWindow { anchor, bits: 1 }
    }

    /// Rebuild a window from raw parts.
    pub fn from_raw(anchor: Seq, bits: u64) -> Self {
        BitWindow { anchor, bits }
    }

    /// Newest id the window is anchored at.
    pub fn anchor(&self) -> Seq {
        self.anchor
    }

    /// Raw 64-bit history (bit k = anchor - k).
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Whether `anchor - offset` was observed. Offsets past capacity read as
    /// unobserved.
    pub fn get(&self, offset: u32) -> bool {
        offset < WINDOW_CAPACITY && (self.bits >> offset) & 1 == 1
    }

    /// Set or clear `anchor - offset`.
    ///
    /// A negative offset names an id newer than the anchor: the window is
    /// shifted forward by `-offset` first and the bit lands at offset 0.
    /// Offsets at or beyond capacity refer to evicted history and leave the
    /// window unchanged.
    #[must_use]
    pub fn set(self, offset: i32, value: bool) -> Self {
        if offset < 0 {
            let mut shifted = self.shift(offset.unsigned_abs());
            shifted.bits = (shifted.bits & !1) | value as u64;
            return shifted;
        }
        let offset = offset as u32;
        if offset >= WINDOW_CAPACITY {
            return self;
        }
        let mask = 1u64 << offset;
        let bits = if value {
            self.bits | mask
        } else {
            self.bits & !mask
        };
        BitWindow {
            anchor: self.anchor,
            bits,
        }
    }

    /// Move the anchor `n` ids forward. Shifted-in positions are unobserved.
    #[must_use]
    pub fn shift(self, n: u32) -> Self {
        let bits = if n >= WINDOW_CAPACITY {
            0
        } else {
            self.bits << n
        };
        BitWindow {
            anchor: self.anchor.advance(n as u16),
            bits,
        }
    }

    /// Offset of `seq` relative to the anchor. Positive is older.
    pub fn offset_of(&self, seq: Seq) -> i32 {
        self.anchor.diff(seq)
    }

    /// Record `seq` as observed.
    ///
    /// Ids exactly half the space from the anchor are ambiguous and ignored.
    #[must_use]
    pub fn mark(self, seq: Seq) -> Self {
        if self.anchor.compare(seq).is_none() {
            return self;
        }
        self.set(self.offset_of(seq), true)
    }

    /// Whether `seq` is inside the remembered range.
    pub fn covers(&self, seq: Seq) -> bool {
        let offset = self.offset_of(seq);
        (0..WINDOW_CAPACITY as i32).contains(&offset)
    }

    /// Whether `seq` is remembered as observed.
    pub fn contains(&self, seq: Seq) -> bool {
        self.covers(seq) && self.get(self.offset_of(seq) as u32)
    }

    /// Pack offsets `1..=width` into bits `0..width`.
    ///
    /// The anchor itself travels separately as the ack value, and history
    /// older than `width` is dropped.
    pub fn to_fixed_width_bitmap(&self, width: u32) -> u64 {
        let width = width.min(WINDOW_CAPACITY - 1);
        (self.bits >> 1) & low_mask(width)
    }

    /// Inverse of [`to_fixed_width_bitmap`](Self::to_fixed_width_bitmap).
    /// The anchor is observed and history beyond `width` reads as zero.
    pub fn from_fixed_width_bitmap(anchor: Seq, bitmap: u64, width: u32) -> Self {
        let width = width.min(WINDOW_CAPACITY - 1);
        BitWindow {
            anchor,
            bits: ((bitmap & low_mask(width)) << 1) | 1,
        }
    }

    /// 32-bit ack bitmap for the wire.
    pub fn to_wire(&self) -> u32 {
        self.to_fixed_width_bitmap(WIRE_BITMAP_WIDTH) as u32
    }

    /// Rebuild the window a peer described with `(ack, bitmap)`.
    pub fn from_wire(ack: Seq, bitmap: u32) -> Self {
        Self::from_fixed_width_bitmap(ack, bitmap as u64, WIRE_BITMAP_WIDTH)
    }

    /// Observed ids, newest first.
    pub fn observed(&self) -> impl Iterator<Item = Seq> + '_ {
        (0..WINDOW_CAPACITY)
            .filter(move |&k| self.get(k))
            .map(move |k| self.anchor.retreat(k as u16))
    }
}

#[inline]
fn low_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}
