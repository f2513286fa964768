//! # Sequence Space
//!
//! 16-bit wraparound identifiers shared by logical data ids and transmission
//! ids.
//!
//! Two ids are ordered by forward distance, not numeric value: `a` is before
//! `b` when `b - a (mod 2^16)` is in `1..2^15`. Ids exactly half the space
//! apart have no defined order, and [`Seq::compare`] reports `None` for them.
//! Callers keep every live id inside a window much smaller than half the
//! space (see `packet_offset_limit`, default a quarter) so the ambiguous case
//! never arises in practice.

use std::cmp::Ordering;
use std::fmt;

/// Size of the sequence space.
pub const SEQ_SPACE: u32 = 1 << 16;

/// Half of the sequence space. Ids this far apart are unordered.
pub const HALF_SPACE: u16 = 1 << 15;

/// Default bound on how far apart live ids may drift (a quarter of the space).
pub const DEFAULT_LIVE_WINDOW: u16 = 1 << 14;

// ─── Seq ─────────────────────────────────────────────────────────────────────

/// A wraparound sequence identifier.
///
/// Deliberately not `PartialOrd`: wraparound order is not transitive across
/// the whole space, so it is only available through [`Seq::compare`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Seq(u16);

impl Seq {
    #[inline]
    pub const fn new(raw: u16) -> Self {
        Seq(raw)
    }

    /// Raw 16-bit value.
    #[inline]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// `self + n (mod 2^16)`.
    #[inline]
    pub const fn advance(self, n: u16) -> Self {
        Seq(self.0.wrapping_add(n))
    }

    /// `self - n (mod 2^16)`.
    #[inline]
    pub const fn retreat(self, n: u16) -> Self {
        Seq(self.0.wrapping_sub(n))
    }

    /// The id immediately after this one.
    #[inline]
    pub const fn next(self) -> Self {
        self.advance(1)
    }

    /// Forward distance from `self` to `other`, in `0..2^16`.
    #[inline]
    pub const fn distance_to(self, other: Seq) -> u16 {
        other.0.wrapping_sub(self.0)
    }

    /// Signed difference `self - other`, in `-2^15..2^15`.
    ///
    /// Positive means `self` is newer. At exactly half the space the result
    /// is `-2^15`, which is the ambiguous case.
    #[inline]
    pub const fn diff(self, other: Seq) -> i32 {
        self.0.wrapping_sub(other.0) as i16 as i32
    }

    /// Wraparound comparison.
    ///
    /// Returns `None` when the ids are exactly half the space apart.
    pub fn compare(self, other: Seq) -> Option<Ordering> {
        match other.distance_to(self) {
            0 => Some(Ordering::Equal),
            d if d < HALF_SPACE => Some(Ordering::Greater),
            HALF_SPACE => None,
            _ => Some(Ordering::Less),
        }
    }

    /// `self` comes strictly before `other`.
    #[inline]
    pub fn is_before(self, other: Seq) -> bool {
        self.compare(other) == Some(Ordering::Less)
    }

    /// `self` comes strictly after `other`.
    #[inline]
    pub fn is_after(self, other: Seq) -> bool {
        self.compare(other) == Some(Ordering::Greater)
    }

    /// `self` is before or equal to `other`.
    #[inline]
    pub fn is_at_or_before(self, other: Seq) -> bool {
        matches!(
            self.compare(other),
            Some(Ordering::Less) | Some(Ordering::Equal)
        )
    }

    /// The newer of two ids. Ties and ambiguity keep `self`.
    pub fn newest(self, other: Seq) -> Seq {
        if other.is_after(self) {
            other
        } else {
            self
        }
    }
}

impl fmt::Debug for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u16> for Seq {
    fn from(v: u16) -> Self {
        Seq(v)
    }
}

impl From<Seq> for u16 {
    fn from(s: Seq) -> Self {
        s.0
    }
}

// ─── Sequence Generator ─────────────────────────────────────────────────────

/// Hands out consecutive wraparound ids.
#[derive(Debug, Clone)]
pub struct SequenceGenerator {
    next: Seq,
}

impl SequenceGenerator {
    pub fn new(start: Seq) -> Self {
        SequenceGenerator { next: start }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Seq {
        let seq = self.next;
        self.next = self.next.next();
        seq
    }

    /// The id the next call to [`next`](Self::next) returns.
    pub fn current(&self) -> Seq {
        self.next
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new(Seq::default())
    }
}
