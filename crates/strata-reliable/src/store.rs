//! # Multi-Key Association Store
//!
//! Slab arena of records plus a sorted key → handle index.
//!
//! A record is one logical data item. It is reachable under every sequence
//! key it has been registered with, which on the send side means every
//! transmission id it went out under. The slab gives each record a stable
//! [`RecordHandle`], so "drop every key of this record" is a walk over the
//! record's own key list and never needs a search.
//!
//! ```text
//!   index (BTreeMap)            records (Slab)
//!   ┌──────┬────────┐           ┌────────────────────────────┐
//!   │ 101  │ h0  ───┼──────────▶│ h0: primary 1, keys [101,  │
//!   │ 103  │ h0  ───┼──────────▶│      103], value, touched  │
//!   │ 102  │ h1  ───┼──────────▶│ h1: primary 2, keys [102]  │
//!   └──────┴────────┘           └────────────────────────────┘
//! ```
//!
//! The index and the per-record key lists are kept mutually consistent by
//! every operation. The store never evicts anything on its own; the owning
//! controller decides when a record goes away.

use quanta::Instant;
use slab::Slab;
use std::collections::BTreeMap;

use crate::error::CapacityError;
use crate::seq::{Seq, SEQ_SPACE};

/// Maximum number of keys a single record may be registered under.
pub const MAX_KEYS_PER_RECORD: usize = 256;

// ─── Record ──────────────────────────────────────────────────────────────────

/// Stable handle to a record in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHandle(usize);

/// One logical item and the keys it is reachable under.
#[derive(Debug, Clone)]
pub struct Record<T> {
    primary: Seq,
    keys: Vec<Seq>,
    touched_at: Instant,
    /// Controller-specific payload.
    pub value: T,
}

impl<T> Record<T> {
    /// Logical id assigned when the record was created. Never changes.
    pub fn primary(&self) -> Seq {
        self.primary
    }

    /// Keys in registration order (oldest first).
    pub fn keys(&self) -> &[Seq] {
        &self.keys
    }

    /// Most recently registered key.
    pub fn latest_key(&self) -> Option<Seq> {
        self.keys.last().copied()
    }

    pub fn holds(&self, key: Seq) -> bool {
        self.keys.contains(&key)
    }

    pub fn touched_at(&self) -> Instant {
        self.touched_at
    }
}

// ─── AssociationStore ───────────────────────────────────────────────────────

/// Sorted multi-key map from sequence key to shared record.
#[derive(Debug)]
pub struct AssociationStore<T> {
    records: Slab<Record<T>>,
    index: BTreeMap<u16, RecordHandle>,
}

impl<T> AssociationStore<T> {
    pub fn new() -> Self {
        AssociationStore {
            records: Slab::new(),
            index: BTreeMap::new(),
        }
    }

    /// Pre-allocate room for `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        AssociationStore {
            records: Slab::with_capacity(capacity),
            index: BTreeMap::new(),
        }
    }

    /// Create a record with no keys yet.
    pub fn create(&mut self, primary: Seq, value: T, now: Instant) -> RecordHandle {
        RecordHandle(self.records.insert(Record {
            primary,
            keys: Vec::new(),
            touched_at: now,
            value,
        }))
    }

    /// Associate `key` with the record behind `handle`.
    ///
    /// A different record already holding `key` loses it. That displaced
    /// handle is returned so the caller can decide what to do with a record
    /// that may now have no keys left.
    pub fn insert(
        &mut self,
        key: Seq,
        handle: RecordHandle,
    ) -> Result<Option<RecordHandle>, CapacityError> {
        let Some(record) = self.records.get(handle.0) else {
            return Ok(None);
        };
        if self.index.get(&key.value()) == Some(&handle) {
            return Ok(None);
        }
        if record.keys.len() >= MAX_KEYS_PER_RECORD {
            return Err(CapacityError::TooManyKeys {
                primary: record.primary,
                limit: MAX_KEYS_PER_RECORD,
            });
        }

        let displaced = self.index.insert(key.value(), handle);
        if let Some(prev) = displaced {
            if let Some(prev_record) = self.records.get_mut(prev.0) {
                prev_record.keys.retain(|&k| k != key);
            }
        }
        self.records[handle.0].keys.push(key);
        Ok(displaced)
    }

    /// Associate every key in `keys` with `handle`, or none of them.
    pub fn insert_all(&mut self, keys: &[Seq], handle: RecordHandle) -> Result<(), CapacityError> {
        let Some(record) = self.records.get(handle.0) else {
            return Ok(());
        };

        let mut fresh: Vec<Seq> = Vec::with_capacity(keys.len());
        for &key in keys {
            if !record.holds(key) && !fresh.contains(&key) {
                fresh.push(key);
            }
        }
        if record.keys.len() + fresh.len() > MAX_KEYS_PER_RECORD {
            return Err(CapacityError::TooManyKeys {
                primary: record.primary,
                limit: MAX_KEYS_PER_RECORD,
            });
        }

        for key in fresh {
            self.insert(key, handle)?;
        }
        Ok(())
    }

    /// Detach one key. The record stays in the arena even if this was its
    /// last key.
    pub fn remove_key(&mut self, key: Seq) -> Option<RecordHandle> {
        let handle = self.index.remove(&key.value())?;
        if let Some(record) = self.records.get_mut(handle.0) {
            record.keys.retain(|&k| k != key);
        }
        Some(handle)
    }

    /// Detach every key of a record and take it out of the arena.
    pub fn remove_record(&mut self, handle: RecordHandle) -> Option<Record<T>> {
        let record = self.records.try_remove(handle.0)?;
        for key in &record.keys {
            self.index.remove(&key.value());
        }
        Some(record)
    }

    /// Handle registered under `key`.
    pub fn get(&self, key: Seq) -> Option<RecordHandle> {
        self.index.get(&key.value()).copied()
    }

    /// Record registered under `key`.
    pub fn lookup(&self, key: Seq) -> Option<&Record<T>> {
        self.get(key).and_then(|h| self.record(h))
    }

    pub fn record(&self, handle: RecordHandle) -> Option<&Record<T>> {
        self.records.get(handle.0)
    }

    pub fn record_mut(&mut self, handle: RecordHandle) -> Option<&mut Record<T>> {
        self.records.get_mut(handle.0)
    }

    /// Refresh a record's last-touched timestamp.
    pub fn touch(&mut self, handle: RecordHandle, now: Instant) {
        if let Some(record) = self.records.get_mut(handle.0) {
            record.touched_at = now;
        }
    }

    pub fn contains_key(&self, key: Seq) -> bool {
        self.index.contains_key(&key.value())
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of keys across all records.
    pub fn key_count(&self) -> usize {
        self.index.len()
    }

    /// All records in arena order.
    pub fn records(&self) -> impl Iterator<Item = (RecordHandle, &Record<T>)> {
        self.records.iter().map(|(k, r)| (RecordHandle(k), r))
    }

    /// Keys in wraparound order starting at `origin`.
    pub fn iter_from(&self, origin: Seq) -> impl Iterator<Item = (Seq, RecordHandle)> + '_ {
        self.index
            .range(origin.value()..)
            .chain(self.index.range(..origin.value()))
            .map(|(&k, &h)| (Seq::new(k), h))
    }

    /// Draining cursor in wraparound order starting at `origin`.
    pub fn cursor(&mut self, origin: Seq) -> Cursor<'_, T> {
        Cursor {
            store: self,
            origin,
            current: None,
        }
    }

    /// First key whose forward distance from `origin` is at least `offset`.
    fn first_from(&self, origin: Seq, offset: u32) -> Option<(Seq, RecordHandle)> {
        if offset >= SEQ_SPACE {
            return None;
        }
        let o = origin.value();
        let start = o.wrapping_add(offset as u16);
        let found = if o as u32 + offset < SEQ_SPACE {
            self.index
                .range(start..)
                .next()
                .or_else(|| self.index.range(..o).next())
        } else {
            self.index.range(start..o).next()
        };
        found.map(|(&k, &h)| (Seq::new(k), h))
    }

    /// Check that the index and the per-record key lists agree.
    pub fn is_consistent(&self) -> bool {
        for (&key, &handle) in &self.index {
            match self.records.get(handle.0) {
                Some(record) if record.keys.iter().filter(|k| k.value() == key).count() == 1 => {}
                _ => return false,
            }
        }
        let mut total = 0;
        for (slot, record) in &self.records {
            if record.keys.len() > MAX_KEYS_PER_RECORD {
                return false;
            }
            for key in &record.keys {
                if self.index.get(&key.value()) != Some(&RecordHandle(slot)) {
                    return false;
                }
            }
            total += record.keys.len();
        }
        total == self.index.len()
    }
}

impl<T> Default for AssociationStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Cursor ─────────────────────────────────────────────────────────────────

/// Walks the store in wraparound key order and may remove what it visits.
///
/// The cursor remembers the last key it yielded rather than an iterator
/// position, so removing the current key (or its whole record) never
/// invalidates the walk.
pub struct Cursor<'a, T> {
    store: &'a mut AssociationStore<T>,
    origin: Seq,
    current: Option<Seq>,
}

impl<T> Cursor<'_, T> {
    /// Advance to the next key.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<(Seq, RecordHandle)> {
        let offset = match self.current {
            None => 0,
            Some(key) => self.origin.distance_to(key) as u32 + 1,
        };
        let found = self.store.first_from(self.origin, offset);
        if let Some((key, _)) = found {
            self.current = Some(key);
        }
        found
    }

    /// Peek at the next key without moving.
    pub fn peek(&self) -> Option<(Seq, RecordHandle)> {
        let offset = match self.current {
            None => 0,
            Some(key) => self.origin.distance_to(key) as u32 + 1,
        };
        self.store.first_from(self.origin, offset)
    }

    /// Detach the key last returned by [`next`](Self::next).
    pub fn remove_current(&mut self) -> Option<RecordHandle> {
        let key = self.current?;
        self.store.remove_key(key)
    }

    /// Remove the whole record behind the key last returned.
    pub fn remove_current_record(&mut self) -> Option<Record<T>> {
        let key = self.current?;
        let handle = self.store.get(key)?;
        self.store.remove_record(handle)
    }

    pub fn store(&self) -> &AssociationStore<T> {
        self.store
    }
}
