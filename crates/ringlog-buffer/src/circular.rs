//! Fixed-capacity ring of record slots.
//!
//! Slots between `read_cursor` (oldest) and `write_cursor` (next insert) are
//! occupied; every other slot is `None`. When the ring is full the two
//! cursors coincide and `full` disambiguates them from the empty state.
//!
//! The store has no lock of its own; callers serialize access (see
//! [`crate::CharDevice`]).

use ringlog_error::{Result, RinglogError};

use crate::entry::Entry;

/// Slots per device unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug)]
pub struct EntryBufferStore {
    slots: Box<[Option<Entry>]>,
    write_cursor: usize,
    read_cursor: usize,
    full: bool,
}

impl EntryBufferStore {
    /// Create an empty store with `capacity` slots.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RinglogError::Config {
                detail: "entry buffer capacity must be > 0".to_owned(),
            });
        }
        Ok(Self {
            slots: (0..capacity).map(|_| None).collect(),
            write_cursor: 0,
            read_cursor: 0,
            full: false,
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.full
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.valid_count() == 0
    }

    #[must_use]
    pub const fn write_cursor(&self) -> usize {
        self.write_cursor
    }

    #[must_use]
    pub const fn read_cursor(&self) -> usize {
        self.read_cursor
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        if self.full {
            self.capacity()
        } else {
            (self.write_cursor + self.capacity() - self.read_cursor) % self.capacity()
        }
    }

    /// Insert `entry` at the write cursor.
    ///
    /// When the ring is full the oldest entry is overwritten and handed back;
    /// both cursors advance so the ring stays full.
    pub fn add(&mut self, entry: Entry) -> Option<Entry> {
        let capacity = self.capacity();
        let evicted = self.slots[self.write_cursor].replace(entry);
        self.write_cursor = (self.write_cursor + 1) % capacity;

        if self.full {
            self.read_cursor = (self.read_cursor + 1) % capacity;
        } else if self.write_cursor == self.read_cursor {
            self.full = true;
        }

        debug_assert!(
            self.full || evicted.is_none(),
            "non-full ring overwrote an occupied slot"
        );
        evicted
    }

    /// Occupied entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
        let capacity = self.capacity();
        (0..self.valid_count())
            .filter_map(move |i| self.slots[(self.read_cursor + i) % capacity].as_ref())
    }

    /// Entry at logical position `index` (0 = oldest).
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&Entry> {
        if index >= self.valid_count() {
            return None;
        }
        self.slots[(self.read_cursor + index) % self.capacity()].as_ref()
    }

    /// Sum of the lengths of all occupied entries.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.iter().map(Entry::size).sum()
    }

    /// Locate the entry containing byte `offset` of the concatenated stream.
    ///
    /// Returns the entry and the offset within it, or `None` when `offset`
    /// lies at or beyond the end of the valid data.
    #[must_use]
    pub fn find_for_offset(&self, offset: u64) -> Option<(&Entry, usize)> {
        let mut remaining = offset;
        for entry in self.iter() {
            if remaining < entry.size() {
                let within = usize::try_from(remaining).ok()?;
                return Some((entry, within));
            }
            remaining -= entry.size();
        }
        None
    }

    /// Release every owned entry and reset to the empty state.
    ///
    /// Returns the number of entries released.
    pub fn clear(&mut self) -> usize {
        let released = self
            .slots
            .iter_mut()
            .filter_map(Option::take)
            .count();
        self.write_cursor = 0;
        self.read_cursor = 0;
        self.full = false;
        released
    }
}
