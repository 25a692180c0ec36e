//! Offset arithmetic over the valid entries of an [`EntryBufferStore`].

use std::io::SeekFrom;

use ringlog_error::{Result, RinglogError};

use crate::circular::EntryBufferStore;

/// Out-of-band seek request: byte `record_offset` of record `record_index`,
/// where record 0 is the oldest valid entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeekTo {
    pub record_index: u32,
    pub record_offset: u32,
}

impl SeekTo {
    #[must_use]
    pub const fn new(record_index: u32, record_offset: u32) -> Self {
        Self {
            record_index,
            record_offset,
        }
    }
}

/// Translate `request` into an absolute logical offset.
///
/// The record index is checked against the current number of valid entries
/// (not the capacity) and the byte offset against that entry's length.
pub fn adjust(store: &EntryBufferStore, request: SeekTo) -> Result<u64> {
    let index = request.record_index as usize;
    let valid = store.valid_count();
    let Some(target) = store.entry(index) else {
        return Err(RinglogError::invalid_seek(format!(
            "record {index} requested but only {valid} valid records"
        )));
    };

    let record_offset = u64::from(request.record_offset);
    if record_offset >= target.size() {
        return Err(RinglogError::invalid_seek(format!(
            "offset {record_offset} outside record {index} of length {}",
            target.len()
        )));
    }

    let preceding: u64 = store.iter().take(index).map(|entry| entry.size()).sum();
    Ok(preceding + record_offset)
}

/// Resolve a standard seek against a stream of length `end`.
///
/// The result must land within `[0, end]`; anything else is an invalid seek
/// and leaves the caller's position untouched.
pub fn resolve_seek(pos: SeekFrom, current: u64, end: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
        SeekFrom::End(delta) => end.checked_add_signed(delta),
    };

    match target {
        Some(offset) if offset <= end => Ok(offset),
        _ => Err(RinglogError::invalid_seek(format!(
            "{pos:?} from {current} leaves the stream of length {end}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;

    fn five_five_five() -> EntryBufferStore {
        let mut store = EntryBufferStore::new(10).unwrap();
        for record in ["abcd\n", "efgh\n", "ijkl\n"] {
            let _ = store.add(Entry::from(record));
        }
        store
    }

    #[test]
    fn seekto_second_record_fourth_byte() {
        let store = five_five_five();
        assert_eq!(adjust(&store, SeekTo::new(1, 3)).unwrap(), 8);
        assert_eq!(adjust(&store, SeekTo::new(0, 0)).unwrap(), 0);
        assert_eq!(adjust(&store, SeekTo::new(2, 4)).unwrap(), 14);
    }

    #[test]
    fn seekto_missing_record_is_invalid() {
        let store = five_five_five();
        let err = adjust(&store, SeekTo::new(5, 0)).unwrap_err();
        assert!(err.is_invalid());

        // Index 3 is within capacity but not a valid record.
        assert!(adjust(&store, SeekTo::new(3, 0)).unwrap_err().is_invalid());
    }

    #[test]
    fn seekto_offset_must_be_inside_record() {
        let store = five_five_five();
        assert!(adjust(&store, SeekTo::new(1, 5)).unwrap_err().is_invalid());
        assert!(adjust(&store, SeekTo::new(1, u32::MAX)).unwrap_err().is_invalid());
    }

    #[test]
    fn seekto_counts_from_oldest_after_eviction() {
        let mut store = EntryBufferStore::new(2).unwrap();
        for record in ["old\n", "mid\n", "newest\n"] {
            let _ = store.add(Entry::from(record));
        }
        // "old\n" was evicted; record 0 is now "mid\n".
        assert_eq!(adjust(&store, SeekTo::new(1, 2)).unwrap(), 6);
        assert!(adjust(&store, SeekTo::new(2, 0)).unwrap_err().is_invalid());
    }

    #[test]
    fn resolve_seek_whence_variants() {
        assert_eq!(resolve_seek(SeekFrom::Start(4), 0, 10).unwrap(), 4);
        assert_eq!(resolve_seek(SeekFrom::Current(3), 4, 10).unwrap(), 7);
        assert_eq!(resolve_seek(SeekFrom::Current(-4), 4, 10).unwrap(), 0);
        assert_eq!(resolve_seek(SeekFrom::End(0), 2, 10).unwrap(), 10);
        assert_eq!(resolve_seek(SeekFrom::End(-10), 2, 10).unwrap(), 0);
    }

    #[test]
    fn resolve_seek_rejects_out_of_range() {
        assert!(resolve_seek(SeekFrom::Start(11), 0, 10).unwrap_err().is_invalid());
        assert!(resolve_seek(SeekFrom::Current(-5), 4, 10).unwrap_err().is_invalid());
        assert!(resolve_seek(SeekFrom::End(1), 0, 10).unwrap_err().is_invalid());
        assert!(resolve_seek(SeekFrom::End(-11), 0, 10).unwrap_err().is_invalid());
    }
}
