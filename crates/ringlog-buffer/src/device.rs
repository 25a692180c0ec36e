//! Character-device view over an [`EntryBufferStore`].
//!
//! One [`CharDevice`] is shared by every open handle. Its single mutex guards
//! both the ring and the pending partial record, and is held only for the
//! duration of one read, write, seek or `SEEKTO`.
//!
//! Writes accumulate into a device-wide pending record until a
//! [`RECORD_DELIMITER`] arrives; each completed record becomes one ring entry.
//! Reads resolve the handle position with `find_for_offset` and copy from at
//! most one entry per call.
//!
//! Handle positions are logical: offset 0 is the oldest record still held.
//! Long-lived readers that must survive eviction use *stream offsets*
//! instead, which count every byte ever committed. A stream offset minus
//! [`CharDevice::stream_base`] is the logical offset.

use std::io::{self, SeekFrom};
use std::sync::Arc;

use memchr::memchr;
use parking_lot::Mutex;
use ringlog_error::{Result, RinglogError};
use tracing::{debug, info, trace};

use crate::RECORD_DELIMITER;
use crate::circular::EntryBufferStore;
use crate::entry::Entry;
use crate::seek::{self, SeekTo};

#[derive(Debug)]
struct DeviceState {
    store: EntryBufferStore,
    pending: Vec<u8>,
    /// Bytes released by eviction or teardown.
    evicted_bytes: u64,
}

impl DeviceState {
    fn commit_pending(&mut self) {
        let record = Entry::from(std::mem::take(&mut self.pending));
        let committed_len = record.len();
        if let Some(evicted) = self.store.add(record) {
            self.evicted_bytes += evicted.size();
            debug!(
                evicted_len = evicted.len(),
                committed_len, "ring full, released oldest record"
            );
        } else {
            trace!(committed_len, valid = self.store.valid_count(), "record committed");
        }
    }
}

/// Shared device instance.
#[derive(Debug)]
pub struct CharDevice {
    state: Mutex<DeviceState>,
}

impl CharDevice {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(DeviceState {
                store: EntryBufferStore::new(capacity)?,
                pending: Vec::new(),
                evicted_bytes: 0,
            }),
        })
    }

    /// Open a handle positioned at offset 0.
    ///
    /// A handle carries nothing but its file position and a reference back
    /// to the shared device.
    #[must_use]
    pub fn open(self: &Arc<Self>) -> DeviceHandle {
        DeviceHandle {
            device: Arc::clone(self),
            position: 0,
        }
    }

    /// Append `buf` to the pending record, committing every record it
    /// completes. Returns the number of bytes accepted (always `buf.len()`).
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        state.pending.try_reserve(buf.len()).map_err(|_| {
            RinglogError::Io(io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("cannot grow pending record by {} bytes", buf.len()),
            ))
        })?;

        let mut rest = buf;
        while let Some(pos) = memchr(RECORD_DELIMITER, rest) {
            let (record, tail) = rest.split_at(pos + 1);
            state.pending.extend_from_slice(record);
            state.commit_pending();
            rest = tail;
        }
        state.pending.extend_from_slice(rest);
        drop(state);

        Ok(buf.len())
    }

    /// Copy bytes starting at logical `offset` into `buf`, stopping at the
    /// end of the entry that contains `offset`. Returns 0 at end of data.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let state = self.state.lock();
        let Some((entry, within)) = state.store.find_for_offset(offset) else {
            return 0;
        };
        let available = &entry.as_bytes()[within..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        count
    }

    /// Resolve a `SEEKTO` request to an absolute offset.
    pub fn seekto(&self, request: SeekTo) -> Result<u64> {
        let state = self.state.lock();
        seek::adjust(&state.store, request)
    }

    /// Resolve a `SEEKTO` request to a stream offset.
    pub fn seekto_stream(&self, request: SeekTo) -> Result<u64> {
        let state = self.state.lock();
        Ok(state.evicted_bytes + seek::adjust(&state.store, request)?)
    }

    /// Stream offset of the oldest byte still held.
    #[must_use]
    pub fn stream_base(&self) -> u64 {
        self.state.lock().evicted_bytes
    }

    /// Stream offset one past the newest committed byte.
    #[must_use]
    pub fn stream_end(&self) -> u64 {
        let state = self.state.lock();
        state.evicted_bytes + state.store.total_size()
    }

    /// [`CharDevice::read_at`] addressed by stream offset. Fails instead of
    /// returning other bytes when `offset` has already been evicted.
    pub fn read_stream(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let state = self.state.lock();
        let Some(logical) = offset.checked_sub(state.evicted_bytes) else {
            return Err(RinglogError::invalid_seek(format!(
                "stream offset {offset} was evicted (oldest held is {})",
                state.evicted_bytes
            )));
        };
        let Some((entry, within)) = state.store.find_for_offset(logical) else {
            return Ok(0);
        };
        let available = &entry.as_bytes()[within..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        Ok(count)
    }

    /// Copy everything from stream offset `offset` to the current end in one
    /// locked step. If `offset` was evicted the copy starts at the oldest
    /// record still held, so it never begins mid-record.
    ///
    /// Returns the stream offset of the first copied byte and the bytes.
    pub fn copy_stream_from(&self, offset: u64) -> Result<(u64, Vec<u8>)> {
        let state = self.state.lock();
        let logical = offset.saturating_sub(state.evicted_bytes);
        let total = state.store.total_size();
        let start = logical.min(total);

        let mut out = Vec::new();
        out.try_reserve((total - start) as usize).map_err(|_| {
            RinglogError::Io(io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("cannot copy {} device bytes", total - start),
            ))
        })?;
        let mut entry_start = 0_u64;
        for entry in state.store.iter() {
            let entry_end = entry_start + entry.size();
            if entry_end > start {
                let skip = start.saturating_sub(entry_start) as usize;
                out.extend_from_slice(&entry.as_bytes()[skip..]);
            }
            entry_start = entry_end;
        }
        Ok((state.evicted_bytes + start, out))
    }

    /// Sum of all valid entry lengths (the device's logical end).
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.state.lock().store.total_size()
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.state.lock().store.valid_count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().store.capacity()
    }

    /// Bytes written but not yet terminated by a delimiter.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Concatenation of all valid entries, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for entry in state.store.iter() {
            out.extend_from_slice(entry.as_bytes());
        }
        out
    }

    /// Release every stored entry and any pending partial record.
    ///
    /// Returns the number of entries released (the partial record is not
    /// counted).
    pub fn teardown(&self) -> usize {
        let mut state = self.state.lock();
        let discarded_pending = state.pending.len();
        state.pending = Vec::new();
        state.evicted_bytes += state.store.total_size();
        let released = state.store.clear();
        drop(state);

        info!(released, discarded_pending, "device storage released");
        released
    }
}

/// Per-open handle onto a [`CharDevice`].
#[derive(Debug)]
pub struct DeviceHandle {
    device: Arc<CharDevice>,
    position: u64,
}

impl DeviceHandle {
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    #[must_use]
    pub fn device(&self) -> &Arc<CharDevice> {
        &self.device
    }

    /// Reposition this handle at byte `record_offset` of record
    /// `record_index`. On failure the position is unchanged.
    pub fn seekto(&mut self, request: SeekTo) -> Result<u64> {
        let offset = self.device.seekto(request)?;
        self.position = offset;
        Ok(offset)
    }

    /// Absolute, relative or end-relative repositioning.
    pub fn seek_to(&mut self, pos: SeekFrom) -> Result<u64> {
        let end = self.device.total_size();
        let offset = seek::resolve_seek(pos, self.position, end)?;
        self.position = offset;
        Ok(offset)
    }
}

impl io::Read for DeviceHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.device.read_at(self.position, buf);
        self.position += count as u64;
        Ok(count)
    }
}

impl io::Write for DeviceHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.device.write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for DeviceHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_to(pos)?)
    }
}
