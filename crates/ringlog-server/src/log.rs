//! The shared append log.
//!
//! A [`LogStore`] owns exactly one lock. Every operation acquires it for a
//! single underlying read or write and releases it before returning, so no
//! caller ever holds it across network I/O.
//!
//! Offsets are stream offsets: they only ever grow, so a cursor taken in one
//! locked call still names the same byte in the next one, even after a
//! bounded log has evicted older records.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use ringlog_buffer::{CharDevice, SeekTo};
use ringlog_error::{Result, RinglogError};
use tracing::{debug, info};

/// Log handle shared by the accept loop, every worker and the timestamp task.
pub type SharedLog = Arc<dyn LogStore>;

pub trait LogStore: Send + Sync {
    /// Append `record` as one indivisible write.
    fn append(&self, record: &[u8]) -> Result<usize>;

    /// Copy bytes starting at `offset` into `buf`. Returns 0 at end of log.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Current end of the log.
    fn end_offset(&self) -> Result<u64>;

    /// Copy `[start, end_offset())` in one locked step, returning the offset
    /// of the first copied byte with the bytes.
    ///
    /// Logs that can release bytes while a reader is active return `Some`;
    /// append-only logs return `None` and are read chunk by chunk.
    fn read_window(&self, _start: u64) -> Result<Option<(u64, Vec<u8>)>> {
        Ok(None)
    }

    /// Resolve a record-relative seek. Only device-backed logs support it.
    fn seek_record(&self, request: SeekTo) -> Result<u64> {
        Err(RinglogError::invalid_command(format!(
            "seek to record {} is only supported by device-backed logs",
            request.record_index
        )))
    }

    fn is_device_backed(&self) -> bool;

    /// Flush and close. Later appends and reads fail.
    fn close(&self) -> Result<()>;

    /// Delete backing storage after [`LogStore::close`]. No-op unless the log
    /// owns a file.
    fn remove_backing(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File-backed log
// ---------------------------------------------------------------------------

/// Unbounded log kept in an append-only file.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileLog {
    /// Open (or create) `path` for appending.
    pub fn open(path: &Path) -> Result<Self> {
        let path = std::path::absolute(path).map_err(|source| RinglogError::StorageOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .mode(0o644)
            .open(&path)
            .map_err(|source| RinglogError::StorageOpen {
                path: path.clone(),
                source,
            })?;

        info!(path = %path.display(), "opened log file");
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn closed_log() -> RinglogError {
    RinglogError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "log has been closed",
    ))
}

impl LogStore for FileLog {
    fn append(&self, record: &[u8]) -> Result<usize> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(closed_log)?;
        file.write_all(record)?;
        Ok(record.len())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let guard = self.file.lock();
        let file = guard.as_ref().ok_or_else(closed_log)?;
        Ok(file.read_at(buf, offset)?)
    }

    fn end_offset(&self) -> Result<u64> {
        let guard = self.file.lock();
        let file = guard.as_ref().ok_or_else(closed_log)?;
        Ok(file.metadata()?.len())
    }

    fn is_device_backed(&self) -> bool {
        false
    }

    fn close(&self) -> Result<()> {
        let Some(file) = self.file.lock().take() else {
            return Ok(());
        };
        file.sync_all()?;
        debug!(path = %self.path.display(), "log file closed");
        Ok(())
    }

    fn remove_backing(&self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        info!(path = %self.path.display(), "log file removed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Device-backed log
// ---------------------------------------------------------------------------

/// Bounded log over a [`CharDevice`]; the device's own lock is the log lock.
///
/// Offsets are the device's stream offsets, so a `SEEKTO` cursor resolved
/// before a concurrent eviction still points at the record it named.
#[derive(Debug)]
pub struct DeviceLog {
    device: Arc<CharDevice>,
    release_on_close: bool,
}

impl DeviceLog {
    /// Share an existing device; its contents outlive the log.
    #[must_use]
    pub fn new(device: Arc<CharDevice>) -> Self {
        Self {
            device,
            release_on_close: false,
        }
    }

    /// Create a private device with `capacity` slots, released on close.
    pub fn owned(capacity: usize) -> Result<Self> {
        Ok(Self {
            device: Arc::new(CharDevice::new(capacity)?),
            release_on_close: true,
        })
    }

    #[must_use]
    pub fn device(&self) -> &Arc<CharDevice> {
        &self.device
    }
}

impl LogStore for DeviceLog {
    fn append(&self, record: &[u8]) -> Result<usize> {
        self.device.write(record)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.device.read_stream(offset, buf)
    }

    fn end_offset(&self) -> Result<u64> {
        Ok(self.device.stream_end())
    }

    fn read_window(&self, start: u64) -> Result<Option<(u64, Vec<u8>)>> {
        self.device.copy_stream_from(start).map(Some)
    }

    fn seek_record(&self, request: SeekTo) -> Result<u64> {
        self.device.seekto_stream(request)
    }

    fn is_device_backed(&self) -> bool {
        true
    }

    fn close(&self) -> Result<()> {
        if self.release_on_close {
            self.device.teardown();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chunked reader
// ---------------------------------------------------------------------------

/// Reader over `[start, end)` of a log, where `end` is the log length when
/// the reader was created.
///
/// When the log offers a [`LogStore::read_window`] the window is copied once
/// up front; otherwise each `read` takes the log lock once and nothing is
/// held between calls.
pub struct LogReader<'a> {
    log: &'a dyn LogStore,
    position: u64,
    end: u64,
    pinned: Option<Pinned>,
}

struct Pinned {
    first: u64,
    bytes: Vec<u8>,
}

impl<'a> LogReader<'a> {
    pub fn new(log: &'a dyn LogStore, start: u64) -> Result<Self> {
        if let Some((first, bytes)) = log.read_window(start)? {
            return Ok(Self {
                log,
                position: first,
                end: first + bytes.len() as u64,
                pinned: Some(Pinned { first, bytes }),
            });
        }
        let end = log.end_offset()?;
        Ok(Self {
            log,
            position: start.min(end),
            end,
            pinned: None,
        })
    }

    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    #[must_use]
    pub const fn end(&self) -> u64 {
        self.end
    }
}

impl io::Read for LogReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end.saturating_sub(self.position);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let limit = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());
        let count = match &self.pinned {
            Some(pinned) => {
                let from = (self.position - pinned.first) as usize;
                buf[..limit].copy_from_slice(&pinned.bytes[from..from + limit]);
                limit
            }
            None => self.log.read_at(self.position, &mut buf[..limit])?,
        };
        self.position += count as u64;
        Ok(count)
    }
}
