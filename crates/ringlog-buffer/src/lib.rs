//! Fixed-capacity record storage addressed as one logical byte stream.
//!
//! - [`EntryBufferStore`] keeps the most recent N newline-terminated records
//!   and evicts the oldest when full.
//! - [`seek`] maps `(record, byte)` pairs and `SeekFrom` requests onto
//!   logical offsets.
//! - [`CharDevice`] wraps the store in a single lock and exposes the
//!   open/read/write/seek/`SEEKTO` surface of a character device.

pub mod circular;
pub mod device;
pub mod entry;
pub mod seek;

pub use circular::{DEFAULT_CAPACITY, EntryBufferStore};
pub use device::{CharDevice, DeviceHandle};
pub use entry::Entry;
pub use seek::{SeekTo, adjust, resolve_seek};

/// Byte that terminates one record.
pub const RECORD_DELIMITER: u8 = b'\n';
