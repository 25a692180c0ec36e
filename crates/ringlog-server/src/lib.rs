//! Concurrent record log service.
//!
//! Each client connection sends one newline-terminated record. The record is
//! appended to a shared log (a growing file, or the bounded ring of a
//! [`ringlog_buffer::CharDevice`]) and the whole log is streamed back to
//! that client. In device mode a `SEEKTO:<record>,<offset>` record moves the
//! connection's read cursor instead of being appended.
//!
//! The pieces, leaves first:
//! - [`log`]: the shared log and its one lock;
//! - [`protocol`]: record framing and control-command parsing;
//! - [`handler`]: the per-connection state machine;
//! - [`registry`]: worker tracking, reaping and draining;
//! - [`timestamp`]: the optional periodic timestamp writer;
//! - [`signal`]: SIGINT/SIGTERM watcher;
//! - [`server`]: the lifecycle controller tying them together.

pub mod config;
pub mod handler;
pub mod log;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod signal;
pub mod timestamp;

pub use config::{ServerConfig, StoreMode};
pub use handler::{CommitOutcome, ConnectionHandler, ConnectionSummary, HandlerState};
pub use log::{DeviceLog, FileLog, LogReader, LogStore, SharedLog};
pub use protocol::Request;
pub use registry::{Connection, ConnectionRegistry, ReapStats};
pub use server::{Server, ServerState, ShutdownReport, ShutdownTrigger};
pub use signal::SignalWatcher;
pub use timestamp::TimestampTask;
