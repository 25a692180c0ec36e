//! Periodic timestamp records for the file-backed log.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, TimeZone};
use parking_lot::{Condvar, Mutex};
use ringlog_error::{Result, RinglogError};
use tracing::{debug, warn};

use crate::log::SharedLog;

/// RFC 2822 style wall-clock format written after the `timestamp:` prefix.
pub const TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %T %z";

/// Render one timestamp record, trailing newline included.
#[must_use]
pub fn timestamp_record<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("timestamp:{}\n", at.format(TIMESTAMP_FORMAT))
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Background writer appending a timestamp record every `interval`.
///
/// Each record is one [`LogStore::append`](crate::log::LogStore::append), so
/// it never interleaves with a client record. Stopping wakes the task
/// immediately instead of waiting out the current period.
pub struct TimestampTask {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<Result<u64>>>,
}

impl TimestampTask {
    pub fn spawn(log: SharedLog, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(RinglogError::Config {
                detail: "timestamp interval must be > 0".to_owned(),
            });
        }
        let signal = Arc::new(StopSignal::default());
        let task_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("ringlog-timestamp".to_owned())
            .spawn(move || run(&log, interval, &task_signal))?;
        debug!(interval_ms = interval.as_millis(), "timestamp task started");
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Stop the task and return how many records it wrote.
    pub fn stop(mut self) -> Result<u64> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<u64> {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
        }
        self.signal.wake.notify_all();

        let Some(handle) = self.handle.take() else {
            return Ok(0);
        };
        handle
            .join()
            .map_err(|_| RinglogError::internal("timestamp task panicked"))?
    }
}

impl Drop for TimestampTask {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(err) = self.shutdown() {
                warn!(error = %err, "timestamp task ended with error");
            }
        }
    }
}

fn run(log: &SharedLog, interval: Duration, signal: &StopSignal) -> Result<u64> {
    let mut written = 0_u64;
    let mut deadline = Instant::now() + interval;
    loop {
        {
            let mut stopped = signal.stopped.lock();
            while !*stopped {
                if signal.wake.wait_until(&mut stopped, deadline).timed_out() {
                    break;
                }
            }
            if *stopped {
                debug!(written, "timestamp task stopped");
                return Ok(written);
            }
        }

        let record = timestamp_record(&Local::now());
        log.append(record.as_bytes())?;
        written += 1;
        debug!(record = record.trim_end(), "timestamp appended");
        deadline += interval;
    }
}
