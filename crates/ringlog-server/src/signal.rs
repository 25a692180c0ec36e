//! Termination signal handling.
//!
//! SIGINT and SIGTERM are blocked in the installing thread and in every
//! thread it spawns afterwards, then consumed synchronously by a dedicated
//! watcher thread with `sigwait`. No code runs in async-signal context, so
//! the watcher is free to log and to shut the listener down.
//!
//! [`SignalWatcher::install`] must run before the server spawns any thread.

use std::io;
use std::os::unix::thread::JoinHandleExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use nix::errno::Errno;
use nix::sys::pthread::pthread_kill;
use nix::sys::signal::{SigSet, Signal};
use ringlog_error::{Result, RinglogError};
use tracing::{debug, info, warn};

use crate::server::ShutdownTrigger;

/// Wakes the watcher when it is stopped without a termination signal.
const WAKE_SIGNAL: Signal = Signal::SIGUSR1;

fn watched_signals() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set.add(WAKE_SIGNAL);
    set
}

pub struct SignalWatcher {
    stopping: Arc<AtomicBool>,
    handle: Option<JoinHandle<Option<Signal>>>,
}

impl SignalWatcher {
    /// Block the watched signals and start the watcher thread. A SIGINT or
    /// SIGTERM fires `trigger` once, after which the watcher exits.
    pub fn install(trigger: ShutdownTrigger) -> Result<Self> {
        let signals = watched_signals();
        signals.thread_block().map_err(io::Error::from)?;

        let stopping = Arc::new(AtomicBool::new(false));
        let watcher_stopping = Arc::clone(&stopping);
        let handle = thread::Builder::new()
            .name("ringlog-signals".to_owned())
            .spawn(move || watch(&signals, &trigger, &watcher_stopping))?;
        debug!("signal watcher installed");
        Ok(Self {
            stopping,
            handle: Some(handle),
        })
    }

    /// Stop the watcher and return the termination signal it caught, if any.
    pub fn stop(mut self) -> Result<Option<Signal>> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<Option<Signal>> {
        let Some(handle) = self.handle.take() else {
            return Ok(None);
        };
        self.stopping.store(true, Ordering::Release);
        if !handle.is_finished() {
            // Joined below, so the thread id is still valid even if it exits now.
            pthread_kill(handle.as_pthread_t(), WAKE_SIGNAL).map_err(io::Error::from)?;
        }
        handle
            .join()
            .map_err(|_| RinglogError::internal("signal watcher panicked"))
    }

    #[cfg(test)]
    fn deliver(&self, signal: Signal) {
        if let Some(handle) = &self.handle {
            pthread_kill(handle.as_pthread_t(), signal).unwrap();
        }
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "signal watcher did not stop cleanly");
        }
    }
}

fn watch(signals: &SigSet, trigger: &ShutdownTrigger, stopping: &AtomicBool) -> Option<Signal> {
    loop {
        match signals.wait() {
            Ok(signal @ (Signal::SIGINT | Signal::SIGTERM)) => {
                info!(signal = %signal, "Caught signal, exiting");
                trigger.trigger();
                return Some(signal);
            }
            Ok(_) | Err(Errno::EINTR) => {
                if stopping.load(Ordering::Acquire) {
                    return None;
                }
            }
            Err(errno) => {
                warn!(error = %errno, "sigwait failed, signal watcher exiting");
                return None;
            }
        }
    }
}
