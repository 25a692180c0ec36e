//! Lifecycle controller.
//!
//! ```text
//! INIT --bind--> LISTENING --trigger--> SHUTTING_DOWN --> TERMINATED
//! ```
//!
//! [`Server::run`] blocks in `accept` until a [`ShutdownTrigger`] fires. All
//! cleanup (stopping the timestamp task, joining workers, closing and
//! removing the log) happens afterwards on the calling thread, and each
//! failed step is recorded in the returned [`ShutdownReport`].

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::socket::{Shutdown, shutdown};
use ringlog_error::{Result, RinglogError};
use tracing::{debug, error, info, warn};

use crate::config::{ServerConfig, StoreMode};
use crate::handler::ConnectionHandler;
use crate::log::{DeviceLog, FileLog, SharedLog};
use crate::registry::{Connection, ConnectionRegistry, ReapStats};
use crate::timestamp::TimestampTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Init,
    Listening,
    ShuttingDown,
    Terminated,
}

/// Cloneable handle that requests shutdown from any thread.
///
/// Triggering sets the termination flag and shuts the listening socket down,
/// which makes a blocked `accept` return immediately.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    requested: Arc<AtomicBool>,
    listener: Arc<TcpListener>,
}

impl ShutdownTrigger {
    #[must_use]
    pub fn new(listener: Arc<TcpListener>) -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            listener,
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        if self.requested.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(errno) = shutdown(self.listener.as_raw_fd(), Shutdown::Both) {
            debug!(error = %errno, "listener shutdown failed");
        }
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Outcome of one [`Server::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub connections_accepted: u64,
    /// Workers that ended in an error or panic. These do not fail the run.
    pub connection_failures: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub timestamps_written: u64,
    /// One line per lifecycle step that failed.
    pub step_failures: Vec<String>,
}

impl ShutdownReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.step_failures.is_empty()
    }

    fn absorb(&mut self, stats: ReapStats) {
        self.connection_failures += stats.failed as u64;
        self.bytes_received += stats.bytes_received;
        self.bytes_sent += stats.bytes_sent;
    }

    fn step_failed(&mut self, step: &str, err: &dyn std::fmt::Display) {
        error!(step, error = %err, "shutdown step failed");
        self.step_failures.push(format!("{step}: {err}"));
    }
}

pub struct Server {
    config: ServerConfig,
    listener: Arc<TcpListener>,
    local_addr: SocketAddr,
    log: SharedLog,
    trigger: ShutdownTrigger,
    state: ServerState,
}

impl Server {
    /// Bind the configured address, then open the configured log.
    ///
    /// The endpoint is bound first so a port conflict never leaves a stray
    /// data file behind.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = bind_listener(config.bind_addr)?;
        let log: SharedLog = match config.mode {
            StoreMode::Log => Arc::new(FileLog::open(&config.data_file)?),
            StoreMode::Device => Arc::new(DeviceLog::owned(config.device_capacity)?),
        };
        Self::assemble(config, listener, log)
    }

    /// Bind with a caller-provided log, e.g. a [`DeviceLog`] over a shared
    /// device.
    pub fn bind_with_log(config: ServerConfig, log: SharedLog) -> Result<Self> {
        config.validate()?;
        let listener = bind_listener(config.bind_addr)?;
        Self::assemble(config, listener, log)
    }

    fn assemble(config: ServerConfig, listener: TcpListener, log: SharedLog) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let listener = Arc::new(listener);
        let trigger = ShutdownTrigger::new(Arc::clone(&listener));
        info!(
            addr = %local_addr,
            device_backed = log.is_device_backed(),
            "listening endpoint bound"
        );
        Ok(Self {
            config,
            listener,
            local_addr,
            log,
            trigger,
            state: ServerState::Init,
        })
    }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    #[must_use]
    pub fn log(&self) -> &SharedLog {
        &self.log
    }

    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Detach from the controlling terminal.
    ///
    /// Forks, so it must run before any thread is spawned. The working
    /// directory becomes `/`; the data file path is already absolute.
    pub fn detach(&self) -> Result<()> {
        if self.state != ServerState::Init {
            return Err(RinglogError::internal("detach after the server started"));
        }
        nix::unistd::daemon(false, false).map_err(io::Error::from)?;
        info!(pid = std::process::id(), "running as daemon");
        Ok(())
    }

    /// Serve until triggered, then shut down.
    pub fn run(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.state != ServerState::Init {
            report.step_failed("run", &"server already ran");
            return report;
        }
        self.state = ServerState::Listening;
        info!(addr = %self.local_addr, "accepting connections");

        let timestamps = self.start_timestamps(&mut report);
        let mut registry = ConnectionRegistry::new();
        self.accept_loop(&mut registry, &mut report);

        self.state = ServerState::ShuttingDown;
        info!(live = registry.len(), "shutting down");

        if let Some(task) = timestamps {
            match task.stop() {
                Ok(written) => report.timestamps_written = written,
                Err(err) => report.step_failed("stop timestamp task", &err),
            }
        }

        report.absorb(registry.drain());

        if let Err(err) = self.log.close() {
            report.step_failed("close log", &err);
        }
        if !self.log.is_device_backed() {
            if let Err(err) = self.log.remove_backing() {
                report.step_failed("remove log file", &err);
            }
        }

        self.state = ServerState::Terminated;
        info!(
            accepted = report.connections_accepted,
            connection_failures = report.connection_failures,
            bytes_received = report.bytes_received,
            bytes_sent = report.bytes_sent,
            success = report.is_success(),
            "server terminated"
        );
        report
    }

    fn start_timestamps(&self, report: &mut ShutdownReport) -> Option<TimestampTask> {
        if self.log.is_device_backed() {
            return None;
        }
        let interval = self.config.timestamp_interval()?;
        match TimestampTask::spawn(Arc::clone(&self.log), interval) {
            Ok(task) => Some(task),
            Err(err) => {
                report.step_failed("start timestamp task", &err);
                None
            }
        }
    }

    fn accept_loop(&self, registry: &mut ConnectionRegistry, report: &mut ShutdownReport) {
        let mut next_id = 0_u64;
        while !self.trigger.is_triggered() {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(_) if self.trigger.is_triggered() => break,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    warn!(error = %err, "accept interrupted, retrying");
                    continue;
                }
                Err(err) => {
                    report.step_failed("accept", &err);
                    self.trigger.trigger();
                    break;
                }
            };

            next_id += 1;
            report.connections_accepted += 1;
            info!(conn_id = next_id, "Accepted connection from {}", peer.ip());

            let handler = ConnectionHandler::new(
                next_id,
                peer,
                stream,
                Arc::clone(&self.log),
                self.config.chunk_size,
            );
            match Connection::spawn(next_id, peer, move || handler.run()) {
                Ok(connection) => registry.register(connection),
                Err(err) => {
                    report.connection_failures += 1;
                    warn!(conn_id = next_id, error = %err, "cannot spawn connection worker");
                }
            }
            report.absorb(registry.reap());
        }
    }
}

fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).map_err(|source| RinglogError::Bind { addr, source })
}
