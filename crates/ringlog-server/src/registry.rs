//! Tracking of live connection workers.
//!
//! Only the accept thread touches the registry, so it needs no lock. A
//! worker publishes its completion through a flag set on drop, which lets
//! the accept loop join finished workers without blocking on live ones.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use ringlog_error::Result;
use tracing::{debug, warn};

use crate::handler::ConnectionSummary;

/// Sets the completion flag however the worker exits, panics included.
struct CompletionGuard {
    complete: Arc<AtomicBool>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.complete.store(true, Ordering::Release);
    }
}

/// One spawned worker.
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    complete: Arc<AtomicBool>,
    handle: JoinHandle<Result<ConnectionSummary>>,
}

impl Connection {
    /// Run `work` on a new named thread.
    pub fn spawn<F>(id: u64, peer: SocketAddr, work: F) -> Result<Self>
    where
        F: FnOnce() -> Result<ConnectionSummary> + Send + 'static,
    {
        let complete = Arc::new(AtomicBool::new(false));
        let guard = CompletionGuard {
            complete: Arc::clone(&complete),
        };
        let handle = thread::Builder::new()
            .name(format!("ringlog-conn-{id}"))
            .spawn(move || {
                let _guard = guard;
                work()
            })?;
        Ok(Self {
            id,
            peer,
            complete,
            handle,
        })
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    fn join(self, stats: &mut ReapStats) {
        stats.joined += 1;
        match self.handle.join() {
            Ok(Ok(summary)) => {
                stats.bytes_received += summary.bytes_received as u64;
                stats.bytes_sent += summary.bytes_sent;
            }
            Ok(Err(err)) => {
                stats.failed += 1;
                debug!(conn_id = self.id, peer = %self.peer, error = %err, "worker failed");
            }
            Err(_) => {
                stats.failed += 1;
                warn!(conn_id = self.id, peer = %self.peer, "worker panicked");
            }
        }
    }
}

/// Totals over the workers joined by one reap or drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub joined: usize,
    pub failed: usize,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl ReapStats {
    pub fn merge(&mut self, other: Self) {
        self.joined += other.joined;
        self.failed += other.failed;
        self.bytes_received += other.bytes_received;
        self.bytes_sent += other.bytes_sent;
    }
}

/// Workers in newest-first order.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: VecDeque<Connection>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connection: Connection) {
        self.connections.push_front(connection);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Join every completed worker in one pass; live ones stay registered.
    pub fn reap(&mut self) -> ReapStats {
        let mut stats = ReapStats::default();
        let mut live = VecDeque::with_capacity(self.connections.len());
        for connection in self.connections.drain(..) {
            if connection.is_complete() {
                connection.join(&mut stats);
            } else {
                live.push_back(connection);
            }
        }
        self.connections = live;
        stats
    }

    /// Join every worker, waiting for live ones to finish.
    pub fn drain(&mut self) -> ReapStats {
        let mut stats = ReapStats::default();
        for connection in self.connections.drain(..) {
            connection.join(&mut stats);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use ringlog_error::RinglogError;

    use super::*;
    use crate::handler::CommitOutcome;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    fn summary(received: usize, sent: u64) -> ConnectionSummary {
        ConnectionSummary {
            bytes_received: received,
            bytes_sent: sent,
            commit: CommitOutcome::Appended { bytes: received },
        }
    }

    fn wait_complete(connection: &Connection) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !connection.is_complete() {
            assert!(Instant::now() < deadline, "worker never completed");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn reap_joins_only_finished_workers() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut registry = ConnectionRegistry::new();

        let finished = Connection::spawn(1, peer(), || Ok(summary(3, 10))).unwrap();
        wait_complete(&finished);
        registry.register(finished);

        let blocked = Connection::spawn(2, peer(), move || {
            release_rx.recv().unwrap();
            Ok(summary(4, 20))
        })
        .unwrap();
        registry.register(blocked);
        assert_eq!(registry.len(), 2);

        let stats = registry.reap();
        assert_eq!(stats.joined, 1);
        assert_eq!(stats.bytes_sent, 10);
        assert_eq!(registry.len(), 1);

        release_tx.send(()).unwrap();
        let stats = registry.drain();
        assert_eq!(stats.joined, 1);
        assert_eq!(stats.bytes_received, 4);
        assert!(registry.is_empty());
    }

    #[test]
    fn errors_and_panics_count_as_failures() {
        let mut registry = ConnectionRegistry::new();
        registry.register(
            Connection::spawn(1, peer(), || Err(RinglogError::internal("boom"))).unwrap(),
        );
        registry.register(Connection::spawn(2, peer(), || panic!("worker bug")).unwrap());
        registry.register(Connection::spawn(3, peer(), || Ok(summary(1, 1))).unwrap());

        let stats = registry.drain();
        assert_eq!(stats.joined, 3);
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn panicking_worker_still_reports_completion() {
        let connection = Connection::spawn(7, peer(), || panic!("early exit")).unwrap();
        wait_complete(&connection);
        assert_eq!(connection.id(), 7);

        let mut registry = ConnectionRegistry::new();
        registry.register(connection);
        assert_eq!(registry.reap().failed, 1);
    }

    #[test]
    fn merge_accumulates() {
        let mut total = ReapStats::default();
        total.merge(ReapStats {
            joined: 2,
            failed: 1,
            bytes_received: 5,
            bytes_sent: 7,
        });
        total.merge(ReapStats {
            joined: 1,
            ..ReapStats::default()
        });
        assert_eq!(total.joined, 3);
        assert_eq!(total.failed, 1);
        assert_eq!(total.bytes_sent, 7);
    }
}
