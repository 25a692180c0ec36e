//! Per-connection worker.
//!
//! ```text
//! ACCEPTED -> RECEIVING -> COMMITTING -> STREAMING -> CLOSED
//!                 |             |             |
//!                 +-------------+-------------+--> CLOSED on I/O failure
//! ```
//!
//! A failure here aborts this connection only. The log lock is taken inside
//! each [`LogStore`](crate::log::LogStore) call and is never held while the
//! worker blocks on the socket.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use ringlog_buffer::SeekTo;
use ringlog_error::{Result, RinglogError};
use tracing::{debug, info, warn};

use crate::log::{LogReader, SharedLog};
use crate::protocol::{self, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Accepted,
    Receiving,
    Committing,
    Streaming,
    Closed,
}

/// What the commit step did with the received records.
///
/// `appended` counts bytes of records that followed a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Appended { bytes: usize },
    Repositioned { offset: u64, appended: usize },
    Rejected { appended: usize },
}

/// Per-connection accounting returned when the worker exits cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub bytes_received: usize,
    pub bytes_sent: u64,
    pub commit: CommitOutcome,
}

pub struct ConnectionHandler {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    log: SharedLog,
    chunk_size: usize,
    state: HandlerState,
    cursor: u64,
}

impl ConnectionHandler {
    #[must_use]
    pub fn new(
        id: u64,
        peer: SocketAddr,
        stream: TcpStream,
        log: SharedLog,
        chunk_size: usize,
    ) -> Self {
        Self {
            id,
            peer,
            stream,
            log,
            chunk_size: chunk_size.max(1),
            state: HandlerState::Accepted,
            cursor: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> HandlerState {
        self.state
    }

    /// Drive the connection to CLOSED, closing the socket on every path.
    pub fn run(mut self) -> Result<ConnectionSummary> {
        let result = self.serve();
        self.transition(HandlerState::Closed);

        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            // The peer may already be gone; the descriptor is closed on drop regardless.
            debug!(conn_id = self.id, error = %err, "socket shutdown failed");
        }
        match &result {
            Ok(summary) => info!(
                conn_id = self.id,
                received = summary.bytes_received,
                sent = summary.bytes_sent,
                "Closed connection from {}",
                self.peer.ip()
            ),
            Err(err) => warn!(
                conn_id = self.id,
                error = %err,
                "Closed connection from {} after failure",
                self.peer.ip()
            ),
        }
        result
    }

    fn serve(&mut self) -> Result<ConnectionSummary> {
        self.transition(HandlerState::Receiving);
        let record = self.receive()?;

        self.transition(HandlerState::Committing);
        let commit = self.commit(&record)?;

        self.transition(HandlerState::Streaming);
        let bytes_sent = self.stream_log()?;

        Ok(ConnectionSummary {
            bytes_received: record.len(),
            bytes_sent,
            commit,
        })
    }

    fn transition(&mut self, next: HandlerState) {
        debug!(conn_id = self.id, from = ?self.state, to = ?next, "connection state");
        self.state = next;
    }

    /// Read until the most recent chunk contains a delimiter.
    ///
    /// Bytes after the last delimiter are not part of any record and are
    /// dropped with a warning rather than written, so the log only ever
    /// holds complete records. A plain append-every-chunk server would keep
    /// them as the start of a record that never ends.
    fn receive(&mut self) -> Result<Vec<u8>> {
        let mut record = Vec::new();
        let mut chunk = vec![0_u8; self.chunk_size];
        loop {
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(RinglogError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("peer closed after {} bytes without a delimiter", record.len()),
                    )));
                }
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };

            record.try_reserve(n).map_err(|_| {
                RinglogError::Io(io::Error::new(
                    io::ErrorKind::OutOfMemory,
                    format!("record buffer cannot grow past {} bytes", record.len()),
                ))
            })?;
            record.extend_from_slice(&chunk[..n]);

            if protocol::find_delimiter(&chunk[..n]).is_some() {
                break;
            }
        }

        if let Some(complete) = protocol::complete_len(&record) {
            if complete < record.len() {
                warn!(
                    conn_id = self.id,
                    dropped = record.len() - complete,
                    "discarding bytes after final delimiter"
                );
                record.truncate(complete);
            }
        }
        Ok(record)
    }

    /// Apply the received records. In device mode the first record may be a
    /// `SEEKTO` command; records after it are appended whether or not the
    /// command is accepted.
    fn commit(&mut self, received: &[u8]) -> Result<CommitOutcome> {
        let repositioned = match Request::parse(received, self.log.is_device_backed()) {
            Ok(Request::Append(bytes)) => {
                let written = self.log.append(bytes)?;
                debug!(conn_id = self.id, bytes = written, "record appended");
                return Ok(CommitOutcome::Appended { bytes: written });
            }
            Ok(Request::SeekTo(seek)) => self.seek(seek)?,
            Err(err) if err.is_invalid() => {
                warn!(conn_id = self.id, error = %err, "control command rejected");
                None
            }
            Err(err) => return Err(err),
        };

        let (_, trailing) = protocol::split_first_record(received);
        let appended = if trailing.is_empty() {
            0
        } else {
            let written = self.log.append(trailing)?;
            debug!(conn_id = self.id, bytes = written, "records after command appended");
            written
        };

        Ok(match repositioned {
            Some(offset) => CommitOutcome::Repositioned { offset, appended },
            None => CommitOutcome::Rejected { appended },
        })
    }

    /// Move the cursor, or `None` when the target does not exist.
    fn seek(&mut self, seek: SeekTo) -> Result<Option<u64>> {
        match self.log.seek_record(seek) {
            Ok(offset) => {
                info!(
                    conn_id = self.id,
                    record_index = seek.record_index,
                    record_offset = seek.record_offset,
                    offset,
                    "read cursor repositioned"
                );
                self.cursor = offset;
                Ok(Some(offset))
            }
            Err(err) if err.is_invalid() => {
                warn!(conn_id = self.id, error = %err, "seek rejected");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Copy the log from the cursor to its end as seen now. No lock is held
    /// across a send.
    fn stream_log(&mut self) -> Result<u64> {
        let mut reader = LogReader::new(self.log.as_ref(), self.cursor)?;
        let mut chunk = vec![0_u8; self.chunk_size];
        let mut sent = 0_u64;
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            self.stream.write_all(&chunk[..n])?;
            sent += n as u64;
        }
        self.stream.flush()?;
        Ok(sent)
    }
}
