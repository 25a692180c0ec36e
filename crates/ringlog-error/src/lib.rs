//! Error type shared by the ringlog buffer, log and server crates.
//!
//! Errors fall into four classes that callers treat differently:
//! - protocol errors ([`RinglogError::InvalidSeek`], [`RinglogError::InvalidCommand`])
//!   are reported to the caller and never mutate state;
//! - transient I/O errors ([`RinglogError::Io`]) abort one connection only;
//! - setup errors ([`RinglogError::Bind`], [`RinglogError::StorageOpen`],
//!   [`RinglogError::Config`]) abort startup;
//! - [`RinglogError::Internal`] replaces invariant violations that would
//!   otherwise panic.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, RinglogError>;

/// Every failure the ringlog crates can report.
#[derive(Debug, thiserror::Error)]
pub enum RinglogError {
    /// Underlying socket or storage I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A seek request referenced a record or byte that does not exist.
    #[error("invalid seek: {detail}")]
    InvalidSeek { detail: String },

    /// A control command was recognized but malformed.
    #[error("invalid command: {detail}")]
    InvalidCommand { detail: String },

    /// The listening endpoint could not be bound.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The log's backing storage could not be opened.
    #[error("cannot open backing storage {}: {source}", path.display())]
    StorageOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration could not be parsed or failed validation.
    #[error("configuration error: {detail}")]
    Config { detail: String },

    /// An internal invariant did not hold.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RinglogError {
    /// Build an [`RinglogError::Internal`] from any message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Build an [`RinglogError::InvalidSeek`].
    pub fn invalid_seek(detail: impl Into<String>) -> Self {
        Self::InvalidSeek {
            detail: detail.into(),
        }
    }

    /// Build an [`RinglogError::InvalidCommand`].
    pub fn invalid_command(detail: impl Into<String>) -> Self {
        Self::InvalidCommand {
            detail: detail.into(),
        }
    }

    /// Protocol-class errors: the request was rejected and nothing changed.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::InvalidSeek { .. } | Self::InvalidCommand { .. })
    }

    /// Errors scoped to a single connection or operation.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Errors that must abort startup before the server starts listening.
    #[must_use]
    pub const fn is_fatal_setup(&self) -> bool {
        matches!(
            self,
            Self::Bind { .. } | Self::StorageOpen { .. } | Self::Config { .. }
        )
    }
}

impl From<RinglogError> for io::Error {
    fn from(err: RinglogError) -> Self {
        match err {
            RinglogError::Io(inner) => inner,
            RinglogError::Bind { source, .. } | RinglogError::StorageOpen { source, .. } => source,
            other if other.is_invalid() => Self::new(io::ErrorKind::InvalidInput, other),
            other => Self::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_disjoint() {
        let errors = [
            RinglogError::Io(io::Error::other("boom")),
            RinglogError::invalid_seek("record 5 of 3"),
            RinglogError::invalid_command("SEEKTO:x"),
            RinglogError::Bind {
                addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
                source: io::Error::from(io::ErrorKind::AddrInUse),
            },
            RinglogError::StorageOpen {
                path: PathBuf::from("/nonexistent/data"),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
            RinglogError::Config {
                detail: "chunk_size must be > 0".to_owned(),
            },
            RinglogError::internal("cursor out of range"),
        ];

        for err in &errors {
            let classes = [err.is_invalid(), err.is_transient(), err.is_fatal_setup()]
                .iter()
                .filter(|hit| **hit)
                .count();
            assert!(classes <= 1, "{err} belongs to more than one class");
        }
    }

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn fails() -> Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))?;
            Ok(())
        }

        let err = fails().unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn invalid_requests_surface_as_invalid_input() {
        let err: io::Error = RinglogError::invalid_seek("offset 9 past entry of 5").into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err: io::Error = RinglogError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).into();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn display_includes_storage_path() {
        let err = RinglogError::StorageOpen {
            path: PathBuf::from("/var/tmp/aesdsocketdata"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("/var/tmp/aesdsocketdata"));
        assert!(err.is_fatal_setup());
    }
}
