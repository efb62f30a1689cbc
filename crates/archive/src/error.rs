//! Archive Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use exn::ResultExt;
use zip::result::{ZipError, ZipResult};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reading or writing the underlying file failed.
    #[display("I/O error")]
    Io,
    /// The archive is corrupt or not a zip archive. Don't retry with the same input.
    #[display("invalid or corrupted archive")]
    InvalidArchive,
    /// The requested entry is not in the archive.
    #[display("entry not found: {_0}")]
    EntryNotFound(#[error(not(source))] String),
    /// The requested compression method is not supported.
    #[display("unsupported format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// The requested compression method is supported but not enabled.
    #[display("disabled format: {_0}")]
    DisabledFormat(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}

/// Raise a `zip` failure for `entry` into the matching kind.
pub(crate) fn raise<T>(result: ZipResult<T>, entry: &str) -> Result<T> {
    match result {
        Err(ZipError::FileNotFound) => exn::bail!(ErrorKind::EntryNotFound(entry.to_string())),
        Err(e @ ZipError::Io(_)) => Err(e).or_raise(|| ErrorKind::Io),
        other => other.or_raise(|| ErrorKind::InvalidArchive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::InvalidArchive.to_string(), "invalid or corrupted archive");
        assert_eq!(ErrorKind::EntryNotFound("a/b.txt".to_string()).to_string(), "entry not found: a/b.txt");
        assert_eq!(ErrorKind::UnsupportedFormat("lz4".to_string()).to_string(), "unsupported format: lz4");
        assert_eq!(ErrorKind::Io.to_string(), "I/O error");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(!ErrorKind::InvalidArchive.is_retryable());
        assert!(!ErrorKind::EntryNotFound("x".to_string()).is_retryable());
        assert!(ErrorKind::Io.is_retryable());
    }

    #[test]
    fn raise_maps_zip_errors() {
        let missing: ZipResult<()> = Err(ZipError::FileNotFound);
        assert_eq!(*raise(missing, "a.txt").unwrap_err(), ErrorKind::EntryNotFound("a.txt".to_string()));

        let io: ZipResult<()> = Err(ZipError::Io(std::io::Error::other("disk on fire")));
        assert_eq!(*raise(io, "a.txt").unwrap_err(), ErrorKind::Io);

        let invalid: ZipResult<()> = Err(ZipError::InvalidArchive("bad header".into()));
        assert_eq!(*raise(invalid, "a.txt").unwrap_err(), ErrorKind::InvalidArchive);
    }
}
