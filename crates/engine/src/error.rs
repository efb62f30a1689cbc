//! Engine Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Storage and archive failures are
//! wrapped as children, so the full tree survives up to the caller.

use derive_more::{Display, Error};

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A storage access operation failed; the storage error is attached.
    #[display("storage operation failed")]
    Storage,
    /// Packing or extracting a compressed backup failed.
    #[display("archive operation failed")]
    Archive,
    /// A deletion log or manifest line could not be parsed or written.
    #[display("invalid history record")]
    Record,
    /// A file or directory filter is not a valid regular expression.
    #[display("invalid filter pattern: {_0}")]
    Pattern(#[error(not(source))] String),
    /// The manifest names a file the archive does not contain.
    #[display("archive entry missing: {_0}")]
    ArchiveEntryMissing(#[error(not(source))] String),
    /// Local temporary file handling failed.
    #[display("I/O error")]
    Io,
    /// A blocking task panicked or was cancelled.
    #[display("background task failed")]
    Task,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Io)
    }
}
