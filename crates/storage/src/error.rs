//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Every backend translates its native failures (I/O errors, FTP replies,
//! libssh2 status codes, shell stderr) into the same [`ErrorKind`], so no
//! backend-native error type ever reaches the caller.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Backend-agnostic error taxonomy.
///
/// A permission failure looks the same whether it came from a local
/// filesystem, an FTP `550` reply or `Permission denied` on an SSH channel.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Target directory (or the required parent of a target) does not exist
    #[display("directory not found: {_0}")]
    DirectoryNotFound(#[error(not(source))] String),
    /// Target file does not exist
    #[display("file not found: {_0}")]
    FileNotFound(#[error(not(source))] String),
    /// Create collided with an existing directory
    #[display("directory already exists: {_0}")]
    DirectoryAlreadyExists(#[error(not(source))] String),
    /// Create collided with an existing file
    #[display("file already exists: {_0}")]
    FileAlreadyExists(#[error(not(source))] String),
    /// Expected a directory, found something else
    #[display("not a directory: {_0}")]
    NotDirectory(#[error(not(source))] String),
    /// Expected a file, found something else
    #[display("not a file: {_0}")]
    NotFile(#[error(not(source))] String),
    /// Backend denied access
    #[display("permission denied: {_0}")]
    Permissions(#[error(not(source))] String),
    /// Remote operation attempted before `connect()`
    #[display("not connected")]
    NotConnected,
    /// `connect()` called on an open session
    #[display("already connected")]
    AlreadyConnected,
    /// Credentials rejected during `connect()`
    #[display("authentication rejected for {_0}")]
    BadAuthentication(#[error(not(source))] String),
    /// Backend reported a failure that matches no known pattern
    #[display("unknown backend failure: {_0}")]
    Unknown(#[error(not(source))] String),
    /// Local I/O error with no taxonomy equivalent
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// A history log or manifest line could not be parsed
    #[display("invalid history record: {_0}")]
    InvalidRecord(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unknown(_))
    }

    /// Either of the two "not found" kinds.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound(_) | Self::DirectoryNotFound(_))
    }

    /// Either of the two "already exists" kinds.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::FileAlreadyExists(_) | Self::DirectoryAlreadyExists(_))
    }
}
