//! Config Error Types

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A config source could not be read or did not match the schema.
    #[display("failed to load configuration")]
    Load,
    /// A value parsed but is out of range or otherwise unusable.
    #[display("invalid configuration value: {_0}")]
    InvalidValue(#[error(not(source))] String),
    /// No home directory, so there's no default location to fall back to.
    #[display("could not determine the platform configuration directory")]
    NoConfigDirectory,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
