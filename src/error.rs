//! Command-line Error Types

use derive_more::{Display, Error};

/// A command-line error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for command-line operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("backup catalog error")]
    Catalog,
    #[display("storage error")]
    Storage,
    #[display("backup or restore failed")]
    Engine,
    #[display("no backup with id {_0}")]
    UnknownBackup(#[error(not(source))] u64),
    #[display("no full backup recorded for {_0}")]
    NoFullBackup(#[error(not(source))] String),
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
}
