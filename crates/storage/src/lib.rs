//! Storage access abstraction for chainbak.
//!
//! [`StorageAccess`] gives the local filesystem, FTP, SFTP and SCP the same
//! file and directory semantics and the same error taxonomy, so backup and
//! restore logic never needs to know where the bytes end up.

pub mod backend;
mod consts;
pub mod error;
mod file;
pub mod listing;
pub mod path;

#[cfg(feature = "ftp")]
pub use crate::backend::FtpAccess;
#[cfg(feature = "mock")]
pub use crate::backend::MockAccess;
#[cfg(feature = "scp")]
pub use crate::backend::ScpAccess;
#[cfg(feature = "sftp")]
pub use crate::backend::SftpAccess;
pub use crate::backend::{Credentials, LocalAccess, RemoteAccess, StorageAccess, set_modified};
pub use crate::file::{Directory, FileHistory};
use std::sync::Arc;

pub type AccessHandle = Arc<dyn StorageAccess>;
