//! Storage access trait and implementations.
//!
//! This module defines the [`StorageAccess`] trait, which gives every backend
//! (local filesystem, FTP, SFTP, SCP over SSH) identical file and directory
//! semantics, and the [`RemoteAccess`] extension for backends that hold a
//! network session.

#[cfg(feature = "ftp")]
mod ftp;
mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "scp")]
mod scp;
#[cfg(any(feature = "ftp", feature = "sftp", feature = "scp"))]
mod session;
#[cfg(feature = "sftp")]
mod sftp;
#[cfg(any(feature = "sftp", feature = "scp"))]
mod ssh;

#[cfg(feature = "ftp")]
pub use self::ftp::{DEFAULT_PORT as FTP_DEFAULT_PORT, FtpAccess};
pub use self::local::{LocalAccess, set_modified};
#[cfg(feature = "mock")]
pub use self::mock::MockAccess;
#[cfg(feature = "scp")]
pub use self::scp::ScpAccess;
#[cfg(feature = "sftp")]
pub use self::sftp::{DEFAULT_PORT as SSH_DEFAULT_PORT, SftpAccess};
use crate::error::{ErrorKind, Result};
use crate::file::Directory;
use crate::path;
use async_trait::async_trait;
use std::fmt::{Debug, Formatter, Result as FmtResult};

/// Uniform interface over a filesystem-like resource.
///
/// Paths are `/`-separated strings (backslashes are normalized away); the
/// "source" side of [`copy_file`](Self::copy_file) and the "destination" side
/// of [`restore_file`](Self::restore_file) are always on the local
/// filesystem, the other side is whatever this backend talks to.
///
/// Every backend-native failure is translated into [`ErrorKind`] before it
/// leaves the implementation.
///
/// # Examples
///
/// ```
/// use chainbak_storage::{StorageAccess, error::Result};
///
/// async fn describe(access: &dyn StorageAccess, dir: &str) -> Result<String> {
///     let listing = access.list_directory(dir).await?;
///     Ok(format!(
///         "{} on {}: {} directories, {} files",
///         listing.path,
///         access.name(),
///         listing.directories.len(),
///         listing.files.len()
///     ))
/// }
/// ```
#[async_trait]
pub trait StorageAccess: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// List the immediate children of a directory.
    ///
    /// Every returned [`FileHistory`](crate::FileHistory) is rooted at `path`.
    ///
    /// # Errors
    /// [`DirectoryNotFound`](ErrorKind::DirectoryNotFound) when `path` does not
    /// exist, [`NotDirectory`](ErrorKind::NotDirectory) when it is a file.
    async fn list_directory(&self, path: &str) -> Result<Directory>;

    /// Create a single directory.
    ///
    /// The root (`/`) is a silent no-op.
    ///
    /// # Errors
    /// [`DirectoryAlreadyExists`](ErrorKind::DirectoryAlreadyExists) if it
    /// exists, [`NotDirectory`](ErrorKind::NotDirectory) if a file is in the
    /// way, [`DirectoryNotFound`](ErrorKind::DirectoryNotFound) if the parent
    /// is missing.
    async fn create_directory(&self, path: &str) -> Result<()>;

    /// Recursively delete a directory: empty it via
    /// [`ensure_directory_empty`](Self::ensure_directory_empty), then remove it.
    ///
    /// The root (`/`) is a silent no-op. A failure part way through leaves
    /// the directory in place with a subset of its children, so the call can
    /// simply be retried.
    async fn delete_directory(&self, path: &str) -> Result<()>;

    /// Create a directory and any missing ancestors; an existing directory is
    /// not an error.
    async fn ensure_directory_exists(&self, path: &str) -> Result<()> {
        if path::is_root(path) || self.directory_exists(path).await? {
            return Ok(());
        }
        let mut missing = vec![path::normalize(path)];
        loop {
            let parent = path::parent(missing.last().map(String::as_str).unwrap_or_default());
            if parent.is_empty() || path::is_root(&parent) || self.directory_exists(&parent).await? {
                break;
            }
            missing.push(parent);
        }
        while let Some(directory) = missing.pop() {
            match self.create_directory(&directory).await {
                Err(e) if matches!(&*e, ErrorKind::DirectoryAlreadyExists(_)) => {},
                other => other?,
            }
        }
        Ok(())
    }

    /// Delete every child directory and file of `path`, keeping `path` itself.
    async fn ensure_directory_empty(&self, path: &str) -> Result<()> {
        let listing = self.list_directory(path).await?;
        for directory in &listing.directories {
            self.delete_directory(directory).await?;
        }
        for file in &listing.files {
            self.delete_file(file.path()).await?;
        }
        Ok(())
    }

    /// Create an empty file.
    ///
    /// # Errors
    /// [`FileAlreadyExists`](ErrorKind::FileAlreadyExists) if it exists,
    /// [`DirectoryNotFound`](ErrorKind::DirectoryNotFound) if the parent is
    /// missing.
    async fn create_file(&self, path: &str) -> Result<()>;

    /// Delete a single file.
    ///
    /// # Errors
    /// [`FileNotFound`](ErrorKind::FileNotFound) if it doesn't exist,
    /// [`NotFile`](ErrorKind::NotFile) if it is a directory.
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// Upload a local file.
    ///
    /// Missing parent directories of `destination` are created. The source
    /// modification time is preserved where the backend supports it.
    ///
    /// # Errors
    /// [`FileNotFound`](ErrorKind::FileNotFound) if `source` is missing,
    /// [`FileAlreadyExists`](ErrorKind::FileAlreadyExists) if `destination`
    /// exists and `overwrite` is false.
    async fn copy_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<()>;

    /// Download a file to the local filesystem, creating missing local
    /// parent directories.
    ///
    /// # Errors
    /// As [`copy_file`](Self::copy_file), with the roles reversed.
    async fn restore_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<()>;

    /// Create or truncate a file with `text`.
    ///
    /// # Errors
    /// [`DirectoryNotFound`](ErrorKind::DirectoryNotFound) if the parent is
    /// missing.
    async fn write_to_file(&self, path: &str, text: &str) -> Result<()>;

    /// Append `text` to a file, creating it if needed.
    ///
    /// # Errors
    /// [`DirectoryNotFound`](ErrorKind::DirectoryNotFound) if the parent is
    /// missing.
    async fn append_to_file(&self, path: &str, text: &str) -> Result<()>;

    /// Read a whole file as UTF-8 text.
    async fn read_file(&self, path: &str) -> Result<String>;

    async fn file_exists(&self, path: &str) -> Result<bool>;

    async fn directory_exists(&self, path: &str) -> Result<bool>;
}

/// Connection details for a remote backend.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { host: host.into(), port, username: username.into(), password: password.into() }
    }

    /// `host:port`, for connecting and for error messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A backend holding exactly one network session.
///
/// Every [`StorageAccess`] operation fails with
/// [`NotConnected`](ErrorKind::NotConnected) until [`connect`](Self::connect)
/// succeeds. The session is closed by [`disconnect`](Self::disconnect) or
/// when the access is dropped.
#[async_trait]
pub trait RemoteAccess: StorageAccess {
    /// Open the session.
    ///
    /// # Errors
    /// [`AlreadyConnected`](ErrorKind::AlreadyConnected) when a session is
    /// open, [`BadAuthentication`](ErrorKind::BadAuthentication) when the
    /// credentials are rejected.
    async fn connect(&self) -> Result<()>;

    /// Close the session. Closing a closed session is a no-op.
    async fn disconnect(&self) -> Result<()>;

    async fn connected(&self) -> bool;

    async fn credentials(&self) -> Credentials;

    /// Re-point the backend at a different server or account.
    ///
    /// When a session is open and the credentials changed, the session is
    /// closed and re-opened with the new credentials before returning.
    async fn set_credentials(&self, credentials: Credentials) -> Result<()>;
}
