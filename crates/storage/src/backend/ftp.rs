//! FTP storage access via `suppaftp`.
//!
//! FTP has no "stat", so existence and type checks list the parent
//! directory. Listings prefer `MLSD` and fall back to `LIST`, parsed by
//! [`crate::listing`].

use crate::backend::session::Session;
use crate::backend::{Credentials, LocalAccess, RemoteAccess, StorageAccess};
use crate::error::{ErrorKind, Result};
use crate::file::{Directory, FileHistory};
use crate::listing::{self, Entry, EntryKind};
use crate::path;
use async_trait::async_trait;
use std::io::Cursor;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Status};
use time::OffsetDateTime;
use time::macros::format_description;

pub const DEFAULT_PORT: u16 = 21;

/// Reply codes a server sends for commands it doesn't implement.
const UNSUPPORTED: [u32; 4] = [500, 501, 502, 504];

/// FTP storage access.
///
/// # Examples
///
/// ```no_run
/// use chainbak_storage::{Credentials, FtpAccess, RemoteAccess, StorageAccess};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let access = FtpAccess::new("nas", Credentials::new("nas.local", 21, "backup", "secret"));
/// access.connect().await?;
/// access.ensure_directory_exists("/backups/2024").await?;
/// access.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct FtpAccess {
    name: String,
    session: Session<FtpStream>,
}

impl FtpAccess {
    pub fn new(name: impl Into<String>, credentials: Credentials) -> Self {
        Self { name: name.into(), session: Session::new(credentials) }
    }

    fn open(credentials: Credentials) -> Result<FtpStream> {
        let address = credentials.address();
        let mut stream = FtpStream::connect(address.as_str()).map_err(|e| map_ftp_error(e, &address))?;
        stream.login(credentials.username.as_str(), credentials.password.as_str()).map_err(|e| match e {
            FtpError::UnexpectedResponse(ref response) if matches!(response.status.code(), 530 | 332) => {
                ErrorKind::BadAuthentication(address.clone())
            },
            other => map_ftp_error(other, &address),
        })?;
        stream.transfer_type(FileType::Binary).map_err(|e| map_ftp_error(e, &address))?;
        Ok(stream)
    }

    fn shutdown(mut stream: FtpStream) {
        if let Err(e) = stream.quit() {
            tracing::debug!(error = %e, "FTP QUIT failed; dropping connection");
        }
    }

    /// What is at `path`, if anything.
    ///
    /// # Errors
    /// [`DirectoryNotFound`](ErrorKind::DirectoryNotFound) if the parent is
    /// missing.
    async fn lookup(&self, path: &str) -> Result<Option<EntryKind>> {
        if path::is_root(path) {
            return Ok(Some(EntryKind::Directory));
        }
        let target = path::normalize(path).trim_end_matches(path::SEPARATOR).to_string();
        let listing = self.list_directory(&path::parent(&target)).await?;
        if listing.directories.iter().any(|directory| *directory == target) {
            return Ok(Some(EntryKind::Directory));
        }
        Ok(listing.files.iter().any(|file| file.path() == target).then_some(EntryKind::File))
    }

    async fn require_parent(&self, path: &str) -> Result<()> {
        let parent = path::parent(path);
        if !path::is_root(&parent) && !self.directory_exists(&parent).await? {
            exn::bail!(ErrorKind::DirectoryNotFound(parent));
        }
        Ok(())
    }
}

/// Classify an FTP reply into the shared taxonomy.
pub(crate) fn classify_reply(code: u32, message: &str, path: &str) -> ErrorKind {
    let message = message.trim();
    let lower = message.to_lowercase();
    match code {
        530 | 532 => ErrorKind::Permissions(path.to_string()),
        450 | 550 | 553 if lower.contains("permission") || lower.contains("denied") => {
            ErrorKind::Permissions(path.to_string())
        },
        450 | 550 | 553 if lower.contains("not a directory") => ErrorKind::NotDirectory(path.to_string()),
        450 | 550 | 553 if lower.contains("is a directory") => ErrorKind::NotFile(path.to_string()),
        521 => ErrorKind::DirectoryAlreadyExists(path.to_string()),
        450 | 550 => ErrorKind::FileNotFound(path.to_string()),
        _ => ErrorKind::Unknown(format!("{path}: [{code}] {message}")),
    }
}

fn map_ftp_error(error: FtpError, path: &str) -> ErrorKind {
    match error {
        FtpError::UnexpectedResponse(response) => {
            classify_reply(response.status.code(), &String::from_utf8_lossy(&response.body), path)
        },
        FtpError::ConnectionError(e) => LocalAccess::map_io_error(e, path),
        other => ErrorKind::Unknown(format!("{path}: {other}")),
    }
}

fn is_unsupported(error: &FtpError) -> bool {
    matches!(error, FtpError::UnexpectedResponse(response) if UNSUPPORTED.contains(&response.status.code()))
}

fn list_blocking(stream: &mut FtpStream, path: &str) -> Result<Vec<Entry>> {
    match stream.mlsd(Some(path)) {
        Ok(lines) => return Ok(listing::parse_mlsd(&lines.join("\n"))),
        Err(e) if is_unsupported(&e) => tracing::trace!("MLSD unsupported, falling back to LIST"),
        Err(e) => return Err(directory_error(e, path).into()),
    }
    let lines = stream.list(Some(path)).map_err(|e| directory_error(e, path))?;
    let output = lines.join("\n");
    match listing::parse_long_listing(&output, OffsetDateTime::now_utc()) {
        Some(entries) => Ok(entries),
        None => exn::bail!(ErrorKind::Unknown(format!("{path}: unrecognized LIST format"))),
    }
}

/// A directory command failing with "not found" means the directory is missing.
fn directory_error(error: FtpError, path: &str) -> ErrorKind {
    match map_ftp_error(error, path) {
        ErrorKind::FileNotFound(path) => ErrorKind::DirectoryNotFound(path),
        other => other,
    }
}

#[async_trait]
impl StorageAccess for FtpAccess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_directory(&self, path: &str) -> Result<Directory> {
        let target = path::normalize(path);
        let remote = target.clone();
        let entries = self.session.run(move |stream| list_blocking(stream, &remote)).await?;
        let mut listing = Directory::new(&target);
        for entry in entries {
            let child = path::combine(&listing.path, &entry.name);
            match entry.kind {
                EntryKind::Directory => listing.directories.push(child),
                EntryKind::File => listing.files.push(FileHistory::new(&listing.path, child, entry.modified)),
            }
        }
        Ok(listing)
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        if path::is_root(path) {
            return Ok(());
        }
        match self.lookup(path).await? {
            Some(EntryKind::Directory) => exn::bail!(ErrorKind::DirectoryAlreadyExists(path.to_string())),
            Some(EntryKind::File) => exn::bail!(ErrorKind::NotDirectory(path.to_string())),
            None => {},
        }
        let target = path::normalize(path);
        self.session
            .run(move |stream| Ok(stream.mkdir(target.as_str()).map_err(|e| directory_error(e, &target))?))
            .await
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        if path::is_root(path) {
            return Ok(());
        }
        match self.lookup(path).await {
            Ok(Some(EntryKind::Directory)) => {},
            Ok(Some(EntryKind::File)) => exn::bail!(ErrorKind::NotDirectory(path.to_string())),
            Ok(None) => exn::bail!(ErrorKind::DirectoryNotFound(path.to_string())),
            Err(e) if matches!(&*e, ErrorKind::DirectoryNotFound(_)) => {
                exn::bail!(ErrorKind::DirectoryNotFound(path.to_string()))
            },
            Err(e) => return Err(e),
        }
        self.ensure_directory_empty(path).await?;
        let target = path::normalize(path);
        self.session
            .run(move |stream| Ok(stream.rmdir(target.as_str()).map_err(|e| directory_error(e, &target))?))
            .await
    }

    async fn create_file(&self, path: &str) -> Result<()> {
        match self.lookup(path).await? {
            Some(EntryKind::File) => exn::bail!(ErrorKind::FileAlreadyExists(path.to_string())),
            Some(EntryKind::Directory) => exn::bail!(ErrorKind::NotFile(path.to_string())),
            None => {},
        }
        let target = path::normalize(path);
        self.session
            .run(move |stream| {
                stream.put_file(target.as_str(), &mut Cursor::new(Vec::new())).map_err(|e| map_ftp_error(e, &target))?;
                Ok(())
            })
            .await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        match self.lookup(path).await {
            Ok(Some(EntryKind::File)) => {},
            Ok(Some(EntryKind::Directory)) => exn::bail!(ErrorKind::NotFile(path.to_string())),
            Ok(None) => exn::bail!(ErrorKind::FileNotFound(path.to_string())),
            Err(e) if e.is_not_found() => exn::bail!(ErrorKind::FileNotFound(path.to_string())),
            Err(e) => return Err(e),
        }
        let target = path::normalize(path);
        self.session.run(move |stream| Ok(stream.rm(target.as_str()).map_err(|e| map_ftp_error(e, &target))?)).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(access = %self.name))]
    async fn copy_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<()> {
        let local = LocalAccess::default();
        if !local.file_exists(source).await? {
            exn::bail!(ErrorKind::FileNotFound(source.to_string()));
        }
        self.ensure_directory_exists(&path::parent(destination)).await?;
        match self.lookup(destination).await? {
            Some(EntryKind::Directory) => exn::bail!(ErrorKind::NotFile(destination.to_string())),
            Some(EntryKind::File) if !overwrite => exn::bail!(ErrorKind::FileAlreadyExists(destination.to_string())),
            _ => {},
        }

        let (source, target) = (source.to_string(), path::normalize(destination));
        self.session
            .run(move |stream| {
                let mut file = std::fs::File::open(&source).map_err(|e| LocalAccess::map_io_error(e, &source))?;
                let modified = file.metadata().and_then(|m| m.modified()).ok();
                stream.put_file(target.as_str(), &mut file).map_err(|e| map_ftp_error(e, &target))?;
                // MFMT is an extension; servers without it keep the upload time.
                if let Some(stamp) = modified.and_then(|m| OffsetDateTime::from(m).format(MFMT_FORMAT).ok()) {
                    let command = format!("MFMT {stamp} {target}");
                    if let Err(e) = stream.custom_command(command, &[Status::File]) {
                        tracing::warn!(path = %target, error = %e, "Server did not accept MFMT");
                    }
                }
                Ok(())
            })
            .await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(access = %self.name))]
    async fn restore_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<()> {
        match self.lookup(source).await {
            Ok(Some(EntryKind::File)) => {},
            Ok(Some(EntryKind::Directory)) => exn::bail!(ErrorKind::NotFile(source.to_string())),
            Ok(None) => exn::bail!(ErrorKind::FileNotFound(source.to_string())),
            Err(e) if e.is_not_found() => exn::bail!(ErrorKind::FileNotFound(source.to_string())),
            Err(e) => return Err(e),
        }
        let local = LocalAccess::default();
        if !overwrite && local.file_exists(destination).await? {
            exn::bail!(ErrorKind::FileAlreadyExists(destination.to_string()));
        }
        local.ensure_directory_exists(&path::parent(destination)).await?;

        let (source, target) = (path::normalize(source), destination.to_string());
        self.session
            .run(move |stream| {
                let buffer = stream.retr_as_buffer(source.as_str()).map_err(|e| map_ftp_error(e, &source))?;
                std::fs::write(&target, buffer.into_inner()).map_err(|e| LocalAccess::map_io_error(e, &target))?;
                Ok(())
            })
            .await
    }

    async fn write_to_file(&self, path: &str, text: &str) -> Result<()> {
        self.require_parent(path).await?;
        let (target, data) = (path::normalize(path), text.as_bytes().to_vec());
        self.session
            .run(move |stream| {
                stream.put_file(target.as_str(), &mut Cursor::new(data)).map_err(|e| map_ftp_error(e, &target))?;
                Ok(())
            })
            .await
    }

    async fn append_to_file(&self, path: &str, text: &str) -> Result<()> {
        self.require_parent(path).await?;
        let (target, data) = (path::normalize(path), text.as_bytes().to_vec());
        self.session
            .run(move |stream| {
                stream.append_file(target.as_str(), &mut Cursor::new(data)).map_err(|e| map_ftp_error(e, &target))?;
                Ok(())
            })
            .await
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        match self.lookup(path).await {
            Ok(Some(EntryKind::File)) => {},
            Ok(Some(EntryKind::Directory)) => exn::bail!(ErrorKind::NotFile(path.to_string())),
            Ok(None) => exn::bail!(ErrorKind::FileNotFound(path.to_string())),
            Err(e) if e.is_not_found() => exn::bail!(ErrorKind::FileNotFound(path.to_string())),
            Err(e) => return Err(e),
        }
        let target = path::normalize(path);
        self.session
            .run(move |stream| {
                let buffer = stream.retr_as_buffer(target.as_str()).map_err(|e| map_ftp_error(e, &target))?;
                String::from_utf8(buffer.into_inner())
                    .map_err(|_| exn::Exn::from(ErrorKind::Unknown(format!("{target}: not valid UTF-8"))))
            })
            .await
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        match self.lookup(path).await {
            Ok(kind) => Ok(kind == Some(EntryKind::File)),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        match self.lookup(path).await {
            Ok(kind) => Ok(kind == Some(EntryKind::Directory)),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

const MFMT_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year][month][day][hour][minute][second]");

#[async_trait]
impl RemoteAccess for FtpAccess {
    async fn connect(&self) -> Result<()> {
        self.session.open(Self::open).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.session.close(Self::shutdown).await
    }

    async fn connected(&self) -> bool {
        self.session.is_open().await
    }

    async fn credentials(&self) -> Credentials {
        self.session.credentials().await
    }

    async fn set_credentials(&self, credentials: Credentials) -> Result<()> {
        self.session.set_credentials(credentials, Self::open, Self::shutdown).await
    }
}
