//! SFTP storage access via `ssh2`.

use crate::backend::session::Session;
use crate::backend::ssh::{self, map_ssh_error};
use crate::backend::{Credentials, LocalAccess, RemoteAccess, StorageAccess, set_modified};
use crate::error::{ErrorKind, Result};
use crate::file::{Directory, FileHistory};
use crate::path;
use async_trait::async_trait;
use ssh2::{ErrorCode, FileStat, OpenFlags, OpenType, Sftp};
use std::io::{Read, Write};
use std::path::Path;
use std::time::UNIX_EPOCH;
use time::OffsetDateTime;

pub const DEFAULT_PORT: u16 = 22;

/// An authenticated SSH session with its SFTP subsystem.
struct Client {
    session: ssh2::Session,
    sftp: Sftp,
}

/// SFTP storage access.
///
/// Every operation runs start to finish inside one blocking task, so the
/// type checks that precede a mutation see the same session state.
pub struct SftpAccess {
    name: String,
    session: Session<Client>,
}

impl SftpAccess {
    pub fn new(name: impl Into<String>, credentials: Credentials) -> Self {
        Self { name: name.into(), session: Session::new(credentials) }
    }

    fn open(credentials: Credentials) -> Result<Client> {
        let session = ssh::connect(&credentials)?;
        let sftp = session.sftp().map_err(|e| map_ssh_error(&e, &credentials.address()))?;
        Ok(Client { session, sftp })
    }

    fn shutdown(client: Client) {
        let Client { session, sftp } = client;
        drop(sftp);
        ssh::disconnect(&session);
    }

    async fn with_sftp<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T> + Send + 'static,
    {
        self.session.run(move |client| op(&client.sftp)).await
    }
}

/// `stat`, or `None` when nothing exists at `path`.
fn stat(sftp: &Sftp, path: &str) -> Result<Option<FileStat>> {
    match sftp.stat(Path::new(path)) {
        Ok(stat) => Ok(Some(stat)),
        Err(e) if matches!(e.code(), ErrorCode::SFTP(2 | 10 | 19)) => Ok(None),
        Err(e) => Err(map_ssh_error(&e, path).into()),
    }
}

fn modified(stat: &FileStat) -> OffsetDateTime {
    stat.mtime
        .and_then(|seconds| i64::try_from(seconds).ok())
        .and_then(|seconds| OffsetDateTime::from_unix_timestamp(seconds).ok())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn require_parent(sftp: &Sftp, path: &str) -> Result<()> {
    let parent = path::parent(path);
    if path::is_root(&parent) {
        return Ok(());
    }
    match stat(sftp, &parent)? {
        Some(stat) if stat.is_dir() => Ok(()),
        Some(_) => exn::bail!(ErrorKind::NotDirectory(parent)),
        None => exn::bail!(ErrorKind::DirectoryNotFound(parent)),
    }
}

fn require_file(sftp: &Sftp, path: &str) -> Result<FileStat> {
    match stat(sftp, path)? {
        Some(stat) if stat.is_dir() => exn::bail!(ErrorKind::NotFile(path.to_string())),
        Some(stat) => Ok(stat),
        None => exn::bail!(ErrorKind::FileNotFound(path.to_string())),
    }
}

fn list_blocking(sftp: &Sftp, path: &str) -> Result<Directory> {
    match stat(sftp, path)? {
        Some(stat) if stat.is_dir() => {},
        Some(_) => exn::bail!(ErrorKind::NotDirectory(path.to_string())),
        None => exn::bail!(ErrorKind::DirectoryNotFound(path.to_string())),
    }
    let mut listing = Directory::new(path);
    let mut entries = sftp.readdir(Path::new(path)).map_err(|e| map_ssh_error(&e, path))?;
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (child, stat) in entries {
        let Some(name) = child.file_name().map(|name| name.to_string_lossy().to_string()) else {
            continue;
        };
        if name == "." || name == ".." {
            continue;
        }
        let child = path::combine(&listing.path, &name);
        if stat.is_dir() {
            listing.directories.push(child);
        } else if stat.is_file() {
            listing.files.push(FileHistory::new(&listing.path, child, modified(&stat)));
        }
    }
    Ok(listing)
}

/// Depth-first removal of everything below (and including) `path`.
fn remove_recursive(sftp: &Sftp, path: &str) -> Result<()> {
    for (child, stat) in sftp.readdir(Path::new(path)).map_err(|e| map_ssh_error(&e, path))? {
        let child = path::normalize(&child.to_string_lossy());
        if matches!(path::file_name(&child).as_str(), "." | "..") {
            continue;
        }
        if stat.is_dir() {
            remove_recursive(sftp, &child)?;
        } else {
            sftp.unlink(Path::new(&child)).map_err(|e| map_ssh_error(&e, &child))?;
        }
    }
    sftp.rmdir(Path::new(path)).map_err(|e| map_ssh_error(&e, path))?;
    Ok(())
}

fn write_blocking(sftp: &Sftp, path: &str, data: &[u8], flags: OpenFlags) -> Result<()> {
    require_parent(sftp, path)?;
    if stat(sftp, path)?.is_some_and(|stat| stat.is_dir()) {
        exn::bail!(ErrorKind::NotFile(path.to_string()));
    }
    let mut file =
        sftp.open_mode(Path::new(path), flags, 0o644, OpenType::File).map_err(|e| map_ssh_error(&e, path))?;
    file.write_all(data).map_err(|e| LocalAccess::map_io_error(e, path))?;
    Ok(())
}

#[async_trait]
impl StorageAccess for SftpAccess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_directory(&self, path: &str) -> Result<Directory> {
        let target = path::normalize(path);
        self.with_sftp(move |sftp| list_blocking(sftp, &target)).await
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        if path::is_root(path) {
            return Ok(());
        }
        let target = path::normalize(path);
        self.with_sftp(move |sftp| {
            match stat(sftp, &target)? {
                Some(stat) if stat.is_dir() => exn::bail!(ErrorKind::DirectoryAlreadyExists(target)),
                Some(_) => exn::bail!(ErrorKind::NotDirectory(target)),
                None => {},
            }
            require_parent(sftp, &target)?;
            sftp.mkdir(Path::new(&target), 0o755).map_err(|e| map_ssh_error(&e, &target))?;
            Ok(())
        })
        .await
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        if path::is_root(path) {
            return Ok(());
        }
        let target = path::normalize(path);
        self.with_sftp(move |sftp| {
            match stat(sftp, &target)? {
                Some(stat) if stat.is_dir() => {},
                Some(_) => exn::bail!(ErrorKind::NotDirectory(target)),
                None => exn::bail!(ErrorKind::DirectoryNotFound(target)),
            }
            remove_recursive(sftp, &target)
        })
        .await
    }

    async fn create_file(&self, path: &str) -> Result<()> {
        let target = path::normalize(path);
        self.with_sftp(move |sftp| {
            match stat(sftp, &target)? {
                Some(stat) if stat.is_dir() => exn::bail!(ErrorKind::NotFile(target)),
                Some(_) => exn::bail!(ErrorKind::FileAlreadyExists(target)),
                None => {},
            }
            require_parent(sftp, &target)?;
            sftp.create(Path::new(&target)).map_err(|e| map_ssh_error(&e, &target))?;
            Ok(())
        })
        .await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let target = path::normalize(path);
        self.with_sftp(move |sftp| {
            require_file(sftp, &target)?;
            sftp.unlink(Path::new(&target)).map_err(|e| map_ssh_error(&e, &target))?;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(access = %self.name))]
    async fn copy_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<()> {
        if !LocalAccess::default().file_exists(source).await? {
            exn::bail!(ErrorKind::FileNotFound(source.to_string()));
        }
        self.ensure_directory_exists(&path::parent(destination)).await?;
        let (source, target) = (source.to_string(), path::normalize(destination));
        self.with_sftp(move |sftp| {
            match stat(sftp, &target)? {
                Some(stat) if stat.is_dir() => exn::bail!(ErrorKind::NotFile(target)),
                Some(_) if !overwrite => exn::bail!(ErrorKind::FileAlreadyExists(target)),
                _ => {},
            }
            let mut local = std::fs::File::open(&source).map_err(|e| LocalAccess::map_io_error(e, &source))?;
            let mtime = local
                .metadata()
                .and_then(|metadata| metadata.modified())
                .ok()
                .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
                .map(|elapsed| elapsed.as_secs());
            let mut remote = sftp.create(Path::new(&target)).map_err(|e| map_ssh_error(&e, &target))?;
            std::io::copy(&mut local, &mut remote).map_err(|e| LocalAccess::map_io_error(e, &target))?;
            drop(remote);
            if mtime.is_some() {
                let times = FileStat { size: None, uid: None, gid: None, perm: None, atime: mtime, mtime };
                sftp.setstat(Path::new(&target), times).map_err(|e| map_ssh_error(&e, &target))?;
            }
            Ok(())
        })
        .await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(access = %self.name))]
    async fn restore_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<()> {
        let local = LocalAccess::default();
        if !overwrite && local.file_exists(destination).await? {
            exn::bail!(ErrorKind::FileAlreadyExists(destination.to_string()));
        }
        local.ensure_directory_exists(&path::parent(destination)).await?;
        let (remote, target) = (path::normalize(source), destination.to_string());
        let timestamp = self
            .with_sftp(move |sftp| {
                let stat = require_file(sftp, &remote)?;
                let mut file = sftp.open(Path::new(&remote)).map_err(|e| map_ssh_error(&e, &remote))?;
                let mut output = std::fs::File::create(&target).map_err(|e| LocalAccess::map_io_error(e, &target))?;
                std::io::copy(&mut file, &mut output).map_err(|e| LocalAccess::map_io_error(e, &target))?;
                Ok(modified(&stat))
            })
            .await?;
        set_modified(destination, timestamp).await
    }

    async fn write_to_file(&self, path: &str, text: &str) -> Result<()> {
        let (target, data) = (path::normalize(path), text.as_bytes().to_vec());
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE;
        self.with_sftp(move |sftp| write_blocking(sftp, &target, &data, flags)).await
    }

    async fn append_to_file(&self, path: &str, text: &str) -> Result<()> {
        let (target, data) = (path::normalize(path), text.as_bytes().to_vec());
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::APPEND;
        self.with_sftp(move |sftp| write_blocking(sftp, &target, &data, flags)).await
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let target = path::normalize(path);
        self.with_sftp(move |sftp| {
            require_file(sftp, &target)?;
            let mut file = sftp.open(Path::new(&target)).map_err(|e| map_ssh_error(&e, &target))?;
            let mut text = String::new();
            file.read_to_string(&mut text).map_err(|e| LocalAccess::map_io_error(e, &target))?;
            Ok(text)
        })
        .await
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let target = path::normalize(path);
        self.with_sftp(move |sftp| Ok(stat(sftp, &target)?.is_some_and(|stat| stat.is_file()))).await
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        let target = path::normalize(path);
        self.with_sftp(move |sftp| Ok(stat(sftp, &target)?.is_some_and(|stat| stat.is_dir()))).await
    }
}

#[async_trait]
impl RemoteAccess for SftpAccess {
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
