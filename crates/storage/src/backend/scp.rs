//! SCP storage access: file transfer over `scp`, everything else through
//! shell commands on an SSH channel.
//!
//! Commands run with `LC_ALL=C TZ=UTC` so `ls` output and error messages are
//! predictable. A non-zero exit status is translated by matching stderr.

use crate::backend::session::Session;
use crate::backend::ssh::{self, map_ssh_error};
use crate::backend::{Credentials, LocalAccess, RemoteAccess, StorageAccess, set_modified};
use crate::consts::{
    STDERR_DIRECTORY_NOT_FOUND_REGEX, STDERR_FILE_NOT_FOUND_REGEX, STDERR_IS_DIRECTORY_REGEX,
    STDERR_NOT_DIRECTORY_REGEX, STDERR_PERMISSION_REGEX,
};
use crate::error::{ErrorKind, Result};
use crate::file::{Directory, FileHistory};
use crate::listing::{self, Entry, EntryKind};
use crate::path;
use async_trait::async_trait;
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};
use time::OffsetDateTime;

const ENVIRONMENT: &str = "LC_ALL=C TZ=UTC";
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// SCP storage access.
pub struct ScpAccess {
    name: String,
    session: Session<ssh2::Session>,
}

/// Outcome of one remote command.
struct Output {
    status: i32,
    stdout: String,
    stderr: String,
}

impl Output {
    fn success(&self) -> bool {
        self.status == 0
    }
}

impl ScpAccess {
    pub fn new(name: impl Into<String>, credentials: Credentials) -> Self {
        Self { name: name.into(), session: Session::new(credentials) }
    }

    fn open(credentials: Credentials) -> Result<ssh2::Session> {
        ssh::connect(&credentials)
    }

    fn shutdown(session: ssh2::Session) {
        ssh::disconnect(&session);
    }
}

/// Single-quote `value` for a POSIX shell.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Translate a failed command's stderr into the shared taxonomy.
pub(crate) fn classify_stderr(stderr: &str, path: &str) -> ErrorKind {
    let path = path.to_string();
    if STDERR_PERMISSION_REGEX.is_match(stderr) {
        ErrorKind::Permissions(path)
    } else if STDERR_FILE_NOT_FOUND_REGEX.is_match(stderr) {
        ErrorKind::FileNotFound(path)
    } else if STDERR_DIRECTORY_NOT_FOUND_REGEX.is_match(stderr) {
        ErrorKind::DirectoryNotFound(path)
    } else if STDERR_NOT_DIRECTORY_REGEX.is_match(stderr) {
        ErrorKind::NotDirectory(path)
    } else if STDERR_IS_DIRECTORY_REGEX.is_match(stderr) {
        ErrorKind::NotFile(path)
    } else {
        ErrorKind::Unknown(format!("{path}: {}", stderr.trim()))
    }
}

fn exec(session: &ssh2::Session, command: &str, input: Option<&[u8]>) -> Result<Output> {
    let command = format!("{ENVIRONMENT} {command}");
    tracing::trace!(command = %command, "Running remote command");
    let mut channel = session.channel_session().map_err(|e| map_ssh_error(&e, &command))?;
    channel.exec(&command).map_err(|e| map_ssh_error(&e, &command))?;
    if let Some(input) = input {
        channel.write_all(input).map_err(|e| LocalAccess::map_io_error(e, &command))?;
    }
    channel.send_eof().map_err(|e| map_ssh_error(&e, &command))?;

    session.set_blocking(false);
    let drained = drain_streams(&mut channel.stream(0), &mut channel.stderr(), || channel.eof());
    session.set_blocking(true);
    let (stdout, stderr) = drained.map_err(|e| LocalAccess::map_io_error(e, &command))?;
    channel.wait_close().map_err(|e| map_ssh_error(&e, &command))?;
    let status = channel.exit_status().map_err(|e| map_ssh_error(&e, &command))?;
    Ok(Output {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Read stdout and stderr in turn so neither channel window fills up while
/// the other is being drained. Stops once `finished` holds and a full pass
/// read nothing.
fn drain_streams(
    stdout: &mut impl Read,
    stderr: &mut impl Read,
    finished: impl Fn() -> bool,
) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
    let mut output = (Vec::new(), Vec::new());
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let read = read_available(stdout, &mut buffer, &mut output.0)?;
        if read + read_available(stderr, &mut buffer, &mut output.1)? == 0 {
            if finished() {
                return Ok(output);
            }
            std::thread::sleep(DRAIN_POLL);
        }
    }
}

fn read_available(stream: &mut impl Read, buffer: &mut [u8], into: &mut Vec<u8>) -> std::io::Result<usize> {
    match stream.read(buffer) {
        Ok(read) => {
            into.extend_from_slice(&buffer[..read]);
            Ok(read)
        },
        Err(e) if matches!(e.kind(), IoErrorKind::WouldBlock | IoErrorKind::Interrupted) => Ok(0),
        Err(e) => Err(e),
    }
}

/// Run a command that must succeed.
fn exec_checked(session: &ssh2::Session, command: &str, path: &str, input: Option<&[u8]>) -> Result<String> {
    let output = exec(session, command, input)?;
    if !output.success() {
        exn::bail!(classify_stderr(&output.stderr, path));
    }
    Ok(output.stdout)
}

/// What is at `path`, if anything.
fn kind(session: &ssh2::Session, path: &str) -> Result<Option<EntryKind>> {
    if path::is_root(path) {
        return Ok(Some(EntryKind::Directory));
    }
    let quoted = quote(path);
    let command = format!("if test -d {quoted}; then echo d; elif test -e {quoted}; then echo f; fi");
    Ok(match exec_checked(session, &command, path, None)?.trim() {
        "d" => Some(EntryKind::Directory),
        "f" => Some(EntryKind::File),
        _ => None,
    })
}

fn require_parent(session: &ssh2::Session, path: &str) -> Result<()> {
    let parent = path::parent(path);
    match kind(session, &parent)? {
        Some(EntryKind::Directory) => Ok(()),
        Some(EntryKind::File) => exn::bail!(ErrorKind::NotDirectory(parent)),
        None => exn::bail!(ErrorKind::DirectoryNotFound(parent)),
    }
}

fn require_file(session: &ssh2::Session, path: &str) -> Result<()> {
    match kind(session, path)? {
        Some(EntryKind::File) => Ok(()),
        Some(EntryKind::Directory) => exn::bail!(ErrorKind::NotFile(path.to_string())),
        None => exn::bail!(ErrorKind::FileNotFound(path.to_string())),
    }
}

/// `ls -l --full-time` first (GNU), then plain `ls -l` in any layout the
/// long-format parser knows, then format inference against `ls -1`.
fn list_entries(session: &ssh2::Session, path: &str) -> Result<Vec<Entry>> {
    let quoted = quote(path);
    let now = OffsetDateTime::now_utc();
    let full_time = exec(session, &format!("ls -lA --full-time {quoted}"), None)?;
    if full_time.success()
        && let Some(entries) = listing::parse_long_listing(&full_time.stdout, now)
    {
        return Ok(entries);
    }
    let long = exec_checked(session, &format!("ls -lA {quoted}"), path, None)?;
    if let Some(entries) = listing::parse_long_listing(&long, now) {
        return Ok(entries);
    }
    let short = exec_checked(session, &format!("ls -1A {quoted}"), path, None)?;
    let Some((entries, format)) = listing::parse_universal(&long, &short, now) else {
        exn::bail!(ErrorKind::Unknown(format!("{path}: unrecognized ls output")));
    };
    if format.ambiguous {
        tracing::warn!(path = %path, order = ?format.order, "Listing dates are ambiguous; assumed day before month");
    }
    Ok(entries)
}

fn list_blocking(session: &ssh2::Session, path: &str) -> Result<Directory> {
    match kind(session, path)? {
        Some(EntryKind::Directory) => {},
        Some(EntryKind::File) => exn::bail!(ErrorKind::NotDirectory(path.to_string())),
        None => exn::bail!(ErrorKind::DirectoryNotFound(path.to_string())),
    }
    let mut listing = Directory::new(path);
    for entry in list_entries(session, path)? {
        let child = path::combine(&listing.path, &entry.name);
        match entry.kind {
            EntryKind::Directory => listing.directories.push(child),
            EntryKind::File => listing.files.push(FileHistory::new(&listing.path, child, entry.modified)),
        }
    }
    Ok(listing)
}

fn write_blocking(session: &ssh2::Session, path: &str, data: &[u8], redirect: &str) -> Result<()> {
    require_parent(session, path)?;
    if kind(session, path)? == Some(EntryKind::Directory) {
        exn::bail!(ErrorKind::NotFile(path.to_string()));
    }
    exec_checked(session, &format!("cat {redirect} {}", quote(path)), path, Some(data))?;
    Ok(())
}

#[async_trait]
impl StorageAccess for ScpAccess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_directory(&self, path: &str) -> Result<Directory> {
        let target = path::normalize(path);
        self.session.run(move |session| list_blocking(session, &target)).await
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        if path::is_root(path) {
            return Ok(());
        }
        let target = path::normalize(path);
        self.session
            .run(move |session| {
                match kind(session, &target)? {
                    Some(EntryKind::Directory) => exn::bail!(ErrorKind::DirectoryAlreadyExists(target)),
                    Some(EntryKind::File) => exn::bail!(ErrorKind::NotDirectory(target)),
                    None => {},
                }
                require_parent(session, &target)?;
                exec_checked(session, &format!("mkdir {}", quote(&target)), &target, None)?;
                Ok(())
            })
            .await
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        if path::is_root(path) {
            return Ok(());
        }
        let target = path::normalize(path);
        self.session
            .run(move |session| {
                match kind(session, &target)? {
                    Some(EntryKind::Directory) => {},
                    Some(EntryKind::File) => exn::bail!(ErrorKind::NotDirectory(target)),
                    None => exn::bail!(ErrorKind::DirectoryNotFound(target)),
                }
                exec_checked(session, &format!("rm -rf {}", quote(&target)), &target, None)?;
                Ok(())
            })
            .await
    }

    async fn create_file(&self, path: &str) -> Result<()> {
        let target = path::normalize(path);
        self.session
            .run(move |session| {
                match kind(session, &target)? {
                    Some(EntryKind::File) => exn::bail!(ErrorKind::FileAlreadyExists(target)),
                    Some(EntryKind::Directory) => exn::bail!(ErrorKind::NotFile(target)),
                    None => {},
                }
                require_parent(session, &target)?;
                exec_checked(session, &format!("touch {}", quote(&target)), &target, None)?;
                Ok(())
            })
            .await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let target = path::normalize(path);
        self.session
            .run(move |session| {
                require_file(session, &target)?;
                exec_checked(session, &format!("rm {}", quote(&target)), &target, None)?;
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
        self.session
            .run(move |session| {
                match kind(session, &target)? {
                    Some(EntryKind::Directory) => exn::bail!(ErrorKind::NotFile(target)),
                    Some(EntryKind::File) if !overwrite => exn::bail!(ErrorKind::FileAlreadyExists(target)),
                    _ => {},
                }
                let mut local = std::fs::File::open(&source).map_err(|e| LocalAccess::map_io_error(e, &source))?;
                let metadata = local.metadata().map_err(|e| LocalAccess::map_io_error(e, &source))?;
                let mtime = metadata
                    .modified()
                    .ok()
                    .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |elapsed| elapsed.as_secs());
                let mut remote = session
                    .scp_send(Path::new(&target), 0o644, metadata.len(), Some((mtime, mtime)))
                    .map_err(|e| map_ssh_error(&e, &target))?;
                std::io::copy(&mut local, &mut remote).map_err(|e| LocalAccess::map_io_error(e, &target))?;
                remote.send_eof().map_err(|e| map_ssh_error(&e, &target))?;
                remote.wait_eof().map_err(|e| map_ssh_error(&e, &target))?;
                remote.close().map_err(|e| map_ssh_error(&e, &target))?;
                remote.wait_close().map_err(|e| map_ssh_error(&e, &target))?;
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
            .session
            .run(move |session| {
                require_file(session, &remote)?;
                let (mut channel, _) =
                    session.scp_recv(Path::new(&remote)).map_err(|e| map_ssh_error(&e, &remote))?;
                let mut output = std::fs::File::create(&target).map_err(|e| LocalAccess::map_io_error(e, &target))?;
                std::io::copy(&mut channel, &mut output).map_err(|e| LocalAccess::map_io_error(e, &target))?;
                channel.send_eof().map_err(|e| map_ssh_error(&e, &remote))?;
                channel.wait_eof().map_err(|e| map_ssh_error(&e, &remote))?;
                channel.close().map_err(|e| map_ssh_error(&e, &remote))?;
                channel.wait_close().map_err(|e| map_ssh_error(&e, &remote))?;

                // `scp` has no mtime on the receiving side; take it from the listing.
                let name = path::file_name(&remote);
                let entries = list_entries(session, &path::parent(&remote))?;
                Ok(entries.into_iter().find(|entry| entry.name == name).map(|entry| entry.modified))
            })
            .await?;
        if let Some(timestamp) = timestamp {
            set_modified(destination, timestamp).await?;
        }
        Ok(())
    }

    async fn write_to_file(&self, path: &str, text: &str) -> Result<()> {
        let (target, data) = (path::normalize(path), text.as_bytes().to_vec());
        self.session.run(move |session| write_blocking(session, &target, &data, ">")).await
    }

    async fn append_to_file(&self, path: &str, text: &str) -> Result<()> {
        let (target, data) = (path::normalize(path), text.as_bytes().to_vec());
        self.session.run(move |session| write_blocking(session, &target, &data, ">>")).await
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let target = path::normalize(path);
        self.session
            .run(move |session| {
                require_file(session, &target)?;
                exec_checked(session, &format!("cat {}", quote(&target)), &target, None)
            })
            .await
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let target = path::normalize(path);
        self.session.run(move |session| Ok(kind(session, &target)? == Some(EntryKind::File))).await
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        let target = path::normalize(path);
        self.session.run(move |session| Ok(kind(session, &target)? == Some(EntryKind::Directory))).await
    }
}

#[async_trait]
impl RemoteAccess for ScpAccess {
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
