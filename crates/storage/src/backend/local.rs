//! Local filesystem storage access.
//!
//! Uses `tokio::fs` for async I/O. This is also the access the engine walks
//! backup sources and restore destinations with, so its listing semantics
//! are the reference every remote backend is held to.

use crate::error::{ErrorKind, Result};
use crate::file::{Directory, FileHistory};
use crate::{StorageAccess, path};
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::Metadata;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::time::SystemTime;
use time::OffsetDateTime;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Local filesystem storage access.
///
/// Paths are used as given (absolute, or relative to the working
/// directory).
///
/// # Examples
///
/// ```no_run
/// use chainbak_storage::{LocalAccess, StorageAccess};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let access = LocalAccess::new("archive-disk");
/// access.ensure_directory_exists("/mnt/archive/2024").await?;
/// access.copy_file("/home/zan/notes.txt", "/mnt/archive/2024/notes.txt", false).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct LocalAccess {
    name: String,
}

impl LocalAccess {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub(crate) fn map_io_error(e: std::io::Error, path: &str) -> ErrorKind {
        match e.kind() {
            IoErrorKind::NotFound => ErrorKind::FileNotFound(path.to_string()),
            IoErrorKind::PermissionDenied => ErrorKind::Permissions(path.to_string()),
            IoErrorKind::AlreadyExists => ErrorKind::FileAlreadyExists(path.to_string()),
            IoErrorKind::NotADirectory => ErrorKind::NotDirectory(path.to_string()),
            IoErrorKind::IsADirectory => ErrorKind::NotFile(path.to_string()),
            _ => ErrorKind::Io(e),
        }
    }

    fn map_directory_error(e: std::io::Error, path: &str) -> ErrorKind {
        match e.kind() {
            IoErrorKind::NotFound => ErrorKind::DirectoryNotFound(path.to_string()),
            IoErrorKind::AlreadyExists => ErrorKind::DirectoryAlreadyExists(path.to_string()),
            _ => Self::map_io_error(e, path),
        }
    }

    /// Creating a file only reports "not found" when its parent is missing.
    fn map_write_error(e: std::io::Error, path: &str) -> ErrorKind {
        match e.kind() {
            IoErrorKind::NotFound => ErrorKind::DirectoryNotFound(path::parent(path)),
            _ => Self::map_io_error(e, path),
        }
    }

    /// Metadata, or `None` when nothing exists at `path`.
    async fn stat(path: &str) -> Result<Option<Metadata>> {
        match fs::metadata(path).await {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) if matches!(e.kind(), IoErrorKind::NotFound | IoErrorKind::NotADirectory) => Ok(None),
            Err(e) => Err(Self::map_io_error(e, path).into()),
        }
    }

    /// Shared by copy and restore: on this backend both sides are local.
    async fn transfer(&self, source: &str, destination: &str, overwrite: bool) -> Result<()> {
        let metadata = match Self::stat(source).await? {
            Some(metadata) if metadata.is_file() => metadata,
            Some(_) => exn::bail!(ErrorKind::NotFile(source.to_string())),
            None => exn::bail!(ErrorKind::FileNotFound(source.to_string())),
        };
        self.ensure_directory_exists(&path::parent(destination)).await?;
        match Self::stat(destination).await? {
            Some(existing) if existing.is_dir() => exn::bail!(ErrorKind::NotFile(destination.to_string())),
            Some(_) if !overwrite => exn::bail!(ErrorKind::FileAlreadyExists(destination.to_string())),
            _ => {},
        }
        fs::copy(source, destination).await.map_err(|e| Self::map_write_error(e, destination))?;
        if let Ok(modified) = metadata.modified() {
            set_modified(destination, modified.into()).await?;
        }
        Ok(())
    }
}

impl Default for LocalAccess {
    fn default() -> Self {
        Self::new("local")
    }
}

/// Set the modification time of a local file.
///
/// Used to carry a source timestamp over to a copy, so timestamp comparison
/// against the copy sees the file as unchanged.
pub async fn set_modified(path: &str, timestamp: OffsetDateTime) -> Result<()> {
    let target = PathBuf::from(path);
    let modified = SystemTime::from(timestamp);
    tokio::task::spawn_blocking(move || std::fs::File::options().write(true).open(&target)?.set_modified(modified))
        .await
        .or_raise(|| ErrorKind::Unknown(format!("setting modification time of {path}")))?
        .map_err(|e| LocalAccess::map_io_error(e, path))?;
    Ok(())
}

#[async_trait]
impl StorageAccess for LocalAccess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_directory(&self, path: &str) -> Result<Directory> {
        let mut entries = fs::read_dir(path).await.map_err(|e| Self::map_directory_error(e, path))?;
        let mut listing = Directory::new(path);
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_directory_error(e, path))? {
            let child = path::combine(&listing.path, &entry.file_name().to_string_lossy());
            let linked = entry.file_type().await.map_err(|e| Self::map_io_error(e, &child))?.is_symlink();
            // Follows symlinks; silently drop what is most likely a broken one.
            let Some(metadata) = Self::stat(&child).await? else {
                continue;
            };
            if metadata.is_dir() && linked {
                tracing::debug!(path = %child, "Skipping symlinked directory");
            } else if metadata.is_dir() {
                listing.directories.push(child);
            } else if metadata.is_file() {
                let modified = metadata.modified().map_err(ErrorKind::Io)?;
                listing.files.push(FileHistory::new(&listing.path, child, modified.into()));
            }
        }
        listing.directories.sort();
        listing.files.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(listing)
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        if path::is_root(path) {
            return Ok(());
        }
        match Self::stat(path).await? {
            Some(metadata) if metadata.is_dir() => exn::bail!(ErrorKind::DirectoryAlreadyExists(path.to_string())),
            Some(_) => exn::bail!(ErrorKind::NotDirectory(path.to_string())),
            None => {},
        }
        Ok(fs::create_dir(path).await.map_err(|e| Self::map_directory_error(e, path))?)
    }

    /// Links are unlinked, never followed into.
    async fn ensure_directory_empty(&self, path: &str) -> Result<()> {
        let mut entries = fs::read_dir(path).await.map_err(|e| Self::map_directory_error(e, path))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_directory_error(e, path))? {
            let child = path::combine(path, &entry.file_name().to_string_lossy());
            if entry.file_type().await.map_err(|e| Self::map_io_error(e, &child))?.is_dir() {
                self.delete_directory(&child).await?;
            } else {
                fs::remove_file(&child).await.map_err(|e| Self::map_io_error(e, &child))?;
            }
        }
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        if path::is_root(path) {
            return Ok(());
        }
        match Self::stat(path).await? {
            Some(metadata) if metadata.is_dir() => {},
            Some(_) => exn::bail!(ErrorKind::NotDirectory(path.to_string())),
            None => exn::bail!(ErrorKind::DirectoryNotFound(path.to_string())),
        }
        self.ensure_directory_empty(path).await?;
        Ok(fs::remove_dir(path).await.map_err(|e| Self::map_directory_error(e, path))?)
    }

    async fn create_file(&self, path: &str) -> Result<()> {
        if let Some(metadata) = Self::stat(path).await? {
            match metadata.is_dir() {
                true => exn::bail!(ErrorKind::NotFile(path.to_string())),
                false => exn::bail!(ErrorKind::FileAlreadyExists(path.to_string())),
            }
        }
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| Self::map_write_error(e, path))?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        match Self::stat(path).await? {
            Some(metadata) if metadata.is_dir() => exn::bail!(ErrorKind::NotFile(path.to_string())),
            Some(_) => {},
            None => exn::bail!(ErrorKind::FileNotFound(path.to_string())),
        }
        Ok(fs::remove_file(path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(access = %self.name))]
    async fn copy_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<()> {
        self.transfer(source, destination, overwrite).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(access = %self.name))]
    async fn restore_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<()> {
        self.transfer(source, destination, overwrite).await
    }

    async fn write_to_file(&self, path: &str, text: &str) -> Result<()> {
        Ok(fs::write(path, text).await.map_err(|e| Self::map_write_error(e, path))?)
    }

    async fn append_to_file(&self, path: &str, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await
            .map_err(|e| Self::map_write_error(e, path))?;
        file.write_all(text.as_bytes()).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(file.flush().await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        Ok(fs::read_to_string(path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(Self::stat(path).await?.is_some_and(|metadata| metadata.is_file()))
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        Ok(Self::stat(path).await?.is_some_and(|metadata| metadata.is_dir()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn setup() -> (tempfile::TempDir, String, LocalAccess) {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = path::normalize(temp_dir.path().to_str().unwrap());
        (temp_dir, root, LocalAccess::default())
    }

    #[test]
    fn test_map_io_error() {
        let denied = std::io::Error::from(IoErrorKind::PermissionDenied);
        assert!(matches!(LocalAccess::map_io_error(denied, "/x"), ErrorKind::Permissions(_)));
        let missing = std::io::Error::from(IoErrorKind::NotFound);
        assert!(matches!(LocalAccess::map_write_error(missing, "/a/b.txt"), ErrorKind::DirectoryNotFound(p) if p == "/a"));
        let other = std::io::Error::from(IoErrorKind::Interrupted);
        assert!(matches!(LocalAccess::map_io_error(other, "/x"), ErrorKind::Io(_)));
    }

    #[tokio::test]
    async fn test_create_directory() {
        let (_temp_dir, root, access) = setup();
        let remote = path::combine(&root, "Remote");
        access.create_directory(&remote).await.unwrap();
        assert!(access.directory_exists(&remote).await.unwrap());

        let err = access.create_directory(&remote).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DirectoryAlreadyExists(_)));
        let err = access.create_directory(&path::combine(&root, "missing/child")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DirectoryNotFound(_)));
        // The root always exists and is never created.
        access.create_directory("/").await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_directory_exists_creates_ancestors() {
        let (_temp_dir, root, access) = setup();
        let nested = path::combine(&root, "a/b/c");
        access.ensure_directory_exists(&nested).await.unwrap();
        access.ensure_directory_exists(&nested).await.unwrap();
        assert!(access.directory_exists(&nested).await.unwrap());
    }

    #[tokio::test]
    async fn test_files() {
        let (_temp_dir, root, access) = setup();
        let file = path::combine(&root, "file.txt");
        access.create_file(&file).await.unwrap();
        assert!(access.file_exists(&file).await.unwrap());
        assert!(!access.directory_exists(&file).await.unwrap());
        let err = access.create_file(&file).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::FileAlreadyExists(_)));

        access.write_to_file(&file, "first").await.unwrap();
        access.append_to_file(&file, "\nsecond").await.unwrap();
        assert_eq!(access.read_file(&file).await.unwrap(), "first\nsecond");
        access.write_to_file(&file, "replaced").await.unwrap();
        assert_eq!(access.read_file(&file).await.unwrap(), "replaced");

        access.delete_file(&file).await.unwrap();
        let err = access.delete_file(&file).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::FileNotFound(_)));
        let err = access.read_file(&file).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_write_without_parent() {
        let (_temp_dir, root, access) = setup();
        let orphan = path::combine(&root, "nowhere/file.txt");
        let err = access.write_to_file(&orphan, "text").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DirectoryNotFound(_)));
        let err = access.append_to_file(&orphan, "text").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DirectoryNotFound(_)));
        let err = access.create_file(&orphan).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DirectoryNotFound(_)));
    }

    #[tokio::test]
    async fn test_type_mismatches() {
        let (_temp_dir, root, access) = setup();
        let file = path::combine(&root, "file.txt");
        access.write_to_file(&file, "x").await.unwrap();
        let err = access.create_directory(&file).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotDirectory(_)));
        let err = access.delete_directory(&file).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotDirectory(_)));
        let err = access.delete_file(&root).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFile(_)));
        let err = access.list_directory(&file).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotDirectory(_)));
    }

    #[tokio::test]
    async fn test_copy_file() {
        let (_temp_dir, root, access) = setup();
        let source = path::combine(&root, "source.txt");
        access.write_to_file(&source, "payload").await.unwrap();
        set_modified(&source, datetime!(2020-02-02 20:20:20 UTC)).await.unwrap();

        let destination = path::combine(&root, "Remote/deep/copy.txt");
        access.copy_file(&source, &destination, false).await.unwrap();
        assert_eq!(access.read_file(&destination).await.unwrap(), "payload");
        let copied = access.list_directory(&path::parent(&destination)).await.unwrap();
        assert_eq!(copied.files[0].timestamp, datetime!(2020-02-02 20:20:20 UTC));

        let err = access.copy_file(&source, &destination, false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::FileAlreadyExists(_)));
        access.write_to_file(&source, "changed").await.unwrap();
        access.copy_file(&source, &destination, true).await.unwrap();
        assert_eq!(access.read_file(&destination).await.unwrap(), "changed");

        let missing = path::combine(&root, "missing.txt");
        let err = access.restore_file(&missing, &destination, true).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::FileNotFound(p) if p == &missing));
    }

    #[tokio::test]
    async fn test_list_directory() {
        let (_temp_dir, root, access) = setup();
        access.ensure_directory_exists(&path::combine(&root, "b_dir")).await.unwrap();
        access.ensure_directory_exists(&path::combine(&root, "a_dir")).await.unwrap();
        access.write_to_file(&path::combine(&root, "z.txt"), "z").await.unwrap();
        access.write_to_file(&path::combine(&root, "y.txt"), "y").await.unwrap();

        let listing = access.list_directory(&root).await.unwrap();
        assert_eq!(listing.directories, vec![path::combine(&root, "a_dir"), path::combine(&root, "b_dir")]);
        let names: Vec<_> = listing.files.iter().map(|f| f.relative_path()).collect();
        assert_eq!(names, vec!["y.txt", "z.txt"]);
        assert!(listing.files.iter().all(|f| f.root() == root));

        let err = access.list_directory(&path::combine(&root, "missing")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DirectoryNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_directory_recursive() {
        let (_temp_dir, root, access) = setup();
        let remote = path::combine(&root, "Remote");
        access.ensure_directory_exists(&path::combine(&remote, "x/y")).await.unwrap();
        access.write_to_file(&path::combine(&remote, "x/y/f.txt"), "f").await.unwrap();
        access.write_to_file(&path::combine(&remote, "g.txt"), "g").await.unwrap();

        access.ensure_directory_empty(&remote).await.unwrap();
        let listing = access.list_directory(&remote).await.unwrap();
        assert!(listing.directories.is_empty() && listing.files.is_empty());

        access.ensure_directory_exists(&path::combine(&remote, "x")).await.unwrap();
        access.delete_directory(&remote).await.unwrap();
        assert!(!access.directory_exists(&remote).await.unwrap());
        let err = access.delete_directory(&remote).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DirectoryNotFound(_)));
        access.delete_directory("/").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_directory_skips_symlinked_directories() {
        let (_temp_dir, root, access) = setup();
        let looped = path::combine(&root, "looped");
        access.ensure_directory_exists(&looped).await.unwrap();
        access.write_to_file(&path::combine(&looped, "f.txt"), "f").await.unwrap();
        std::os::unix::fs::symlink(&looped, path::combine(&looped, "self")).unwrap();
        std::os::unix::fs::symlink(path::combine(&looped, "f.txt"), path::combine(&looped, "link.txt")).unwrap();

        let listing = access.list_directory(&looped).await.unwrap();
        assert!(listing.directories.is_empty());
        let names: Vec<_> = listing.files.iter().map(|f| f.relative_path()).collect();
        assert_eq!(names, vec!["f.txt", "link.txt"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_directory_unlinks_symlinks() {
        let (_temp_dir, root, access) = setup();
        let outside = path::combine(&root, "outside");
        access.ensure_directory_exists(&outside).await.unwrap();
        access.write_to_file(&path::combine(&outside, "keep.txt"), "keep").await.unwrap();
        let remote = path::combine(&root, "Remote");
        access.ensure_directory_exists(&remote).await.unwrap();
        std::os::unix::fs::symlink(&outside, path::combine(&remote, "linked")).unwrap();

        access.delete_directory(&remote).await.unwrap();
        assert!(!access.directory_exists(&remote).await.unwrap());
        assert_eq!(access.read_file(&path::combine(&outside, "keep.txt")).await.unwrap(), "keep");
    }
}
