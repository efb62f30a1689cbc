//! Finding, copying and restoring the files of a single backup.
//!
//! [`FileStore`] is implemented once per backup layout: [`PlainFileStore`]
//! mirrors the source tree under the destination directory, while
//! [`CompressedFileStore`] packs everything into one archive with a manifest
//! sidecar. Both share the deletion log format.

mod compressed;
mod plain;

pub use self::compressed::CompressedFileStore;
pub use self::plain::PlainFileStore;
use crate::Options;
use crate::error::{ErrorKind, Result};
use async_stream::stream;
use async_trait::async_trait;
use chainbak_storage::{AccessHandle, FileHistory, StorageAccess, path};
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use regex::Regex;
use std::sync::LazyLock;

static MATCH_ALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(".*").unwrap());

/// Regex filters applied while searching.
///
/// File patterns match the file name; directory patterns match each
/// directory name on the way down. Both are unanchored, so `.*` (the
/// default) keeps everything and `txt$` keeps names ending in `txt`.
#[derive(Clone, Debug)]
pub struct Filter {
    files: Regex,
    directories: Regex,
}

impl Filter {
    pub fn new(files: &str, directories: &str) -> Result<Self> {
        let compile = |pattern: &str| Regex::new(pattern).or_raise(|| ErrorKind::Pattern(pattern.to_string()));
        Ok(Self { files: compile(files)?, directories: compile(directories)? })
    }

    pub fn matches_file(&self, name: &str) -> bool {
        self.files.is_match(name)
    }

    pub fn matches_directory(&self, name: &str) -> bool {
        self.directories.is_match(name)
    }

    /// Apply both filters to a relative path: the file pattern to the last
    /// component and the directory pattern to every other non-empty one.
    pub fn matches_relative(&self, relative: &str) -> bool {
        let mut components = relative.split(path::SEPARATOR).filter(|c| !c.is_empty()).collect::<Vec<_>>();
        let Some(name) = components.pop() else {
            return false;
        };
        self.matches_file(name) && components.iter().all(|directory| self.matches_directory(directory))
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self { files: MATCH_ALL.clone(), directories: MATCH_ALL.clone() }
    }
}

/// Walk `root` depth-first, yielding every file that passes `filter`.
///
/// Each yielded entry is rooted at `root`, so its relative path includes the
/// directories walked through. Directories rejected by the filter are not
/// descended into. The walk stops at the first listing error.
pub fn search_for_files<'a>(
    access: &'a dyn StorageAccess,
    root: &'a str,
    filter: &'a Filter,
) -> impl Stream<Item = Result<FileHistory>> + Send + 'a {
    stream! {
        let mut pending = vec![path::normalize(root)];
        while let Some(current) = pending.pop() {
            let listing = match access.list_directory(&current).await {
                Ok(listing) => listing,
                Err(e) => {
                    yield Err(e.raise(ErrorKind::Storage));
                    return;
                },
            };
            for mut file in listing.files {
                if filter.matches_file(&path::file_name(file.path())) {
                    file.set_root(root);
                    yield Ok(file);
                }
            }
            // Reversed so the stack pops directories in listing order.
            for directory in listing.directories.into_iter().rev() {
                if filter.matches_directory(&path::file_name(&directory)) {
                    pending.push(directory);
                }
            }
        }
    }
}

/// Collect [`search_for_files`] into a vector.
pub async fn collect_files(access: &dyn StorageAccess, root: &str, filter: &Filter) -> Result<Vec<FileHistory>> {
    search_for_files(access, root, filter).try_collect().await
}

/// One backup layout on a storage access.
#[async_trait]
pub trait FileStore: Send + Sync {
    fn access(&self) -> &dyn StorageAccess;

    /// Whether backups written by this store are compressed.
    fn compressed(&self) -> bool;

    /// Copy local `files` into the backup at `destination`, keyed by their
    /// relative paths. Returns how many files were stored.
    async fn copy_files(&self, files: &[FileHistory], destination: &str) -> Result<usize>;

    /// Restore backed-up `files` under the local `destination`, overwriting
    /// and stamping each with its recorded timestamp.
    async fn restore_files(&self, files: &[FileHistory], destination: &str) -> Result<usize>;

    /// Every file held by the backup at `destination`, rooted so that
    /// relative paths match the source.
    async fn search_backed_up_files(&self, destination: &str, filter: &Filter) -> Result<Vec<FileHistory>>;

    /// Where the deletion log of the backup at `destination` lives.
    fn deletion_log_path(&self, destination: &str) -> String;

    /// Remove the backup at `destination` with all its artifacts.
    async fn delete_backup(&self, destination: &str) -> Result<()>;

    /// Record files deleted since the previous state, one line per file.
    async fn write_deletion_log(&self, destination: &str, files: &[FileHistory]) -> Result<()> {
        let mut text = String::new();
        for file in files {
            text.push_str(&file.serialize().or_raise(|| ErrorKind::Record)?);
            text.push('\n');
        }
        let log = self.deletion_log_path(destination);
        self.access().write_to_file(&log, &text).await.or_raise(|| ErrorKind::Storage)?;
        tracing::debug!(log, count = files.len(), "Wrote deletion log");
        Ok(())
    }

    /// Files recorded as deleted by the backup at `destination`.
    ///
    /// A backup without a deletion log (a full backup) deleted nothing.
    async fn deleted_files(&self, destination: &str) -> Result<Vec<FileHistory>> {
        let log = self.deletion_log_path(destination);
        let text = match self.access().read_file(&log).await {
            Ok(text) => text,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.raise(ErrorKind::Storage)),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| FileHistory::deserialize(line, destination).or_raise(|| ErrorKind::Record))
            .collect()
    }
}

/// Both backup layouts over the same access.
pub struct Stores {
    pub plain: PlainFileStore,
    pub compressed: CompressedFileStore,
}

impl Stores {
    pub fn new(access: AccessHandle, options: &Options) -> Self {
        Self {
            plain: PlainFileStore::new(access.clone(), options.names.clone()),
            compressed: CompressedFileStore::new(access, options.names.clone(), options.compression),
        }
    }

    pub fn get(&self, compressed: bool) -> &dyn FileStore {
        match compressed {
            true => &self.compressed,
            false => &self.plain,
        }
    }
}
