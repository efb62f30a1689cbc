use super::{FileStore, Filter};
use crate::ArtifactNames;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use chainbak_archive::{ArchiveReader, ArchiveWriter, Compression};
use chainbak_storage::{AccessHandle, FileHistory, StorageAccess, path};
use exn::ResultExt;
use std::collections::BTreeMap;
use std::fs::File;
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::instrument;

/// Backups stored as one archive per backup.
///
/// For a destination `D` the archive lives at `D.zip`, its manifest at
/// `D.zip_FileStructureInfo` and its deletion log at `D.zip_DeletedFilesInfo`
/// (sidecar names come from [`ArtifactNames`]). Archive entry timestamps are
/// not trusted; the manifest holds the source timestamps.
pub struct CompressedFileStore {
    access: AccessHandle,
    names: ArtifactNames,
    compression: Compression,
}

impl CompressedFileStore {
    pub fn new(access: AccessHandle, names: ArtifactNames, compression: Compression) -> Self {
        Self { access, names, compression }
    }

    fn manifest_path(&self, archive: &str) -> String {
        format!("{archive}_{}", self.names.file_structure)
    }

    /// Pack local files into a temporary archive, off the async runtime.
    async fn pack(&self, files: &[FileHistory]) -> Result<tempfile::TempPath> {
        let (file, temp) = NamedTempFile::new().or_raise(|| ErrorKind::Io)?.into_parts();
        let entries = files.iter().map(|f| (f.relative_path(), f.path().to_string())).collect::<Vec<_>>();
        let compression = self.compression;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut writer = ArchiveWriter::create(file, compression);
            for (entry, source) in &entries {
                writer.add_file(entry, source).or_raise(|| ErrorKind::Archive)?;
            }
            writer.finish().or_raise(|| ErrorKind::Archive)?;
            Ok(())
        })
        .await
        .or_raise(|| ErrorKind::Task)??;
        Ok(temp)
    }
}

/// Extract `files` from a downloaded archive, stamping each with its
/// recorded timestamp.
fn unpack(archive: &std::path::Path, files: &[(String, String, SystemTime)]) -> Result<()> {
    let mut reader = ArchiveReader::open_path(archive).or_raise(|| ErrorKind::Archive)?;
    for (entry, target, modified) in files {
        if !reader.contains(entry) {
            exn::bail!(ErrorKind::ArchiveEntryMissing(entry.clone()));
        }
        reader.extract_to(entry, target).or_raise(|| ErrorKind::Archive)?;
        File::options()
            .write(true)
            .open(target)
            .and_then(|file| file.set_modified(*modified))
            .or_raise(|| ErrorKind::Io)?;
    }
    Ok(())
}

#[async_trait]
impl FileStore for CompressedFileStore {
    fn access(&self) -> &dyn StorageAccess {
        self.access.as_ref()
    }

    fn compressed(&self) -> bool {
        true
    }

    /// Always produces an archive and a manifest, even for zero files, so an
    /// empty incremental still shows up in the chain.
    #[instrument(skip_all, fields(access = %self.access.name(), %destination, count = files.len()))]
    async fn copy_files(&self, files: &[FileHistory], destination: &str) -> Result<usize> {
        let archive = Compression::archive_path(destination);
        let mut manifest = String::new();
        for file in files {
            manifest.push_str(&file.serialize().or_raise(|| ErrorKind::Record)?);
            manifest.push('\n');
        }
        let temp = self.pack(files).await?;
        let local = temp.to_string_lossy();
        self.access.copy_file(&local, &archive, false).await.or_raise(|| ErrorKind::Storage)?;
        self.access.write_to_file(&self.manifest_path(&archive), &manifest).await.or_raise(|| ErrorKind::Storage)?;
        tracing::debug!(archive, compression = %self.compression, "Uploaded archive");
        Ok(files.len())
    }

    /// Entries are grouped by archive (their root), so each archive is
    /// downloaded once.
    #[instrument(skip_all, fields(access = %self.access.name(), %destination, count = files.len()))]
    async fn restore_files(&self, files: &[FileHistory], destination: &str) -> Result<usize> {
        let mut by_archive: BTreeMap<&str, Vec<&FileHistory>> = BTreeMap::new();
        for file in files {
            by_archive.entry(file.root()).or_default().push(file);
        }
        for (archive, files) in by_archive {
            let temp = NamedTempFile::new().or_raise(|| ErrorKind::Io)?.into_temp_path();
            let local = temp.to_string_lossy().to_string();
            self.access.restore_file(archive, &local, true).await.or_raise(|| ErrorKind::Storage)?;
            let targets = files
                .iter()
                .map(|file| {
                    let relative = file.relative_path();
                    let target = path::combine(destination, &relative);
                    (relative, target, SystemTime::from(file.timestamp))
                })
                .collect::<Vec<_>>();
            tracing::debug!(archive, count = targets.len(), "Extracting from archive");
            tokio::task::spawn_blocking(move || unpack(&temp, &targets)).await.or_raise(|| ErrorKind::Task)??;
        }
        Ok(files.len())
    }

    /// Read the manifest; entries are rooted at the archive path.
    async fn search_backed_up_files(&self, destination: &str, filter: &Filter) -> Result<Vec<FileHistory>> {
        let archive = Compression::archive_path(destination);
        let manifest = self.access.read_file(&self.manifest_path(&archive)).await.or_raise(|| ErrorKind::Storage)?;
        let mut found = Vec::new();
        for line in manifest.lines().filter(|line| !line.trim().is_empty()) {
            let file = FileHistory::deserialize(line, &archive).or_raise(|| ErrorKind::Record)?;
            if filter.matches_relative(&file.relative_path()) {
                found.push(file.with_compressed(true));
            }
        }
        Ok(found)
    }

    fn deletion_log_path(&self, destination: &str) -> String {
        format!("{}_{}", Compression::archive_path(destination), self.names.deleted_files)
    }

    /// Removes the archive and both sidecars; a missing sidecar is fine.
    async fn delete_backup(&self, destination: &str) -> Result<()> {
        let archive = Compression::archive_path(destination);
        self.access.delete_file(&archive).await.or_raise(|| ErrorKind::Storage)?;
        for sidecar in [self.manifest_path(&archive), self.deletion_log_path(destination)] {
            match self.access.delete_file(&sidecar).await {
                Err(e) if !e.is_not_found() => return Err(e.raise(ErrorKind::Storage)),
                _ => {},
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::collect_files;
    use chainbak_storage::{LocalAccess, MockAccess, set_modified};
    use std::sync::Arc;
    use time::macros::datetime;

    async fn source() -> (tempfile::TempDir, Vec<FileHistory>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(dir.path().join("docs/b.txt"), "bravo").unwrap();
        let root = dir.path().to_string_lossy().to_string();
        set_modified(&path::combine(&root, "a.txt"), datetime!(2024-06-01 12:00:00 UTC)).await.unwrap();
        set_modified(&path::combine(&root, "docs/b.txt"), datetime!(2024-06-02 12:00:00 UTC)).await.unwrap();
        let files = collect_files(&LocalAccess::default(), &root, &Filter::default()).await.unwrap();
        (dir, files)
    }

    fn store(access: Arc<MockAccess>) -> CompressedFileStore {
        CompressedFileStore::new(access, ArtifactNames::default(), Compression::Deflate)
    }

    #[tokio::test]
    async fn test_copy_writes_archive_and_manifest() {
        let (_dir, files) = source().await;
        let access = Arc::new(MockAccess::default());
        assert_eq!(store(access.clone()).copy_files(&files, "/backup/full").await.unwrap(), 2);

        let paths = access.paths().await;
        assert!(paths.contains(&"/backup/full.zip".to_string()));
        let manifest = access.read_file("/backup/full.zip_FileStructureInfo").await.unwrap();
        assert!(manifest.contains("\"a.txt\":\"2024-06-01T12:00:00Z\""));
        assert!(manifest.contains("\"docs/b.txt\":\"2024-06-02T12:00:00Z\""));
    }

    #[tokio::test]
    async fn test_search_roots_entries_at_archive() {
        let (_dir, files) = source().await;
        let access = Arc::new(MockAccess::default());
        let store = store(access);
        store.copy_files(&files, "/backup/full").await.unwrap();

        let found = store.search_backed_up_files("/backup/full", &Filter::new(".*", "^docs$").unwrap()).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|file| file.compressed && file.root() == "/backup/full.zip"));

        let only_docs = store.search_backed_up_files("/backup/full", &Filter::new("^b", ".*").unwrap()).await.unwrap();
        assert_eq!(only_docs.len(), 1);
        assert_eq!(only_docs[0].path(), "/backup/full.zip/docs/b.txt");
    }

    #[tokio::test]
    async fn test_restore_extracts_with_recorded_timestamps() {
        let (_dir, files) = source().await;
        let access = Arc::new(MockAccess::default());
        let store = store(access);
        store.copy_files(&files, "/backup/full").await.unwrap();
        let backed_up = store.search_backed_up_files("/backup/full", &Filter::default()).await.unwrap();

        let target = tempfile::tempdir().unwrap();
        let target_root = target.path().to_string_lossy().to_string();
        assert_eq!(store.restore_files(&backed_up, &target_root).await.unwrap(), 2);
        assert_eq!(std::fs::read_to_string(target.path().join("docs/b.txt")).unwrap(), "bravo");
        let restored = collect_files(&LocalAccess::default(), &target_root, &Filter::default()).await.unwrap();
        let b = restored.iter().find(|file| file.relative_path() == "docs/b.txt").unwrap();
        assert_eq!(b.timestamp, datetime!(2024-06-02 12:00:00 UTC));
    }

    #[tokio::test]
    async fn test_restore_missing_entry() {
        let (_dir, files) = source().await;
        let access = Arc::new(MockAccess::default());
        let store = store(access);
        store.copy_files(&files, "/backup/full").await.unwrap();
        let ghost = FileHistory::from_relative("/backup/full.zip", "ghost.txt", datetime!(2024-01-01 0:00 UTC));

        let target = tempfile::tempdir().unwrap();
        let err = store.restore_files(&[ghost], &target.path().to_string_lossy()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ArchiveEntryMissing(entry) if entry == "ghost.txt"));
    }

    #[tokio::test]
    async fn test_delete_backup_removes_sidecars() {
        let (_dir, files) = source().await;
        let access = Arc::new(MockAccess::default());
        let store = store(access.clone());
        store.copy_files(&files, "/backup/inc").await.unwrap();
        store.write_deletion_log("/backup/inc", &[]).await.unwrap();
        assert!(access.file_exists("/backup/inc.zip_DeletedFilesInfo").await.unwrap());

        store.delete_backup("/backup/inc").await.unwrap();
        assert_eq!(access.paths().await, vec!["/".to_string(), "/backup".to_string()]);
    }
}
