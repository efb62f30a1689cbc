//! Creating and deleting backups.

use crate::Options;
use crate::error::{ErrorKind, Result};
use crate::files::{FileStore, Filter, Stores, collect_files};
use crate::history::{compare_versions, reconstruct};
use crate::model::BackupHistory;
use chainbak_storage::{AccessHandle, FileHistory, LocalAccess};
use exn::ResultExt;
use time::OffsetDateTime;
use tracing::instrument;

/// What a backup run did; `backup` is ready to be recorded in a catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupReport {
    pub backup: BackupHistory,
    pub copied: usize,
    pub deleted: usize,
}

/// Runs backups of a local source into one storage access.
pub struct BackupManager {
    stores: Stores,
    local: LocalAccess,
    options: Options,
}

impl BackupManager {
    pub fn new(access: AccessHandle, options: Options) -> Self {
        Self { stores: Stores::new(access, &options), local: LocalAccess::default(), options }
    }

    async fn source_files(&self, source: &str, filter: &Filter) -> Result<Vec<FileHistory>> {
        collect_files(&self.local, source, filter).await
    }

    /// Plain backups need their directory up front; compressed ones only
    /// need the archive's parent, which the upload creates.
    async fn prepare(store: &dyn FileStore, destination: &str) -> Result<()> {
        if !store.compressed() {
            store.access().ensure_directory_exists(destination).await.or_raise(|| ErrorKind::Storage)?;
        }
        Ok(())
    }

    fn report(source: &str, destination: &str, started: OffsetDateTime, compressed: bool) -> BackupReport {
        BackupReport {
            backup: BackupHistory {
                source: source.to_string(),
                destination: destination.to_string(),
                utc_start: started,
                utc_end: OffsetDateTime::now_utc(),
                compressed,
            },
            copied: 0,
            deleted: 0,
        }
    }

    /// Copy every file under `source` that passes `filter`.
    #[instrument(skip(self, filter))]
    pub async fn full_backup(
        &self,
        source: &str,
        destination: &str,
        filter: &Filter,
        compress: bool,
    ) -> Result<BackupReport> {
        let started = OffsetDateTime::now_utc();
        let store = self.stores.get(compress);
        let files = self.source_files(source, filter).await?;
        Self::prepare(store, destination).await?;
        let copied = store.copy_files(&files, destination).await?;
        tracing::info!(copied, "Full backup complete");
        Ok(BackupReport { copied, ..Self::report(source, destination, started, compress) })
    }

    /// Copy what changed since the state reconstructed from the whole chain
    /// in `previous`, and log what disappeared.
    #[instrument(skip(self, previous, filter), fields(previous = previous.len()))]
    pub async fn incremental_backup(
        &self,
        source: &str,
        destination: &str,
        previous: &[BackupHistory],
        filter: &Filter,
        compress: bool,
    ) -> Result<BackupReport> {
        let started = OffsetDateTime::now_utc();
        let history = reconstruct(previous, &self.stores, &self.options.names).await?;
        self.copy_changes(source, destination, &history, filter, compress, started).await
    }

    /// Copy what changed since the single `base` backup, and log what
    /// disappeared.
    #[instrument(skip(self, base, filter), fields(base = %base.destination))]
    pub async fn differential_backup(
        &self,
        source: &str,
        destination: &str,
        base: &BackupHistory,
        filter: &Filter,
        compress: bool,
    ) -> Result<BackupReport> {
        let started = OffsetDateTime::now_utc();
        let history = reconstruct(std::slice::from_ref(base), &self.stores, &self.options.names).await?;
        self.copy_changes(source, destination, &history, filter, compress, started).await
    }

    async fn copy_changes(
        &self,
        source: &str,
        destination: &str,
        history: &[FileHistory],
        filter: &Filter,
        compress: bool,
        started: OffsetDateTime,
    ) -> Result<BackupReport> {
        let store = self.stores.get(compress);
        let files = self.source_files(source, filter).await?;
        let compared = compare_versions(&files, history, self.options.tolerance);
        Self::prepare(store, destination).await?;
        let copied = store.copy_files(&compared.new_or_changed, destination).await?;
        store.write_deletion_log(destination, &compared.deleted).await?;
        let deleted = compared.deleted.len();
        tracing::info!(copied, deleted, "Backup complete");
        Ok(BackupReport { copied, deleted, ..Self::report(source, destination, started, compress) })
    }

    /// Remove one backup and its artifacts.
    #[instrument(skip(self, backup), fields(destination = %backup.destination, compressed = backup.compressed))]
    pub async fn delete(&self, backup: &BackupHistory) -> Result<()> {
        self.stores.get(backup.compressed).delete_backup(&backup.destination).await
    }

    /// Remove several backups, stopping at the first failure.
    pub async fn delete_all(&self, backups: &[BackupHistory]) -> Result<()> {
        for backup in backups {
            self.delete(backup).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainbak_storage::{MockAccess, StorageAccess, path, set_modified};
    use std::sync::Arc;
    use tempfile::TempDir;
    use time::Duration;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-01-01 00:00:00 UTC);

    struct Source {
        dir: TempDir,
        root: String,
    }

    impl Source {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_string_lossy().to_string();
            Self { dir, root }
        }

        async fn write(&self, relative: &str, text: &str, seconds: i64) {
            let target = self.dir.path().join(relative);
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(&target, text).unwrap();
            set_modified(&path::combine(&self.root, relative), T0 + Duration::seconds(seconds)).await.unwrap();
        }

        fn remove(&self, relative: &str) {
            std::fs::remove_file(self.dir.path().join(relative)).unwrap();
        }
    }

    fn manager(access: &Arc<MockAccess>) -> BackupManager {
        BackupManager::new(access.clone(), Options::default())
    }

    #[tokio::test]
    async fn test_full_then_incremental() {
        let source = Source::new();
        source.write("a.txt", "alpha", 100).await;
        source.write("b.txt", "bravo", 100).await;
        let access = Arc::new(MockAccess::default());
        let manager = manager(&access);

        let full = manager.full_backup(&source.root, "/backup/full", &Filter::default(), false).await.unwrap();
        assert_eq!(full.copied, 2);
        assert!(!full.backup.compressed);
        assert!(full.backup.utc_start <= full.backup.utc_end);

        source.write("a.txt", "alpha v2", 200).await;
        source.remove("b.txt");
        let inc = manager
            .incremental_backup(&source.root, "/backup/inc", &[full.backup], &Filter::default(), false)
            .await
            .unwrap();
        assert_eq!((inc.copied, inc.deleted), (1, 1));
        assert_eq!(access.read_file("/backup/inc/a.txt").await.unwrap(), "alpha v2");
        assert_eq!(access.read_file("/backup/inc/DeletedFilesInfo").await.unwrap(), "\"b.txt\":\"2024-01-01T00:01:40Z\"\n");
    }

    #[tokio::test]
    async fn test_unchanged_source_copies_nothing() {
        let source = Source::new();
        source.write("a.txt", "alpha", 100).await;
        let access = Arc::new(MockAccess::default());
        let manager = manager(&access);
        let full = manager.full_backup(&source.root, "/backup/full", &Filter::default(), false).await.unwrap();

        let inc = manager
            .incremental_backup(&source.root, "/backup/inc", &[full.backup], &Filter::default(), false)
            .await
            .unwrap();
        assert_eq!((inc.copied, inc.deleted), (0, 0));
        // The backup directory and its (empty) log still exist.
        assert_eq!(access.read_file("/backup/inc/DeletedFilesInfo").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_differential_compares_against_base_only() {
        let source = Source::new();
        source.write("a.txt", "alpha", 100).await;
        let access = Arc::new(MockAccess::default());
        let manager = manager(&access);
        let full = manager.full_backup(&source.root, "/backup/full", &Filter::default(), false).await.unwrap();

        source.write("b.txt", "bravo", 150).await;
        manager
            .differential_backup(&source.root, "/backup/diff1", &full.backup, &Filter::default(), false)
            .await
            .unwrap();
        source.write("c.txt", "charlie", 160).await;
        let second = manager
            .differential_backup(&source.root, "/backup/diff2", &full.backup, &Filter::default(), false)
            .await
            .unwrap();
        assert_eq!(second.copied, 2);
        assert!(access.file_exists("/backup/diff2/b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_compressed_full_backup() {
        let source = Source::new();
        source.write("docs/a.txt", "alpha", 100).await;
        let access = Arc::new(MockAccess::default());
        let report = manager(&access).full_backup(&source.root, "/backup/full", &Filter::default(), true).await.unwrap();
        assert!(report.backup.compressed);
        assert!(access.file_exists("/backup/full.zip").await.unwrap());
        assert!(!access.directory_exists("/backup/full").await.unwrap());
    }

    #[tokio::test]
    async fn test_filter_limits_source() {
        let source = Source::new();
        source.write("a.txt", "alpha", 100).await;
        source.write("b.log", "log", 100).await;
        source.write("tmp/c.txt", "tmp", 100).await;
        let access = Arc::new(MockAccess::default());
        let filter = Filter::new(r"\.txt$", "^[^t]").unwrap();
        let report = manager(&access).full_backup(&source.root, "/backup/full", &filter, false).await.unwrap();
        assert_eq!(report.copied, 1);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let source = Source::new();
        source.write("a.txt", "alpha", 100).await;
        let access = Arc::new(MockAccess::default());
        let manager = manager(&access);
        let plain = manager.full_backup(&source.root, "/backup/plain", &Filter::default(), false).await.unwrap();
        let packed = manager.full_backup(&source.root, "/backup/packed", &Filter::default(), true).await.unwrap();

        manager.delete_all(&[plain.backup, packed.backup]).await.unwrap();
        assert_eq!(access.paths().await, vec!["/".to_string(), "/backup".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let access = Arc::new(MockAccess::default());
        let err =
            manager(&access).full_backup("/definitely/missing", "/backup/full", &Filter::default(), false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage));
    }
}
