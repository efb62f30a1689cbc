use super::{FileStore, Filter, collect_files};
use crate::ArtifactNames;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use chainbak_storage::{AccessHandle, FileHistory, StorageAccess, path, set_modified};
use exn::ResultExt;
use tracing::instrument;

/// Backups stored as a directory tree mirroring the source.
pub struct PlainFileStore {
    access: AccessHandle,
    names: ArtifactNames,
}

impl PlainFileStore {
    pub fn new(access: AccessHandle, names: ArtifactNames) -> Self {
        Self { access, names }
    }
}

#[async_trait]
impl FileStore for PlainFileStore {
    fn access(&self) -> &dyn StorageAccess {
        self.access.as_ref()
    }

    fn compressed(&self) -> bool {
        false
    }

    #[instrument(skip_all, fields(access = %self.access.name(), %destination, count = files.len()))]
    async fn copy_files(&self, files: &[FileHistory], destination: &str) -> Result<usize> {
        for file in files {
            let target = path::combine(destination, &file.relative_path());
            self.access.copy_file(file.path(), &target, false).await.or_raise(|| ErrorKind::Storage)?;
            tracing::trace!(source = file.path(), target, "Copied file");
        }
        Ok(files.len())
    }

    #[instrument(skip_all, fields(access = %self.access.name(), %destination, count = files.len()))]
    async fn restore_files(&self, files: &[FileHistory], destination: &str) -> Result<usize> {
        for file in files {
            let target = path::combine(destination, &file.relative_path());
            self.access.restore_file(file.path(), &target, true).await.or_raise(|| ErrorKind::Storage)?;
            set_modified(&target, file.timestamp).await.or_raise(|| ErrorKind::Storage)?;
            tracing::trace!(source = file.path(), target, "Restored file");
        }
        Ok(files.len())
    }

    async fn search_backed_up_files(&self, destination: &str, filter: &Filter) -> Result<Vec<FileHistory>> {
        collect_files(self.access.as_ref(), destination, filter).await
    }

    fn deletion_log_path(&self, destination: &str) -> String {
        path::combine(destination, &self.names.deleted_files)
    }

    async fn delete_backup(&self, destination: &str) -> Result<()> {
        self.access.delete_directory(destination).await.or_raise(|| ErrorKind::Storage)
    }
}
