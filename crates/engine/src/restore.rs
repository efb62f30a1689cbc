//! Restoring a backup chain into a local directory.

use crate::Options;
use crate::error::{ErrorKind, Result};
use crate::files::{FileStore, Filter, Stores, collect_files};
use crate::history::{compare_versions, reconstruct};
use crate::model::BackupHistory;
use chainbak_storage::{AccessHandle, LocalAccess, StorageAccess};
use exn::ResultExt;
use tracing::instrument;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Files in the reconstructed state.
    pub tracked: usize,
    /// Files written to the destination.
    pub restored: usize,
}

/// Restores backups from one storage access to the local filesystem.
pub struct RestoreManager {
    stores: Stores,
    local: LocalAccess,
    options: Options,
}

impl RestoreManager {
    pub fn new(access: AccessHandle, options: Options) -> Self {
        Self { stores: Stores::new(access, &options), local: LocalAccess::default(), options }
    }

    /// Bring `destination` up to the newest state of `backups`.
    ///
    /// Only files missing locally or whose local timestamp differs are
    /// written, so running the same restore twice writes nothing the second
    /// time. Local files the chain doesn't know about are left alone.
    #[instrument(skip(self, backups), fields(backups = backups.len()))]
    pub async fn restore(&self, backups: &[BackupHistory], destination: &str) -> Result<RestoreReport> {
        self.local.ensure_directory_exists(destination).await.or_raise(|| ErrorKind::Storage)?;
        let history = reconstruct(backups, &self.stores, &self.options.names).await?;
        let existing = collect_files(&self.local, destination, &Filter::default()).await?;
        let compared = compare_versions(&history, &existing, self.options.tolerance);

        let (compressed, plain): (Vec<_>, Vec<_>) = compared.new_or_changed.into_iter().partition(|file| file.compressed);
        let mut restored = 0;
        if !plain.is_empty() {
            restored += self.stores.plain.restore_files(&plain, destination).await?;
        }
        if !compressed.is_empty() {
            restored += self.stores.compressed.restore_files(&compressed, destination).await?;
        }
        tracing::info!(tracked = history.len(), restored, "Restore complete");
        Ok(RestoreReport { tracked: history.len(), restored })
    }
}
