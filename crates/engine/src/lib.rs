//! Backup chains over any [`StorageAccess`](chainbak_storage::StorageAccess).
//!
//! A chain starts with a full backup and grows with incremental backups
//! (changes since the reconstructed chain) or differential backups (changes
//! since one base). Each backup is plain (a directory tree) or compressed
//! (one archive plus a manifest). Restore folds the chain back into the
//! newest version of every file and copies over whatever differs locally.

pub mod backup;
pub mod error;
pub mod files;
pub mod history;
mod model;
pub mod restore;

pub use crate::backup::{BackupManager, BackupReport};
pub use crate::files::Filter;
pub use crate::model::{BackupHistory, ComparedHistory};
pub use crate::restore::{RestoreManager, RestoreReport};
use chainbak_archive::Compression;
use time::Duration;

/// File names of the metadata artifacts written next to each backup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactNames {
    /// Deletion log of an incremental or differential backup.
    pub deleted_files: String,
    /// Manifest of a compressed backup.
    pub file_structure: String,
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self { deleted_files: "DeletedFilesInfo".to_string(), file_structure: "FileStructureInfo".to_string() }
    }
}

/// Engine-wide settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    /// Two timestamps further apart than this count as a change.
    pub tolerance: Duration,
    pub names: ArtifactNames,
    /// Entry compression used when a backup is compressed.
    pub compression: Compression,
}

impl Default for Options {
    fn default() -> Self {
        Self { tolerance: Duration::SECOND, names: ArtifactNames::default(), compression: Compression::default() }
    }
}
