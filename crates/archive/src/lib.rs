//! Archive packing and extraction for compressed backups.
//!
//! A compressed backup is a single zip archive whose entries are keyed by
//! relative path. This crate provides:
//!
//! - **Packing** via [`ArchiveWriter`]: add entries from files or memory,
//!   then finish the archive
//! - **Extraction** via [`ArchiveReader`]: list entries, extract one entry to
//!   a file or read it into memory
//! - **Entry compression** selection via the [`Compression`] enum
//!
//! Stored, Deflate and Bzip2 are always available; Zstd is behind the `zstd`
//! feature. Entry timestamps inside the archive are not authoritative; the
//! backup engine keeps a separate manifest for those.

mod archive;
#[cfg(feature = "cli")]
pub mod cli;
mod construct;
pub mod error;
mod util;

pub use crate::archive::{ArchiveReader, ArchiveWriter};

/// Compression method for archive entries.
///
/// Variants gated behind feature flags (`zstd`) are only available when the
/// corresponding feature is enabled. Defaults to [`Deflate`](Self::Deflate).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// No compression
    Stored,
    /// Deflate, readable by every zip tool
    #[default]
    Deflate,
    /// Bzip2
    Bzip2,
    /// Zstd
    #[cfg(feature = "zstd")]
    Zstd,
}

#[cfg(test)]
mod tests {
    use crate::Compression;

    #[test]
    fn compression_default() {
        assert_eq!(Compression::default(), Compression::Deflate);
    }
}
