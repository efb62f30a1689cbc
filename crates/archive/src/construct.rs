use crate::Compression;
use crate::error::{Error, ErrorKind};
use std::path::Path;
use std::str::FromStr;

impl FromStr for Compression {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "store" | "stored" => Ok(Compression::Stored),
            "deflate" | "deflated" | "zip" => Ok(Compression::Deflate),
            "bz2" | "bzip2" => Ok(Compression::Bzip2),
            #[cfg(feature = "zstd")]
            "zst" | "zstd" => Ok(Compression::Zstd),
            #[cfg(not(feature = "zstd"))]
            "zst" | "zstd" => exn::bail!(ErrorKind::DisabledFormat(s.to_string())),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

impl Compression {
    /// Archive path for a backup destination: `.zip` is appended unless the
    /// destination already ends with it.
    ///
    /// ```
    /// use chainbak_archive::Compression;
    ///
    /// assert_eq!(Compression::archive_path("/backups/2024-01-01"), "/backups/2024-01-01.zip");
    /// assert_eq!(Compression::archive_path("/backups/monday.ZIP"), "/backups/monday.ZIP");
    /// ```
    #[must_use]
    pub fn archive_path(destination: &str) -> String {
        let has_extension = Path::new(destination)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        match has_extension {
            true => destination.to_string(),
            false => format!("{destination}.zip"),
        }
    }
}
