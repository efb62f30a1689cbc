//! Tracked file identity and directory snapshots.
//!
//! A [`FileHistory`] is identified across backups by its relative path: the
//! same logical file lives under a different root in every backup
//! destination, so `path` is always `root + relative path`.

use crate::error::{ErrorKind, Result};
use crate::path;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// One tracked file: where it is, what it's relative to, and when it changed.
///
/// # Examples
///
/// ```
/// use chainbak_storage::FileHistory;
/// use time::macros::datetime;
///
/// let mut file = FileHistory::from_relative("/backup/full", "docs/a.txt", datetime!(2024-01-02 03:04:05 UTC));
/// assert_eq!(file.path(), "/backup/full/docs/a.txt");
///
/// // Logical re-root: the physical path stays, the relative path changes.
/// file.set_root("/backup");
/// assert_eq!(file.relative_path(), "full/docs/a.txt");
///
/// // Rebase: the relative path stays, the physical path moves.
/// file.rebase("/restore");
/// assert_eq!(file.path(), "/restore/full/docs/a.txt");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHistory {
    root: String,
    path: String,
    /// Last modification time, always UTC.
    pub timestamp: OffsetDateTime,
    /// Captured from a compressed backup (the root is then the archive path).
    pub compressed: bool,
}

impl FileHistory {
    /// Create an entry for an absolute `path` under `root`.
    pub fn new(root: impl AsRef<str>, path: impl AsRef<str>, timestamp: OffsetDateTime) -> Self {
        Self {
            root: path::normalize(root.as_ref()),
            path: path::normalize(path.as_ref()),
            timestamp: timestamp.to_offset(UtcOffset::UTC),
            compressed: false,
        }
    }

    /// Create an entry from a root and a path relative to it.
    pub fn from_relative(root: impl AsRef<str>, relative: impl AsRef<str>, timestamp: OffsetDateTime) -> Self {
        let root = root.as_ref();
        Self::new(root, path::combine(root, relative.as_ref()), timestamp)
    }

    #[must_use]
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path with the root prefix stripped; the cross-backup identity key.
    pub fn relative_path(&self) -> String {
        path::relative_path(&self.root, &self.path)
    }

    /// Point this entry at a new relative path under the current root.
    pub fn set_relative_path(&mut self, relative: impl AsRef<str>) {
        self.path = path::combine(&self.root, relative.as_ref());
    }

    /// Move the entry under a new root, keeping its relative path.
    pub fn rebase(&mut self, root: impl AsRef<str>) {
        let relative = self.relative_path();
        self.root = path::normalize(root.as_ref());
        self.path = path::combine(&self.root, &relative);
    }

    /// Change the root used for relative-path computation only.
    pub fn set_root(&mut self, root: impl AsRef<str>) {
        self.root = path::normalize(root.as_ref());
    }

    /// Serialize as a log line: `"relative/path":"timestamp"`.
    ///
    /// The timestamp is RFC 3339 in UTC with full sub-second precision, so
    /// [`deserialize`](Self::deserialize) gives back the exact same instant.
    pub fn serialize(&self) -> Result<String> {
        let timestamp = self
            .timestamp
            .format(&Rfc3339)
            .map_err(|e| ErrorKind::InvalidRecord(format!("{}: {e}", self.path)))?;
        Ok(format!("\"{}\":\"{}\"", self.relative_path(), timestamp))
    }

    /// Parse a log line, treating the stored path as relative to `root`.
    pub fn deserialize(line: &str, root: &str) -> Result<Self> {
        Self::deserialize_with(line, root, true)
    }

    /// Parse a log line. When `relative` is false the stored path is taken
    /// as absolute and `root` is only attached.
    ///
    /// A line starting with a quoted drive letter (`"C:`) keeps the drive as
    /// part of the path instead of splitting on its colon.
    pub fn deserialize_with(line: &str, root: &str, relative: bool) -> Result<Self> {
        let line = line.trim();
        let Some((name, timestamp)) = split_record(line) else {
            exn::bail!(ErrorKind::InvalidRecord(line.to_string()));
        };
        let timestamp = parse_timestamp(timestamp).ok_or_else(|| ErrorKind::InvalidRecord(line.to_string()))?;
        Ok(match relative {
            true => Self::from_relative(root, name, timestamp),
            false => Self::new(root, name, timestamp),
        })
    }
}

/// Split a record into its name and timestamp fields.
///
/// Fully quoted records split on the last `":"`, which a timestamp never
/// contains, so names may carry colons of their own. Anything else splits on
/// the first colon after an optional drive letter.
fn split_record(line: &str) -> Option<(&str, &str)> {
    if let Some(inner) = line.strip_prefix('"').and_then(|l| l.strip_suffix('"'))
        && let Some(fields) = inner.rsplit_once("\":\"")
    {
        return Some(fields);
    }
    let prefix = if has_drive_prefix(line) { 3 } else { 0 };
    let (head, tail) = line[prefix..].split_once(':')?;
    Some((line[..prefix + head.len()].trim_matches('"'), tail.trim_matches('"')))
}

fn has_drive_prefix(line: &str) -> bool {
    let bytes = line.as_bytes();
    bytes.len() >= 3 && bytes[0] == b'"' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':'
}

/// RFC 3339 first, then the legacy invariant-culture `MM/dd/yyyy HH:mm:ss`
/// written by older catalogs (assumed UTC).
fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed.to_offset(UtcOffset::UTC));
    }
    let legacy = format_description!("[month]/[day]/[year] [hour]:[minute]:[second]");
    PrimitiveDateTime::parse(value, legacy).ok().map(PrimitiveDateTime::assume_utc)
}

/// Snapshot of one directory's immediate children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    pub path: String,
    /// Child directory paths, in listing order
    pub directories: Vec<String>,
    /// Child files, each rooted at `path`
    pub files: Vec<FileHistory>,
}

impl Directory {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self { path: path::normalize(path.as_ref()), ..Self::default() }
    }
}
