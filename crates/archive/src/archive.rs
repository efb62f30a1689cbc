//! Zip-backed archive writer and reader.

use crate::Compression;
use crate::error::{ErrorKind, Result, raise};
use exn::ResultExt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::Path;
use tracing::instrument;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Entry names always use `/` and never start with one.
fn entry_name(entry: &str) -> String {
    entry.replace('\\', "/").trim_start_matches('/').to_string()
}

/// Packs entries into a new archive.
///
/// # Examples
///
/// ```
/// use chainbak_archive::{ArchiveReader, ArchiveWriter, Compression};
/// use std::io::Cursor;
///
/// let mut writer = ArchiveWriter::create(Cursor::new(Vec::new()), Compression::Deflate);
/// writer.add_bytes("docs/readme.txt", b"hello").unwrap();
/// let buffer = writer.finish().unwrap();
///
/// let mut reader = ArchiveReader::open(buffer).unwrap();
/// assert_eq!(reader.entries(), vec!["docs/readme.txt".to_string()]);
/// assert_eq!(reader.read_entry("docs/readme.txt").unwrap(), b"hello");
/// ```
pub struct ArchiveWriter<W: Write + Seek> {
    inner: ZipWriter<W>,
    options: SimpleFileOptions,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    pub fn create(writer: W, compression: Compression) -> Self {
        let options = SimpleFileOptions::default().compression_method(compression.method()).large_file(true);
        Self { inner: ZipWriter::new(writer), options }
    }

    fn start(&mut self, entry: &str) -> Result<()> {
        raise(self.inner.start_file(entry_name(entry), self.options), entry)
    }

    /// Add an entry with in-memory content.
    pub fn add_bytes(&mut self, entry: &str, bytes: &[u8]) -> Result<()> {
        self.start(entry)?;
        self.inner.write_all(bytes).or_raise(|| ErrorKind::Io)?;
        Ok(())
    }

    /// Add an entry streamed from a file on disk.
    #[instrument(level = "trace", skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn add_file(&mut self, entry: &str, path: impl AsRef<Path>) -> Result<u64> {
        let mut file = File::open(path.as_ref()).or_raise(|| ErrorKind::Io)?;
        self.start(entry)?;
        io::copy(&mut file, &mut self.inner).or_raise(|| ErrorKind::Io)
    }

    /// Write the central directory and hand back the underlying writer.
    pub fn finish(self) -> Result<W> {
        raise(self.inner.finish(), "")
    }
}

/// Reads entries from an existing archive.
pub struct ArchiveReader<R: Read + Seek> {
    inner: ZipArchive<R>,
}

impl ArchiveReader<File> {
    /// Open an archive file on disk.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(File::open(path.as_ref()).or_raise(|| ErrorKind::Io)?)
    }
}

impl<R: Read + Seek> ArchiveReader<R> {
    pub fn open(reader: R) -> Result<Self> {
        Ok(Self { inner: raise(ZipArchive::new(reader), "")? })
    }

    /// Names of every file entry (directory entries are skipped), in archive order.
    pub fn entries(&self) -> Vec<String> {
        self.inner.file_names().filter(|name| !name.ends_with('/')).map(str::to_string).collect()
    }

    /// Exact-match lookup of an entry name.
    pub fn contains(&self, entry: &str) -> bool {
        let name = entry_name(entry);
        self.inner.file_names().any(|candidate| candidate == name)
    }

    pub fn read_entry(&mut self, entry: &str) -> Result<Vec<u8>> {
        let mut file = raise(self.inner.by_name(&entry_name(entry)), entry)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer).or_raise(|| ErrorKind::InvalidArchive)?;
        Ok(buffer)
    }

    /// Extract a single entry to `destination`, creating parent directories.
    ///
    /// An existing file at `destination` is replaced.
    #[instrument(level = "trace", skip(self, destination), fields(destination = %destination.as_ref().display()))]
    pub fn extract_to(&mut self, entry: &str, destination: impl AsRef<Path>) -> Result<u64> {
        let destination = destination.as_ref();
        let mut file = raise(self.inner.by_name(&entry_name(entry)), entry)?;
        if let Some(parent) = destination.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
        }
        let mut output = File::create(destination).or_raise(|| ErrorKind::Io)?;
        io::copy(&mut file, &mut output).or_raise(|| ErrorKind::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    fn sample(compression: Compression) -> Cursor<Vec<u8>> {
        let mut writer = ArchiveWriter::create(Cursor::new(Vec::new()), compression);
        writer.add_bytes("a.txt", b"alpha").unwrap();
        writer.add_bytes("nested/dir/b.txt", &b"bravo ".repeat(100)).unwrap();
        writer.add_bytes("\\windows\\style.txt", b"charlie").unwrap();
        writer.finish().unwrap()
    }

    #[rstest]
    #[case(Compression::Stored)]
    #[case(Compression::Deflate)]
    #[case(Compression::Bzip2)]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd))]
    fn test_entries_readable(#[case] compression: Compression) {
        let mut reader = ArchiveReader::open(sample(compression)).unwrap();
        assert_eq!(
            reader.entries(),
            vec!["a.txt".to_string(), "nested/dir/b.txt".to_string(), "windows/style.txt".to_string()]
        );
        assert_eq!(reader.read_entry("nested/dir/b.txt").unwrap(), b"bravo ".repeat(100));
    }

    #[test]
    fn test_contains_is_exact() {
        let reader = ArchiveReader::open(sample(Compression::Deflate)).unwrap();
        assert!(reader.contains("a.txt"));
        assert!(reader.contains("/a.txt"));
        assert!(!reader.contains("A.TXT"));
        assert!(!reader.contains("nested/dir"));
    }

    #[test]
    fn test_missing_entry() {
        let mut reader = ArchiveReader::open(sample(Compression::Deflate)).unwrap();
        let err = reader.read_entry("nope.txt").unwrap_err();
        assert_eq!(*err, ErrorKind::EntryNotFound("nope.txt".to_string()));
    }

    #[test]
    fn test_not_an_archive() {
        let err = ArchiveReader::open(Cursor::new(b"definitely not a zip".to_vec())).err().unwrap();
        assert_eq!(*err, ErrorKind::InvalidArchive);
    }

    #[test]
    fn test_file_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.txt");
        fs::write(&source, "from disk").unwrap();

        let archive = dir.path().join("backup.zip");
        let mut writer = ArchiveWriter::create(File::create(&archive).unwrap(), Compression::Bzip2);
        assert_eq!(writer.add_file("docs/source.txt", &source).unwrap(), 9);
        writer.finish().unwrap();

        let mut reader = ArchiveReader::open_path(&archive).unwrap();
        let target = dir.path().join("restore/deep/source.txt");
        reader.extract_to("docs/source.txt", &target).unwrap();
        assert_eq!(fs::read_to_string(target).unwrap(), "from disk");
    }
}
