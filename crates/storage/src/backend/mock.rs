//! In-memory storage access for testing.

use crate::backend::{LocalAccess, StorageAccess, set_modified};
use crate::error::{ErrorKind, Result};
use crate::file::{Directory, FileHistory};
use crate::path;
use async_trait::async_trait;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
enum Node {
    Directory,
    File { modified: OffsetDateTime, data: Vec<u8> },
}

/// In-memory storage access for testing.
///
/// Entries live in a `BTreeMap` behind a [`RwLock`], keyed by normalized
/// absolute path; `/` always exists. The local side of
/// [`copy_file`](StorageAccess::copy_file) and
/// [`restore_file`](StorageAccess::restore_file) is the real local
/// filesystem, so a test can back up a temporary directory into memory and
/// restore it again.
///
/// # Examples
///
/// ```
/// use chainbak_storage::{MockAccess, StorageAccess};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let access = MockAccess::with_files([("/backup/full/a.txt", "alpha")]);
/// assert!(access.directory_exists("/backup/full").await?);
/// assert_eq!(access.read_file("/backup/full/a.txt").await?, "alpha");
/// # Ok(())
/// # }
/// ```
pub struct MockAccess {
    name: String,
    nodes: RwLock<BTreeMap<String, Node>>,
}

fn key(path: &str) -> String {
    let normalized = path::normalize(path);
    match normalized.trim_end_matches(path::SEPARATOR) {
        "" => path::SEPARATOR.to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Every ancestor of `key`, closest last, excluding `/`.
fn ancestors(key: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut current = path::parent(key);
    while !current.is_empty() && !path::is_root(&current) {
        found.push(current.clone());
        current = path::parent(&current);
    }
    found.reverse();
    found
}

impl MockAccess {
    /// Create a mock pre-populated with files; parent directories are implied.
    ///
    /// Every file gets the current time as its modification time.
    pub fn with_files(files: impl IntoIterator<Item = (impl AsRef<str>, impl Into<Vec<u8>>)>) -> Self {
        let now = OffsetDateTime::now_utc();
        let mut nodes = BTreeMap::new();
        nodes.insert(path::SEPARATOR.to_string(), Node::Directory);
        for (file, data) in files {
            let file = key(file.as_ref());
            for directory in ancestors(&file) {
                nodes.insert(directory, Node::Directory);
            }
            nodes.insert(file, Node::File { modified: now, data: data.into() });
        }
        Self { name: "mock".to_string(), nodes: RwLock::new(nodes) }
    }

    /// Change the name of the mock.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the modification time of an existing file.
    pub async fn set_modified(&self, path: &str, timestamp: OffsetDateTime) -> Result<()> {
        match self.nodes.write().await.get_mut(&key(path)) {
            Some(Node::File { modified, .. }) => {
                *modified = timestamp;
                Ok(())
            },
            Some(Node::Directory) => exn::bail!(ErrorKind::NotFile(path.to_string())),
            None => exn::bail!(ErrorKind::FileNotFound(path.to_string())),
        }
    }

    /// Every path currently stored, directories included.
    pub async fn paths(&self) -> Vec<String> {
        self.nodes.read().await.keys().cloned().collect()
    }

    async fn node(&self, path: &str) -> Option<Node> {
        self.nodes.read().await.get(&key(path)).cloned()
    }

    fn require_parent(nodes: &BTreeMap<String, Node>, key: &str) -> Result<()> {
        let parent = path::parent(key);
        match nodes.get(&self::key(&parent)) {
            Some(Node::Directory) => Ok(()),
            Some(Node::File { .. }) => exn::bail!(ErrorKind::NotDirectory(parent)),
            None => exn::bail!(ErrorKind::DirectoryNotFound(parent)),
        }
    }

    async fn write(&self, path: &str, text: &str, append: bool) -> Result<()> {
        let key = key(path);
        let mut nodes = self.nodes.write().await;
        Self::require_parent(&nodes, &key)?;
        let now = OffsetDateTime::now_utc();
        match nodes.get_mut(&key) {
            Some(Node::Directory) => exn::bail!(ErrorKind::NotFile(path.to_string())),
            Some(Node::File { modified, data }) => {
                if !append {
                    data.clear();
                }
                data.extend_from_slice(text.as_bytes());
                *modified = now;
            },
            None => {
                nodes.insert(key, Node::File { modified: now, data: text.as_bytes().to_vec() });
            },
        }
        Ok(())
    }
}

impl Default for MockAccess {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageAccess for MockAccess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_directory(&self, path: &str) -> Result<Directory> {
        let directory = key(path);
        let nodes = self.nodes.read().await;
        match nodes.get(&directory) {
            Some(Node::Directory) => {},
            Some(Node::File { .. }) => exn::bail!(ErrorKind::NotDirectory(path.to_string())),
            None => exn::bail!(ErrorKind::DirectoryNotFound(path.to_string())),
        }
        let mut listing = Directory::new(&directory);
        for (child, node) in nodes.iter() {
            if *child == directory || path::parent(child) != directory {
                continue;
            }
            match node {
                Node::Directory => listing.directories.push(child.clone()),
                Node::File { modified, .. } => listing.files.push(FileHistory::new(&directory, child, *modified)),
            }
        }
        Ok(listing)
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        if path::is_root(path) {
            return Ok(());
        }
        let key = key(path);
        let mut nodes = self.nodes.write().await;
        match nodes.get(&key) {
            Some(Node::Directory) => exn::bail!(ErrorKind::DirectoryAlreadyExists(path.to_string())),
            Some(Node::File { .. }) => exn::bail!(ErrorKind::NotDirectory(path.to_string())),
            None => {},
        }
        Self::require_parent(&nodes, &key)?;
        nodes.insert(key, Node::Directory);
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        if path::is_root(path) {
            return Ok(());
        }
        let key = key(path);
        let mut nodes = self.nodes.write().await;
        match nodes.get(&key) {
            Some(Node::Directory) => {},
            Some(Node::File { .. }) => exn::bail!(ErrorKind::NotDirectory(path.to_string())),
            None => exn::bail!(ErrorKind::DirectoryNotFound(path.to_string())),
        }
        let prefix = format!("{key}{}", path::SEPARATOR);
        nodes.retain(|candidate, _| *candidate != key && !candidate.starts_with(&prefix));
        Ok(())
    }

    async fn create_file(&self, path: &str) -> Result<()> {
        let key = key(path);
        let mut nodes = self.nodes.write().await;
        match nodes.get(&key) {
            Some(Node::File { .. }) => exn::bail!(ErrorKind::FileAlreadyExists(path.to_string())),
            Some(Node::Directory) => exn::bail!(ErrorKind::NotFile(path.to_string())),
            None => {},
        }
        Self::require_parent(&nodes, &key)?;
        nodes.insert(key, Node::File { modified: OffsetDateTime::now_utc(), data: Vec::new() });
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let key = key(path);
        let mut nodes = self.nodes.write().await;
        match nodes.get(&key) {
            Some(Node::File { .. }) => {},
            Some(Node::Directory) => exn::bail!(ErrorKind::NotFile(path.to_string())),
            None => exn::bail!(ErrorKind::FileNotFound(path.to_string())),
        }
        nodes.remove(&key);
        Ok(())
    }

    async fn copy_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<()> {
        let data = tokio::fs::read(source).await.map_err(|e| LocalAccess::map_io_error(e, source))?;
        let metadata = tokio::fs::metadata(source).await.map_err(|e| LocalAccess::map_io_error(e, source))?;
        let modified = metadata.modified().map(OffsetDateTime::from).unwrap_or_else(|_| OffsetDateTime::now_utc());
        self.ensure_directory_exists(&path::parent(destination)).await?;

        let key = key(destination);
        let mut nodes = self.nodes.write().await;
        match nodes.get(&key) {
            Some(Node::Directory) => exn::bail!(ErrorKind::NotFile(destination.to_string())),
            Some(Node::File { .. }) if !overwrite => exn::bail!(ErrorKind::FileAlreadyExists(destination.to_string())),
            _ => {},
        }
        nodes.insert(key, Node::File { modified, data });
        Ok(())
    }

    async fn restore_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<()> {
        let (modified, data) = match self.node(source).await {
            Some(Node::File { modified, data }) => (modified, data),
            Some(Node::Directory) => exn::bail!(ErrorKind::NotFile(source.to_string())),
            None => exn::bail!(ErrorKind::FileNotFound(source.to_string())),
        };
        let local = LocalAccess::default();
        if !overwrite && local.file_exists(destination).await? {
            exn::bail!(ErrorKind::FileAlreadyExists(destination.to_string()));
        }
        local.ensure_directory_exists(&path::parent(destination)).await?;
        tokio::fs::write(destination, data).await.map_err(|e| LocalAccess::map_io_error(e, destination))?;
        set_modified(destination, modified).await
    }

    async fn write_to_file(&self, path: &str, text: &str) -> Result<()> {
        self.write(path, text, false).await
    }

    async fn append_to_file(&self, path: &str, text: &str) -> Result<()> {
        self.write(path, text, true).await
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        match self.node(path).await {
            Some(Node::File { data, .. }) => String::from_utf8(data)
                .map_err(|_| exn::Exn::from(ErrorKind::Unknown(format!("{path}: not valid UTF-8")))),
            Some(Node::Directory) => exn::bail!(ErrorKind::NotFile(path.to_string())),
            None => exn::bail!(ErrorKind::FileNotFound(path.to_string())),
        }
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(matches!(self.node(path).await, Some(Node::File { .. })))
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        Ok(matches!(self.node(path).await, Some(Node::Directory)))
    }
}
