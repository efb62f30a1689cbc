//! JSON record of every backup taken, used to assemble chains.

use crate::error::{ErrorKind, Result};
use chainbak_engine::BackupHistory;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
    Differential,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: u64,
    pub kind: BackupKind,
    #[serde(flatten)]
    pub backup: BackupHistory,
}

#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    entries: Vec<Entry>,
}

impl Catalog {
    /// Read the catalog at `path`; a missing file is an empty catalog.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).or_raise(|| ErrorKind::Catalog)?,
            Err(e) if e.kind() == IoErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Catalog),
        };
        Ok(Self { path, entries })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).or_raise(|| ErrorKind::Catalog)?;
        }
        let text = serde_json::to_string_pretty(&self.entries).or_raise(|| ErrorKind::Catalog)?;
        fs::write(&self.path, text).or_raise(|| ErrorKind::Catalog)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, id: u64) -> Result<&Entry> {
        self.entries.iter().find(|entry| entry.id == id).ok_or_else(|| ErrorKind::UnknownBackup(id).into())
    }

    pub fn record(&mut self, kind: BackupKind, backup: BackupHistory) -> &Entry {
        let id = self.entries.iter().map(|entry| entry.id).max().unwrap_or(0) + 1;
        self.entries.push(Entry { id, kind, backup });
        &self.entries[self.entries.len() - 1]
    }

    pub fn remove(&mut self, ids: &[u64]) {
        self.entries.retain(|entry| !ids.contains(&entry.id));
    }

    /// Entries for `source`, oldest first.
    fn for_source(&self, source: &str) -> Vec<&Entry> {
        let mut found = self.entries.iter().filter(|entry| entry.backup.source == source).collect::<Vec<_>>();
        found.sort_by_key(|entry| (entry.backup.utc_start, entry.id));
        found
    }

    /// Index and entry of the newest full backup among `entries`.
    fn last_full<'a>(entries: &[&'a Entry], source: &str) -> Result<(usize, &'a Entry)> {
        entries
            .iter()
            .enumerate()
            .rev()
            .find(|(_, entry)| entry.kind == BackupKind::Full)
            .map(|(index, entry)| (index, *entry))
            .ok_or_else(|| ErrorKind::NoFullBackup(source.to_string()).into())
    }

    /// Base of a differential backup: the newest full backup.
    pub fn differential_base(&self, source: &str) -> Result<BackupHistory> {
        let entries = self.for_source(source);
        Ok(Self::last_full(&entries, source)?.1.backup.clone())
    }

    /// The newest full backup and everything after it.
    pub fn chain(&self, source: &str) -> Result<Vec<BackupHistory>> {
        let entries = self.for_source(source);
        let (start, _) = Self::last_full(&entries, source)?;
        Ok(entries[start..].iter().map(|entry| entry.backup.clone()).collect())
    }

    /// The chain as it stood when backup `until` finished.
    pub fn chain_until(&self, source: &str, until: u64) -> Result<Vec<BackupHistory>> {
        let target = self.get(until)?;
        if target.backup.source != source {
            exn::bail!(ErrorKind::UnknownBackup(until));
        }
        let entries = self.for_source(source);
        let end = entries.iter().position(|entry| entry.id == until).map_or(entries.len(), |index| index + 1);
        let (start, _) = Self::last_full(&entries[..end], source)?;
        Ok(entries[start..end].iter().map(|entry| entry.backup.clone()).collect())
    }
}
