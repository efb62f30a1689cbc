mod access;
mod catalog;
mod cli;
mod error;

use crate::access::Storage;
use crate::catalog::{BackupKind, Catalog};
use crate::cli::{BackupArgs, Cli, Command};
use crate::error::{ErrorKind, Result};
use chainbak_archive::cli::Preference;
use chainbak_config::Settings;
use chainbak_engine::{ArtifactNames, BackupManager, Filter, Options, RestoreManager};
use chainbak_storage::{AccessHandle, path};
use clap::Parser;
use exn::ResultExt;
use std::process::ExitCode;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        _ => EnvFilter::new(fallback),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn options(settings: &Settings) -> Result<Options> {
    let tolerance = settings.tolerance().or_raise(|| ErrorKind::Config)?;
    Ok(Options {
        tolerance: time::Duration::try_from(tolerance).or_raise(|| ErrorKind::Config)?,
        names: ArtifactNames {
            deleted_files: settings.artifacts.deleted_files.clone(),
            file_structure: settings.artifacts.file_structure.clone(),
        },
        compression: settings.compression().or_raise(|| ErrorKind::Config)?,
    })
}

/// Absolute, `/`-separated form of a local path, so catalog lookups match.
fn absolute(local: &str) -> Result<String> {
    let resolved = std::path::absolute(local).or_raise(|| ErrorKind::InvalidPath(local.to_string()))?;
    Ok(path::normalize(&resolved.to_string_lossy()))
}

struct Backup<'a> {
    args: &'a BackupArgs,
    source: String,
    filter: Filter,
    manager: BackupManager,
    compress: bool,
}

impl<'a> Backup<'a> {
    fn new(args: &'a BackupArgs, settings: &Settings, mut options: Options, access: AccessHandle) -> Result<Self> {
        let filter = Filter::new(
            args.files.as_deref().unwrap_or(&settings.filter.files),
            args.dirs.as_deref().unwrap_or(&settings.filter.directories),
        )
        .or_raise(|| ErrorKind::Config)?;
        let preference = Preference::try_from(args.compress.clone()).or_raise(|| ErrorKind::Config)?;
        let compression = preference.resolve(options.compression);
        if let Some(compression) = compression {
            options.compression = compression;
        }
        Ok(Self {
            args,
            source: absolute(&args.source)?,
            filter,
            manager: BackupManager::new(access, options),
            compress: compression.is_some(),
        })
    }
}

async fn execute(
    command: Command,
    settings: &Settings,
    options: Options,
    catalog: &mut Catalog,
    access: AccessHandle,
) -> Result<()> {
    match command {
        Command::Full(args) => {
            let backup = Backup::new(&args, settings, options, access)?;
            let report = backup
                .manager
                .full_backup(&backup.source, &backup.args.destination, &backup.filter, backup.compress)
                .await
                .or_raise(|| ErrorKind::Engine)?;
            let entry = catalog.record(BackupKind::Full, report.backup);
            println!("Backup #{}: {} files copied", entry.id, report.copied);
        },
        Command::Incremental(args) => {
            let backup = Backup::new(&args, settings, options, access)?;
            let chain = catalog.chain(&backup.source)?;
            let report = backup
                .manager
                .incremental_backup(&backup.source, &backup.args.destination, &chain, &backup.filter, backup.compress)
                .await
                .or_raise(|| ErrorKind::Engine)?;
            let entry = catalog.record(BackupKind::Incremental, report.backup);
            println!("Backup #{}: {} files copied, {} deletions recorded", entry.id, report.copied, report.deleted);
        },
        Command::Differential(args) => {
            let backup = Backup::new(&args, settings, options, access)?;
            let base = catalog.differential_base(&backup.source)?;
            let report = backup
                .manager
                .differential_backup(&backup.source, &backup.args.destination, &base, &backup.filter, backup.compress)
                .await
                .or_raise(|| ErrorKind::Engine)?;
            let entry = catalog.record(BackupKind::Differential, report.backup);
            println!("Backup #{}: {} files copied, {} deletions recorded", entry.id, report.copied, report.deleted);
        },
        Command::Restore { source, destination, until } => {
            let source = absolute(&source)?;
            let chain = match until {
                Some(id) => catalog.chain_until(&source, id)?,
                None => catalog.chain(&source)?,
            };
            let report = RestoreManager::new(access, options)
                .restore(&chain, &absolute(&destination)?)
                .await
                .or_raise(|| ErrorKind::Engine)?;
            println!("Restored {} of {} files", report.restored, report.tracked);
            return Ok(());
        },
        Command::Delete { ids } => {
            let deleted = delete_backups(&BackupManager::new(access, options), catalog, &ids).await?;
            println!("Deleted {deleted} backups");
        },
        Command::List => {
            list(catalog);
            return Ok(());
        },
    }
    catalog.save()
}

/// Delete backups one at a time, dropping each from the catalog once its
/// storage is gone. The catalog is saved before a failure is returned.
async fn delete_backups(manager: &BackupManager, catalog: &mut Catalog, ids: &[u64]) -> Result<usize> {
    let backups = ids.iter().map(|id| Ok((*id, catalog.get(*id)?.backup.clone()))).collect::<Result<Vec<_>>>()?;
    for (deleted, (id, backup)) in backups.into_iter().enumerate() {
        if let Err(e) = manager.delete(&backup).await {
            tracing::warn!(id, deleted, destination = %backup.destination, "delete failed; saving catalog");
            catalog.save()?;
            return Err(e.raise(ErrorKind::Engine));
        }
        catalog.remove(&[id]);
    }
    Ok(ids.len())
}

fn list(catalog: &Catalog) {
    if catalog.entries().is_empty() {
        println!("No backups recorded in {}", catalog.path().display());
        return;
    }
    for entry in catalog.entries() {
        let started = entry.backup.utc_start.format(&Rfc3339).unwrap_or_default();
        let layout = if entry.backup.compressed { "compressed" } else { "plain" };
        println!(
            "{:>4}  {:<12}  {}  {:<10}  {} -> {}",
            entry.id,
            format!("{:?}", entry.kind).to_lowercase(),
            started,
            layout,
            entry.backup.source,
            entry.backup.destination
        );
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = chainbak_config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let mut catalog = Catalog::load(settings.catalog_path().or_raise(|| ErrorKind::Config)?)?;
    if let Command::List = cli.command {
        list(&catalog);
        return Ok(());
    }
    let options = options(&settings)?;
    let storage = Storage::open(&settings.storage).await?;
    let outcome = execute(cli.command, &settings, options, &mut catalog, storage.handle()).await;
    let closed = storage.close().await;
    outcome?;
    closed
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainbak_engine::BackupHistory;
    use chainbak_storage::{MockAccess, StorageAccess};
    use rstest::rstest;
    use std::sync::Arc;
    use time::macros::datetime;

    #[rstest]
    #[case(1.0, time::Duration::SECOND)]
    #[case(0.25, time::Duration::milliseconds(250))]
    fn test_options_from_settings(#[case] tolerance: f64, #[case] expected: time::Duration) {
        let settings = Settings { tolerance, compression: "bzip2".to_string(), ..Settings::default() };
        let options = options(&settings).unwrap();
        assert_eq!(options.tolerance, expected);
        assert_eq!(options.compression, chainbak_archive::Compression::Bzip2);
        assert_eq!(options.names, ArtifactNames::default());
    }

    #[test]
    fn test_absolute_normalizes() {
        let resolved = absolute("relative/dir").unwrap();
        assert!(resolved.starts_with('/'));
        assert!(resolved.ends_with("relative/dir"));
    }

    fn history(destination: &str) -> BackupHistory {
        BackupHistory {
            source: "/src".to_string(),
            destination: destination.to_string(),
            utc_start: datetime!(2024-01-01 00:00:00 UTC),
            utc_end: datetime!(2024-01-01 00:01:00 UTC),
            compressed: false,
        }
    }

    #[tokio::test]
    async fn test_delete_backups_removes_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::load(dir.path().join("catalog.json")).unwrap();
        let first = catalog.record(BackupKind::Full, history("/backup/one")).id;
        let second = catalog.record(BackupKind::Incremental, history("/backup/two")).id;
        let access = Arc::new(MockAccess::with_files([("/backup/one/a.txt", "alpha"), ("/backup/two/b.txt", "bravo")]));
        let manager = BackupManager::new(access.clone(), Options::default());

        assert_eq!(delete_backups(&manager, &mut catalog, &[first, second]).await.unwrap(), 2);
        assert!(catalog.entries().is_empty());
        assert!(!access.directory_exists("/backup/two").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_backups_saves_progress_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::load(dir.path().join("catalog.json")).unwrap();
        let first = catalog.record(BackupKind::Full, history("/backup/one")).id;
        let second = catalog.record(BackupKind::Incremental, history("/backup/two")).id;
        let access = Arc::new(MockAccess::with_files([("/backup/one/a.txt", "alpha")]));
        let manager = BackupManager::new(access.clone(), Options::default());

        let err = delete_backups(&manager, &mut catalog, &[first, second]).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Engine));
        assert!(!access.directory_exists("/backup/one").await.unwrap());

        let saved = Catalog::load(catalog.path()).unwrap();
        assert_eq!(saved.entries().iter().map(|entry| entry.id).collect::<Vec<_>>(), vec![second]);
    }

    #[tokio::test]
    async fn test_delete_backups_rejects_unknown_id_before_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::load(dir.path().join("catalog.json")).unwrap();
        let first = catalog.record(BackupKind::Full, history("/backup/one")).id;
        let access = Arc::new(MockAccess::with_files([("/backup/one/a.txt", "alpha")]));
        let manager = BackupManager::new(access.clone(), Options::default());

        let err = delete_backups(&manager, &mut catalog, &[first, 99]).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownBackup(99)));
        assert!(access.directory_exists("/backup/one").await.unwrap());
        assert_eq!(catalog.entries().len(), 1);
    }
}
