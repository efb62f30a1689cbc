//! Comparing file sets and folding a backup chain into one state.

use crate::ArtifactNames;
use crate::error::Result;
use crate::files::{Filter, Stores};
use crate::model::{BackupHistory, ComparedHistory};
use chainbak_storage::FileHistory;
use std::collections::{BTreeMap, HashMap, HashSet};
use time::Duration;

/// Classify `source` against `history` by relative path.
///
/// A source entry is new when the history has no entry with its relative
/// path, and changed when the timestamps differ by more than `tolerance`
/// (in either direction). History entries missing from the source are
/// deleted. Input order is kept in both output lists.
pub fn compare_versions(source: &[FileHistory], history: &[FileHistory], tolerance: Duration) -> ComparedHistory {
    let mut known: HashMap<String, &FileHistory> = HashMap::with_capacity(history.len());
    for file in history {
        known.entry(file.relative_path()).or_insert(file);
    }
    let mut compared = ComparedHistory::default();
    let mut present = HashSet::with_capacity(source.len());
    for file in source {
        let relative = file.relative_path();
        match known.get(&relative) {
            Some(previous) if (file.timestamp - previous.timestamp).abs() <= tolerance => {},
            _ => compared.new_or_changed.push(file.clone()),
        }
        present.insert(relative);
    }
    compared.deleted = history.iter().filter(|file| !present.contains(&file.relative_path())).cloned().collect();
    compared
}

/// Reconstruct the newest version of every file across `backups`.
///
/// Backups are applied oldest first (by start time, whatever the input
/// order): every backed-up file replaces the previous entry with the same
/// relative path, then the backup's deletion log removes entries. Each
/// resulting entry points at the backup that physically holds it.
#[tracing::instrument(level = "debug", skip_all, fields(backups = backups.len()))]
pub async fn reconstruct(backups: &[BackupHistory], stores: &Stores, names: &ArtifactNames) -> Result<Vec<FileHistory>> {
    let mut ordered = backups.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|backup| backup.utc_start);

    let filter = Filter::default();
    let mut state: BTreeMap<String, FileHistory> = BTreeMap::new();
    for backup in ordered {
        let store = stores.get(backup.compressed);
        let files = store.search_backed_up_files(&backup.destination, &filter).await?;
        let deleted = store.deleted_files(&backup.destination).await?;
        tracing::trace!(destination = backup.destination, files = files.len(), deleted = deleted.len(), "Applying backup");
        for file in files {
            state.insert(file.relative_path(), file.with_compressed(backup.compressed));
        }
        for file in deleted {
            state.remove(&file.relative_path());
        }
    }
    // A plain backup walk also picks up the backup's own deletion log.
    state.remove(&names.deleted_files);
    Ok(state.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Options;
    use crate::files::FileStore;
    use chainbak_storage::{MockAccess, StorageAccess, path};
    use rstest::rstest;
    use std::sync::Arc;
    use time::OffsetDateTime;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-01-01 00:00:00 UTC);

    fn file(root: &str, relative: &str, seconds: f64) -> FileHistory {
        FileHistory::from_relative(root, relative, T0 + Duration::seconds_f64(seconds))
    }

    fn relatives(files: &[FileHistory]) -> Vec<String> {
        files.iter().map(FileHistory::relative_path).collect()
    }

    #[rstest]
    #[case(100.0, 100.0, false)]
    #[case(100.0, 101.0, false)]
    #[case(101.0, 100.0, false)]
    #[case(100.0, 101.5, true)]
    #[case(101.5, 100.0, true)]
    #[case(100.0, 200.0, true)]
    fn test_tolerance_is_symmetric(#[case] history: f64, #[case] source: f64, #[case] changed: bool) {
        let compared = compare_versions(
            &[file("/src", "a.txt", source)],
            &[file("/backup/full", "a.txt", history)],
            Duration::SECOND,
        );
        assert_eq!(compared.new_or_changed.len() == 1, changed);
        assert!(compared.deleted.is_empty());
    }

    #[test]
    fn test_compare_new_changed_and_deleted() {
        let source = [file("/src", "a.txt", 200.0), file("/src", "c.txt", 50.0), file("/src", "d/e.txt", 10.0)];
        let history = [file("/b", "a.txt", 100.0), file("/b", "b.txt", 100.0), file("/b", "d/e.txt", 10.0)];
        let compared = compare_versions(&source, &history, Duration::SECOND);
        assert_eq!(relatives(&compared.new_or_changed), vec!["a.txt", "c.txt"]);
        assert_eq!(relatives(&compared.deleted), vec!["b.txt"]);
        // Entries come from the source side, so they still point at local files.
        assert_eq!(compared.new_or_changed[0].path(), "/src/a.txt");
    }

    #[test]
    fn test_compare_against_empty_history() {
        let source = [file("/src", "a.txt", 0.0)];
        let compared = compare_versions(&source, &[], Duration::SECOND);
        assert_eq!(compared.new_or_changed.len(), 1);
        assert!(compared.deleted.is_empty());
        assert!(compare_versions(&[], &[], Duration::SECOND).is_empty());
    }

    fn backup(destination: &str, start: i64, compressed: bool) -> BackupHistory {
        BackupHistory {
            source: "/src".to_string(),
            destination: destination.to_string(),
            utc_start: T0 + Duration::minutes(start),
            utc_end: T0 + Duration::minutes(start + 1),
            compressed,
        }
    }

    /// Full backup of a.txt (t=100) and b.txt, then an incremental with a
    /// newer a.txt (t=200) and b.txt logged as deleted.
    async fn chain() -> (Arc<MockAccess>, Stores) {
        let access = Arc::new(MockAccess::with_files([
            ("/backup/full/a.txt", "old"),
            ("/backup/full/b.txt", "bravo"),
            ("/backup/inc/a.txt", "new"),
        ]));
        access.set_modified("/backup/full/a.txt", T0 + Duration::seconds(100)).await.unwrap();
        access.set_modified("/backup/full/b.txt", T0 + Duration::seconds(100)).await.unwrap();
        access.set_modified("/backup/inc/a.txt", T0 + Duration::seconds(200)).await.unwrap();
        let stores = Stores::new(access.clone(), &Options::default());
        stores.plain.write_deletion_log("/backup/inc", &[file("/backup/full", "b.txt", 100.0)]).await.unwrap();
        (access, stores)
    }

    #[tokio::test]
    async fn test_reconstruct_applies_replacements_and_deletions() {
        let (_access, stores) = chain().await;
        let backups = [backup("/backup/full", 0, false), backup("/backup/inc", 10, false)];
        let state = reconstruct(&backups, &stores, &ArtifactNames::default()).await.unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state[0].path(), "/backup/inc/a.txt");
        assert_eq!(state[0].timestamp, T0 + Duration::seconds(200));
    }

    #[tokio::test]
    async fn test_reconstruct_sorts_by_start_time() {
        let (_access, stores) = chain().await;
        let backups = [backup("/backup/inc", 10, false), backup("/backup/full", 0, false)];
        let state = reconstruct(&backups, &stores, &ArtifactNames::default()).await.unwrap();
        assert_eq!(relatives(&state), vec!["a.txt"]);
        assert_eq!(state[0].root(), "/backup/inc");
    }

    #[tokio::test]
    async fn test_reconstruct_prefix_is_monotonic() {
        let (_access, stores) = chain().await;
        let full = reconstruct(&[backup("/backup/full", 0, false)], &stores, &ArtifactNames::default()).await.unwrap();
        assert_eq!(relatives(&full), vec!["a.txt", "b.txt"]);
        assert!(full.iter().all(|file| file.root() == "/backup/full"));
    }

    #[tokio::test]
    async fn test_reconstruct_deleted_then_recreated() {
        let (access, stores) = chain().await;
        access.ensure_directory_exists("/backup/inc2").await.unwrap();
        access.write_to_file("/backup/inc2/b.txt", "again").await.unwrap();
        let backups =
            [backup("/backup/full", 0, false), backup("/backup/inc", 10, false), backup("/backup/inc2", 20, false)];
        let state = reconstruct(&backups, &stores, &ArtifactNames::default()).await.unwrap();
        assert_eq!(relatives(&state), vec!["a.txt", "b.txt"]);
        assert_eq!(state[1].root(), "/backup/inc2");
    }

    #[tokio::test]
    async fn test_reconstruct_empty_chain() {
        let (_access, stores) = chain().await;
        assert!(reconstruct(&[], &stores, &ArtifactNames::default()).await.unwrap().is_empty());
    }

    type Seeded<'a> = (&'a str, i64, &'a [(&'a str, i64)], &'a [&'a str]);

    /// Destination, start minute, files with their mtimes, deletion log.
    const LONG_CHAIN: [Seeded<'static>; 4] = [
        ("/backup/full", 0, &[("a.txt", 100), ("b.txt", 100), ("c.txt", 100), ("keep/k.txt", 100)], &[]),
        ("/backup/inc1", 10, &[("a.txt", 200), ("d.txt", 200)], &["c.txt"]),
        ("/backup/inc2", 20, &[("b.txt", 300), ("e.txt", 300)], &["d.txt"]),
        ("/backup/inc3", 30, &[("c.txt", 400)], &["a.txt"]),
    ];

    async fn long_chain() -> (Stores, Vec<BackupHistory>) {
        let access = Arc::new(MockAccess::with_files(LONG_CHAIN.iter().flat_map(|(destination, _, files, _)| {
            files.iter().map(move |(relative, _)| (path::combine(destination, relative), "data"))
        })));
        let stores = Stores::new(access.clone(), &Options::default());
        let mut backups = Vec::new();
        for (destination, start, files, deleted) in LONG_CHAIN {
            for (relative, seconds) in files {
                let target = path::combine(destination, relative);
                access.set_modified(&target, T0 + Duration::seconds(*seconds)).await.unwrap();
            }
            if !deleted.is_empty() {
                let logged = deleted.iter().map(|relative| file(destination, relative, 0.0)).collect::<Vec<_>>();
                stores.plain.write_deletion_log(destination, &logged).await.unwrap();
            }
            backups.push(backup(destination, start, false));
        }
        (stores, backups)
    }

    #[tokio::test]
    async fn test_reconstruct_extends_previous_state_with_last_backup() {
        let (stores, backups) = long_chain().await;
        let names = ArtifactNames::default();
        let mut previous: Vec<FileHistory> = Vec::new();
        for count in 1..=backups.len() {
            let last = &backups[count - 1];
            let store = stores.get(last.compressed);
            let mut expected =
                previous.into_iter().map(|file| (file.relative_path(), file)).collect::<BTreeMap<_, _>>();
            for file in store.search_backed_up_files(&last.destination, &Filter::default()).await.unwrap() {
                expected.insert(file.relative_path(), file);
            }
            for file in store.deleted_files(&last.destination).await.unwrap() {
                expected.remove(&file.relative_path());
            }
            expected.remove(&names.deleted_files);

            let state = reconstruct(&backups[..count], &stores, &names).await.unwrap();
            assert_eq!(state, expected.into_values().collect::<Vec<_>>(), "after {count} backups");
            previous = state;
        }
        let located = previous.iter().map(|file| (file.relative_path(), file.root().to_string())).collect::<Vec<_>>();
        let expected = [("b.txt", "/backup/inc2"), ("c.txt", "/backup/inc3"), ("e.txt", "/backup/inc2"), ("keep/k.txt", "/backup/full")]
            .map(|(relative, root)| (relative.to_string(), root.to_string()));
        assert_eq!(located, expected);
    }

    #[tokio::test]
    async fn test_compare_partitions_every_path_against_chain() {
        let (stores, backups) = long_chain().await;
        let history = reconstruct(&backups, &stores, &ArtifactNames::default()).await.unwrap();
        let source = [
            // just inside the tolerance
            file("/src", "b.txt", 300.999),
            // just outside it
            file("/src", "c.txt", 401.001),
            file("/src", "keep/k.txt", 100.0),
            file("/src", "f.txt", 50.0),
        ];
        let compared = compare_versions(&source, &history, Duration::SECOND);
        assert_eq!(relatives(&compared.new_or_changed), vec!["c.txt", "f.txt"]);
        assert_eq!(relatives(&compared.deleted), vec!["e.txt"]);

        let changed = relatives(&compared.new_or_changed).into_iter().collect::<HashSet<_>>();
        let deleted = relatives(&compared.deleted).into_iter().collect::<HashSet<_>>();
        let present = relatives(&source).into_iter().collect::<HashSet<_>>();
        let known = relatives(&history).into_iter().collect::<HashSet<_>>();
        assert_eq!(changed.len(), compared.new_or_changed.len());
        assert!(changed.is_disjoint(&deleted));
        assert!(changed.is_subset(&present));
        assert_eq!(deleted, &known - &present);
        for unchanged in present.difference(&changed) {
            let now = source.iter().find(|file| &file.relative_path() == unchanged).unwrap();
            let before = history.iter().find(|file| &file.relative_path() == unchanged).unwrap();
            assert!((now.timestamp - before.timestamp).abs() <= Duration::SECOND, "{unchanged}");
        }
    }
}
