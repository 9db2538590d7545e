//! Persisted, versioned store for the mirrored following set.
//!
//! The store holds the current [`Snapshot`] behind a copy-and-swap
//! pointer: builds happen off to the side and the `Arc` is swapped in one
//! step, so concurrent readers never observe a partially-built snapshot.
//! Persistence is write-then-rename with a timestamped backup of the
//! previous file taken before every overwrite, pruned to the newest five.

use crate::error::{FoloError, Result};
use crate::index::build_snapshot;
use crate::model::{FollowedUser, Snapshot, StoreEvent};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Filename of the persisted snapshot inside the data directory.
pub const DATA_FILENAME: &str = "following_data.json";

/// Filename prefix of point-in-time backups.
pub const BACKUP_PREFIX: &str = "following_backup_";

/// Backups retained per data directory, newest first by mtime.
pub const MAX_BACKUPS: usize = 5;

type Observer = Box<dyn Fn(&StoreEvent) -> Result<()> + Send + Sync>;

/// Aggregate store statistics for display.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_users: usize,
    pub last_update: DateTime<Utc>,
    pub name_prefix_keys: usize,
    pub id_prefix_keys: usize,
    pub bio_token_keys: usize,
    pub name_length_dist: BTreeMap<String, u64>,
    pub bio_length_dist: BTreeMap<String, u64>,
}

/// Versioned, indexed mirror of the remote following set.
pub struct RelationStore {
    data_dir: PathBuf,
    data_file: PathBuf,
    snapshot: RwLock<Arc<Snapshot>>,
    observers: Mutex<Vec<(String, Observer)>>,
}

impl RelationStore {
    /// Open the store rooted at `data_dir`, loading any persisted
    /// snapshot.
    ///
    /// A corrupt snapshot file degrades to an empty store rather than
    /// failing; the store never refuses to start over a bad file.
    ///
    /// # Errors
    ///
    /// Returns an error only if the data directory cannot be created.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| FoloError::path_error("create", &data_dir, e))?;

        let data_file = data_dir.join(DATA_FILENAME);
        let store = Self {
            data_dir,
            data_file,
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
            observers: Mutex::new(Vec::new()),
        };
        store.load();
        Ok(store)
    }

    /// The current snapshot. Cheap; clones an `Arc`.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Path of the persisted snapshot file.
    #[must_use]
    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    /// Register a named change observer.
    ///
    /// Observers receive every [`StoreEvent`]; an observer returning an
    /// error is logged and never blocks delivery to the others.
    pub fn register_observer<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&StoreEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .push((name.into(), Box::new(callback)));
    }

    /// Remove the observer registered under `name`, if any.
    pub fn unregister_observer(&self, name: &str) {
        self.observers.lock().retain(|(n, _)| n != name);
    }

    fn notify(&self, event: &StoreEvent) {
        for (name, observer) in self.observers.lock().iter() {
            if let Err(e) = observer(event) {
                warn!(observer = %name, error = %e, "Store observer failed");
            }
        }
    }

    /// Build a fresh snapshot from `entities` and swap it in.
    ///
    /// Entities without an id are skipped, never fatal. Does not persist;
    /// call [`Self::persist`] afterwards.
    pub fn replace_all(&self, entities: Vec<FollowedUser>) -> Arc<Snapshot> {
        let snapshot = Arc::new(build_snapshot(entities));
        info!(total = snapshot.total_count, "Snapshot rebuilt");

        *self.snapshot.write() = Arc::clone(&snapshot);
        self.notify(&StoreEvent::SnapshotReplaced(Arc::clone(&snapshot)));
        snapshot
    }

    /// Rebuild the snapshot without the given ids.
    ///
    /// Indices are re-derived over the survivors, not patched: prefix
    /// and token indices cannot be decremented without reference counts.
    pub fn remove(&self, ids: &HashSet<String>) -> Arc<Snapshot> {
        let current = self.snapshot();
        let survivors: Vec<FollowedUser> = current
            .users
            .values()
            .filter(|user| !ids.contains(&user.id))
            .cloned()
            .collect();

        let removed = current.total_count - survivors.len();
        info!(removed, remaining = survivors.len(), "Removing entities from snapshot");
        self.replace_all(survivors)
    }

    /// Write the current snapshot to disk.
    ///
    /// The existing file is copied to a timestamped backup first (skipped
    /// when there is no prior file), then the snapshot is written to a
    /// temporary file and renamed into place. Backup and prune failures
    /// are swallowed; write failures surface but leave in-memory state
    /// untouched.
    pub fn persist(&self) -> Result<()> {
        let snapshot = self.snapshot();

        self.create_backup();

        let json = serde_json::to_string_pretty(&*snapshot)?;
        let tmp = self.data_dir.join(format!("{DATA_FILENAME}.tmp"));
        std::fs::write(&tmp, json).map_err(|e| FoloError::path_error("write", &tmp, e))?;
        std::fs::rename(&tmp, &self.data_file)
            .map_err(|e| FoloError::path_error("rename", &self.data_file, e))?;

        self.prune_backups();
        debug!(path = %self.data_file.display(), "Snapshot persisted");
        Ok(())
    }

    /// Reload the persisted snapshot, degrading to empty on any failure.
    fn load(&self) {
        if !self.data_file.exists() {
            return;
        }

        let loaded = std::fs::read_to_string(&self.data_file)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<Snapshot>(&content).map_err(|e| e.to_string())
            });

        match loaded {
            Ok(snapshot) => {
                info!(
                    total = snapshot.total_count,
                    updated = %snapshot.update_time,
                    "Loaded persisted snapshot"
                );
                *self.snapshot.write() = Arc::new(snapshot);
            }
            Err(reason) => {
                warn!(%reason, "Persisted snapshot unreadable; starting empty");
                *self.snapshot.write() = Arc::new(Snapshot::empty());
                self.notify(&StoreEvent::LoadFailed(reason));
            }
        }
    }

    /// Empty the store and delete the backing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file exists but cannot be removed;
    /// in-memory state is left untouched in that case.
    pub fn clear(&self) -> Result<()> {
        if self.data_file.exists() {
            std::fs::remove_file(&self.data_file)
                .map_err(|e| FoloError::path_error("remove", &self.data_file, e))?;
        }

        *self.snapshot.write() = Arc::new(Snapshot::empty());
        info!("Store cleared");
        self.notify(&StoreEvent::SnapshotCleared);
        Ok(())
    }

    /// Look up one entity by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<FollowedUser> {
        self.snapshot().users.get(id).cloned()
    }

    /// Aggregate statistics over the current snapshot.
    #[must_use]
    pub fn statistics(&self) -> StoreStats {
        let snapshot = self.snapshot();
        StoreStats {
            total_users: snapshot.total_count,
            last_update: snapshot.update_time,
            name_prefix_keys: snapshot.index.by_name.key_count(),
            id_prefix_keys: snapshot.index.by_id.key_count(),
            bio_token_keys: snapshot.index.by_bio_token.key_count(),
            name_length_dist: snapshot.statistics.name_length_stats.clone(),
            bio_length_dist: snapshot.statistics.bio_length_stats.clone(),
        }
    }

    /// Copy the current data file to a timestamped backup. Best-effort.
    fn create_backup(&self) {
        if !self.data_file.exists() {
            return;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let backup = self
            .data_dir
            .join(format!("{BACKUP_PREFIX}{timestamp}.json"));

        match std::fs::copy(&self.data_file, &backup) {
            Ok(_) => debug!(path = %backup.display(), "Backup created"),
            Err(e) => warn!(error = %e, "Backup creation failed"),
        }
    }

    /// Delete backups beyond the newest [`MAX_BACKUPS`] by mtime.
    /// Best-effort; failures are logged and swallowed.
    fn prune_backups(&self) {
        let Ok(entries) = std::fs::read_dir(&self.data_dir) else {
            return;
        };

        let mut backups: Vec<(PathBuf, std::time::SystemTime)> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if !name.starts_with(BACKUP_PREFIX) || !name.ends_with(".json") {
                    return None;
                }
                let mtime = entry.metadata().ok()?.modified().ok()?;
                Some((entry.path(), mtime))
            })
            .collect();

        backups.sort_by(|a, b| b.1.cmp(&a.1));

        for (path, _) in backups.into_iter().skip(MAX_BACKUPS) {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "Backup prune failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn user(id: &str, name: &str, bio: &str) -> FollowedUser {
        FollowedUser {
            id: id.to_string(),
            display_name: name.to_string(),
            bio: bio.to_string(),
            followed_at: Some(1_700_000_000),
            avatar_ref: format!("https://example.com/{id}.jpg"),
            badges: BTreeMap::new(),
        }
    }

    #[test]
    fn replace_persist_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = RelationStore::open(dir.path()).unwrap();

        let entities = vec![
            user("1", "Ann", "rust streams"),
            user("2", "Anna", "music"),
            user("", "ghost", "no id, dropped"),
        ];
        store.replace_all(entities);
        store.persist().unwrap();

        let reopened = RelationStore::open(dir.path()).unwrap();
        let snapshot = reopened.snapshot();
        assert_eq!(snapshot.total_count, 2);
        assert_eq!(snapshot.users["1"], user("1", "Ann", "rust streams"));
        assert_eq!(snapshot.users["2"], user("2", "Anna", "music"));
        assert_eq!(snapshot.index.by_name.get("ann").unwrap(), ["1", "2"]);
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(DATA_FILENAME), "{not json").unwrap();

        let store = RelationStore::open(dir.path()).unwrap();
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn persist_rotates_and_prunes_backups() {
        let dir = TempDir::new().unwrap();
        let store = RelationStore::open(dir.path()).unwrap();

        store.replace_all(vec![user("1", "Ann", "")]);
        for _ in 0..8 {
            store.persist().unwrap();
            // Distinct backup names and mtimes.
            std::thread::sleep(Duration::from_millis(5));
        }

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(BACKUP_PREFIX))
            .collect();
        // First persist has no prior file to back up; the rest rotate.
        assert_eq!(backups.len(), MAX_BACKUPS);
    }

    #[test]
    fn remove_rebuilds_indices_over_survivors() {
        let dir = TempDir::new().unwrap();
        let store = RelationStore::open(dir.path()).unwrap();
        store.replace_all(vec![
            user("1", "Ann", "rust"),
            user("2", "Anna", "rust"),
            user("3", "Bob", "go"),
        ]);

        let removed: HashSet<String> = ["2".to_string()].into();
        let snapshot = store.remove(&removed);

        assert_eq!(snapshot.total_count, 2);
        assert!(!snapshot.users.contains_key("2"));
        assert_eq!(snapshot.index.by_name.get("ann").unwrap(), ["1"]);
        // No empty-set keys survive a rebuild.
        assert!(snapshot.index.by_name.get("anna").is_none());
        assert_eq!(snapshot.index.by_bio_token.get("rust").unwrap(), ["1"]);
    }

    #[test]
    fn clear_removes_file_and_notifies() {
        let dir = TempDir::new().unwrap();
        let store = RelationStore::open(dir.path()).unwrap();
        store.replace_all(vec![user("1", "Ann", "")]);
        store.persist().unwrap();
        assert!(store.data_file().exists());

        let cleared = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&cleared);
        store.register_observer("counter", move |event| {
            if matches!(event, StoreEvent::SnapshotCleared) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });

        store.clear().unwrap();
        assert!(!store.data_file().exists());
        assert!(store.snapshot().is_empty());
        assert_eq!(cleared.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_observer_does_not_starve_others() {
        let dir = TempDir::new().unwrap();
        let store = RelationStore::open(dir.path()).unwrap();

        let delivered = Arc::new(AtomicUsize::new(0));
        store.register_observer("bad", |_| Err(FoloError::validation("observer exploded")));
        let seen = Arc::clone(&delivered);
        store.register_observer("good", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        store.replace_all(vec![user("1", "Ann", "")]);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_observer_stops_delivery() {
        let dir = TempDir::new().unwrap();
        let store = RelationStore::open(dir.path()).unwrap();

        let delivered = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&delivered);
        store.register_observer("counter", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        store.replace_all(vec![user("1", "Ann", "")]);
        store.unregister_observer("counter");
        store.replace_all(vec![user("2", "Anna", "")]);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn statistics_expose_index_key_counts() {
        let dir = TempDir::new().unwrap();
        let store = RelationStore::open(dir.path()).unwrap();
        store.replace_all(vec![user("12", "Ann", "rust games")]);

        let stats = store.statistics();
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.name_prefix_keys, 3); // a, an, ann
        assert_eq!(stats.id_prefix_keys, 2); // 1, 12
        assert_eq!(stats.bio_token_keys, 2); // rust, games
    }
}
