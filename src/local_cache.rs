//! Per-user snapshot of the note collection on local disk.
//!
//! The cache lets a session render notes before the first remote snapshot
//! arrives and keeps them available without network access. Each user's
//! collection lives in one JSON file named after its cache key.
use std::{
    collections::HashSet,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use log::{debug, error, info, trace, warn};
use tempfile::NamedTempFile;

use crate::{path_safe, JournalError, Note, Result};

/// Namespace prefix of every per-user cache key
pub const CACHE_KEY_PREFIX: &str = "moodnotes-notes";

/// Key used before caches were scoped per user. Read once, never written.
pub const LEGACY_CACHE_KEY: &str = "moodnotes-notes";

/// Cache key for `user_id`
pub fn cache_key(user_id: &str) -> String {
    format!("{}-{}", CACHE_KEY_PREFIX, path_safe(user_id))
}

/// Manages the cached note collections
#[derive(Debug, Clone)]
pub struct LocalCache {
    dir: PathBuf,
}

impl LocalCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Returns the last cached collection for `user_id`.
    ///
    /// Falls back to the legacy entry when the user has no entry yet. Missing
    /// or corrupt data yields an empty collection.
    pub fn load(&self, user_id: &str) -> Vec<Note> {
        let key = cache_key(user_id);
        match self.read_entry(&key) {
            Ok(Some(notes)) => {
                debug!("Loaded {} cached notes for {}", notes.len(), user_id);
                return notes;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Discarding cache entry {}: {}", key, e);
                return Vec::new();
            }
        }

        match self.read_entry(LEGACY_CACHE_KEY) {
            Ok(Some(notes)) => {
                info!(
                    "Adopted {} notes from legacy cache entry for {}",
                    notes.len(),
                    user_id
                );
                notes
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Ignoring legacy cache entry: {}", e);
                Vec::new()
            }
        }
    }

    fn read_entry(&self, key: &str) -> Result<Option<Vec<Note>>> {
        let path = self.entry_path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(JournalError::Io(e)),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| JournalError::Parse {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    /// Overwrites the cached collection for `user_id`.
    ///
    /// The entry is replaced atomically, so a crash mid-write leaves the
    /// previous snapshot intact.
    pub fn save(&self, user_id: &str, notes: &[Note]) -> Result<()> {
        let key = cache_key(user_id);
        let path = self.entry_path(&key);
        trace!("Writing {} notes to {}", notes.len(), path.display());

        if !self.dir.exists() {
            debug!("Creating cache directory: {}", self.dir.display());
            fs::create_dir_all(&self.dir).map_err(|e| {
                error!("Failed to create cache directory: {}", e);
                JournalError::DirectoryError {
                    path: self.dir.clone(),
                }
            })?;
        }

        let mut temp_file = NamedTempFile::new_in(&self.dir).map_err(|e| {
            error!("Failed to create temporary cache file: {}", e);
            JournalError::Io(e)
        })?;
        let json = serde_json::to_string(notes)?;
        temp_file.write_all(json.as_bytes())?;
        temp_file.flush()?;
        temp_file.persist(&path).map_err(|e| {
            error!("Failed to persist cache file {}: {}", path.display(), e.error);
            JournalError::Io(e.error)
        })?;

        Ok(())
    }

    /// Ids of notes created on this device that the remote store had not
    /// confirmed when the collection was last cached.
    pub fn load_pending(&self, user_id: &str) -> HashSet<String> {
        let path = self.pending_path(user_id);
        match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding pending list {}: {}", path.display(), e);
                HashSet::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                warn!("Failed to read pending list {}: {}", path.display(), e);
                HashSet::new()
            }
        }
    }

    pub fn save_pending(&self, user_id: &str, ids: &HashSet<String>) -> Result<()> {
        let path = self.pending_path(user_id);
        if ids.is_empty() {
            return match fs::remove_file(&path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(JournalError::Io(e)),
                _ => Ok(()),
            };
        }
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|_| JournalError::DirectoryError {
                path: self.dir.clone(),
            })?;
        }
        let mut sorted: Vec<&String> = ids.iter().collect();
        sorted.sort();
        fs::write(&path, serde_json::to_string(&sorted)?)?;
        Ok(())
    }

    fn pending_path(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.pending.json", cache_key(user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NotePatch;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        let first = Note::new("one", "first", vec!["a".into()]);
        let second = Note::new("two", "second", vec![]).updated(&NotePatch {
            ai_summary: Some("short".into()),
            ..Default::default()
        });
        let notes = vec![first, second.with_favorite_toggled()];

        cache.save("user-1", &notes).unwrap();
        assert_eq!(cache.load("user-1"), notes);
    }

    #[test]
    fn users_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        cache.save("alice", &[Note::new("mine", "", vec![])]).unwrap();

        assert!(cache.load("bob").is_empty());
        assert_eq!(cache.load("alice").len(), 1);
    }

    #[test]
    fn missing_cache_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path().join("never-created"));
        assert!(cache.load("anyone").is_empty());
    }

    #[test]
    fn corrupt_cache_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        fs::write(dir.path().join(format!("{}.json", cache_key("u"))), "[{oops").unwrap();

        assert!(cache.load("u").is_empty());
    }

    #[test]
    fn legacy_entry_is_adopted_without_being_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        let legacy = vec![Note::new("old", "from before", vec![])];
        let legacy_path = dir.path().join(format!("{}.json", LEGACY_CACHE_KEY));
        fs::write(&legacy_path, serde_json::to_string(&legacy).unwrap()).unwrap();

        assert_eq!(cache.load("u"), legacy);
        assert!(legacy_path.exists());

        cache.save("u", &[]).unwrap();
        assert!(cache.load("u").is_empty());
        let untouched: Vec<Note> =
            serde_json::from_str(&fs::read_to_string(&legacy_path).unwrap()).unwrap();
        assert_eq!(untouched, legacy);
    }

    #[test]
    fn pending_ids_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        let ids: HashSet<String> = ["a".to_string(), "b".to_string()].into();

        cache.save_pending("u", &ids).unwrap();
        assert_eq!(cache.load_pending("u"), ids);
        assert!(cache.load("u").is_empty());

        cache.save_pending("u", &HashSet::new()).unwrap();
        assert!(cache.load_pending("u").is_empty());
    }

    #[test]
    fn keys_are_namespaced_and_path_safe() {
        assert_eq!(cache_key("abc"), "moodnotes-notes-abc");
        assert_eq!(cache_key("a/b:c"), "moodnotes-notes-a_b_c");
    }
}
