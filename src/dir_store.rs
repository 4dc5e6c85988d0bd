//! Document store backed by a synchronized folder.
//!
//! Each note is one JSON document under `<root>/notes/`, stamped with its
//! owner. The folder can be shared between devices by any file-sync tool; a
//! file system watcher republishes snapshots when another process changes it.
use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{mpsc as std_mpsc, Arc, Mutex},
};

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::remote::{snapshot_of, subscription_for, SubscriberSet};
use crate::{
    is_document_event, load_document_from_file, path_safe, JournalError, Note, RemoteStore,
    Result, SnapshotSink, StoredDocument, Subscription,
};

/// Reads the folder and fans snapshots out to listeners.
#[derive(Clone)]
struct Publisher {
    notes_dir: PathBuf,
    subscribers: Arc<Mutex<SubscriberSet>>,
}

impl Publisher {
    fn read_documents(&self) -> Vec<StoredDocument> {
        if !self.notes_dir.exists() {
            return Vec::new();
        }

        let mut documents = Vec::new();
        for entry in WalkDir::new(&self.notes_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                match load_document_from_file(path) {
                    Ok(document) => documents.push(document),
                    Err(e) => warn!("Skipping unreadable document {}: {}", path.display(), e),
                }
            }
        }
        documents
    }

    fn snapshot(&self, user_id: &str) -> Vec<Note> {
        snapshot_of(self.read_documents().iter(), user_id)
    }

    /// Sends a fresh snapshot to every subscribed user.
    fn publish_all(&self) {
        let users = match self.subscribers.lock() {
            Ok(set) => set.users(),
            Err(e) => {
                error!("Failed to acquire subscriber lock: {}", e);
                return;
            }
        };
        if users.is_empty() {
            return;
        }

        let documents = self.read_documents();
        for user in users {
            let snapshot = snapshot_of(documents.iter(), &user);
            trace!("Publishing {} notes to {}", snapshot.len(), user);
            if let Ok(mut set) = self.subscribers.lock() {
                set.publish(&user, &snapshot);
            }
        }
    }
}

/// Remote store over a synchronized folder
pub struct DirRemoteStore {
    publisher: Publisher,
    watch_changes: bool,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl DirRemoteStore {
    /// Opens (and creates if needed) the document folder under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let notes_dir = root.as_ref().join("notes");
        if !notes_dir.exists() {
            debug!("Creating document directory: {}", notes_dir.display());
            fs::create_dir_all(&notes_dir).map_err(|e| {
                error!("Failed to create document directory: {}", e);
                JournalError::DirectoryError {
                    path: notes_dir.clone(),
                }
            })?;
        }

        Ok(Self {
            publisher: Publisher {
                notes_dir,
                subscribers: Arc::new(Mutex::new(SubscriberSet::default())),
            },
            watch_changes: true,
            watcher: Mutex::new(None),
        })
    }

    /// Disables the file system watcher; only this store's own writes are
    /// published.
    pub fn without_watcher(mut self) -> Self {
        self.watch_changes = false;
        self
    }

    pub fn notes_dir(&self) -> &Path {
        &self.publisher.notes_dir
    }

    fn document_path(&self, note_id: &str) -> PathBuf {
        self.publisher
            .notes_dir
            .join(format!("{}.json", path_safe(note_id)))
    }

    fn read_existing(&self, note_id: &str) -> Result<Option<StoredDocument>> {
        let path = self.document_path(note_id);
        if !path.exists() {
            return Ok(None);
        }
        load_document_from_file(&path).map(Some)
    }

    /// Starts the folder watcher once; later calls are no-ops.
    fn ensure_watcher(&self) -> Result<()> {
        if !self.watch_changes {
            return Ok(());
        }
        let mut slot = self
            .watcher
            .lock()
            .map_err(|_| JournalError::poisoned("folder watcher"))?;
        if slot.is_some() {
            return Ok(());
        }

        // notify delivers on a std channel; bridge it into the runtime
        let (std_tx, std_rx) = std_mpsc::channel::<notify::Result<notify::Event>>();
        let (tx, mut rx) = mpsc::channel::<notify::Result<notify::Event>>(100);

        let mut watcher: RecommendedWatcher =
            Watcher::new(std_tx, notify::Config::default()).map_err(|e| JournalError::Watcher {
                message: format!("Failed to create file watcher: {}", e),
            })?;
        watcher
            .watch(&self.publisher.notes_dir, RecursiveMode::NonRecursive)
            .map_err(|e| JournalError::Watcher {
                message: format!("Failed to watch directory: {}", e),
            })?;
        *slot = Some(watcher);

        // Ends when the watcher (and with it the std sender) is dropped
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = std_rx.recv() {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
            debug!("Folder event bridge stopped");
        });

        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(event) if is_document_event(&event) => {
                        debug!("Document folder changed: {:?}", event.kind);
                        publisher.publish_all();
                    }
                    Ok(_) => {}
                    Err(e) => error!("Folder watcher error: {}", e),
                }
            }
            debug!("Folder event handler stopped");
        });

        info!(
            "Watching document folder {}",
            self.publisher.notes_dir.display()
        );
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for DirRemoteStore {
    async fn subscribe(&self, user_id: &str, sink: SnapshotSink) -> Result<Subscription> {
        if let Err(e) = self.ensure_watcher() {
            warn!("Live folder updates unavailable: {}", e);
        }

        // held across the initial send so no publish falls in between
        let mut subscribers = self
            .publisher
            .subscribers
            .lock()
            .map_err(|_| JournalError::poisoned("subscribers"))?;
        if sink.send(self.publisher.snapshot(user_id)).is_err() {
            warn!("Snapshot receiver for {} closed before subscribing", user_id);
        }
        let id = subscribers.add(user_id, sink);
        drop(subscribers);
        debug!("Folder subscription {} opened for {}", id, user_id);
        Ok(subscription_for(&self.publisher.subscribers, id))
    }

    async fn upsert(&self, note: &Note, user_id: &str) -> Result<()> {
        match self.read_existing(&note.id) {
            Ok(Some(existing)) if existing.user_id != user_id => {
                return Err(JournalError::Unauthorized {
                    id: note.id.clone(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Refusing to overwrite unreadable document {}: {}", note.id, e);
                return Err(JournalError::remote_write(
                    &note.id,
                    format!("owner of the existing document cannot be verified: {}", e),
                ));
            }
        }

        let document = StoredDocument {
            user_id: user_id.to_string(),
            note: note.clone(),
        };
        let path = self.document_path(&note.id);
        let json = serde_json::to_string_pretty(&document)?;

        let mut temp_file = NamedTempFile::new_in(&self.publisher.notes_dir)
            .map_err(|e| JournalError::remote_write(&note.id, e))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| JournalError::remote_write(&note.id, e))?;
        temp_file
            .flush()
            .map_err(|e| JournalError::remote_write(&note.id, e))?;
        temp_file
            .persist(&path)
            .map_err(|e| JournalError::remote_write(&note.id, e.error))?;

        trace!("Wrote document {}", path.display());
        self.publisher.publish_all();
        Ok(())
    }

    async fn remove(&self, note_id: &str) -> Result<()> {
        let path = self.document_path(note_id);
        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed document {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Document {} already gone", note_id)
            }
            Err(e) => return Err(JournalError::remote_write(note_id, e)),
        }
        self.publisher.publish_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time;

    fn store() -> (tempfile::TempDir, DirRemoteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DirRemoteStore::open(dir.path()).unwrap().without_watcher();
        (dir, store)
    }

    #[tokio::test]
    async fn upsert_writes_an_owned_document() {
        let (_dir, store) = store();
        let note = Note::new("walk", "by the river", vec!["outside".into()]);
        store.upsert(&note, "ada").await.unwrap();

        let doc = load_document_from_file(&store.document_path(&note.id)).unwrap();
        assert_eq!(doc.user_id, "ada");
        assert_eq!(doc.note, note);
    }

    #[tokio::test]
    async fn subscribers_see_their_own_notes_only() {
        let (_dir, store) = store();
        let theirs = Note::new("theirs", "", vec![]);
        store.upsert(&theirs, "bob").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = store.subscribe("ada", tx).await.unwrap();
        assert!(rx.recv().await.unwrap().is_empty());

        let mine = Note::new("mine", "", vec![]);
        store.upsert(&mine, "ada").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), vec![mine.clone()]);

        store.remove(&mine.id).await.unwrap();
        assert!(rx.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_owner_is_rejected() {
        let (_dir, store) = store();
        let note = Note::new("secret", "", vec![]);
        store.upsert(&note, "ada").await.unwrap();

        assert!(matches!(
            store.upsert(&note, "mallory").await,
            Err(JournalError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn unreadable_document_is_not_overwritten() {
        let (_dir, store) = store();
        let note = Note::new("mystery", "", vec![]);
        let path = store.document_path(&note.id);
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            store.upsert(&note, "ada").await,
            Err(JournalError::RemoteWrite { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn documents_written_by_another_device_are_published() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirRemoteStore::open(dir.path()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = store.subscribe("ada", tx).await.unwrap();
        assert!(rx.recv().await.unwrap().is_empty());

        let note = Note::new("from the laptop", "synced in", vec![]);
        let document = StoredDocument {
            user_id: "ada".into(),
            note: note.clone(),
        };
        fs::write(
            store.document_path(&note.id),
            serde_json::to_string_pretty(&document).unwrap(),
        )
        .unwrap();

        // the watcher may report a half-written file first
        let seen = time::timeout(Duration::from_secs(10), async {
            while let Some(snapshot) = rx.recv().await {
                if snapshot.contains(&note) {
                    return true;
                }
            }
            false
        })
        .await;
        assert!(matches!(seen, Ok(true)));
    }

    #[tokio::test]
    async fn removing_a_missing_document_is_fine() {
        let (_dir, store) = store();
        store.remove("does-not-exist").await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_documents_are_skipped() {
        let (_dir, store) = store();
        let note = Note::new("ok", "", vec![]);
        store.upsert(&note, "ada").await.unwrap();
        fs::write(store.notes_dir().join("broken.json"), "{").unwrap();

        assert_eq!(store.publisher.snapshot("ada"), vec![note]);
    }

    #[tokio::test]
    async fn snapshots_are_newest_first() {
        let (_dir, store) = store();
        let older = Note::new("older", "", vec![]);
        let newer = Note::new("newer", "", vec![]).updated(&Default::default());
        store.upsert(&older, "ada").await.unwrap();
        store.upsert(&newer, "ada").await.unwrap();

        let titles: Vec<String> = store
            .publisher
            .snapshot("ada")
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(titles, vec!["newer", "older"]);
    }
}
