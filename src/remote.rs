//! Remote document store port.
//!
//! The sync core talks to the cloud store only through [`RemoteStore`]. A
//! subscription delivers the complete set of a user's notes on every change,
//! never a diff.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{JournalError, Note, Result};

/// Receives full snapshots of a user's notes.
pub type SnapshotSink = mpsc::UnboundedSender<Vec<Note>>;

/// A note as persisted remotely, stamped with its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub user_id: String,
    #[serde(flatten)]
    pub note: Note,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Starts a live query over the notes owned by `user_id`.
    ///
    /// The current set is delivered right away and again after every change.
    async fn subscribe(&self, user_id: &str, sink: SnapshotSink) -> Result<Subscription>;

    /// Writes one note, stamped with `user_id`.
    async fn upsert(&self, note: &Note, user_id: &str) -> Result<()>;

    /// Deletes one note by id.
    async fn remove(&self, note_id: &str) -> Result<()>;
}

/// Handle to a live query. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stops snapshot delivery
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

/// Live snapshot listeners, keyed by subscription id.
#[derive(Default)]
pub(crate) struct SubscriberSet {
    next_id: u64,
    entries: HashMap<u64, (String, SnapshotSink)>,
}

impl SubscriberSet {
    pub(crate) fn add(&mut self, user_id: &str, sink: SnapshotSink) -> u64 {
        self.next_id += 1;
        self.entries
            .insert(self.next_id, (user_id.to_string(), sink));
        self.next_id
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Users with at least one listener
    pub(crate) fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.entries.values().map(|(u, _)| u.clone()).collect();
        users.sort();
        users.dedup();
        users
    }

    /// Sends `snapshot` to every listener of `user_id`, pruning closed ones.
    pub(crate) fn publish(&mut self, user_id: &str, snapshot: &[Note]) {
        self.entries.retain(|id, (owner, sink)| {
            if owner != user_id {
                return true;
            }
            match sink.send(snapshot.to_vec()) {
                Ok(()) => true,
                Err(_) => {
                    debug!("Dropping closed subscription {}", id);
                    false
                }
            }
        });
    }
}

/// Builds a subscription handle that removes `id` from `subscribers`.
pub(crate) fn subscription_for(subscribers: &Arc<Mutex<SubscriberSet>>, id: u64) -> Subscription {
    let subscribers = Arc::clone(subscribers);
    Subscription::new(move || match subscribers.lock() {
        Ok(mut set) => {
            if set.remove(id) {
                debug!("Subscription {} closed", id);
            }
        }
        Err(e) => warn!("Failed to acquire subscriber lock on unsubscribe: {}", e),
    })
}

/// Orders a user's notes the way snapshots are delivered: newest first.
pub(crate) fn snapshot_of<'a>(
    documents: impl Iterator<Item = &'a StoredDocument>,
    user_id: &str,
) -> Vec<Note> {
    let mut notes: Vec<Note> = documents
        .filter(|doc| doc.user_id == user_id)
        .map(|doc| doc.note.clone())
        .collect();
    notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    notes
}

#[derive(Default)]
struct MemoryDocuments {
    documents: HashMap<String, StoredDocument>,
    fail_writes: bool,
    write_log: Vec<(String, Note)>,
    remove_log: Vec<String>,
}

/// In-process document store.
///
/// Behaves like the cloud store from the client's point of view: owner
/// filtering, full snapshots and per-document last write wins.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    state: Arc<Mutex<MemoryDocuments>>,
    subscribers: Arc<Mutex<SubscriberSet>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following upsert and remove fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) -> Result<()> {
        self.state
            .lock()
            .map_err(|_| JournalError::poisoned("memory store"))?
            .fail_writes = fail;
        Ok(())
    }

    /// Every successful upsert so far, oldest first.
    pub fn writes(&self) -> Vec<(String, Note)> {
        self.state
            .lock()
            .map(|s| s.write_log.clone())
            .unwrap_or_default()
    }

    /// Ids of every successful remove so far.
    pub fn removals(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.remove_log.clone())
            .unwrap_or_default()
    }

    /// The notes currently stored for `user_id`, newest first.
    pub fn documents_for(&self, user_id: &str) -> Vec<Note> {
        self.state
            .lock()
            .map(|s| snapshot_of(s.documents.values(), user_id))
            .unwrap_or_default()
    }

    fn publish(&self, user_id: &str) -> Result<()> {
        let snapshot = {
            let state = self
                .state
                .lock()
                .map_err(|_| JournalError::poisoned("memory store"))?;
            snapshot_of(state.documents.values(), user_id)
        };
        self.subscribers
            .lock()
            .map_err(|_| JournalError::poisoned("subscribers"))?
            .publish(user_id, &snapshot);
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn subscribe(&self, user_id: &str, sink: SnapshotSink) -> Result<Subscription> {
        // held across the initial send so no publish falls in between
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| JournalError::poisoned("subscribers"))?;
        if sink.send(self.documents_for(user_id)).is_err() {
            warn!("Snapshot receiver for {} closed before subscribing", user_id);
        }
        let id = subscribers.add(user_id, sink);
        drop(subscribers);
        debug!("Subscription {} opened for {}", id, user_id);
        Ok(subscription_for(&self.subscribers, id))
    }

    async fn upsert(&self, note: &Note, user_id: &str) -> Result<()> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| JournalError::poisoned("memory store"))?;
            if state.fail_writes {
                return Err(JournalError::remote_write(&note.id, "store unavailable"));
            }
            if let Some(existing) = state.documents.get(&note.id) {
                if existing.user_id != user_id {
                    return Err(JournalError::Unauthorized {
                        id: note.id.clone(),
                    });
                }
            }
            trace!("Upserting note {} for {}", note.id, user_id);
            state.documents.insert(
                note.id.clone(),
                StoredDocument {
                    user_id: user_id.to_string(),
                    note: note.clone(),
                },
            );
            state.write_log.push((user_id.to_string(), note.clone()));
        }
        self.publish(user_id)
    }

    async fn remove(&self, note_id: &str) -> Result<()> {
        let owner = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| JournalError::poisoned("memory store"))?;
            if state.fail_writes {
                return Err(JournalError::remote_write(note_id, "store unavailable"));
            }
            state.remove_log.push(note_id.to_string());
            state.documents.remove(note_id).map(|doc| doc.user_id)
        };
        match owner {
            Some(owner) => self.publish(&owner),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_delivers_initial_and_changed_snapshots() {
        let store = MemoryRemoteStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = store.subscribe("ada", tx).await.unwrap();

        assert!(rx.recv().await.unwrap().is_empty());

        let note = Note::new("hello", "world", vec![]);
        store.upsert(&note, "ada").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), vec![note.clone()]);

        store.remove(&note.id).await.unwrap();
        assert!(rx.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshots_are_filtered_by_owner() {
        let store = MemoryRemoteStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = store.subscribe("ada", tx).await.unwrap();
        rx.recv().await.unwrap();

        store.upsert(&Note::new("bob's", "", vec![]), "bob").await.unwrap();
        let mine = Note::new("ada's", "", vec![]);
        store.upsert(&mine, "ada").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), vec![mine]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn write_racing_a_subscribe_is_delivered() {
        for _ in 0..50 {
            let store = MemoryRemoteStore::new();
            let note = Note::new("racer", "", vec![]);
            let writer = {
                let store = store.clone();
                let note = note.clone();
                tokio::spawn(async move { store.upsert(&note, "ada").await })
            };

            let (tx, mut rx) = mpsc::unbounded_channel();
            let _subscription = store.subscribe("ada", tx).await.unwrap();
            writer.await.unwrap().unwrap();

            let mut latest = Vec::new();
            while let Ok(snapshot) = rx.try_recv() {
                latest = snapshot;
            }
            assert_eq!(latest, vec![note]);
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let store = MemoryRemoteStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = store.subscribe("ada", tx).await.unwrap();
        rx.recv().await.unwrap();

        subscription.unsubscribe();
        store.upsert(&Note::new("late", "", vec![]), "ada").await.unwrap();

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_handle_unsubscribes() {
        let store = MemoryRemoteStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(store.subscribe("ada", tx).await.unwrap());
        rx.recv().await.unwrap();

        assert!(store.subscribers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_documents_cannot_be_overwritten() {
        let store = MemoryRemoteStore::new();
        let note = Note::new("private", "", vec![]);
        store.upsert(&note, "ada").await.unwrap();

        let result = store.upsert(&note, "mallory").await;
        assert!(matches!(result, Err(JournalError::Unauthorized { .. })));
        assert_eq!(store.documents_for("ada"), vec![note]);
    }

    #[tokio::test]
    async fn failing_writes_surface_remote_write_errors() {
        let store = MemoryRemoteStore::new();
        store.set_fail_writes(true).unwrap();
        let note = Note::new("t", "", vec![]);

        assert!(matches!(
            store.upsert(&note, "ada").await,
            Err(JournalError::RemoteWrite { .. })
        ));
        assert!(matches!(
            store.remove(&note.id).await,
            Err(JournalError::RemoteWrite { .. })
        ));
        assert!(store.writes().is_empty());
    }

    #[test]
    fn stored_document_flattens_the_note() {
        let note = Note::new("t", "c", vec![]);
        let doc = StoredDocument {
            user_id: "ada".into(),
            note: note.clone(),
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["userId"], "ada");
        assert_eq!(value["id"], note.id.as_str());
        let back: StoredDocument = serde_json::from_value(value).unwrap();
        assert_eq!(back, doc);
    }
}
