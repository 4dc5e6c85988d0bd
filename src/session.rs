//! A signed-in journaling session.
//!
//! [`JournalSession`] owns one user's view of the collection: it starts from
//! the local cache, follows the remote subscription, applies local edits
//! optimistically and hands them to the save pipeline. [`Journal`] holds the
//! long-lived dependencies and re-scopes the session when the user changes.
use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;

use crate::{
    analysis_patch, append_continuation, ensure_analyzable, import_file, now_millis, project,
    AuthState, Config, InsightService, JournalError, LocalCache, Note, NotePatch, PipelineSettings,
    RemoteStore, Result, SaveStatus, SavePipeline, Subscription, SyncEvent, SyncState,
    UnloadGuard, ViewQuery,
};

struct SessionState {
    sync: SyncState,
    selected: Option<String>,
}

/// State shared with the snapshot task
struct Shared {
    user_id: String,
    cache: LocalCache,
    state: Mutex<SessionState>,
}

impl Shared {
    fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> Result<R> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| JournalError::poisoned("session state"))?;
        Ok(f(&mut state))
    }

    /// Writes the collection and its pending ids to the cache. Failures are
    /// logged; the in-memory state stays authoritative.
    fn persist(&self, state: &SessionState) {
        if let Err(e) = self.cache.save(&self.user_id, state.sync.notes()) {
            warn!("Failed to cache notes for {}: {}", self.user_id, e);
        }
        if let Err(e) = self
            .cache
            .save_pending(&self.user_id, state.sync.pending_creations())
        {
            warn!("Failed to cache pending ids for {}: {}", self.user_id, e);
        }
    }

    /// Applies a local event and caches the result.
    fn apply(&self, event: SyncEvent) -> Result<bool> {
        self.with_state(|state| {
            let changed = state.sync.apply(event);
            self.persist(state);
            changed
        })
    }
}

async fn apply_snapshots(
    shared: Arc<Shared>,
    mut snapshots: mpsc::UnboundedReceiver<Vec<Note>>,
    synced: watch::Sender<u64>,
) {
    while let Some(snapshot) = snapshots.recv().await {
        let applied = shared.with_state(|state| {
            let size = snapshot.len();
            if state.sync.apply(SyncEvent::RemoteSnapshot(snapshot)) {
                debug!("Snapshot of {} notes changed the collection", size);
            }
            if let Some(id) = state.selected.clone() {
                if state.sync.get(&id).is_none() {
                    info!("Selected note {} was removed remotely", id);
                    state.selected = None;
                }
            }
            shared.persist(state);
            state.sync.snapshots_applied()
        });

        match applied {
            Ok(count) => {
                synced.send_replace(count);
            }
            Err(e) => {
                error!("Stopping snapshot processing: {}", e);
                break;
            }
        }
    }
    debug!("Snapshot task for {} finished", shared.user_id);
}

/// One user's live journal
pub struct JournalSession {
    shared: Arc<Shared>,
    remote: Arc<dyn RemoteStore>,
    insights: Option<Arc<dyn InsightService>>,
    pipeline: SavePipeline,
    subscription: Option<Subscription>,
    snapshot_task: Option<JoinHandle<()>>,
    synced: watch::Receiver<u64>,
}

impl JournalSession {
    /// Loads the cached collection for `user_id` and subscribes to the
    /// remote store.
    pub async fn start(
        user_id: &str,
        cache: LocalCache,
        remote: Arc<dyn RemoteStore>,
        insights: Option<Arc<dyn InsightService>>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        let cached = cache.load(user_id);
        let pending = cache.load_pending(user_id);
        info!(
            "Starting session for {} with {} cached notes ({} unsynced)",
            user_id,
            cached.len(),
            pending.len()
        );

        let shared = Arc::new(Shared {
            user_id: user_id.to_string(),
            cache,
            state: Mutex::new(SessionState {
                sync: SyncState::from_cache(cached, pending),
                selected: None,
            }),
        });

        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let subscription = remote.subscribe(user_id, snapshot_tx).await?;

        let (synced_tx, synced_rx) = watch::channel(0u64);
        let snapshot_task = tokio::spawn(apply_snapshots(
            Arc::clone(&shared),
            snapshot_rx,
            synced_tx,
        ));

        let pipeline = SavePipeline::start(Arc::clone(&remote), settings);

        Ok(Self {
            shared,
            remote,
            insights,
            pipeline,
            subscription: Some(subscription),
            snapshot_task: Some(snapshot_task),
            synced: synced_rx,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.shared.user_id
    }

    /// The whole collection in its stored order
    pub fn notes(&self) -> Result<Vec<Note>> {
        self.shared.with_state(|state| state.sync.notes().to_vec())
    }

    pub fn note(&self, id: &str) -> Result<Note> {
        self.shared
            .with_state(|state| state.sync.get(id).cloned())?
            .ok_or_else(|| JournalError::NoteNotFound { id: id.to_string() })
    }

    /// The collection filtered and ordered by `query`
    pub fn view(&self, query: &ViewQuery) -> Result<Vec<Note>> {
        self.shared
            .with_state(|state| project(state.sync.notes(), query))
    }

    /// Adds `note` and writes it to the remote store right away.
    ///
    /// A failed write is logged; the note stays in the collection as pending
    /// and is kept by later snapshots.
    pub async fn create_note(&self, note: Note) -> Result<Note> {
        self.shared.apply(SyncEvent::LocalCreate(note.clone()))?;
        debug!("Created note {}", note.id);

        if let Err(e) = self.remote.upsert(&note, self.user_id()).await {
            warn!("Note {} is saved locally only: {}", note.id, e);
        }
        Ok(note)
    }

    /// Applies `patch` locally and schedules a debounced remote write.
    pub async fn update_note(&self, id: &str, patch: &NotePatch) -> Result<Note> {
        let updated = self.note(id)?.updated(patch);
        self.shared.apply(SyncEvent::LocalEdit(updated.clone()))?;
        self.pipeline.schedule(updated.clone(), self.user_id());
        Ok(updated)
    }

    /// Flips the favorite flag and writes the note directly.
    ///
    /// `updated_at` is not touched and a failed write is not rolled back.
    pub async fn toggle_favorite(&self, id: &str) -> Result<Note> {
        // a pending debounced write still holds the old flag
        self.pipeline.flush().await;

        let toggled = self.note(id)?.with_favorite_toggled();
        self.shared.apply(SyncEvent::LocalEdit(toggled.clone()))?;

        if let Err(e) = self.remote.upsert(&toggled, self.user_id()).await {
            warn!("Favorite change of {} not saved remotely: {}", id, e);
        }
        Ok(toggled)
    }

    /// Removes the note locally and from the remote store.
    ///
    /// Any pending save of the note is dropped and the selection is cleared
    /// if it pointed at the note. The remote delete is issued only after a
    /// save of the note already in flight has landed. A failed remote delete
    /// is logged only.
    pub async fn delete_note(&self, id: &str) -> Result<()> {
        self.note(id)?;

        self.shared.with_state(|state| {
            state.sync.apply(SyncEvent::OptimisticDelete(id.to_string()));
            if state.selected.as_deref() == Some(id) {
                state.selected = None;
            }
            self.shared.persist(state);
        })?;
        info!("Deleted note {}", id);

        self.pipeline.cancel(id).await;

        if let Err(e) = self.remote.remove(id).await {
            warn!("Remote delete of {} failed: {}", id, e);
        }
        Ok(())
    }

    pub fn select(&self, id: &str) -> Result<()> {
        self.shared.with_state(|state| {
            if state.sync.get(id).is_none() {
                return Err(JournalError::NoteNotFound { id: id.to_string() });
            }
            state.selected = Some(id.to_string());
            Ok(())
        })?
    }

    /// The selected note, if it still exists
    pub fn selected(&self) -> Result<Option<Note>> {
        self.shared.with_state(|state| {
            state
                .selected
                .as_deref()
                .and_then(|id| state.sync.get(id))
                .cloned()
        })
    }

    pub fn clear_selection(&self) -> Result<()> {
        self.shared.with_state(|state| state.selected = None)
    }

    /// Creates an entry from a text or `.docx` file, dated from its content
    /// when a date is found there.
    pub async fn import_file(&self, path: &Path) -> Result<Note> {
        let imported = import_file(path)?;
        let note = Note::imported(imported.title, imported.text, imported.created_at);
        self.create_note(note).await
    }

    /// Runs mood analysis on the note's content and records the result.
    pub async fn analyze_note(&self, id: &str) -> Result<Note> {
        let insights = self.insights.as_ref().ok_or_else(|| JournalError::Analysis {
            message: "no insight service is configured".to_string(),
        })?;

        let content = self.note(id)?.content;
        ensure_analyzable(&content)?;
        let analysis = insights.analyze(&content).await?;
        info!("Note {} reads as {}", id, analysis.mood);

        // the note may have changed while the request was out
        let current = self.note(id)?;
        let patch = analysis_patch(&current, &analysis, now_millis());
        self.update_note(id, &patch).await
    }

    /// Appends a generated continuation to the note's content.
    ///
    /// Any failure leaves the note unchanged.
    pub async fn continue_note(&self, id: &str) -> Result<Note> {
        let note = self.note(id)?;
        let Some(insights) = self.insights.as_ref() else {
            warn!("No insight service configured; nothing appended");
            return Ok(note);
        };

        let continuation = match insights.continue_text(&note.content).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Continuation of {} failed: {}", id, e);
                return Ok(note);
            }
        };

        let current = self.note(id)?;
        let content = append_continuation(&current.content, &continuation);
        if content == current.content {
            return Ok(current);
        }
        self.update_note(
            id,
            &NotePatch {
                content: Some(content),
                ..Default::default()
            },
        )
        .await
    }

    pub fn save_status(&self) -> SaveStatus {
        self.pipeline.status()
    }

    pub fn status_updates(&self) -> watch::Receiver<SaveStatus> {
        self.pipeline.subscribe()
    }

    pub fn unload_guard(&self) -> UnloadGuard {
        self.pipeline.unload_guard()
    }

    /// Number of remote snapshots applied so far
    pub fn snapshots_applied(&self) -> u64 {
        *self.synced.borrow()
    }

    /// Waits until at least `count` remote snapshots have been applied.
    pub async fn wait_for_snapshots(&self, count: u64) -> Result<()> {
        let mut synced = self.synced.clone();
        synced
            .wait_for(|applied| *applied >= count)
            .await
            .map(|_| ())
            .map_err(|_| JournalError::ApplicationError {
                message: "Snapshot processing stopped".to_string(),
            })
    }

    /// Waits for the first remote snapshot.
    pub async fn wait_until_synced(&self) -> Result<()> {
        self.wait_for_snapshots(1).await
    }

    /// Writes pending edits, unsubscribes and waits for the snapshot task.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.pipeline.shutdown().await?;

        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }

        if let Some(task) = self.snapshot_task.take() {
            match time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Snapshot task failed: {}", e),
                Err(_) => warn!("Timed out waiting for snapshot task"),
            }
        }

        self.shared.with_state(|state| self.shared.persist(state))?;
        info!("Session for {} closed", self.user_id());
        Ok(())
    }
}

/// Long-lived dependencies plus the session of the signed-in user
pub struct Journal {
    config: Config,
    cache: LocalCache,
    remote: Arc<dyn RemoteStore>,
    insights: Option<Arc<dyn InsightService>>,
    identity: watch::Receiver<Option<String>>,
    session: Option<JournalSession>,
}

impl Journal {
    /// Creates a journal scoped to whoever `auth` reports as signed in.
    ///
    /// No session is open until [`Journal::sync_identity`] or
    /// [`Journal::identity_changed`] runs.
    pub fn new(
        config: Config,
        remote: Arc<dyn RemoteStore>,
        insights: Option<Arc<dyn InsightService>>,
        auth: &AuthState,
    ) -> Self {
        let cache = LocalCache::new(config.cache_dir.clone());
        Self {
            config,
            cache,
            remote,
            insights,
            identity: auth.subscribe(),
            session: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Scopes the session to the identity currently signed in.
    pub async fn sync_identity(&mut self) -> Result<()> {
        let user = self.identity.borrow_and_update().clone();
        self.rescope(user).await
    }

    /// Waits for the next sign-in or sign-out and re-scopes to it.
    pub async fn identity_changed(&mut self) -> Result<()> {
        self.identity
            .changed()
            .await
            .map_err(|_| JournalError::ApplicationError {
                message: "Identity source is gone".to_string(),
            })?;
        self.sync_identity().await
    }

    /// Switches to `user`, closing the previous user's session first.
    ///
    /// `None` leaves no session open.
    async fn rescope(&mut self, user: Option<String>) -> Result<()> {
        let current = self.session.as_ref().map(|s| s.user_id().to_string());
        if current == user {
            return Ok(());
        }

        if let Some(mut previous) = self.session.take() {
            previous.shutdown().await?;
        }

        if let Some(user_id) = user {
            let session = JournalSession::start(
                &user_id,
                self.cache.clone(),
                Arc::clone(&self.remote),
                self.insights.clone(),
                PipelineSettings::from(&self.config),
            )
            .await?;
            self.session = Some(session);
        }
        Ok(())
    }

    /// Session of the signed-in user
    pub fn session(&self) -> Result<&JournalSession> {
        self.session.as_ref().ok_or(JournalError::NotSignedIn)
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.rescope(None).await
    }
}
