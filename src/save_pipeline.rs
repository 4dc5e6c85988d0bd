//! Debounced remote writes with a visible status.
//!
//! Edits are coalesced per pause in typing: scheduling a note (re)starts a
//! quiet period, and only the last value scheduled before it elapses is
//! written. Status moves `Idle -> Saving -> Saved -> Idle`, or `Saving ->
//! Error` on a failed write. Failed writes are not retried.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, error, info, trace, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::{Config, JournalError, Note, RemoteStore, Result, SaveStatus};

/// Timing of the pipeline
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Quiet period after the last edit before writing
    pub quiet_period: Duration,
    /// How long `Saved` is shown before returning to `Idle`
    pub saved_display: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(500),
            saved_display: Duration::from_secs(2),
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            quiet_period: config.save_debounce(),
            saved_display: config.saved_display(),
        }
    }
}

#[derive(Debug)]
enum SaveCommand {
    /// Write `note` for `user_id` once the quiet period passes
    Schedule { note: Note, user_id: String },
    /// Forget a pending write of this note; acknowledged once no write of it
    /// is in flight
    Cancel {
        note_id: String,
        ack: oneshot::Sender<()>,
    },
    /// Write anything pending now; acknowledged once nothing is in flight
    Flush(oneshot::Sender<()>),
    Stop,
}

struct WriteOutcome {
    note_id: String,
    result: Result<()>,
}

/// Exit-confirmation hook.
///
/// Armed exactly while a write is scheduled or in flight. It reads the live
/// status, so it can never outlive the busy period it guards.
#[derive(Clone)]
pub struct UnloadGuard {
    status: watch::Receiver<SaveStatus>,
}

impl UnloadGuard {
    /// Whether leaving now could lose an edit
    pub fn is_armed(&self) -> bool {
        self.status.borrow().is_busy()
    }

    /// Waits until no write is scheduled or in flight and returns the status
    /// reached.
    pub async fn wait_until_settled(&mut self) -> SaveStatus {
        let settled = match self.status.wait_for(|s| !s.is_busy()).await {
            Ok(status) => Some(*status),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| *self.status.borrow())
    }
}

/// Handle to the background save task
pub struct SavePipeline {
    command_tx: mpsc::UnboundedSender<SaveCommand>,
    status_tx: Arc<watch::Sender<SaveStatus>>,
    /// Edits handed to `schedule` so far
    scheduled: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl SavePipeline {
    /// Spawns the save task on the current runtime
    pub fn start(remote: Arc<dyn RemoteStore>, settings: PipelineSettings) -> Self {
        debug!("Starting save pipeline with {:?}", settings);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(SaveStatus::Idle);
        let status_tx = Arc::new(status_tx);
        let scheduled = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run_pipeline(
            remote,
            settings,
            command_rx,
            Arc::clone(&status_tx),
            Arc::clone(&scheduled),
        ));

        Self {
            command_tx,
            status_tx,
            scheduled,
            task: Some(task),
        }
    }

    /// Schedules a write of `note` owned by `user_id`.
    ///
    /// The status is `Saving` when this returns. A pending write of the same
    /// note is replaced; a pending write of another note is sent right away.
    pub fn schedule(&self, note: Note, user_id: &str) {
        // counted before the status flips so the task never settles over it
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        self.status_tx.send_replace(SaveStatus::Saving);
        let command = SaveCommand::Schedule {
            note,
            user_id: user_id.to_string(),
        };
        if self.command_tx.send(command).is_err() {
            error!("Save pipeline is not running; edit was not scheduled");
            self.status_tx.send_replace(SaveStatus::Error);
        }
    }

    /// Drops a pending write of `note_id`, if any, and waits until no write
    /// of it is in flight.
    pub async fn cancel(&self, note_id: &str) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let command = SaveCommand::Cancel {
            note_id: note_id.to_string(),
            ack: ack_tx,
        };
        if self.command_tx.send(command).is_err() {
            debug!("Save pipeline stopped; nothing to cancel");
            return;
        }
        if ack_rx.await.is_err() {
            warn!("Save pipeline stopped before acknowledging cancel of {}", note_id);
        }
    }

    /// Writes any pending note immediately and waits until no write is in
    /// flight.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command_tx.send(SaveCommand::Flush(ack_tx)).is_err() {
            return;
        }
        if ack_rx.await.is_err() {
            warn!("Save pipeline stopped before acknowledging flush");
        }
    }

    pub fn status(&self) -> SaveStatus {
        *self.status_tx.borrow()
    }

    /// Receiver observing every status change
    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.status_tx.subscribe()
    }

    pub fn unload_guard(&self) -> UnloadGuard {
        UnloadGuard {
            status: self.status_tx.subscribe(),
        }
    }

    /// Writes anything pending, then stops the task
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            debug!("Save pipeline is not running");
            return Ok(());
        };

        if self.command_tx.send(SaveCommand::Stop).is_err() {
            debug!("Save pipeline already stopped");
        }

        match time::timeout(Duration::from_secs(5), task).await {
            Ok(Ok(())) => {
                info!("Save pipeline stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(JournalError::ApplicationError {
                message: format!("Save pipeline task failed: {}", e),
            }),
            Err(_) => Err(JournalError::ApplicationError {
                message: "Timed out waiting for pending saves".to_string(),
            }),
        }
    }
}

impl Drop for SavePipeline {
    fn drop(&mut self) {
        if self.task.is_some() {
            // let the task drain on its own
            let _ = self.command_tx.send(SaveCommand::Stop);
        }
    }
}

/// Writes in flight, counted per note
struct Writes {
    remote: Arc<dyn RemoteStore>,
    done_tx: mpsc::UnboundedSender<WriteOutcome>,
    by_note: HashMap<String, usize>,
    total: usize,
}

impl Writes {
    fn start(&mut self, note: Note, user_id: String) {
        trace!("Writing note {} for {}", note.id, user_id);
        *self.by_note.entry(note.id.clone()).or_default() += 1;
        self.total += 1;

        let remote = Arc::clone(&self.remote);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = remote.upsert(&note, &user_id).await;
            let _ = done_tx.send(WriteOutcome {
                note_id: note.id,
                result,
            });
        });
    }

    fn finish(&mut self, note_id: &str) {
        self.total = self.total.saturating_sub(1);
        if let Some(count) = self.by_note.get_mut(note_id) {
            *count -= 1;
            if *count == 0 {
                self.by_note.remove(note_id);
            }
        }
    }

    fn is_writing(&self, note_id: &str) -> bool {
        self.by_note.contains_key(note_id)
    }
}

/// Publishes a settled status unless an edit was scheduled after the last
/// one the task has seen. The check runs under the channel lock, so a
/// concurrent `schedule` always leaves `Saving` behind.
fn settle(
    status_tx: &watch::Sender<SaveStatus>,
    scheduled: &AtomicU64,
    seen: u64,
    next: SaveStatus,
) -> bool {
    let mut applied = false;
    status_tx.send_if_modified(|status| {
        if scheduled.load(Ordering::SeqCst) != seen {
            return false;
        }
        applied = true;
        let changed = *status != next;
        *status = next;
        changed
    });
    applied
}

async fn run_pipeline(
    remote: Arc<dyn RemoteStore>,
    settings: PipelineSettings,
    mut command_rx: mpsc::UnboundedReceiver<SaveCommand>,
    status_tx: Arc<watch::Sender<SaveStatus>>,
    scheduled: Arc<AtomicU64>,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<WriteOutcome>();
    let mut writes = Writes {
        remote,
        done_tx,
        by_note: HashMap::new(),
        total: 0,
    };
    let mut pending: Option<(Note, String)> = None;
    let mut seen: u64 = 0;
    let mut flush_waiters: Vec<oneshot::Sender<()>> = Vec::new();
    let mut cancel_waiters: Vec<(String, oneshot::Sender<()>)> = Vec::new();
    let mut stopping = false;

    let deadline = time::sleep(settings.quiet_period);
    tokio::pin!(deadline);
    let back_to_idle = time::sleep(settings.saved_display);
    tokio::pin!(back_to_idle);
    let mut showing_saved = false;

    loop {
        tokio::select! {
            command = command_rx.recv(), if !stopping => match command {
                Some(SaveCommand::Schedule { note, user_id }) => {
                    seen += 1;
                    if let Some((previous, previous_user)) = pending.take() {
                        if previous.id != note.id {
                            debug!("Switching notes; writing {} now", previous.id);
                            writes.start(previous, previous_user);
                        }
                    }
                    pending = Some((note, user_id));
                    deadline.as_mut().reset(Instant::now() + settings.quiet_period);
                    showing_saved = false;
                }
                Some(SaveCommand::Cancel { note_id, ack }) => {
                    if pending.as_ref().is_some_and(|(note, _)| note.id == note_id) {
                        debug!("Cancelled pending write of {}", note_id);
                        pending = None;
                        if writes.total == 0 {
                            settle(&status_tx, &scheduled, seen, SaveStatus::Idle);
                        }
                    }
                    if writes.is_writing(&note_id) {
                        debug!("Waiting for in-flight write of {}", note_id);
                        cancel_waiters.push((note_id, ack));
                    } else {
                        let _ = ack.send(());
                    }
                }
                Some(SaveCommand::Flush(ack)) => {
                    if let Some((note, user_id)) = pending.take() {
                        writes.start(note, user_id);
                    }
                    if writes.total == 0 {
                        let _ = ack.send(());
                    } else {
                        flush_waiters.push(ack);
                    }
                }
                Some(SaveCommand::Stop) | None => {
                    debug!("Save pipeline stopping");
                    stopping = true;
                    if let Some((note, user_id)) = pending.take() {
                        writes.start(note, user_id);
                    }
                    if writes.total == 0 {
                        break;
                    }
                }
            },

            _ = &mut deadline, if pending.is_some() => {
                if let Some((note, user_id)) = pending.take() {
                    writes.start(note, user_id);
                }
            }

            Some(outcome) = done_rx.recv() => {
                writes.finish(&outcome.note_id);
                let settled = pending.is_none() && writes.total == 0;
                match outcome.result {
                    Ok(()) => {
                        info!("Saved note {}", outcome.note_id);
                        if settled && settle(&status_tx, &scheduled, seen, SaveStatus::Saved) {
                            back_to_idle
                                .as_mut()
                                .reset(Instant::now() + settings.saved_display);
                            showing_saved = true;
                        }
                    }
                    Err(e) => {
                        error!("Failed to save note {}: {}", outcome.note_id, e);
                        // a newer write is already scheduled and keeps the status at Saving
                        if pending.is_none() && settle(&status_tx, &scheduled, seen, SaveStatus::Error) {
                            showing_saved = false;
                        }
                    }
                }

                let (finished, waiting): (Vec<_>, Vec<_>) = cancel_waiters
                    .drain(..)
                    .partition(|(note_id, _)| !writes.is_writing(note_id));
                cancel_waiters = waiting;
                for (_, ack) in finished {
                    let _ = ack.send(());
                }

                if settled {
                    for waiter in flush_waiters.drain(..) {
                        let _ = waiter.send(());
                    }
                    if stopping {
                        break;
                    }
                }
            }

            _ = &mut back_to_idle, if showing_saved => {
                showing_saved = false;
                status_tx.send_if_modified(|status| {
                    let saved = *status == SaveStatus::Saved;
                    if saved {
                        *status = SaveStatus::Idle;
                    }
                    saved
                });
            }
        }
    }

    for waiter in flush_waiters.drain(..) {
        let _ = waiter.send(());
    }
    for (_, waiter) in cancel_waiters.drain(..) {
        let _ = waiter.send(());
    }
    debug!("Save pipeline task finished");
}
