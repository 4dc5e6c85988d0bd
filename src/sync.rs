//! Reconciliation of local optimistic edits with remote snapshots.
//!
//! All changes to the in-memory collection go through [`SyncState::apply`].
//! The per-note rule is last writer wins by `updated_at`, with ties going to
//! the remote copy.
//!
//! Absence from a snapshot is ambiguous: the server may have deleted the note,
//! or may not have seen it yet. Notes created locally are therefore tracked as
//! pending until a snapshot contains them, and only notes that already made a
//! round trip are dropped when a snapshot omits them.
use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::Note;

/// Input to the sync reducer
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A note created on this device
    LocalCreate(Note),
    /// A new value for a note already in the collection
    LocalEdit(Note),
    /// The complete remote set for the user
    RemoteSnapshot(Vec<Note>),
    /// A delete applied locally before the remote confirms it
    OptimisticDelete(String),
}

/// Picks the winner between the local and remote copy of one note.
///
/// The local copy wins only when it is strictly newer.
pub fn merge_note(local: Option<&Note>, remote: &Note) -> Note {
    match local {
        Some(local) if local.updated_at > remote.updated_at => local.clone(),
        _ => remote.clone(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncState {
    notes: Vec<Note>,
    pending_creations: HashSet<String>,
    pending_deletions: HashSet<String>,
    snapshots_applied: u64,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the state from a cached collection and the ids that had not yet
    /// reached the remote store when it was cached.
    pub fn from_cache(notes: Vec<Note>, pending_creations: HashSet<String>) -> Self {
        let pending_creations = pending_creations
            .into_iter()
            .filter(|id| notes.iter().any(|n| &n.id == id))
            .collect();
        Self {
            notes,
            pending_creations,
            ..Self::default()
        }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn get(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    /// Ids created locally that no snapshot has contained yet
    pub fn pending_creations(&self) -> &HashSet<String> {
        &self.pending_creations
    }

    /// Ids deleted locally that the last snapshot still contained
    pub fn pending_deletions(&self) -> &HashSet<String> {
        &self.pending_deletions
    }

    /// Number of remote snapshots applied so far
    pub fn snapshots_applied(&self) -> u64 {
        self.snapshots_applied
    }

    /// Applies one event and reports whether the collection changed.
    pub fn apply(&mut self, event: SyncEvent) -> bool {
        match event {
            SyncEvent::LocalCreate(note) => self.create(note),
            SyncEvent::LocalEdit(note) => self.edit(note),
            SyncEvent::RemoteSnapshot(snapshot) => self.merge_snapshot(snapshot),
            SyncEvent::OptimisticDelete(id) => self.delete(&id),
        }
    }

    fn create(&mut self, note: Note) -> bool {
        self.pending_deletions.remove(&note.id);
        self.pending_creations.insert(note.id.clone());
        match self.notes.iter().position(|n| n.id == note.id) {
            Some(pos) => self.notes[pos] = note,
            None => self.notes.insert(0, note),
        }
        true
    }

    fn edit(&mut self, note: Note) -> bool {
        match self.notes.iter_mut().find(|n| n.id == note.id) {
            Some(existing) if *existing == note => false,
            Some(existing) => {
                *existing = note;
                true
            }
            None => {
                debug!("Ignoring edit of unknown note {}", note.id);
                false
            }
        }
    }

    fn delete(&mut self, id: &str) -> bool {
        self.pending_creations.remove(id);
        self.pending_deletions.insert(id.to_string());
        let before = self.notes.len();
        self.notes.retain(|n| n.id != id);
        before != self.notes.len()
    }

    fn merge_snapshot(&mut self, snapshot: Vec<Note>) -> bool {
        self.snapshots_applied += 1;

        let remote_ids: HashSet<&str> = snapshot.iter().map(|n| n.id.as_str()).collect();
        self.pending_deletions
            .retain(|id| remote_ids.contains(id.as_str()));
        self.pending_creations
            .retain(|id| !remote_ids.contains(id.as_str()));

        let merged = {
            let local: HashMap<&str, &Note> =
                self.notes.iter().map(|n| (n.id.as_str(), n)).collect();

            let mut merged: Vec<Note> = self
                .notes
                .iter()
                .filter(|n| self.pending_creations.contains(&n.id))
                .cloned()
                .collect();

            for remote in &snapshot {
                if self.pending_deletions.contains(&remote.id) {
                    trace!("Skipping {} until its delete lands", remote.id);
                    continue;
                }
                merged.push(merge_note(local.get(remote.id.as_str()).copied(), remote));
            }
            merged
        };

        let dropped = self
            .notes
            .iter()
            .filter(|n| !merged.iter().any(|m| m.id == n.id))
            .count();
        if dropped > 0 {
            debug!("Snapshot removed {} notes deleted remotely", dropped);
        }

        let changed = merged != self.notes;
        self.notes = merged;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NotePatch;
    use chrono::Duration;

    fn edit(note: &Note, content: &str) -> Note {
        note.updated(&NotePatch {
            content: Some(content.to_string()),
            ..Default::default()
        })
    }

    fn at_offset(note: &Note, millis: i64) -> Note {
        Note {
            updated_at: note.updated_at + Duration::milliseconds(millis),
            ..note.clone()
        }
    }

    fn synced(notes: Vec<Note>) -> SyncState {
        let mut state = SyncState::new();
        state.apply(SyncEvent::RemoteSnapshot(notes));
        state
    }

    #[test]
    fn strictly_newer_local_copy_wins() {
        let remote = Note::new("t", "remote", vec![]);
        let local = Note {
            content: "local".into(),
            ..at_offset(&remote, 1)
        };
        assert_eq!(merge_note(Some(&local), &remote), local);
    }

    #[test]
    fn ties_and_newer_remote_adopt_remote() {
        let remote = Note::new("t", "remote", vec![]);
        let tie = Note {
            content: "local".into(),
            ..remote.clone()
        };
        let older = at_offset(&tie, -5);
        assert_eq!(merge_note(Some(&tie), &remote), remote);
        assert_eq!(merge_note(Some(&older), &remote), remote);
        assert_eq!(merge_note(None, &remote), remote);
    }

    #[test]
    fn stale_echo_does_not_clobber_newer_local_edit() {
        let original = Note::new("draft", "a", vec![]);
        let mut state = synced(vec![original.clone()]);

        let first = edit(&original, "ab");
        let second = edit(&first, "abc");
        state.apply(SyncEvent::LocalEdit(first.clone()));
        state.apply(SyncEvent::LocalEdit(second.clone()));

        // echo of the first write arrives after the second edit
        let changed = state.apply(SyncEvent::RemoteSnapshot(vec![first]));
        assert!(!changed);
        assert_eq!(state.get(&original.id), Some(&second));
    }

    #[test]
    fn newer_remote_edit_replaces_local_copy() {
        let note = Note::new("t", "old", vec![]);
        let mut state = synced(vec![note.clone()]);
        let from_other_device = edit(&note, "new");

        assert!(state.apply(SyncEvent::RemoteSnapshot(vec![from_other_device.clone()])));
        assert_eq!(state.notes(), &[from_other_device][..]);
    }

    #[test]
    fn pending_creation_survives_snapshots_until_it_round_trips() {
        let existing = Note::new("existing", "", vec![]);
        let mut state = synced(vec![existing.clone()]);
        let fresh = Note::new("fresh", "", vec![]);

        state.apply(SyncEvent::LocalCreate(fresh.clone()));
        state.apply(SyncEvent::RemoteSnapshot(vec![existing.clone()]));
        assert!(state.get(&fresh.id).is_some());
        assert!(state.pending_creations().contains(&fresh.id));
        assert_eq!(state.notes()[0].id, fresh.id);

        state.apply(SyncEvent::RemoteSnapshot(vec![fresh.clone(), existing.clone()]));
        assert!(state.pending_creations().is_empty());

        // now a snapshot without it means it was deleted elsewhere
        state.apply(SyncEvent::RemoteSnapshot(vec![existing]));
        assert!(state.get(&fresh.id).is_none());
    }

    #[test]
    fn notes_missing_from_snapshot_are_dropped() {
        let keep = Note::new("keep", "", vec![]);
        let gone = Note::new("gone", "", vec![]);
        let mut state = synced(vec![keep.clone(), gone]);

        assert!(state.apply(SyncEvent::RemoteSnapshot(vec![keep.clone()])));
        assert_eq!(state.notes(), &[keep][..]);
    }

    #[test]
    fn stale_snapshot_does_not_resurrect_deleted_note() {
        let doomed = Note::new("doomed", "", vec![]);
        let other = Note::new("other", "", vec![]);
        let mut state = synced(vec![doomed.clone(), other.clone()]);

        assert!(state.apply(SyncEvent::OptimisticDelete(doomed.id.clone())));
        state.apply(SyncEvent::RemoteSnapshot(vec![doomed.clone(), other.clone()]));
        assert!(state.get(&doomed.id).is_none());
        assert!(state.pending_deletions().contains(&doomed.id));

        state.apply(SyncEvent::RemoteSnapshot(vec![other]));
        assert!(state.pending_deletions().is_empty());
    }

    #[test]
    fn deleting_a_pending_creation_forgets_it() {
        let mut state = SyncState::new();
        let note = Note::new("oops", "", vec![]);
        state.apply(SyncEvent::LocalCreate(note.clone()));
        state.apply(SyncEvent::OptimisticDelete(note.id.clone()));

        assert!(state.pending_creations().is_empty());
        assert!(state.notes().is_empty());
    }

    #[test]
    fn edit_of_unknown_note_is_ignored() {
        let mut state = SyncState::new();
        assert!(!state.apply(SyncEvent::LocalEdit(Note::new("ghost", "", vec![]))));
        assert!(state.notes().is_empty());
    }

    #[test]
    fn identical_edit_reports_no_change() {
        let note = Note::new("same", "", vec![]);
        let mut state = synced(vec![note.clone()]);
        assert!(!state.apply(SyncEvent::LocalEdit(note)));
    }

    #[test]
    fn cached_pending_ids_are_restored_for_known_notes_only() {
        let offline = Note::new("offline", "", vec![]);
        let pending: HashSet<String> = [offline.id.clone(), "unknown".to_string()].into();
        let mut state = SyncState::from_cache(vec![offline.clone()], pending);

        assert_eq!(state.pending_creations().len(), 1);
        state.apply(SyncEvent::RemoteSnapshot(vec![]));
        assert_eq!(state.notes(), &[offline][..]);
    }

    #[test]
    fn snapshot_count_advances_even_without_changes() {
        let mut state = SyncState::new();
        state.apply(SyncEvent::RemoteSnapshot(vec![]));
        state.apply(SyncEvent::RemoteSnapshot(vec![]));
        assert_eq!(state.snapshots_applied(), 2);
    }
}
