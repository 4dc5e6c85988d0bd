//! Core data structures for the moodnotes application.
//!
//! A [`Note`] is an immutable value: every mutation produces a new value, so a
//! reader holding a clone never sees a half-applied edit.
use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{NoteType, NovelCategory};

/// One mood classification of a note at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    pub mood: String,
    /// 0 (darkest) to 10 (brightest)
    pub score: u8,
    /// Hex color, e.g. `#f5c542`
    pub color: String,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl MoodEntry {
    pub fn new(mood: impl Into<String>, score: u8, color: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            mood: mood.into(),
            score: score.min(10),
            color: color.into(),
            timestamp: at.trunc_subsecs(3),
        }
    }
}

/// Represents a single journal or novel entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Unique identifier, also the remote document key
    pub id: String,
    pub title: String,
    pub content: String,
    /// When the entry was written; user-editable
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Last modification time, the tie-breaker for merging
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Legacy single mood, mirrored from the newest history entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<MoodEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mood_history: Vec<MoodEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_reflection: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, rename = "type")]
    pub note_type: NoteType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub novel_category: Option<NovelCategory>,
}

/// A set of field changes applied through [`Note::updated`].
///
/// `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub created_at: Option<DateTime<Utc>>,
    pub note_type: Option<NoteType>,
    /// `Some(None)` clears the category.
    pub novel_category: Option<Option<NovelCategory>>,
    /// Appended to the mood history.
    pub mood_entry: Option<MoodEntry>,
    pub ai_summary: Option<String>,
    pub ai_reflection: Option<String>,
}

impl NotePatch {
    pub fn is_empty(&self) -> bool {
        *self == NotePatch::default()
    }
}

impl Note {
    /// Creates a new journal entry stamped with the current time
    pub fn new(title: impl Into<String>, content: impl Into<String>, tags: Vec<String>) -> Self {
        let now = now_millis();
        Self::with_timestamps(title.into(), content.into(), tags, now, now)
    }

    /// Creates an entry from imported text, backdated to `created_at`
    pub fn imported(
        title: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::with_timestamps(
            title.into(),
            content.into(),
            Vec::new(),
            created_at.trunc_subsecs(3),
            now_millis(),
        )
    }

    fn with_timestamps(
        title: String,
        content: String,
        tags: Vec<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Note {
            id: Uuid::new_v4().to_string(),
            title,
            content,
            created_at,
            updated_at,
            tags,
            mood: None,
            mood_history: Vec::new(),
            ai_summary: None,
            ai_reflection: None,
            is_favorite: false,
            note_type: NoteType::Journal,
            novel_category: None,
        }
    }

    /// Sets the kind of a freshly created entry.
    pub fn with_kind(mut self, note_type: NoteType, category: Option<NovelCategory>) -> Self {
        self.note_type = note_type;
        self.novel_category = match note_type {
            NoteType::Novel => Some(category.unwrap_or_default()),
            NoteType::Journal => None,
        };
        self
    }

    /// Returns a copy with `patch` applied and `updated_at` refreshed.
    ///
    /// The new `updated_at` is strictly greater than the old one even when the
    /// clock has not moved.
    pub fn updated(&self, patch: &NotePatch) -> Note {
        let mut next = self.clone();

        if let Some(title) = &patch.title {
            next.title = title.clone();
        }
        if let Some(content) = &patch.content {
            next.content = content.clone();
        }
        if let Some(tags) = &patch.tags {
            next.tags = tags.clone();
        }
        if let Some(created_at) = patch.created_at {
            next.created_at = created_at.trunc_subsecs(3);
        }
        if let Some(note_type) = patch.note_type {
            next.note_type = note_type;
            if note_type == NoteType::Journal {
                next.novel_category = None;
            }
        }
        if let Some(category) = patch.novel_category {
            next.novel_category = category;
        }
        if let Some(entry) = &patch.mood_entry {
            next.mood_history.push(entry.clone());
            next.mood = Some(entry.clone());
        }
        if let Some(summary) = &patch.ai_summary {
            next.ai_summary = Some(summary.clone());
        }
        if let Some(reflection) = &patch.ai_reflection {
            next.ai_reflection = Some(reflection.clone());
        }

        next.updated_at = next_timestamp(self.updated_at);
        next
    }

    /// Returns a copy with `is_favorite` flipped. `updated_at` is left alone.
    pub fn with_favorite_toggled(&self) -> Note {
        Note {
            is_favorite: !self.is_favorite,
            ..self.clone()
        }
    }

    /// The newest mood: last history entry, else the legacy field.
    pub fn current_mood(&self) -> Option<&MoodEntry> {
        self.mood_history.last().or(self.mood.as_ref())
    }

    /// Category of a novel entry; `Chapter` when unset. `None` for journals.
    pub fn category(&self) -> Option<NovelCategory> {
        match self.note_type {
            NoteType::Novel => Some(self.novel_category.unwrap_or_default()),
            NoteType::Journal => None,
        }
    }

    /// Entity equality
    pub fn is_same_note(&self, other: &Note) -> bool {
        self.id == other.id
    }

    /// True when `created_at` was moved past the last modification.
    pub fn is_backdated_after_update(&self) -> bool {
        self.updated_at < self.created_at
    }
}

/// Current time at the millisecond precision of the wire format.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_millis();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_note_has_matching_timestamps_and_defaults() {
        let note = Note::new("Morning", "Coffee first", vec!["daily".into()]);
        assert_eq!(note.created_at, note.updated_at);
        assert_eq!(note.note_type, NoteType::Journal);
        assert!(!note.is_favorite);
        assert!(note.current_mood().is_none());
        assert!(!note.id.is_empty());
    }

    #[test]
    fn ids_are_unique() {
        let a = Note::new("same", "", vec![]);
        let b = Note::new("same", "", vec![]);
        assert_ne!(a.id, b.id);
        assert!(!a.is_same_note(&b));
        assert!(a.is_same_note(&a.updated(&NotePatch::default())));
    }

    #[test]
    fn update_refreshes_updated_at_strictly() {
        let note = Note::new("t", "c", vec![]);
        let patch = NotePatch {
            content: Some("changed".into()),
            ..Default::default()
        };
        let first = note.updated(&patch);
        let second = first.updated(&patch);
        assert!(first.updated_at > note.updated_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.content, "changed");
        assert_eq!(note.content, "c");
    }

    #[test]
    fn toggling_favorite_twice_restores_value_and_keeps_timestamp() {
        let note = Note::new("t", "c", vec![]);
        let once = note.with_favorite_toggled();
        let twice = once.with_favorite_toggled();
        assert!(once.is_favorite);
        assert_eq!(twice, note);
        assert_eq!(once.updated_at, note.updated_at);
    }

    #[test]
    fn mood_entry_appends_history_and_mirrors_legacy_field() {
        let note = Note::new("t", "c", vec![]);
        let at = Utc::now();
        let calm = MoodEntry::new("calm", 7, "#88ccee", at);
        let tense = MoodEntry::new("tense", 3, "#cc4444", at);
        let note = note.updated(&NotePatch {
            mood_entry: Some(calm.clone()),
            ..Default::default()
        });
        let note = note.updated(&NotePatch {
            mood_entry: Some(tense.clone()),
            ..Default::default()
        });
        assert_eq!(note.mood_history, vec![calm, tense.clone()]);
        assert_eq!(note.mood, Some(tense.clone()));
        assert_eq!(note.current_mood(), Some(&tense));
    }

    #[test]
    fn legacy_mood_is_used_without_history() {
        let mut note = Note::new("t", "c", vec![]);
        note.mood = Some(MoodEntry::new("wistful", 5, "#aaaaaa", Utc::now()));
        assert_eq!(note.current_mood().map(|m| m.mood.as_str()), Some("wistful"));
    }

    #[test]
    fn score_is_clamped() {
        assert_eq!(MoodEntry::new("ecstatic", 42, "#fff", Utc::now()).score, 10);
    }

    #[test]
    fn legacy_document_defaults() {
        let json = r#"{"id":"n1","title":"Old","content":"text","createdAt":1000,"updatedAt":2000}"#;
        let note: Note = serde_json::from_str(json).unwrap();
        assert_eq!(note.note_type, NoteType::Journal);
        assert!(note.tags.is_empty());
        assert!(!note.is_favorite);
        assert_eq!(note.updated_at.timestamp_millis(), 2000);
    }

    #[test]
    fn wire_format_uses_camel_case_and_millis() {
        let note = Note::new("t", "c", vec![]).with_kind(NoteType::Novel, None);
        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(value["type"], "novel");
        assert_eq!(value["novelCategory"], "chapter");
        assert_eq!(value["isFavorite"], false);
        assert_eq!(value["updatedAt"], note.updated_at.timestamp_millis());
    }

    #[test]
    fn novel_without_category_reads_as_chapter() {
        let mut note = Note::new("t", "c", vec![]);
        note.note_type = NoteType::Novel;
        assert_eq!(note.category(), Some(NovelCategory::Chapter));
        let journal = note.updated(&NotePatch {
            note_type: Some(NoteType::Journal),
            ..Default::default()
        });
        assert_eq!(journal.category(), None);
    }

    #[test]
    fn backdating_is_allowed_and_reported() {
        let note = Note::new("t", "c", vec![]);
        let future = note.updated_at + Duration::days(3);
        let moved = note.updated(&NotePatch {
            created_at: Some(future),
            ..Default::default()
        });
        assert_eq!(moved.created_at, future);
        assert!(moved.is_backdated_after_update());
    }
}
