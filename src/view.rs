//! Filtering and ordering of the note collection for display.
use std::cmp::Ordering;

use crate::{Note, NoteType, SortBy, SortOrder, TypeFilter};

/// What the user asked to see
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewQuery {
    /// Case-insensitive substring matched against title, content and tags
    pub search: Option<String>,
    /// Exact match against the note's current mood
    pub mood: Option<String>,
    pub favorites_only: bool,
    pub type_filter: TypeFilter,
    pub sort_by: SortBy,
    pub order: SortOrder,
}

impl ViewQuery {
    fn matches(&self, note: &Note, needle: Option<&str>) -> bool {
        if let Some(needle) = needle {
            let hit = note.title.to_lowercase().contains(needle)
                || note.content.to_lowercase().contains(needle)
                || note.tags.iter().any(|t| t.to_lowercase().contains(needle));
            if !hit {
                return false;
            }
        }

        if let Some(mood) = &self.mood {
            if note.current_mood().map(|m| m.mood.as_str()) != Some(mood.as_str()) {
                return false;
            }
        }

        if self.favorites_only && !note.is_favorite {
            return false;
        }

        match self.type_filter {
            TypeFilter::All => true,
            TypeFilter::Journal => note.note_type == NoteType::Journal,
            TypeFilter::Novel => note.note_type == NoteType::Novel,
            TypeFilter::Category(category) => note.category() == Some(category),
        }
    }
}

/// Projects `notes` through `query`.
///
/// Every predicate must hold for a note to be kept. The sort is stable, so
/// notes that compare equal keep their collection order.
pub fn project(notes: &[Note], query: &ViewQuery) -> Vec<Note> {
    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut visible: Vec<Note> = notes
        .iter()
        .filter(|n| query.matches(n, needle.as_deref()))
        .cloned()
        .collect();

    visible.sort_by(|a, b| {
        let ordering = compare(a, b, query.sort_by);
        match query.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    });
    visible
}

fn compare(a: &Note, b: &Note, sort_by: SortBy) -> Ordering {
    match sort_by {
        SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
        SortBy::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortBy::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
    }
}

/// Distinct current moods, in first-seen order
pub fn mood_options(notes: &[Note]) -> Vec<String> {
    let mut moods: Vec<String> = Vec::new();
    for mood in notes.iter().filter_map(|n| n.current_mood()) {
        if !moods.contains(&mood.mood) {
            moods.push(mood.mood.clone());
        }
    }
    moods
}

/// Distinct tags, in first-seen order
pub fn all_tags(notes: &[Note]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in notes.iter().flat_map(|n| n.tags.iter()) {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MoodEntry, NotePatch, NovelCategory};
    use chrono::{Duration, TimeZone, Utc};

    fn with_mood(note: Note, mood: &str) -> Note {
        note.updated(&NotePatch {
            mood_entry: Some(MoodEntry::new(mood, 5, "#888888", Utc::now())),
            ..Default::default()
        })
    }

    fn titles(notes: &[Note]) -> Vec<&str> {
        notes.iter().map(|n| n.title.as_str()).collect()
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let notes = vec![
            Note::new("Beach day", "", vec![]),
            Note::new("Work", "met the BEACH committee", vec![]),
            Note::new("Plans", "", vec!["beachside".into()]),
            Note::new("Other", "nothing", vec![]),
        ];
        let query = ViewQuery {
            search: Some("beach".into()),
            sort_by: SortBy::Title,
            order: SortOrder::Ascending,
            ..Default::default()
        };
        assert_eq!(titles(&project(&notes, &query)), vec!["Beach day", "Plans", "Work"]);
    }

    #[test]
    fn blank_search_matches_everything() {
        let notes = vec![Note::new("a", "", vec![]), Note::new("b", "", vec![])];
        let query = ViewQuery {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(project(&notes, &query).len(), 2);
    }

    #[test]
    fn mood_filter_uses_the_latest_history_entry() {
        let calm_then_joyful = with_mood(with_mood(Note::new("a", "", vec![]), "calm"), "joyful");
        let calm = with_mood(Note::new("b", "", vec![]), "calm");
        let legacy = Note {
            mood: Some(MoodEntry::new("calm", 4, "#00f", Utc::now())),
            ..Note::new("c", "", vec![])
        };
        let notes = vec![calm_then_joyful, calm, legacy, Note::new("d", "", vec![])];

        let query = ViewQuery {
            mood: Some("calm".into()),
            sort_by: SortBy::Title,
            order: SortOrder::Ascending,
            ..Default::default()
        };
        assert_eq!(titles(&project(&notes, &query)), vec!["b", "c"]);
    }

    #[test]
    fn predicates_are_combined() {
        let fav_novel = Note::new("fav novel", "", vec![])
            .with_kind(NoteType::Novel, Some(NovelCategory::Lore))
            .with_favorite_toggled();
        let fav_journal = Note::new("fav journal", "", vec![]).with_favorite_toggled();
        let novel = Note::new("novel", "", vec![]).with_kind(NoteType::Novel, None);
        let notes = vec![fav_novel, fav_journal, novel];

        let query = ViewQuery {
            favorites_only: true,
            type_filter: TypeFilter::Novel,
            ..Default::default()
        };
        assert_eq!(titles(&project(&notes, &query)), vec!["fav novel"]);

        let chapters = ViewQuery {
            type_filter: TypeFilter::Category(NovelCategory::Chapter),
            ..Default::default()
        };
        assert_eq!(titles(&project(&notes, &chapters)), vec!["novel"]);
    }

    #[test]
    fn sorts_by_each_field_in_both_directions() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let note = |title: &str, created: i64, updated: i64| Note {
            created_at: base + Duration::days(created),
            updated_at: base + Duration::days(updated),
            ..Note::new(title, "", vec![])
        };
        let notes = vec![note("banana", 2, 3), note("Apple", 3, 1), note("cherry", 1, 2)];

        let by = |sort_by, order| {
            let query = ViewQuery {
                sort_by,
                order,
                ..Default::default()
            };
            project(&notes, &query)
                .into_iter()
                .map(|n| n.title)
                .collect::<Vec<_>>()
        };

        assert_eq!(by(SortBy::CreatedAt, SortOrder::Ascending), vec!["cherry", "banana", "Apple"]);
        assert_eq!(by(SortBy::UpdatedAt, SortOrder::Descending), vec!["banana", "cherry", "Apple"]);
        assert_eq!(by(SortBy::Title, SortOrder::Ascending), vec!["Apple", "banana", "cherry"]);
        assert_eq!(by(SortBy::Title, SortOrder::Descending), vec!["cherry", "banana", "Apple"]);
    }

    #[test]
    fn equal_keys_keep_collection_order() {
        let a = Note::new("same", "first", vec![]);
        let b = Note::new("same", "second", vec![]);
        let query = ViewQuery {
            sort_by: SortBy::Title,
            ..Default::default()
        };
        let projected = project(&[a.clone(), b.clone()], &query);
        assert_eq!(projected, vec![a, b]);
    }

    #[test]
    fn lists_distinct_moods_and_tags() {
        let notes = vec![
            with_mood(Note::new("a", "", vec!["x".into(), "y".into()]), "calm"),
            with_mood(Note::new("b", "", vec!["y".into(), "Y".into()]), "tense"),
            with_mood(Note::new("c", "", vec![]), "calm"),
        ];
        assert_eq!(mood_options(&notes), vec!["calm", "tense"]);
        assert_eq!(all_tags(&notes), vec!["x", "y", "Y"]);
    }
}
