use std::{fs, path::Path};

use log::{debug, error, trace};
use notify::EventKind;

use crate::{JournalError, Result, StoredDocument};

/// True for create/modify/remove events touching a `.json` document
pub fn is_document_event(event: &notify::Event) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|path| path.extension().is_some_and(|ext| ext == "json"))
}

/// Helper method to load a single stored document from file
pub fn load_document_from_file(path: &Path) -> Result<StoredDocument> {
    debug!("Loading document from file: {}", path.display());
    let content = fs::read_to_string(path).map_err(|e| {
        error!("Failed to open document file {}: {}", path.display(), e);
        JournalError::Io(e)
    })?;

    let document: StoredDocument = serde_json::from_str(&content)?;

    if document.note.id.is_empty() || document.user_id.is_empty() {
        return Err(JournalError::Parse {
            key: path.display().to_string(),
            message: "document has an empty id or owner".to_string(),
        });
    }

    trace!("Successfully loaded document: {}", document.note.id);
    Ok(document)
}

/// Replaces characters that are unsafe in file names.
pub fn path_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// Helper method for parsing tags
pub fn parse_tags(tags: Option<String>) -> Vec<String> {
    tags.map(|t| {
        t.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Appends `additions` to `tags`, skipping exact (case-sensitive) duplicates.
pub fn merge_tags(tags: &[String], additions: &[String]) -> Vec<String> {
    let mut merged = tags.to_vec();
    for tag in additions {
        let tag = tag.trim();
        if !tag.is_empty() && !merged.iter().any(|t| t == tag) {
            merged.push(tag.to_string());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_comma_separated_tags() {
        assert_eq!(
            parse_tags(Some(" dream, ,travel ,".to_string())),
            vec!["dream".to_string(), "travel".to_string()]
        );
        assert!(parse_tags(None).is_empty());
    }

    #[test]
    fn merge_is_case_sensitive_and_order_preserving() {
        let tags = vec!["Work".to_string()];
        let merged = merge_tags(&tags, &["work".into(), "Work".into(), "rest".into()]);
        assert_eq!(merged, vec!["Work", "work", "rest"]);
    }

    #[test]
    fn only_json_changes_are_document_events() {
        let create = notify::Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(PathBuf::from("/r/notes/a.json"));
        let temp = notify::Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(PathBuf::from("/r/notes/.tmpX1y2"));
        let access = notify::Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/r/notes/a.json"));

        assert!(is_document_event(&create));
        assert!(!is_document_event(&temp));
        assert!(!is_document_event(&access));
    }

    #[test]
    fn documents_without_owner_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("n.json");
        fs::write(
            &path,
            r#"{"userId":"","id":"n","title":"","content":"","createdAt":0,"updatedAt":0}"#,
        )
        .unwrap();
        assert!(load_document_from_file(&path).is_err());
    }
}
