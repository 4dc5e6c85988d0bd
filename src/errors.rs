//! Error types for the moodnotes application.
//!
//! This module defines the error taxonomy shared by the sync core, its
//! collaborators (remote store, insight service, importer) and the CLI.

use std::{io, path::PathBuf};

use thiserror::Error;

/// The main error type for the moodnotes application.
#[derive(Error, Debug)]
pub enum JournalError {
    /// Errors related to file I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors related to serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Errors raised while reading a `.docx` container.
    #[error("Zip error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    /// Cached note data could not be parsed.
    #[error("Corrupt cache entry {key}: {message}")]
    Parse { key: String, message: String },

    /// A write or delete against the remote document store failed.
    #[error("Remote write failed for note {id}: {message}")]
    RemoteWrite { id: String, message: String },

    /// The document exists but belongs to another user.
    #[error("Note {id} is owned by another user")]
    Unauthorized { id: String },

    /// The insight service could not analyze the text.
    #[error("Analysis failed: {message}")]
    Analysis { message: String },

    /// The insight service could not continue the text.
    #[error("Continuation failed: {message}")]
    Continuation { message: String },

    /// Note was not found when performing an operation.
    #[error("Note not found: {id}")]
    NoteNotFound { id: String },

    /// A file could not be imported.
    #[error("Import of {path} failed: {message}")]
    Import { path: PathBuf, message: String },

    /// Errors related to configuration.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Directory creation or access failed.
    #[error("Failed to create or access directory: {path}")]
    DirectoryError { path: PathBuf },

    /// The file system watcher behind a document folder failed.
    #[error("Watcher error: {message}")]
    Watcher { message: String },

    /// An operation needs a signed-in user.
    #[error("No user is signed in")]
    NotSignedIn,

    #[error("{message}")]
    EditorError { message: String },

    /// for mutex lock acquisition issues
    #[error("{message}")]
    LockAcquisitionFailed { message: String },

    /// Generic application error with a custom message.
    #[error("{message}")]
    ApplicationError { message: String },
}

impl JournalError {
    pub(crate) fn remote_write(id: impl Into<String>, message: impl ToString) -> Self {
        JournalError::RemoteWrite {
            id: id.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        JournalError::LockAcquisitionFailed {
            message: format!("Failed to acquire lock on {}", what),
        }
    }
}
