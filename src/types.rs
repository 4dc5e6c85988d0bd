//! Shared data structures for the moodnotes application.
//!
//! This module contains the small enums used across the sync core, the
//! derived view and the CLI, plus the CLI subcommand definitions.
use std::{fmt, path::PathBuf};

use clap::{Args, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::JournalError;

/// A specialized Result type for moodnotes operations.
pub type Result<T> = std::result::Result<T, JournalError>;

/// Kind of entry. Documents written before the field existed are journals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    #[default]
    Journal,
    Novel,
}

/// Category of a novel entry. Only meaningful when the note is a novel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NovelCategory {
    #[default]
    Chapter,
    Character,
    Location,
    Lore,
    Idea,
}

impl fmt::Display for NoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteType::Journal => write!(f, "journal"),
            NoteType::Novel => write!(f, "novel"),
        }
    }
}

impl fmt::Display for NovelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NovelCategory::Chapter => "chapter",
            NovelCategory::Character => "character",
            NovelCategory::Location => "location",
            NovelCategory::Lore => "lore",
            NovelCategory::Idea => "idea",
        };
        f.write_str(name)
    }
}

/// Visible state of the debounced save pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
}

impl SaveStatus {
    /// True while a write is scheduled or in flight.
    pub fn is_busy(self) -> bool {
        matches!(self, SaveStatus::Saving)
    }
}

impl fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SaveStatus::Idle => "idle",
            SaveStatus::Saving => "saving...",
            SaveStatus::Saved => "saved",
            SaveStatus::Error => "error saving",
        };
        f.write_str(label)
    }
}

/// Field used to order the derived view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SortBy {
    #[value(name = "created")]
    CreatedAt,
    #[default]
    #[value(name = "updated")]
    UpdatedAt,
    Title,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Restricts the derived view to a kind of entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TypeFilter {
    #[default]
    All,
    Journal,
    Novel,
    /// Novel entries of one category.
    Category(NovelCategory),
}

/// CLI spelling of [`TypeFilter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Journal,
    Novel,
    Chapter,
    Character,
    Location,
    Lore,
    Idea,
}

impl From<KindArg> for TypeFilter {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Journal => TypeFilter::Journal,
            KindArg::Novel => TypeFilter::Novel,
            KindArg::Chapter => TypeFilter::Category(NovelCategory::Chapter),
            KindArg::Character => TypeFilter::Category(NovelCategory::Character),
            KindArg::Location => TypeFilter::Category(NovelCategory::Location),
            KindArg::Lore => TypeFilter::Category(NovelCategory::Lore),
            KindArg::Idea => TypeFilter::Category(NovelCategory::Idea),
        }
    }
}

/// Options for the `list` command
#[derive(Args, Debug, Clone)]
pub struct ListNotesOptions {
    /// Case-insensitive text matched against title, content and tags
    #[clap(short, long)]
    pub search: Option<String>,

    /// Only notes whose current mood is exactly this
    #[clap(short, long)]
    pub mood: Option<String>,

    /// Only favorite notes
    #[clap(short, long)]
    pub favorites: bool,

    /// Only one kind of entry (journal, novel or a novel category)
    #[clap(short, long, value_enum)]
    pub kind: Option<KindArg>,

    /// Field to sort by
    #[clap(long, value_enum, default_value_t = SortBy::UpdatedAt)]
    pub sort_by: SortBy,

    /// Sort ascending instead of descending
    #[clap(short, long)]
    pub ascending: bool,

    /// Limit the number of notes returned
    #[clap(short = 'n', long, default_value_t = 20)]
    pub limit: usize,

    /// Format output as JSON
    #[clap(short, long)]
    pub json: bool,
}

/// Options for the `edit` command
#[derive(Args, Debug, Clone)]
pub struct EditNoteOptions {
    /// ID of the note to edit
    pub id: String,

    /// New title for the note
    #[clap(short = 'T', long)]
    pub title: Option<String>,

    /// Replace the content
    #[clap(short, long)]
    pub content: Option<String>,

    /// Append a paragraph to the content
    #[clap(short, long)]
    pub append: Option<String>,

    /// Tags to add (comma-separated)
    #[clap(long)]
    pub add_tags: Option<String>,

    /// Tags to remove (comma-separated)
    #[clap(long)]
    pub remove_tags: Option<String>,

    /// Backdate the entry (YYYY-MM-DD or RFC 3339)
    #[clap(long)]
    pub created: Option<String>,

    /// Turn the entry into a novel entry of this category
    #[clap(long, value_enum)]
    pub novel: Option<NovelCategory>,

    /// Turn the entry back into a journal entry
    #[clap(long, conflicts_with = "novel")]
    pub journal: bool,

    /// Open content in editor before saving
    #[clap(short, long)]
    pub edit: bool,
}

/// Available subcommands for the moodnotes application
#[derive(Subcommand)]
pub enum Commands {
    /// Sign in as a user; later commands act on that user's notes
    Login {
        /// User identifier
        user: String,
    },

    /// Sign out the current user
    Logout,

    /// Create a new entry
    New {
        /// Title of the entry
        #[clap(short = 'T', long)]
        title: Option<String>,

        /// Content of the entry
        #[clap(short, long)]
        content: Option<String>,

        /// Tags to associate with the entry (comma-separated)
        #[clap(short = 't', long)]
        tags: Option<String>,

        /// Create a novel entry of this category instead of a journal entry
        #[clap(long, value_enum)]
        novel: Option<NovelCategory>,

        /// Open content in editor before saving
        #[clap(short, long)]
        edit: bool,
    },

    /// List entries with optional filtering
    List(ListNotesOptions),

    /// Show one entry
    Show {
        /// ID of the entry to show
        id: String,

        /// Format output as raw JSON
        #[clap(short, long)]
        json: bool,
    },

    /// Edit an existing entry
    Edit(EditNoteOptions),

    /// Delete an entry by ID
    Delete {
        /// ID of the entry to delete
        id: String,

        /// Skip confirmation prompt
        #[clap(short, long)]
        force: bool,
    },

    /// Toggle the favorite flag of an entry
    Favorite {
        /// ID of the entry
        id: String,
    },

    /// Import text or .docx files as entries
    Import {
        /// File or directory to import
        source: PathBuf,

        /// Descend into subdirectories
        #[clap(short, long)]
        recursive: bool,

        /// Glob pattern filtering the files of a directory import
        #[clap(short, long)]
        pattern: Option<String>,
    },

    /// Run mood analysis on an entry
    Analyze {
        /// ID of the entry
        id: String,
    },

    /// Let the insight service continue the text of an entry
    Continue {
        /// ID of the entry
        id: String,
    },

    /// List all tags in use
    Tags,

    /// List all current moods in use
    Moods,

    /// Follow remote changes until interrupted
    Watch,
}
