//! Journaling and novel-writing notes with mood insights
//!
//! This library keeps a user's notes in sync between a local cache and a
//! shared document store, saves edits through a debounced pipeline and derives
//! filtered views of the collection.

mod ai;
mod auth;
mod cli;
mod config;
mod dir_store;
mod errors;
mod helper;
mod import;
mod local_cache;
mod note;
mod remote;
mod save_pipeline;
mod session;
mod sync;
mod types;
mod view;

// Re-export key components
pub use ai::*;
pub use auth::*;
pub use cli::*;
pub use config::*;
pub use dir_store::*;
pub use errors::*;
pub use helper::*;
pub use import::*;
pub use local_cache::*;
pub use note::*;
pub use remote::*;
pub use save_pipeline::*;
pub use session::*;
pub use sync::*;
pub use types::*;
pub use view::*;
