//! folo - a local, searchable mirror of your following list
//!
//! This library provides the core functionality for mirroring a
//! bilibili following list, searching it locally, and running paced
//! batch relation changes against the remote.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`error`] - Custom error types with rich context
//! - [`config`] - Layered configuration and session cookies
//! - [`governor`] - Request pacing, jitter, and retry policy
//! - [`api`] - Governed HTTP transport and envelope classification
//! - [`model`] - Snapshot, entity, and index data types
//! - [`index`] - Snapshot index and histogram construction
//! - [`store`] - Versioned snapshot store with crash-safe persistence
//! - [`search`] - Local search with persisted query history
//! - [`sync`] - Batch orchestration (fetch, unfollow, follow)
//! - [`export`] - Simplified export writer and import parser

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod governor;
pub mod index;
pub mod logging;
pub mod model;
pub mod search;
pub mod store;
pub mod sync;

pub use cli::*;
pub use error::{FoloError, Result};
pub use model::{FollowedUser, SearchPage, Snapshot, StoreEvent};
pub use store::RelationStore;
pub use sync::{BatchReport, SyncOrchestrator};

/// Standard width for content dividers in CLI output
pub const CONTENT_DIVIDER_WIDTH: usize = 60;

/// Get the default data directory for folo
#[must_use]
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("folo")
}

/// Format an unsigned integer with thousands separators.
#[must_use]
pub fn format_number(value: u64) -> String {
    let mut out = String::with_capacity(24);

    for (idx, ch) in value.to_string().chars().rev().enumerate() {
        if idx > 0 && idx % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    out.chars().rev().collect()
}

/// Format a usize with thousands separators.
#[must_use]
pub fn format_number_usize(value: usize) -> String {
    format_number(u64::try_from(value).unwrap_or(u64::MAX))
}

/// Format a long identifier as a short token (e.g., 1234...6789).
#[must_use]
pub fn format_short_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 10 {
        return id.to_string();
    }
    let start: String = chars.iter().take(4).collect();
    let end: String = chars.iter().rev().take(4).rev().collect();
    format!("{start}...{end}")
}

/// Truncate display text to `max` characters with an ellipsis.
#[must_use]
pub fn truncate_text(text: &str, max: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max {
        return text.to_string();
    }
    let head: String = chars.iter().take(max.saturating_sub(1)).collect();
    format!("{head}…")
}
