//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init and shared utilities (open_db, open_pipeline, output)
//! - `categories` - Category listing, creation and seeding
//! - `excluded` - Per-user excluded keywords
//! - `statements` - Upload and the pipeline stages (extract, categorize, process, retry)
//! - `serve` - Web server command

pub mod categories;
pub mod core;
pub mod excluded;
pub mod serve;
pub mod statements;

// Re-export command functions for main.rs
pub use categories::*;
pub use core::*;
pub use excluded::*;
pub use serve::*;
pub use statements::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
