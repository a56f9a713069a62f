//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod categories;
pub mod health;
pub mod statements;

// Re-export all handlers for use in router
pub use categories::*;
pub use health::*;
pub use statements::*;
