//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `open_pipeline` - Pipeline over the database with env-configured AI
//! - `cmd_init` - Initialize the database

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use cfo_core::db::Database;
use cfo_core::{AIClient, Pipeline, PipelineConfig};

/// How command results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Text,
    Json,
}

impl Output {
    /// Print `value` as pretty JSON in JSON mode, else run the text renderer
    pub fn emit<T: Serialize>(self, value: &T, text: impl FnOnce(&T)) -> Result<()> {
        match self {
            Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
            Output::Text => text(value),
        }
        Ok(())
    }
}

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Pipeline with the AI backend from the environment and the layered pipeline config
pub fn open_pipeline(db_path: &Path, no_encrypt: bool) -> Result<Pipeline<Database>> {
    let db = open_db(db_path, no_encrypt)?;
    let config = PipelineConfig::load().context("Failed to load pipeline config")?;
    let ai = AIClient::from_env();
    if ai.is_none() {
        tracing::info!("AI backend not configured, stages will use deterministic fallbacks");
    }
    Ok(Pipeline::new(Arc::new(db), ai, config))
}

pub fn cmd_init(db_path: &Path, user: Option<i64>, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    if let Some(user_id) = user {
        let created = db
            .seed_default_categories(user_id)
            .context("Failed to seed default categories")?;
        println!("   Seeded {} default categories for user {}", created, user_id);
    }

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Add categories: cfo categories seed --user 1");
    println!("  2. Upload a statement: cfo upload --user 1 --file statement.pdf");
    println!("  3. Process it: cfo process <id>");

    Ok(())
}
