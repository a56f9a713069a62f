//! Excluded keyword commands

use anyhow::{Context, Result};

use cfo_core::db::Database;

use super::{truncate, Output};

pub fn cmd_excluded_list(
    db: &Database,
    user_id: i64,
    defaults: &[String],
    output: Output,
) -> Result<()> {
    db.seed_excluded_keywords(user_id, defaults)?;
    let keywords = db.list_excluded_keywords(user_id)?;

    output.emit(&keywords, |keywords| {
        if keywords.is_empty() {
            println!("No excluded keywords for user {}.", user_id);
            return;
        }

        println!("{:<6} Keyword", "ID");
        println!("{}", "-".repeat(40));
        for keyword in keywords {
            println!("{:<6} {}", keyword.id, truncate(&keyword.keyword, 32));
        }
    })
}

pub fn cmd_excluded_add(db: &Database, user_id: i64, keyword: &str) -> Result<()> {
    let added = db
        .add_excluded_keyword(user_id, keyword)
        .with_context(|| format!("Failed to add excluded keyword '{}'", keyword))?;
    println!("✅ Excluding '{}' (ID {})", added.keyword, added.id);
    Ok(())
}

pub fn cmd_excluded_remove(db: &Database, user_id: i64, id: i64) -> Result<()> {
    db.delete_excluded_keyword(user_id, id)
        .with_context(|| format!("Failed to remove excluded keyword {}", id))?;
    println!("✅ Removed excluded keyword {}", id);
    Ok(())
}

pub fn cmd_excluded_reset(db: &Database, user_id: i64, defaults: &[String]) -> Result<()> {
    let created = db.reset_excluded_keywords(user_id, defaults)?;
    println!("✅ Restored {} default excluded keyword(s)", created);
    Ok(())
}
