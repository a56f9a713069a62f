//! Category commands

use anyhow::{Context, Result};

use cfo_core::db::Database;

use super::{truncate, Output};

pub fn cmd_categories_list(db: &Database, user_id: i64, output: Output) -> Result<()> {
    let categories = db.list_categories(user_id)?;

    output.emit(&categories, |categories| {
        if categories.is_empty() {
            println!("No categories for user {}.", user_id);
            println!("Seed defaults with: cfo categories seed --user {}", user_id);
            return;
        }

        println!("{:<6} {:<24} Keywords", "ID", "Name");
        println!("{}", "-".repeat(72));
        for category in categories {
            let name = if category.is_system {
                format!("{} (system)", category.name)
            } else {
                category.name.clone()
            };
            println!(
                "{:<6} {:<24} {}",
                category.id,
                truncate(&name, 24),
                truncate(&category.keywords.join(", "), 40)
            );
        }
    })
}

/// Split a comma-separated keyword list, dropping blanks
pub fn parse_keywords(keywords: Option<&str>) -> Vec<String> {
    keywords
        .unwrap_or_default()
        .split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

pub fn cmd_categories_add(
    db: &Database,
    user_id: i64,
    name: &str,
    keywords: Option<&str>,
) -> Result<()> {
    let keywords = parse_keywords(keywords);
    let category = db
        .add_category(user_id, name, &keywords)
        .with_context(|| format!("Failed to add category '{}'", name))?;

    println!(
        "✅ Added category '{}' (ID {}) with {} keyword(s)",
        category.name,
        category.id,
        category.keywords.len()
    );
    Ok(())
}

pub fn cmd_categories_seed(db: &Database, user_id: i64) -> Result<()> {
    let created = db.seed_default_categories(user_id)?;
    let total = db.count_categories(user_id)?;

    if created == 0 {
        println!("Default categories already present ({} total)", total);
    } else {
        println!("✅ Seeded {} categories ({} total)", created, total);
    }
    Ok(())
}
