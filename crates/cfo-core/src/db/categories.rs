//! Category operations

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Category, UNCATEGORIZED};

/// Starter categories, enough for a new user to meet the minimum
pub const DEFAULT_CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Food & Dining",
        &[
            "restaurant", "cafe", "coffee", "starbucks", "mcdonalds", "burger", "pizza",
            "sushi", "bakery", "doordash", "ubereats", "rappi", "restaurante", "cevicheria",
        ],
    ),
    (
        "Groceries",
        &[
            "supermarket", "grocery", "whole foods", "trader joe", "kroger", "safeway",
            "wong", "plaza vea", "tottus", "metro", "mercado", "costco",
        ],
    ),
    (
        "Transportation",
        &["uber", "lyft", "cabify", "taxi", "shell", "chevron", "gas station", "grifo", "parking", "transit"],
    ),
    (
        "Shopping",
        &["amazon", "mercadolibre", "falabella", "ripley", "target", "walmart", "ikea", "zara"],
    ),
    (
        "Entertainment",
        &["cinema", "cineplanet", "cinemark", "theater", "ticketmaster", "steam", "playstation", "concert"],
    ),
    (
        "Utilities",
        &["electric", "water", "internet", "movistar", "claro", "entel", "comcast", "verizon"],
    ),
    (
        "Health",
        &["pharmacy", "farmacia", "inkafarma", "cvs", "walgreens", "clinic", "clinica", "dental", "hospital"],
    ),
    (
        "Travel",
        &["airline", "latam", "american airlines", "delta", "hotel", "airbnb", "booking", "expedia"],
    ),
    (
        "Subscriptions",
        &["netflix", "spotify", "disney", "hbo", "youtube premium", "apple com bill", "icloud", "prime video"],
    ),
];

fn row_to_category(row: &Row) -> rusqlite::Result<Category> {
    let keywords: String = row.get("keywords")?;
    let created_at: String = row.get("created_at")?;
    Ok(Category {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        is_system: row.get("is_system")?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Create a category for a user
    pub fn add_category(&self, user_id: i64, name: &str, keywords: &[String]) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidData("Category name cannot be empty".to_string()));
        }
        if name.eq_ignore_ascii_case(UNCATEGORIZED) {
            return Err(Error::InvalidData(format!("{} is reserved", UNCATEGORIZED)));
        }

        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        let conn = self.conn()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM categories WHERE user_id = ? AND name = ?",
                params![user_id, name],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(Error::InvalidData(format!("Category already exists: {}", name)));
        }

        conn.execute(
            "INSERT INTO categories (user_id, name, keywords) VALUES (?, ?, ?)",
            params![user_id, name, serde_json::to_string(&keywords)?],
        )?;
        let id = conn.last_insert_rowid();

        self.get_category(id)?
            .ok_or_else(|| Error::NotFound(format!("category {}", id)))
    }

    /// Replace a category's keyword set
    pub fn set_category_keywords(&self, category_id: i64, keywords: &[String]) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE categories SET keywords = ? WHERE id = ? AND is_system = 0",
            params![serde_json::to_string(keywords)?, category_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("category {}", category_id)));
        }
        Ok(())
    }

    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, user_id, name, keywords, is_system, created_at FROM categories WHERE id = ?",
                params![id],
                row_to_category,
            )
            .optional()?)
    }

    /// All of a user's categories in creation order, system category included
    pub fn list_categories(&self, user_id: i64) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, name, keywords, is_system, created_at
            FROM categories
            WHERE user_id = ?
            ORDER BY created_at, id
            "#,
        )?;
        let categories = stmt
            .query_map(params![user_id], row_to_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    /// Count the categories that satisfy the processing minimum
    pub fn count_categories(&self, user_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM categories WHERE user_id = ? AND is_system = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Get or create the user's fallback category
    pub fn ensure_uncategorized(&self, user_id: i64) -> Result<Category> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO categories (user_id, name, keywords, is_system) VALUES (?, ?, '[]', 1)",
            params![user_id, UNCATEGORIZED],
        )?;
        let category = conn.query_row(
            r#"
            SELECT id, user_id, name, keywords, is_system, created_at
            FROM categories
            WHERE user_id = ? AND name = ?
            "#,
            params![user_id, UNCATEGORIZED],
            row_to_category,
        )?;
        Ok(category)
    }

    /// Create the default category set, skipping names the user already has
    ///
    /// Returns the number of categories created.
    pub fn seed_default_categories(&self, user_id: i64) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut created = 0;
        for (name, keywords) in DEFAULT_CATEGORIES {
            created += tx.execute(
                "INSERT OR IGNORE INTO categories (user_id, name, keywords) VALUES (?, ?, ?)",
                params![user_id, name, serde_json::to_string(keywords)?],
            )?;
        }

        tx.commit()?;
        Ok(created)
    }
}
