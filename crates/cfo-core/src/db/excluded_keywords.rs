//! Excluded keyword operations

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::ExcludedKeyword;
use crate::normalize::normalize_text;

const KEYWORD_COLUMNS: &str = "id, user_id, keyword, created_at";

fn row_to_keyword(row: &Row) -> rusqlite::Result<ExcludedKeyword> {
    let created_at: String = row.get("created_at")?;
    Ok(ExcludedKeyword {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        keyword: row.get("keyword")?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// A user's excluded keywords in creation order
    pub fn list_excluded_keywords(&self, user_id: i64) -> Result<Vec<ExcludedKeyword>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM user_excluded_keywords WHERE user_id = ? ORDER BY created_at, id",
            KEYWORD_COLUMNS
        ))?;
        let keywords = stmt
            .query_map(params![user_id], row_to_keyword)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keywords)
    }

    /// Add a keyword, returning the existing row when an equivalent one exists
    ///
    /// Keywords are compared in normalized form, so `Comisiones` and
    /// `COMISIONES` are the same keyword.
    pub fn add_excluded_keyword(&self, user_id: i64, keyword: &str) -> Result<ExcludedKeyword> {
        let keyword = keyword.trim();
        let normalized = normalize_text(keyword);
        if normalized.is_empty() {
            return Err(Error::InvalidData("Excluded keyword cannot be empty".to_string()));
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR IGNORE INTO user_excluded_keywords (user_id, keyword, keyword_normalized)
            VALUES (?, ?, ?)
            "#,
            params![user_id, keyword, normalized],
        )?;

        conn.query_row(
            &format!(
                "SELECT {} FROM user_excluded_keywords WHERE user_id = ? AND keyword_normalized = ?",
                KEYWORD_COLUMNS
            ),
            params![user_id, normalized],
            row_to_keyword,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("excluded keyword {}", keyword)))
    }

    pub fn delete_excluded_keyword(&self, user_id: i64, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM user_excluded_keywords WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("excluded keyword {}", id)));
        }
        Ok(())
    }

    /// Seed a user's keywords from `defaults` unless they already have some
    ///
    /// Returns how many keywords were created.
    pub fn seed_excluded_keywords(&self, user_id: i64, defaults: &[String]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM user_excluded_keywords WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Ok(0);
        }

        let created = insert_keywords(&tx, user_id, defaults)?;
        tx.commit()?;
        Ok(created)
    }

    /// Drop every keyword of a user and restore `defaults`
    pub fn reset_excluded_keywords(&self, user_id: i64, defaults: &[String]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM user_excluded_keywords WHERE user_id = ?",
            params![user_id],
        )?;
        let created = insert_keywords(&tx, user_id, defaults)?;
        tx.commit()?;
        Ok(created)
    }
}

fn insert_keywords(tx: &rusqlite::Transaction, user_id: i64, keywords: &[String]) -> Result<usize> {
    let mut created = 0;
    for keyword in keywords {
        let keyword = keyword.trim();
        let normalized = normalize_text(keyword);
        if normalized.is_empty() {
            continue;
        }
        created += tx.execute(
            r#"
            INSERT OR IGNORE INTO user_excluded_keywords (user_id, keyword, keyword_normalized)
            VALUES (?, ?, ?)
            "#,
            params![user_id, keyword, normalized],
        )?;
    }
    Ok(created)
}
