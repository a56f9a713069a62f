//! Transaction operations

use std::collections::HashSet;

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use super::{parse_column, parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{NewTransaction, Transaction};

const TRANSACTION_SELECT: &str = r#"
    SELECT t.id, t.statement_id, t.user_id, t.card_id, t.date, t.merchant, t.amount,
           t.currency, t.category_id, c.name AS category_name, t.category_source,
           t.original_category_id, t.matched_keyword, t.fingerprint, t.created_at
    FROM transactions t
    JOIN categories c ON c.id = t.category_id
"#;

fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    let date: String = row.get("date")?;
    let source: String = row.get("category_source")?;
    let created_at: String = row.get("created_at")?;
    Ok(Transaction {
        id: row.get("id")?,
        statement_id: row.get("statement_id")?,
        user_id: row.get("user_id")?,
        card_id: row.get("card_id")?,
        date: parse_date(&date),
        merchant: row.get("merchant")?,
        amount: row.get("amount")?,
        currency: row.get("currency")?,
        category_id: row.get("category_id")?,
        category_name: row.get("category_name")?,
        category_source: parse_column(10, &source)?,
        original_category_id: row.get("original_category_id")?,
        matched_keyword: row.get("matched_keyword")?,
        fingerprint: row.get("fingerprint")?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Fingerprints already committed for a statement
    pub fn committed_fingerprints(&self, statement_id: i64) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT fingerprint FROM transactions WHERE statement_id = ?")?;
        let fingerprints = stmt
            .query_map(params![statement_id], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(fingerprints)
    }

    /// Commit a categorized batch in one database transaction
    ///
    /// Either every row lands or none does. Rows whose fingerprint is already
    /// committed for the statement are skipped, so re-running a batch never
    /// duplicates. Returns the number of rows inserted.
    pub fn insert_transactions(&self, batch: &[NewTransaction]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO transactions (
                    statement_id, user_id, card_id, date, merchant, amount, currency,
                    category_id, category_source, original_category_id, original_category_source,
                    matched_keyword, fingerprint
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )?;
            for txn in batch {
                inserted += stmt.execute(params![
                    txn.statement_id,
                    txn.user_id,
                    txn.card_id,
                    txn.date.to_string(),
                    txn.merchant,
                    txn.amount,
                    txn.currency,
                    txn.category_id,
                    txn.category_source.as_str(),
                    txn.category_id,
                    txn.category_source.as_str(),
                    txn.matched_keyword,
                    txn.fingerprint,
                ])?;
            }
        }

        tx.commit()?;
        debug!(rows = batch.len(), inserted, "Committed transaction batch");
        Ok(inserted)
    }

    /// Committed transactions of one statement, in date order
    pub fn list_statement_transactions(&self, statement_id: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE t.statement_id = ? ORDER BY t.date, t.id",
            TRANSACTION_SELECT
        ))?;
        let transactions = stmt
            .query_map(params![statement_id], row_to_transaction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(transactions)
    }

    /// A user's transactions dated in `[since, until)`, excluding one statement
    pub fn historical_transactions(
        &self,
        user_id: i64,
        since: NaiveDate,
        until: NaiveDate,
        exclude_statement: Option<i64>,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"{}
            WHERE t.user_id = ?
              AND t.date >= ?
              AND t.date < ?
              AND t.statement_id != ?
            ORDER BY t.date, t.id
            "#,
            TRANSACTION_SELECT
        ))?;
        let transactions = stmt
            .query_map(
                params![
                    user_id,
                    since.to_string(),
                    until.to_string(),
                    exclude_statement.unwrap_or(-1)
                ],
                row_to_transaction,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(transactions)
    }

    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("{} WHERE t.id = ?", TRANSACTION_SELECT),
                params![id],
                row_to_transaction,
            )
            .optional()?)
    }

    /// Move a transaction to another of its owner's categories
    ///
    /// The category assigned by the pipeline stays in `original_category_id`.
    pub fn recategorize_transaction(&self, id: i64, category_id: i64) -> Result<()> {
        let conn = self.conn()?;
        let owner: Option<i64> = conn
            .query_row(
                "SELECT user_id FROM transactions WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let owner = owner.ok_or_else(|| Error::NotFound(format!("transaction {}", id)))?;

        let category_owner: Option<i64> = conn
            .query_row(
                "SELECT user_id FROM categories WHERE id = ?",
                params![category_id],
                |row| row.get(0),
            )
            .optional()?;
        if category_owner != Some(owner) {
            return Err(Error::NotFound(format!("category {}", category_id)));
        }

        conn.execute(
            "UPDATE transactions SET category_id = ? WHERE id = ?",
            params![category_id, id],
        )?;
        Ok(())
    }
}
