//! Statement operations: uploads, status transitions and checkpoints

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_column, parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::extract::ExtractionOutcome;
use crate::models::{NewStatement, Stage, Statement, StatementPeriod, StatementStatus};
use crate::trends::TrendAnalysis;

const STATEMENT_COLUMNS: &str = r#"
    id, user_id, card_id, filename, format, content_hash, raw_text,
    period_start, period_end, status, error_message, error_kind,
    candidates_json, extraction_method, found_count, dropped_count, excluded_count,
    extraction_retries, categorization_retries, uploaded_at,
    extraction_started_at, extracted_at, categorization_started_at, completed_at, failed_at
"#;

fn optional_datetime(row: &Row, column: &str) -> rusqlite::Result<Option<chrono::DateTime<chrono::Utc>>> {
    Ok(row
        .get::<_, Option<String>>(column)?
        .map(|s| parse_datetime(&s)))
}

fn row_to_statement(row: &Row) -> rusqlite::Result<Statement> {
    let format: String = row.get("format")?;
    let status: String = row.get("status")?;
    let method: Option<String> = row.get("extraction_method")?;
    let period_start: Option<String> = row.get("period_start")?;
    let period_end: Option<String> = row.get("period_end")?;
    let candidates: Option<String> = row.get("candidates_json")?;
    let uploaded_at: String = row.get("uploaded_at")?;

    let period = match (period_start, period_end) {
        (Some(start), Some(end)) => StatementPeriod::new(parse_date(&start), parse_date(&end)),
        _ => None,
    };

    Ok(Statement {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        card_id: row.get("card_id")?,
        filename: row.get("filename")?,
        format: parse_column(4, &format)?,
        content_hash: row.get("content_hash")?,
        raw_text: row.get("raw_text")?,
        period,
        status: parse_column(9, &status)?,
        error_message: row.get("error_message")?,
        error_kind: row.get("error_kind")?,
        candidates: candidates
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default(),
        extraction_method: method.map(|m| parse_column(13, &m)).transpose()?,
        found_count: row.get("found_count")?,
        dropped_count: row.get("dropped_count")?,
        excluded_count: row.get("excluded_count")?,
        extraction_retries: row.get("extraction_retries")?,
        categorization_retries: row.get("categorization_retries")?,
        uploaded_at: parse_datetime(&uploaded_at),
        extraction_started_at: optional_datetime(row, "extraction_started_at")?,
        extracted_at: optional_datetime(row, "extracted_at")?,
        categorization_started_at: optional_datetime(row, "categorization_started_at")?,
        completed_at: optional_datetime(row, "completed_at")?,
        failed_at: optional_datetime(row, "failed_at")?,
    })
}

/// Timestamp column recorded when a statement enters a status
fn transition_column(status: StatementStatus) -> Option<&'static str> {
    match status {
        StatementStatus::Uploaded => None,
        StatementStatus::Extracting => Some("extraction_started_at"),
        StatementStatus::Extracted => Some("extracted_at"),
        StatementStatus::Categorizing => Some("categorization_started_at"),
        StatementStatus::Completed => Some("completed_at"),
        StatementStatus::ExtractFailed | StatementStatus::CategorizeFailed => Some("failed_at"),
    }
}

fn retry_column(stage: Stage) -> &'static str {
    match stage {
        Stage::Extraction => "extraction_retries",
        Stage::Categorization => "categorization_retries",
    }
}

impl Database {
    /// Store an uploaded document in the `uploaded` state
    pub fn create_statement(&self, upload: &NewStatement) -> Result<Statement> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO statements (user_id, card_id, filename, format, content_hash, document, status)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                upload.user_id,
                upload.card_id,
                upload.filename,
                upload.format.as_str(),
                upload.content_hash,
                upload.document,
                StatementStatus::Uploaded.as_str(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_statement(id)
    }

    /// Load a statement, failing with `NotFound` if it does not exist
    pub fn get_statement(&self, id: i64) -> Result<Statement> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM statements WHERE id = ?", STATEMENT_COLUMNS),
            params![id],
            row_to_statement,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("statement {}", id)))
    }

    /// A user's statements, newest first
    pub fn list_statements(&self, user_id: i64) -> Result<Vec<Statement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM statements WHERE user_id = ? ORDER BY uploaded_at DESC, id DESC",
            STATEMENT_COLUMNS
        ))?;
        let statements = stmt
            .query_map(params![user_id], row_to_statement)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(statements)
    }

    /// Original uploaded bytes
    pub fn get_statement_document(&self, id: i64) -> Result<Vec<u8>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT document FROM statements WHERE id = ?",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("statement {}", id)))
    }

    /// Cache the document's plain text
    pub fn set_statement_raw_text(&self, id: i64, text: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE statements SET raw_text = ? WHERE id = ?",
            params![text, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("statement {}", id)));
        }
        Ok(())
    }

    /// Persist a status change and stamp the matching transition time
    ///
    /// `error` replaces the stored error detail; `None` clears it.
    pub fn set_statement_status(
        &self,
        id: i64,
        status: StatementStatus,
        error: Option<&Error>,
    ) -> Result<()> {
        let stamp = transition_column(status)
            .map(|column| format!(", {} = CURRENT_TIMESTAMP", column))
            .unwrap_or_default();
        let sql = format!(
            "UPDATE statements SET status = ?, error_message = ?, error_kind = ?{} WHERE id = ?",
            stamp
        );

        let conn = self.conn()?;
        let updated = conn.execute(
            &sql,
            params![
                status.as_str(),
                error.map(|e| e.to_string()),
                error.map(|e| e.kind()),
                id
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("statement {}", id)));
        }
        Ok(())
    }

    /// Bump a stage's retry counter, returning the new value
    pub fn increment_statement_retries(&self, id: i64, stage: Stage) -> Result<u32> {
        let column = retry_column(stage);
        let conn = self.conn()?;
        conn.execute(
            &format!("UPDATE statements SET {0} = {0} + 1 WHERE id = ?", column),
            params![id],
        )?;
        conn.query_row(
            &format!("SELECT {} FROM statements WHERE id = ?", column),
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("statement {}", id)))
    }

    /// Store extraction results as the categorization checkpoint
    pub fn set_statement_extraction(&self, id: i64, outcome: &ExtractionOutcome) -> Result<()> {
        let candidates = serde_json::to_string(&outcome.candidates)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE statements SET
                candidates_json = ?,
                period_start = ?,
                period_end = ?,
                extraction_method = ?,
                found_count = ?,
                dropped_count = ?,
                excluded_count = ?
            WHERE id = ?
            "#,
            params![
                candidates,
                outcome.period.as_ref().map(|p| p.start.to_string()),
                outcome.period.as_ref().map(|p| p.end.to_string()),
                outcome.method.as_str(),
                outcome.candidates.len() as i64,
                outcome.dropped as i64,
                outcome.excluded as i64,
                id
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("statement {}", id)));
        }
        Ok(())
    }

    pub fn set_statement_analysis(&self, id: i64, analysis: &TrendAnalysis) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE statements SET analysis_json = ? WHERE id = ?",
            params![serde_json::to_string(analysis)?, id],
        )?;
        Ok(())
    }

    pub fn get_statement_analysis(&self, id: i64) -> Result<Option<TrendAnalysis>> {
        let conn = self.conn()?;
        let json: Option<Option<String>> = conn
            .query_row(
                "SELECT analysis_json FROM statements WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            None => Err(Error::NotFound(format!("statement {}", id))),
            Some(None) => Ok(None),
            Some(Some(json)) => Ok(Some(serde_json::from_str(&json)?)),
        }
    }

    /// Delete a statement with its transactions and alerts
    pub fn delete_statement(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM statements WHERE id = ?", params![id])?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("statement {}", id)));
        }
        Ok(())
    }
}
