//! Alert and monitoring rule operations

use rusqlite::{params, Row};

use super::{parse_column, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Alert, AlertDraft, MonitoringRule, MonitoringRuleDraft, RuleScope};

const ALERT_COLUMNS: &str = r#"
    id, user_id, statement_id, type, severity, title, description, recommendation,
    currency, category_id, is_read, acknowledged_at, created_at
"#;

const RULE_COLUMNS: &str = r#"
    id, user_id, statement_id, threshold_type, scope_kind, scope_key, scope_label,
    threshold, currency, frequency, is_active, created_at
"#;

fn row_to_alert(row: &Row) -> rusqlite::Result<Alert> {
    let alert_type: String = row.get("type")?;
    let severity: String = row.get("severity")?;
    let acknowledged_at: Option<String> = row.get("acknowledged_at")?;
    let created_at: String = row.get("created_at")?;
    Ok(Alert {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        statement_id: row.get("statement_id")?,
        alert_type: parse_column(3, &alert_type)?,
        severity: parse_column(4, &severity)?,
        title: row.get("title")?,
        description: row.get("description")?,
        recommendation: row.get("recommendation")?,
        currency: row.get("currency")?,
        category_id: row.get("category_id")?,
        is_read: row.get("is_read")?,
        acknowledged_at: acknowledged_at.map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&created_at),
    })
}

fn row_to_rule(row: &Row) -> rusqlite::Result<MonitoringRule> {
    let threshold_type: String = row.get("threshold_type")?;
    let scope_kind: String = row.get("scope_kind")?;
    let scope_key: String = row.get("scope_key")?;
    let scope_label: String = row.get("scope_label")?;
    let frequency: String = row.get("frequency")?;
    let created_at: String = row.get("created_at")?;

    let scope = match scope_kind.as_str() {
        "category" => RuleScope::Category {
            id: scope_key.parse().map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    format!("Invalid category scope key: {}", scope_key).into(),
                )
            })?,
            name: scope_label,
        },
        _ => RuleScope::Merchant { name: scope_label },
    };

    Ok(MonitoringRule {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        statement_id: row.get("statement_id")?,
        threshold_type: parse_column(3, &threshold_type)?,
        scope,
        threshold: row.get("threshold")?,
        currency: row.get("currency")?,
        frequency: parse_column(9, &frequency)?,
        is_active: row.get("is_active")?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Persist a batch of alerts in one database transaction
    ///
    /// A statement's batch replaces the alerts it produced before, so
    /// rerunning the analysis never duplicates them.
    pub fn insert_alerts(
        &self,
        user_id: i64,
        statement_id: Option<i64>,
        drafts: &[AlertDraft],
    ) -> Result<Vec<i64>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if let Some(statement_id) = statement_id {
            tx.execute(
                "DELETE FROM alerts WHERE statement_id = ?",
                params![statement_id],
            )?;
        }

        let mut ids = Vec::with_capacity(drafts.len());
        for draft in drafts {
            tx.execute(
                r#"
                INSERT INTO alerts (
                    user_id, statement_id, type, severity, title, description,
                    recommendation, currency, category_id
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    user_id,
                    statement_id,
                    draft.alert_type.as_str(),
                    draft.severity.as_str(),
                    draft.title,
                    draft.description,
                    draft.recommendation,
                    draft.currency,
                    draft.category_id,
                ],
            )?;
            ids.push(tx.last_insert_rowid());
        }

        tx.commit()?;
        Ok(ids)
    }

    /// Alerts created for a statement, most severe first
    pub fn list_statement_alerts(&self, statement_id: i64) -> Result<Vec<Alert>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM alerts
            WHERE statement_id = ?
            ORDER BY CASE severity WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END, id
            "#,
            ALERT_COLUMNS
        ))?;
        let alerts = stmt
            .query_map(params![statement_id], row_to_alert)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }

    /// A user's alerts, newest first
    pub fn list_alerts(&self, user_id: i64, unread_only: bool) -> Result<Vec<Alert>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM alerts
            WHERE user_id = ? AND (? = 0 OR is_read = 0)
            ORDER BY created_at DESC, id DESC
            "#,
            ALERT_COLUMNS
        ))?;
        let alerts = stmt
            .query_map(params![user_id, unread_only], row_to_alert)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }

    pub fn mark_alert_read(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute("UPDATE alerts SET is_read = 1 WHERE id = ?", params![id])?;
        if updated == 0 {
            return Err(Error::NotFound(format!("alert {}", id)));
        }
        Ok(())
    }

    /// Acknowledge an alert, which also marks it read
    pub fn acknowledge_alert(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE alerts
            SET is_read = 1, acknowledged_at = COALESCE(acknowledged_at, CURRENT_TIMESTAMP)
            WHERE id = ?
            "#,
            params![id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("alert {}", id)));
        }
        Ok(())
    }

    /// Persist monitoring rules, skipping any the user already has active
    ///
    /// A rule is a duplicate when an active rule shares its threshold type,
    /// scope and currency. Returns the number of rules created.
    pub fn insert_monitoring_rules(
        &self,
        user_id: i64,
        statement_id: Option<i64>,
        drafts: &[MonitoringRuleDraft],
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut created = 0;
        for draft in drafts {
            let exists: bool = tx.query_row(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM monitoring_rules
                    WHERE user_id = ? AND is_active = 1 AND threshold_type = ?
                      AND scope_kind = ? AND scope_key = ? AND currency = ?
                )
                "#,
                params![
                    user_id,
                    draft.threshold_type.as_str(),
                    draft.scope.kind(),
                    draft.scope.key(),
                    draft.currency,
                ],
                |row| row.get(0),
            )?;
            if exists {
                continue;
            }

            tx.execute(
                r#"
                INSERT INTO monitoring_rules (
                    user_id, statement_id, threshold_type, scope_kind, scope_key, scope_label,
                    threshold, currency, frequency
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    user_id,
                    statement_id,
                    draft.threshold_type.as_str(),
                    draft.scope.kind(),
                    draft.scope.key(),
                    draft.scope.label(),
                    draft.threshold,
                    draft.currency,
                    draft.frequency.as_str(),
                ],
            )?;
            created += 1;
        }

        tx.commit()?;
        Ok(created)
    }

    /// Rules created from a statement's analysis
    pub fn list_statement_rules(&self, statement_id: i64) -> Result<Vec<MonitoringRule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM monitoring_rules WHERE statement_id = ? ORDER BY id",
            RULE_COLUMNS
        ))?;
        let rules = stmt
            .query_map(params![statement_id], row_to_rule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    /// A user's active rules
    pub fn list_active_rules(&self, user_id: i64) -> Result<Vec<MonitoringRule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM monitoring_rules WHERE user_id = ? AND is_active = 1 ORDER BY id",
            RULE_COLUMNS
        ))?;
        let rules = stmt
            .query_map(params![user_id], row_to_rule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    pub fn deactivate_rule(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE monitoring_rules SET is_active = 0 WHERE id = ?",
            params![id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("monitoring rule {}", id)));
        }
        Ok(())
    }
}
