//! Storage collaborator used by the pipeline
//!
//! The pipeline only talks to persistence through this trait. Every failure
//! surfaces as `Error::Persistence` (or `Error::NotFound` for missing rows),
//! never as a raw database error.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::extract::ExtractionOutcome;
use crate::models::{
    Alert, AlertDraft, Category, MonitoringRule, MonitoringRuleDraft, NewStatement, NewTransaction,
    Stage, Statement, StatementStatus, Transaction,
};
use crate::trends::TrendAnalysis;

pub trait Storage: Send + Sync {
    fn create_statement(&self, upload: &NewStatement) -> Result<Statement>;

    fn load_statement(&self, id: i64) -> Result<Statement>;

    /// Original uploaded bytes
    fn load_document(&self, id: i64) -> Result<Vec<u8>>;

    /// Overwrite the cached plain text checkpoint
    fn save_raw_text(&self, id: i64, text: &str) -> Result<()>;

    /// Persist a status with its transition timestamp; `None` clears the error
    fn save_statement_status(
        &self,
        id: i64,
        status: StatementStatus,
        error: Option<&Error>,
    ) -> Result<()>;

    /// Count one retry of a stage, returning the new total
    fn increment_retry(&self, id: i64, stage: Stage) -> Result<u32>;

    fn save_extraction(&self, id: i64, outcome: &ExtractionOutcome) -> Result<()>;

    /// Every category of a user, fallback included, in creation order
    fn load_categories(&self, user_id: i64) -> Result<Vec<Category>>;

    fn ensure_uncategorized(&self, user_id: i64) -> Result<Category>;

    /// Categories counting toward the processing minimum
    fn count_categories(&self, user_id: i64) -> Result<usize>;

    /// A user's excluded keywords, seeded from `defaults` on first use
    fn load_excluded_keywords(&self, user_id: i64, defaults: &[String]) -> Result<Vec<String>>;

    fn committed_fingerprints(&self, statement_id: i64) -> Result<HashSet<String>>;

    /// Commit a batch atomically, skipping fingerprints already committed
    fn save_transactions(&self, batch: &[NewTransaction]) -> Result<usize>;

    fn load_statement_transactions(&self, statement_id: i64) -> Result<Vec<Transaction>>;

    /// A user's transactions dated in `[since, until)`
    fn load_historical_transactions(
        &self,
        user_id: i64,
        since: NaiveDate,
        until: NaiveDate,
        exclude_statement: Option<i64>,
    ) -> Result<Vec<Transaction>>;

    fn save_alerts(&self, user_id: i64, statement_id: i64, drafts: &[AlertDraft]) -> Result<usize>;

    fn save_monitoring_rules(
        &self,
        user_id: i64,
        statement_id: i64,
        drafts: &[MonitoringRuleDraft],
    ) -> Result<usize>;

    fn load_alerts(&self, statement_id: i64) -> Result<Vec<Alert>>;

    fn load_monitoring_rules(&self, statement_id: i64) -> Result<Vec<MonitoringRule>>;

    fn save_analysis(&self, statement_id: i64, analysis: &TrendAnalysis) -> Result<()>;

    fn load_analysis(&self, statement_id: i64) -> Result<Option<TrendAnalysis>>;
}

impl Storage for Database {
    fn create_statement(&self, upload: &NewStatement) -> Result<Statement> {
        Database::create_statement(self, upload).map_err(Error::into_persistence)
    }

    fn load_statement(&self, id: i64) -> Result<Statement> {
        self.get_statement(id).map_err(Error::into_persistence)
    }

    fn load_document(&self, id: i64) -> Result<Vec<u8>> {
        self.get_statement_document(id)
            .map_err(Error::into_persistence)
    }

    fn save_raw_text(&self, id: i64, text: &str) -> Result<()> {
        self.set_statement_raw_text(id, text)
            .map_err(Error::into_persistence)
    }

    fn save_statement_status(
        &self,
        id: i64,
        status: StatementStatus,
        error: Option<&Error>,
    ) -> Result<()> {
        self.set_statement_status(id, status, error)
            .map_err(Error::into_persistence)
    }

    fn increment_retry(&self, id: i64, stage: Stage) -> Result<u32> {
        self.increment_statement_retries(id, stage)
            .map_err(Error::into_persistence)
    }

    fn save_extraction(&self, id: i64, outcome: &ExtractionOutcome) -> Result<()> {
        self.set_statement_extraction(id, outcome)
            .map_err(Error::into_persistence)
    }

    fn load_categories(&self, user_id: i64) -> Result<Vec<Category>> {
        self.list_categories(user_id).map_err(Error::into_persistence)
    }

    fn ensure_uncategorized(&self, user_id: i64) -> Result<Category> {
        Database::ensure_uncategorized(self, user_id).map_err(Error::into_persistence)
    }

    fn count_categories(&self, user_id: i64) -> Result<usize> {
        Database::count_categories(self, user_id).map_err(Error::into_persistence)
    }

    fn load_excluded_keywords(&self, user_id: i64, defaults: &[String]) -> Result<Vec<String>> {
        self.seed_excluded_keywords(user_id, defaults)
            .and_then(|_| self.list_excluded_keywords(user_id))
            .map(|keywords| keywords.into_iter().map(|k| k.keyword).collect())
            .map_err(Error::into_persistence)
    }

    fn committed_fingerprints(&self, statement_id: i64) -> Result<HashSet<String>> {
        Database::committed_fingerprints(self, statement_id).map_err(Error::into_persistence)
    }

    fn save_transactions(&self, batch: &[NewTransaction]) -> Result<usize> {
        self.insert_transactions(batch)
            .map_err(Error::into_persistence)
    }

    fn load_statement_transactions(&self, statement_id: i64) -> Result<Vec<Transaction>> {
        self.list_statement_transactions(statement_id)
            .map_err(Error::into_persistence)
    }

    fn load_historical_transactions(
        &self,
        user_id: i64,
        since: NaiveDate,
        until: NaiveDate,
        exclude_statement: Option<i64>,
    ) -> Result<Vec<Transaction>> {
        self.historical_transactions(user_id, since, until, exclude_statement)
            .map_err(Error::into_persistence)
    }

    fn save_alerts(&self, user_id: i64, statement_id: i64, drafts: &[AlertDraft]) -> Result<usize> {
        self.insert_alerts(user_id, Some(statement_id), drafts)
            .map(|ids| ids.len())
            .map_err(Error::into_persistence)
    }

    fn save_monitoring_rules(
        &self,
        user_id: i64,
        statement_id: i64,
        drafts: &[MonitoringRuleDraft],
    ) -> Result<usize> {
        self.insert_monitoring_rules(user_id, Some(statement_id), drafts)
            .map_err(Error::into_persistence)
    }

    fn load_alerts(&self, statement_id: i64) -> Result<Vec<Alert>> {
        self.list_statement_alerts(statement_id)
            .map_err(Error::into_persistence)
    }

    fn load_monitoring_rules(&self, statement_id: i64) -> Result<Vec<MonitoringRule>> {
        self.list_statement_rules(statement_id)
            .map_err(Error::into_persistence)
    }

    fn save_analysis(&self, statement_id: i64, analysis: &TrendAnalysis) -> Result<()> {
        self.set_statement_analysis(statement_id, analysis)
            .map_err(Error::into_persistence)
    }

    fn load_analysis(&self, statement_id: i64) -> Result<Option<TrendAnalysis>> {
        self.get_statement_analysis(statement_id)
            .map_err(Error::into_persistence)
    }
}
