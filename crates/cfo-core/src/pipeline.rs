//! Pipeline coordinator
//!
//! Entry point for the upward API. Drives the state machine and runs the
//! stages in order: extraction, then categorization with trend analysis.
//! Transactions are committed once per statement, after the whole batch has
//! been categorized.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::ai::AIClient;
use crate::categorize::{CategoryResolver, CategorySnapshot};
use crate::config::PipelineConfig;
use crate::document;
use crate::error::{Error, Result};
use crate::extract::{ExtractionOutcome, TransactionExtractor};
use crate::models::{
    Alert, CategorySource, ExtractionMethod, MonitoringRule, NewStatement, NewTransaction, Stage,
    Statement, StatementPeriod, StatementStatus, StatusReport,
};
use crate::state::{CancellationFlag, StageRun, StateMachine};
use crate::storage::Storage;
use crate::trends::{history_window, NarrativeSource, TrendAnalysis, TrendEngine, TrendInput};

/// Caller-supplied inputs for a stage run
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// User-declared statement period, used when none is detected
    pub period: Option<StatementPeriod>,
    /// Card the statement's transactions belong to
    pub card_id: Option<i64>,
    /// Replacement document text; overwrites the cached text before extraction
    pub text: Option<String>,
    pub cancel: Option<CancellationFlag>,
}

impl ProcessOptions {
    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    pub statement_id: i64,
    pub found: usize,
    pub dropped: usize,
    pub excluded: usize,
    pub method: ExtractionMethod,
    pub period: Option<StatementPeriod>,
}

impl ExtractReport {
    fn new(statement_id: i64, outcome: &ExtractionOutcome) -> Self {
        Self {
            statement_id,
            found: outcome.candidates.len(),
            dropped: outcome.dropped,
            excluded: outcome.excluded,
            method: outcome.method,
            period: outcome.period.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorizeReport {
    pub statement_id: i64,
    /// Rows committed by this run
    pub created: usize,
    /// Candidates already committed by an earlier run
    pub skipped: usize,
    pub rule_matched: usize,
    pub inferred: usize,
    pub uncategorized: usize,
    pub alert_count: usize,
    pub rule_count: usize,
    pub summary: String,
    pub narrative_source: NarrativeSource,
}

/// Result of a stage re-run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageReport {
    Extraction(ExtractReport),
    Categorization(CategorizeReport),
}

/// Result of a full `process` call
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub statement_id: i64,
    pub status: StatementStatus,
    pub found: usize,
    pub created: usize,
    pub dropped: usize,
    pub excluded: usize,
    pub alert_count: usize,
    pub summary: String,
}

/// Stored analysis, alerts and rules for one statement
#[derive(Debug, Clone, Serialize)]
pub struct Insights {
    pub statement_id: i64,
    pub status: StatementStatus,
    pub analysis: Option<TrendAnalysis>,
    pub alerts: Vec<Alert>,
    pub rules: Vec<MonitoringRule>,
}

pub struct Pipeline<S> {
    storage: Arc<S>,
    ai: Option<AIClient>,
    config: PipelineConfig,
    states: StateMachine<S>,
}

impl<S: Storage> Pipeline<S> {
    pub fn new(storage: Arc<S>, ai: Option<AIClient>, config: PipelineConfig) -> Self {
        let states = StateMachine::new(storage.clone(), config.max_stage_retries);
        Self {
            storage,
            ai,
            config,
            states,
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ai(&self) -> Option<&AIClient> {
        self.ai.as_ref()
    }

    /// Store a new document in the `uploaded` state
    pub fn upload(
        &self,
        user_id: i64,
        filename: &str,
        bytes: Vec<u8>,
        card_id: Option<i64>,
    ) -> Result<Statement> {
        if bytes.is_empty() {
            return Err(Error::InvalidData("Uploaded document is empty".to_string()));
        }
        let statement = self
            .storage
            .create_statement(&NewStatement::new(user_id, filename, bytes, card_id))?;
        info!(
            statement_id = statement.id,
            user_id,
            format = %statement.format,
            "Statement uploaded"
        );
        Ok(statement)
    }

    fn check_categories(&self, user_id: i64) -> Result<()> {
        let have = self.storage.count_categories(user_id)?;
        if have < self.config.min_categories {
            return Err(Error::InsufficientCategories {
                have,
                required: self.config.min_categories,
            });
        }
        Ok(())
    }

    /// Run extraction
    ///
    /// The category minimum is checked before any transition.
    pub async fn extract(&self, statement_id: i64, options: &ProcessOptions) -> Result<ExtractReport> {
        let statement = self.storage.load_statement(statement_id)?;
        self.check_categories(statement.user_id)?;
        let run = self.states.advance(statement_id, Stage::Extraction)?;
        self.run_extraction(run, options).await
    }

    /// Run categorization and trend analysis
    pub async fn categorize(
        &self,
        statement_id: i64,
        options: &ProcessOptions,
    ) -> Result<CategorizeReport> {
        let run = self.states.advance(statement_id, Stage::Categorization)?;
        self.run_categorization(run, options).await
    }

    /// Run every remaining stage
    ///
    /// A completed statement is reported from stored state without re-running.
    pub async fn process(&self, statement_id: i64, options: &ProcessOptions) -> Result<ProcessReport> {
        let statement = self.storage.load_statement(statement_id)?;
        self.check_categories(statement.user_id)?;

        if statement.status == StatementStatus::Completed {
            return self.completed_report(&statement);
        }

        let (found, dropped, excluded) = match statement.status {
            StatementStatus::Extracted | StatementStatus::CategorizeFailed => (
                statement.found_count as usize,
                statement.dropped_count as usize,
                statement.excluded_count as usize,
            ),
            _ => {
                let run = self.states.advance(statement_id, Stage::Extraction)?;
                let extracted = self.run_extraction(run, options).await?;
                (extracted.found, extracted.dropped, extracted.excluded)
            }
        };

        let categorized = self.categorize(statement_id, options).await?;

        Ok(ProcessReport {
            statement_id,
            status: StatementStatus::Completed,
            found,
            created: categorized.created,
            dropped,
            excluded,
            alert_count: categorized.alert_count,
            summary: categorized.summary,
        })
    }

    /// Side-effect free status snapshot
    pub fn status(&self, statement_id: i64) -> Result<StatusReport> {
        self.states.status(statement_id)
    }

    /// Re-run a failed or abandoned stage
    ///
    /// `options.text` replaces the cached document text before extraction
    /// re-runs; without it the cached text is reused.
    pub async fn retry(&self, statement_id: i64, options: &ProcessOptions) -> Result<StageReport> {
        let statement = self.storage.load_statement(statement_id)?;
        if statement.status.active_stage() == Some(Stage::Extraction) {
            self.check_categories(statement.user_id)?;
        }

        let run = self.states.retry(statement_id)?;
        match run.stage {
            Stage::Extraction => self
                .run_extraction(run, options)
                .await
                .map(StageReport::Extraction),
            Stage::Categorization => self
                .run_categorization(run, options)
                .await
                .map(StageReport::Categorization),
        }
    }

    /// Stored analysis with the statement's alerts and rules
    pub fn insights(&self, statement_id: i64) -> Result<Insights> {
        let statement = self.storage.load_statement(statement_id)?;
        Ok(Insights {
            statement_id,
            status: statement.status,
            analysis: self.storage.load_analysis(statement_id)?,
            alerts: self.storage.load_alerts(statement_id)?,
            rules: self.storage.load_monitoring_rules(statement_id)?,
        })
    }

    fn completed_report(&self, statement: &Statement) -> Result<ProcessReport> {
        let created = self.storage.load_statement_transactions(statement.id)?.len();
        let alert_count = self.storage.load_alerts(statement.id)?.len();
        let summary = self
            .storage
            .load_analysis(statement.id)?
            .map(|a| a.narrative.summary)
            .unwrap_or_default();
        Ok(ProcessReport {
            statement_id: statement.id,
            status: statement.status,
            found: statement.found_count as usize,
            created,
            dropped: statement.dropped_count as usize,
            excluded: statement.excluded_count as usize,
            alert_count,
            summary,
        })
    }

    /// Settle a finished stage: success completes, cancellation leaves the
    /// statement in progress, anything else fails it
    fn settle<T>(&self, run: StageRun, result: Result<T>) -> Result<T> {
        let statement_id = run.statement.id;
        let stage = run.stage;
        match result {
            Ok(value) => {
                self.states.complete(run)?;
                Ok(value)
            }
            Err(e @ Error::Cancelled(_)) => {
                warn!(statement_id, stage = %stage, "Stage cancelled, left in progress for retry");
                Err(e)
            }
            Err(e) => {
                warn!(statement_id, stage = %stage, error = %e, "Stage failed");
                if let Err(persist) = self.states.fail(run, &e) {
                    warn!(statement_id, error = %persist, "Could not record stage failure");
                }
                Err(e)
            }
        }
    }

    async fn run_extraction(&self, run: StageRun, options: &ProcessOptions) -> Result<ExtractReport> {
        let result = self.extraction_work(&run.statement, options).await;
        self.settle(run, result)
    }

    async fn extraction_work(
        &self,
        statement: &Statement,
        options: &ProcessOptions,
    ) -> Result<ExtractReport> {
        let text = self.document_text(statement, options.text.as_deref())?;
        if options.cancelled() {
            return Err(Error::Cancelled(statement.id));
        }

        let hint = options.period.as_ref().or(statement.period.as_ref());
        // Snapshot taken at stage start, like the category snapshot
        let excluded = self
            .storage
            .load_excluded_keywords(statement.user_id, &self.config.excluded_keywords)?;
        let extractor = match &self.ai {
            Some(ai) => TransactionExtractor::with_ai(ai, &self.config),
            None => TransactionExtractor::new(&self.config),
        }
        .with_excluded_keywords(&excluded);
        let outcome = extractor.extract(&text, hint).await?;

        if outcome.dropped > 0 {
            warn!(
                statement_id = statement.id,
                dropped = outcome.dropped,
                "Some statement lines could not be extracted"
            );
        }
        self.storage.save_extraction(statement.id, &outcome)?;
        Ok(ExtractReport::new(statement.id, &outcome))
    }

    /// Plain text for extraction, reusing the cached checkpoint when present
    fn document_text(&self, statement: &Statement, replacement: Option<&str>) -> Result<String> {
        if let Some(text) = replacement {
            self.storage.save_raw_text(statement.id, text)?;
            return Ok(text.to_string());
        }
        if let Some(text) = &statement.raw_text {
            return Ok(text.clone());
        }

        let bytes = self.storage.load_document(statement.id)?;
        let text = document::extract_text(&bytes, statement.format)?;
        self.storage.save_raw_text(statement.id, &text)?;
        Ok(text)
    }

    async fn run_categorization(
        &self,
        run: StageRun,
        options: &ProcessOptions,
    ) -> Result<CategorizeReport> {
        let result = self.categorization_work(&run.statement, options).await;
        self.settle(run, result)
    }

    async fn categorization_work(
        &self,
        statement: &Statement,
        options: &ProcessOptions,
    ) -> Result<CategorizeReport> {
        let user_id = statement.user_id;

        // Snapshots taken at stage start; later edits do not affect this run
        let categories = self.storage.load_categories(user_id)?;
        let uncategorized = self.storage.ensure_uncategorized(user_id)?;
        let snapshot = CategorySnapshot::new(categories, uncategorized);
        let committed = self.storage.committed_fingerprints(statement.id)?;

        let mut resolver = CategoryResolver::new(&snapshot, self.ai.as_ref());
        let card_id = options.card_id.or(statement.card_id);

        let mut batch = Vec::with_capacity(statement.candidates.len());
        let (mut skipped, mut rule_matched, mut inferred, mut fallback) = (0, 0, 0, 0);

        for (position, candidate) in statement.candidates.iter().enumerate() {
            if options.cancelled() {
                return Err(Error::Cancelled(statement.id));
            }

            let fingerprint = candidate.fingerprint(position);
            if committed.contains(&fingerprint) {
                skipped += 1;
                continue;
            }

            let resolution = resolver.resolve(candidate).await;
            match resolution.source {
                CategorySource::Rule => rule_matched += 1,
                CategorySource::Inferred => inferred += 1,
                CategorySource::None => fallback += 1,
            }

            batch.push(NewTransaction {
                statement_id: statement.id,
                user_id,
                card_id,
                date: candidate.date,
                merchant: candidate.description.clone(),
                amount: candidate.amount,
                currency: candidate.currency.clone(),
                category_id: resolution.category_id,
                category_source: resolution.source,
                matched_keyword: resolution.matched_keyword,
                fingerprint,
            });
        }

        if options.cancelled() {
            return Err(Error::Cancelled(statement.id));
        }

        let created = self.storage.save_transactions(&batch)?;
        info!(
            statement_id = statement.id,
            created,
            skipped,
            rule_matched,
            inferred,
            uncategorized = fallback,
            classified = resolver.classified(),
            "Committed categorized transactions"
        );

        let (analysis, alert_count, rule_count) = self.analyze(statement, options).await?;

        Ok(CategorizeReport {
            statement_id: statement.id,
            created,
            skipped,
            rule_matched,
            inferred,
            uncategorized: fallback,
            alert_count,
            rule_count,
            summary: analysis.narrative.summary,
            narrative_source: analysis.narrative.source,
        })
    }

    /// Trend analysis over the committed rows
    ///
    /// Only reading the statement's own rows can fail the stage. History,
    /// alert, rule and analysis persistence problems are logged and skipped.
    async fn analyze(
        &self,
        statement: &Statement,
        options: &ProcessOptions,
    ) -> Result<(TrendAnalysis, usize, usize)> {
        let current = self.storage.load_statement_transactions(statement.id)?;
        let period = statement.period.as_ref().or(options.period.as_ref());

        let history = match history_window(period, &current, self.config.history_months) {
            Some((since, until)) => self
                .storage
                .load_historical_transactions(statement.user_id, since, until, Some(statement.id))
                .unwrap_or_else(|e| {
                    warn!(statement_id = statement.id, error = %e, "History unavailable, analyzing without baseline");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        let report = TrendEngine::new(&self.config, self.ai.as_ref())
            .run(TrendInput {
                statement_id: statement.id,
                period,
                current: &current,
                history: &history,
            })
            .await;

        let alert_count = self
            .storage
            .save_alerts(statement.user_id, statement.id, &report.alerts)
            .unwrap_or_else(|e| {
                warn!(
                    statement_id = statement.id,
                    alerts = report.alerts.len(),
                    error = %e,
                    "Failed to store alerts"
                );
                0
            });
        let rule_count = self
            .storage
            .save_monitoring_rules(statement.user_id, statement.id, &report.rules)
            .unwrap_or_else(|e| {
                warn!(
                    statement_id = statement.id,
                    rules = report.rules.len(),
                    error = %e,
                    "Failed to store monitoring rules"
                );
                0
            });
        if let Err(e) = self.storage.save_analysis(statement.id, &report.analysis) {
            warn!(statement_id = statement.id, error = %e, "Failed to store trend analysis");
        }

        Ok((report.analysis, alert_count, rule_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockBackend;
    use crate::db::Database;

    const STATEMENT: &str = "\
2025-06-01 Coffee Shop $4.50
2025-06-03 Cinema Downtown $30.00
2025-06-05 Grocery Mart $80.00
";

    fn pipeline(ai: Option<AIClient>) -> (Arc<Database>, Pipeline<Database>) {
        let db = Arc::new(Database::in_memory().unwrap());
        let pipeline = Pipeline::new(db.clone(), ai, PipelineConfig::default());
        (db, pipeline)
    }

    fn seed(db: &Database, user_id: i64) {
        db.seed_default_categories(user_id).unwrap();
    }

    #[tokio::test]
    async fn test_process_without_ai() {
        let (db, pipeline) = pipeline(None);
        seed(&db, 1);
        let statement = pipeline
            .upload(1, "june.txt", STATEMENT.as_bytes().to_vec(), Some(7))
            .unwrap();

        let report = pipeline
            .process(statement.id, &ProcessOptions::default())
            .await
            .unwrap();
        assert_eq!(report.found, 3);
        assert_eq!(report.created, 3);
        assert_eq!(report.status, StatementStatus::Completed);

        let committed = db.list_statement_transactions(statement.id).unwrap();
        assert!(committed.iter().all(|t| t.card_id == Some(7)));
        assert!(committed
            .iter()
            .all(|t| t.category_source == CategorySource::Rule));
    }

    #[tokio::test]
    async fn test_insufficient_categories_before_transition() {
        let (db, pipeline) = pipeline(None);
        db.add_category(1, "Only", &[]).unwrap();
        let statement = pipeline
            .upload(1, "june.txt", STATEMENT.as_bytes().to_vec(), None)
            .unwrap();

        let err = pipeline
            .process(statement.id, &ProcessOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientCategories {
                have: 1,
                required: 5
            }
        ));
        assert_eq!(
            pipeline.status(statement.id).unwrap().status,
            StatementStatus::Uploaded
        );
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let (_db, pipeline) = pipeline(None);
        assert!(matches!(
            pipeline.upload(1, "empty.txt", Vec::new(), None),
            Err(Error::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_categorize_requires_extraction() {
        let (db, pipeline) = pipeline(None);
        seed(&db, 1);
        let statement = pipeline
            .upload(1, "june.txt", STATEMENT.as_bytes().to_vec(), None)
            .unwrap();
        assert!(matches!(
            pipeline
                .categorize(statement.id, &ProcessOptions::default())
                .await,
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_leaves_in_progress() {
        let (db, pipeline) = pipeline(None);
        seed(&db, 1);
        let statement = pipeline
            .upload(1, "june.txt", STATEMENT.as_bytes().to_vec(), None)
            .unwrap();
        pipeline
            .extract(statement.id, &ProcessOptions::default())
            .await
            .unwrap();

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let options = ProcessOptions {
            cancel: Some(cancel),
            ..Default::default()
        };
        let err = pipeline.categorize(statement.id, &options).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));

        let status = pipeline.status(statement.id).unwrap();
        assert_eq!(status.status, StatementStatus::Categorizing);
        assert!(!status.in_flight);
        assert!(status.retry_available);
        assert!(db.list_statement_transactions(statement.id).unwrap().is_empty());

        let report = pipeline
            .retry(statement.id, &ProcessOptions::default())
            .await
            .unwrap();
        match report {
            StageReport::Categorization(categorized) => assert_eq!(categorized.created, 3),
            other => panic!("unexpected stage: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_completed_process_is_reported_not_rerun() {
        let mock = MockBackend::unreachable();
        let calls = mock.calls();
        let (db, pipeline) = pipeline(Some(AIClient::from(mock)));
        seed(&db, 1);
        let statement = pipeline
            .upload(1, "june.txt", STATEMENT.as_bytes().to_vec(), None)
            .unwrap();

        let first = pipeline
            .process(statement.id, &ProcessOptions::default())
            .await
            .unwrap();
        let extraction_calls = calls.extraction();

        let second = pipeline
            .process(statement.id, &ProcessOptions::default())
            .await
            .unwrap();
        assert_eq!(second.created, first.created);
        assert_eq!(second.status, StatementStatus::Completed);
        assert_eq!(calls.extraction(), extraction_calls);
        assert_eq!(db.list_statement_transactions(statement.id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_insights_after_processing() {
        let (db, pipeline) = pipeline(None);
        seed(&db, 1);
        let statement = pipeline
            .upload(1, "june.txt", STATEMENT.as_bytes().to_vec(), None)
            .unwrap();
        pipeline
            .process(statement.id, &ProcessOptions::default())
            .await
            .unwrap();

        let insights = pipeline.insights(statement.id).unwrap();
        let analysis = insights.analysis.unwrap();
        assert_eq!(analysis.groups.len(), 1);
        assert_eq!(analysis.groups[0].currency, "USD");
        assert_eq!(analysis.narrative.source, NarrativeSource::Template);
        assert!(matches!(pipeline.insights(999), Err(Error::NotFound(_))));
    }
}
