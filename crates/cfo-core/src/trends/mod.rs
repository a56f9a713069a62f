//! Trend & alert engine
//!
//! Compares a statement's committed transactions against the user's recent
//! history, one currency at a time. Anomalies become alerts (narrated by the
//! intelligence service when it answers, templated otherwise) and
//! high-severity anomalies become standing monitoring rules.

mod alerts;
mod analysis;
mod rules;

pub use alerts::{digest, template_alert, validate_synthesis};
pub use analysis::{analyze_groups, history_window, month_key};
pub use rules::{build_rules, round_threshold};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ai::{with_timeout, AIBackend, AIClient};
use crate::config::PipelineConfig;
use crate::model_router::TaskType;
use crate::models::{AlertDraft, AlertSeverity, AlertType, MonitoringRuleDraft, StatementPeriod, Transaction};

/// What triggered an anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Category spend above its historical monthly mean times the multiplier
    CategorySpike,
    /// One transaction far above its category's average transaction
    LargeTransaction,
    /// Merchant not seen in the history window
    NewMerchant,
}

impl AnomalyKind {
    pub fn alert_type(&self) -> AlertType {
        match self {
            Self::CategorySpike => AlertType::UnusualSpending,
            Self::LargeTransaction => AlertType::LargeTransaction,
            Self::NewMerchant => AlertType::NewMerchant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: AlertSeverity,
    pub currency: String,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub merchant: Option<String>,
    pub observed: f64,
    pub baseline: Option<f64>,
    pub ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDelta {
    pub category_id: i64,
    pub category_name: String,
    pub current: f64,
    pub transaction_count: usize,
    pub historical_monthly_mean: f64,
    /// `None` when there is no history to compare against
    pub percent_change: Option<f64>,
}

/// Aggregates for one currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyGroup {
    pub currency: String,
    pub total: f64,
    pub transaction_count: usize,
    pub historical_total: f64,
    pub historical_monthly_mean: f64,
    pub months_observed: usize,
    pub percent_change: Option<f64>,
    pub categories: Vec<CategoryDelta>,
    pub anomalies: Vec<Anomaly>,
}

/// Where the narrative text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeSource {
    Intelligence,
    Template,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub summary: String,
    pub recommendations: Vec<String>,
    pub source: NarrativeSource,
}

/// Stored analysis for one statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub statement_id: i64,
    pub month_key: Option<String>,
    pub history_months: u32,
    pub groups: Vec<CurrencyGroup>,
    pub narrative: Narrative,
}

impl TrendAnalysis {
    pub fn anomaly_count(&self) -> usize {
        self.groups.iter().map(|g| g.anomalies.len()).sum()
    }
}

/// Numeric-only view of an analysis sent to the synthesis call
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisDigest {
    pub month_key: String,
    pub groups: Vec<DigestGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestGroup {
    pub currency: String,
    pub total: f64,
    pub historical_monthly_mean: f64,
    pub percent_change: Option<f64>,
    pub categories: Vec<DigestCategory>,
    pub anomalies: Vec<DigestAnomaly>,
    pub new_merchant_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestCategory {
    pub name: String,
    pub current: f64,
    pub historical_monthly_mean: f64,
    pub percent_change: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestAnomaly {
    pub alert_type: String,
    pub severity: String,
    pub category: Option<String>,
    pub observed: f64,
    pub baseline: Option<f64>,
    pub ratio: Option<f64>,
}

/// Everything the engine produces for one statement
#[derive(Debug, Clone)]
pub struct TrendReport {
    pub analysis: TrendAnalysis,
    pub alerts: Vec<AlertDraft>,
    pub rules: Vec<MonitoringRuleDraft>,
}

/// Inputs for one statement
pub struct TrendInput<'a> {
    pub statement_id: i64,
    pub period: Option<&'a StatementPeriod>,
    pub current: &'a [Transaction],
    pub history: &'a [Transaction],
}

pub struct TrendEngine<'a> {
    config: &'a PipelineConfig,
    ai: Option<&'a AIClient>,
}

impl<'a> TrendEngine<'a> {
    pub fn new(config: &'a PipelineConfig, ai: Option<&'a AIClient>) -> Self {
        Self { config, ai }
    }

    /// Analyze a statement; never fails
    pub async fn run(&self, input: TrendInput<'_>) -> TrendReport {
        let groups = analyze_groups(input.current, input.history, self.config);
        let month_key = month_key(input.period, input.current);
        let months = self.config.history_months;

        let rules = build_rules(&groups);
        let templated = alerts::template_alerts(&groups, months);

        let mut narrative = Narrative {
            summary: alerts::template_summary(&groups, months),
            recommendations: alerts::template_recommendations(&groups),
            source: NarrativeSource::Template,
        };
        let mut alerts = templated;

        let anomaly_count: usize = groups.iter().map(|g| g.anomalies.len()).sum();
        if let Some(ai) = self.ai.filter(|_| anomaly_count > 0) {
            let digest = digest(month_key.as_deref().unwrap_or_default(), &groups);
            match with_timeout(ai, TaskType::Synthesis, ai.synthesize_insights(&digest)).await {
                Ok(synthesis) => {
                    let synthesized = validate_synthesis(&synthesis);
                    if synthesized.is_empty() {
                        warn!(
                            statement_id = input.statement_id,
                            "Synthesis returned no valid alerts, using templates"
                        );
                    } else {
                        alerts = synthesized;
                        narrative.source = NarrativeSource::Intelligence;
                        if let Some(summary) = synthesis.summary.filter(|s| !s.trim().is_empty()) {
                            narrative.summary = summary;
                        }
                        if !synthesis.recommendations.is_empty() {
                            narrative.recommendations = synthesis.recommendations;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        statement_id = input.statement_id,
                        error = %e,
                        "Insight synthesis failed, using templated alerts"
                    );
                }
            }
        }

        alerts.sort_by_key(|a| a.severity.priority());

        info!(
            statement_id = input.statement_id,
            currencies = groups.len(),
            anomalies = anomaly_count,
            alerts = alerts.len(),
            rules = rules.len(),
            "Trend analysis complete"
        );

        TrendReport {
            analysis: TrendAnalysis {
                statement_id: input.statement_id,
                month_key,
                history_months: months,
                groups,
                narrative,
            },
            alerts,
            rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{MockBackend, RawAlert, RawSynthesis};
    use crate::models::CategorySource;
    use chrono::{NaiveDate, Utc};

    fn txn(id: i64, month: u32, amount: f64) -> Transaction {
        Transaction {
            id,
            statement_id: 1,
            user_id: 1,
            card_id: None,
            date: NaiveDate::from_ymd_opt(2025, month, 10).unwrap(),
            merchant: "Cinema".into(),
            amount,
            currency: "USD".into(),
            category_id: 5,
            category_name: "Entertainment".into(),
            category_source: CategorySource::Rule,
            original_category_id: 5,
            matched_keyword: Some("cinema".into()),
            fingerprint: format!("fp{}", id),
            created_at: Utc::now(),
        }
    }

    fn fixture() -> (Vec<Transaction>, Vec<Transaction>) {
        let history = vec![txn(1, 3, 50.0), txn(2, 4, 50.0), txn(3, 5, 50.0)];
        let current = vec![txn(4, 6, 300.0)];
        (current, history)
    }

    fn input<'a>(current: &'a [Transaction], history: &'a [Transaction]) -> TrendInput<'a> {
        TrendInput {
            statement_id: 1,
            period: None,
            current,
            history,
        }
    }

    #[tokio::test]
    async fn test_templates_without_ai() {
        let config = PipelineConfig::default();
        let (current, history) = fixture();
        let report = TrendEngine::new(&config, None).run(input(&current, &history)).await;

        assert_eq!(report.analysis.narrative.source, NarrativeSource::Template);
        let spike = report
            .alerts
            .iter()
            .find(|a| a.alert_type == AlertType::UnusualSpending)
            .unwrap();
        assert_eq!(spike.severity, AlertSeverity::High);
        assert_eq!(report.rules.len(), 2);
        assert_eq!(report.analysis.month_key.as_deref(), Some("2025-06"));
    }

    #[tokio::test]
    async fn test_unreachable_ai_degrades_to_templates() {
        let config = PipelineConfig::default();
        let (current, history) = fixture();
        let ai = AIClient::from(MockBackend::unreachable());
        let report = TrendEngine::new(&config, Some(&ai))
            .run(input(&current, &history))
            .await;
        assert_eq!(report.analysis.narrative.source, NarrativeSource::Template);
        assert!(report
            .alerts
            .iter()
            .any(|a| a.alert_type == AlertType::UnusualSpending && a.severity == AlertSeverity::High));
    }

    #[tokio::test]
    async fn test_synthesis_replaces_templates() {
        let config = PipelineConfig::default();
        let (current, history) = fixture();
        let ai = AIClient::from(MockBackend::new().with_synthesis(RawSynthesis {
            summary: Some("Entertainment spending jumped sharply.".into()),
            alerts: vec![
                RawAlert {
                    alert_type: "unusual_spending".into(),
                    severity: "high".into(),
                    title: "Entertainment is 6x normal".into(),
                    description: "You spent 300 against a usual 50.".into(),
                    recommendation: Some("Cap entertainment at 100".into()),
                },
                RawAlert {
                    alert_type: "crypto_warning".into(),
                    severity: "high".into(),
                    title: "Invented".into(),
                    description: "Not a real type".into(),
                    recommendation: None,
                },
            ],
            recommendations: vec!["Plan outings ahead".into()],
        }));
        let report = TrendEngine::new(&config, Some(&ai))
            .run(input(&current, &history))
            .await;

        assert_eq!(report.analysis.narrative.source, NarrativeSource::Intelligence);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].title, "Entertainment is 6x normal");
        assert_eq!(report.analysis.narrative.summary, "Entertainment spending jumped sharply.");
    }

    #[tokio::test]
    async fn test_no_anomalies_skips_synthesis() {
        let config = PipelineConfig::default();
        let mock = MockBackend::new();
        let calls = mock.calls();
        let ai = AIClient::from(mock);
        let current = vec![txn(1, 6, 20.0)];
        let report = TrendEngine::new(&config, Some(&ai)).run(input(&current, &[])).await;
        assert_eq!(calls.synthesis(), 0);
        assert!(report.alerts.is_empty());
        assert!(report.rules.is_empty());
    }
}
