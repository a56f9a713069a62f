//! Transaction extraction stage
//!
//! Turns statement text into validated transaction candidates and a billing
//! period. The intelligence service is tried first; on an error, a timeout or
//! a response with no valid candidates the deterministic line-pattern parser
//! takes over. Both paths go through the same validation.

mod currency;
mod fields;
mod pattern;

pub use currency::CurrencyDetector;
pub use fields::{parse_amount, parse_date};
pub use pattern::parse_lines;

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ai::{with_timeout, AIBackend, AIClient, RawCandidate, RawPeriod};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::model_router::TaskType;
use crate::models::{ExtractionMethod, StatementPeriod, TransactionCandidate};
use crate::normalize::normalize_text;

/// One unvalidated line, from either extraction path
#[derive(Debug, Clone, PartialEq)]
pub struct LineDraft {
    pub date: String,
    pub description: String,
    /// Amount as written, including any currency marker
    pub amount: String,
    /// Currency reported by the intelligence service
    pub currency: Option<String>,
    pub raw_line: String,
    /// The line's operation keyword marks it as a payment
    pub credit: bool,
}

impl From<RawCandidate> for LineDraft {
    fn from(raw: RawCandidate) -> Self {
        let amount = raw.amount_text().unwrap_or_default();
        let description = raw.description.unwrap_or_default();
        Self {
            date: raw.date.unwrap_or_default(),
            raw_line: raw.raw_line.unwrap_or_else(|| description.clone()),
            description,
            amount,
            currency: raw.currency,
            credit: false,
        }
    }
}

/// Result of the extraction stage
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutcome {
    pub candidates: Vec<TransactionCandidate>,
    pub period: Option<StatementPeriod>,
    pub method: ExtractionMethod,
    /// Malformed candidates that were discarded
    pub dropped: usize,
    /// Non-spend lines (interest, fees) matched by an excluded keyword
    pub excluded: usize,
}

/// Why a draft was not kept
#[derive(Debug, Clone, PartialEq)]
enum Verdict {
    Keep(TransactionCandidate),
    Excluded,
    Malformed(&'static str),
}

/// Statement formatting that looks like a transaction line but is not one
const ARTIFACT_PREFIXES: &[&str] = &[
    "TOTAL", "SUBTOTAL", "BALANCE", "SALDO", "PREVIOUS BALANCE", "NEW BALANCE",
];

const COLUMN_HEADERS: &[&str] = &[
    "DESCRIPTION", "DESCRIPCION", "DESCRIPCIÓN", "CONCEPTO", "DETALLE", "MERCHANT", "AMOUNT", "MONTO",
];

fn is_artifact(description: &str) -> bool {
    let upper = description.to_uppercase();
    if upper.chars().all(|c| matches!(c, '-' | '=' | '_' | '*' | ' ')) {
        return true;
    }
    if COLUMN_HEADERS.contains(&upper.as_str()) {
        return true;
    }
    ARTIFACT_PREFIXES.iter().any(|prefix| {
        upper
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with([':', ' ']))
    })
}

fn clean_description(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '*' || c == '-' || c == '|' || c == ':')
        .trim()
        .to_string()
}

/// Validates drafts against the candidate rules
struct Validator<'a> {
    config: &'a PipelineConfig,
    currency: CurrencyDetector,
    excluded: Vec<String>,
    hint: Option<&'a StatementPeriod>,
    default_year: i32,
}

impl<'a> Validator<'a> {
    fn new(
        config: &'a PipelineConfig,
        excluded: &[String],
        hint: Option<&'a StatementPeriod>,
    ) -> Self {
        Self {
            config,
            currency: CurrencyDetector::new(config),
            excluded: excluded
                .iter()
                .map(|k| normalize_text(k))
                .filter(|k| !k.is_empty())
                .collect(),
            hint,
            default_year: hint.map(|p| p.end.year()).unwrap_or_else(|| Utc::now().year()),
        }
    }

    /// Parse a date, moving yearless dates that land after the hint's end
    /// back one year (December lines on a January statement)
    fn date(&self, text: &str) -> Option<NaiveDate> {
        let date = parse_date(text, self.config.day_first_dates, self.default_year)?;
        let yearless = text.chars().filter(|c| c.is_ascii_digit()).count() <= 2;
        match self.hint {
            Some(hint) if yearless && date > hint.end => {
                date.with_year(date.year() - 1).or(Some(date))
            }
            _ => Some(date),
        }
    }

    fn is_excluded(&self, description: &str) -> bool {
        let padded = format!(" {} ", normalize_text(description));
        self.excluded
            .iter()
            .any(|keyword| padded.contains(&format!(" {} ", keyword)))
    }

    fn check(&self, draft: &LineDraft) -> Verdict {
        let description = clean_description(&draft.description);
        if description.is_empty() {
            return Verdict::Malformed("empty description");
        }
        if is_artifact(&description) {
            return Verdict::Malformed("formatting artifact");
        }
        if self.is_excluded(&description) {
            return Verdict::Excluded;
        }

        let Some(date) = self.date(&draft.date) else {
            return Verdict::Malformed("unparseable date");
        };
        let Some(mut amount) = parse_amount(&draft.amount) else {
            return Verdict::Malformed("unparseable amount");
        };
        if draft.credit {
            amount = -amount.abs();
        }
        if amount == 0.0 {
            return Verdict::Malformed("zero amount");
        }

        let currency = self
            .currency
            .resolve(&draft.amount, &draft.raw_line, draft.currency.as_deref());

        Verdict::Keep(TransactionCandidate {
            date,
            description,
            amount: (amount * 100.0).round() / 100.0,
            currency,
            raw_line: draft.raw_line.clone(),
        })
    }

    fn validate(&self, drafts: &[LineDraft], method: ExtractionMethod) -> ExtractionOutcome {
        let mut candidates = Vec::with_capacity(drafts.len());
        let mut dropped = 0;
        let mut excluded = 0;

        for draft in drafts {
            match self.check(draft) {
                Verdict::Keep(candidate) => candidates.push(candidate),
                Verdict::Excluded => {
                    debug!(line = %draft.raw_line, "Excluded non-spend line");
                    excluded += 1;
                }
                Verdict::Malformed(reason) => {
                    debug!(line = %draft.raw_line, reason, "Dropped malformed candidate");
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            warn!(
                method = method.as_str(),
                dropped,
                kept = candidates.len(),
                "Dropped malformed transaction candidates"
            );
        }

        ExtractionOutcome {
            candidates,
            period: None,
            method,
            dropped,
            excluded,
        }
    }

    /// Accept a detected period only when both ends parse and are ordered
    fn period(&self, raw: Option<&RawPeriod>) -> Option<StatementPeriod> {
        let raw = raw?;
        let start = parse_date(raw.start.as_deref()?, self.config.day_first_dates, self.default_year)?;
        let end = parse_date(raw.end.as_deref()?, self.config.day_first_dates, self.default_year)?;
        StatementPeriod::new(start, end)
    }
}

/// Extracts transaction candidates from statement text
pub struct TransactionExtractor<'a> {
    ai: Option<&'a AIClient>,
    config: &'a PipelineConfig,
    excluded: &'a [String],
}

impl<'a> TransactionExtractor<'a> {
    /// Extractor that only uses the line-pattern parser
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            ai: None,
            config,
            excluded: &config.excluded_keywords,
        }
    }

    /// Extractor that tries the intelligence service first
    pub fn with_ai(ai: &'a AIClient, config: &'a PipelineConfig) -> Self {
        Self {
            ai: Some(ai),
            ..Self::new(config)
        }
    }

    /// Use a user's excluded keywords instead of the configured defaults
    pub fn with_excluded_keywords(mut self, keywords: &'a [String]) -> Self {
        self.excluded = keywords;
        self
    }

    /// Run the stage
    ///
    /// Fails with `ExtractionEmpty` only when both paths yield nothing.
    pub async fn extract(
        &self,
        text: &str,
        hint: Option<&StatementPeriod>,
    ) -> Result<ExtractionOutcome> {
        let validator = Validator::new(self.config, self.excluded, hint);

        if let Some(ai) = self.ai {
            match with_timeout(ai, TaskType::Extraction, ai.extract_transactions(text, hint)).await {
                Ok(raw) => {
                    let drafts: Vec<LineDraft> =
                        raw.transactions.into_iter().map(LineDraft::from).collect();
                    let mut outcome = validator.validate(&drafts, ExtractionMethod::Ai);
                    if !outcome.candidates.is_empty() {
                        outcome.period = validator
                            .period(raw.period.as_ref())
                            .or_else(|| hint.cloned());
                        info!(
                            found = outcome.candidates.len(),
                            dropped = outcome.dropped,
                            excluded = outcome.excluded,
                            "Extracted transactions with intelligence service"
                        );
                        return Ok(outcome);
                    }
                    warn!(
                        returned = drafts.len(),
                        "Intelligence service returned no valid transactions, using line-pattern parser"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Intelligence extraction failed, using line-pattern parser");
                }
            }
        }

        let outcome = self.extract_with_patterns(text, hint);
        if outcome.candidates.is_empty() {
            return Err(Error::ExtractionEmpty);
        }
        info!(
            found = outcome.candidates.len(),
            dropped = outcome.dropped,
            excluded = outcome.excluded,
            "Extracted transactions with line-pattern parser"
        );
        Ok(outcome)
    }

    /// Deterministic extraction; never detects a period beyond the hint
    pub fn extract_with_patterns(
        &self,
        text: &str,
        hint: Option<&StatementPeriod>,
    ) -> ExtractionOutcome {
        let validator = Validator::new(self.config, self.excluded, hint);
        let (drafts, unparsed) = parse_lines(text);
        let mut outcome = validator.validate(&drafts, ExtractionMethod::Pattern);
        outcome.dropped += unparsed;
        outcome.period = hint.cloned();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{MockBackend, RawExtraction};

    fn config() -> PipelineConfig {
        PipelineConfig::embedded().unwrap()
    }

    fn june() -> StatementPeriod {
        StatementPeriod::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
        )
        .unwrap()
    }

    fn april() -> StatementPeriod {
        StatementPeriod::new(
            NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 4, 30).unwrap(),
        )
        .unwrap()
    }

    fn raw(date: &str, description: &str, amount: serde_json::Value) -> RawCandidate {
        RawCandidate {
            date: Some(date.into()),
            description: Some(description.into()),
            amount: Some(amount),
            currency: None,
            raw_line: None,
        }
    }

    #[test]
    fn test_pattern_scenario_currencies() {
        let config = config();
        let extractor = TransactionExtractor::new(&config);
        let text = "2025-06-01 Coffee Shop $4.50\n01/06/2025 S/. 120.00 Supermercado\n";
        let outcome = extractor.extract_with_patterns(text, None);

        assert_eq!(outcome.method, ExtractionMethod::Pattern);
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.candidates[0].currency, "USD");
        assert_eq!(outcome.candidates[0].amount, 4.5);
        assert_eq!(outcome.candidates[1].currency, "PEN");
        assert_eq!(outcome.candidates[1].description, "Supermercado");
        assert_eq!(
            outcome.candidates[1].date,
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
        );
        assert!(outcome.period.is_none());
    }

    #[test]
    fn test_pattern_is_deterministic() {
        let config = config();
        let extractor = TransactionExtractor::new(&config);
        let text = "2025-06-01 Coffee Shop $4.50\n2025-06-02 Uber Trip 12.30\n2025-06-03 Book Store 20.00\n";
        let first = extractor.extract_with_patterns(text, None);
        let second = extractor.extract_with_patterns(text, None);
        assert_eq!(first.candidates.len(), 3);
        assert_eq!(first.candidates, second.candidates);
    }

    #[test]
    fn test_excluded_lines_counted_separately() {
        let config = config();
        let extractor = TransactionExtractor::new(&config);
        let text = "14Jun 15Jun INTERESES CARGO 35.20\n14Jun 15Jun WONG SUPERMERCADO PE CONSUMO 88.10\n2025-06-30 TOTAL: 123.30\n";
        let outcome = extractor.extract_with_patterns(text, Some(&june()));
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].currency, "PEN");
        assert_eq!(outcome.excluded, 1);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.period, Some(june()));
    }

    #[test]
    fn test_user_keywords_replace_configured_defaults() {
        let config = config();
        let text = "\
14Jun 15Jun INTERESES CARGO 35.20
14Jun 15Jun GIMNASIO SMART FIT PE CONSUMO 89.90
14Jun 15Jun WONG SUPERMERCADO PE CONSUMO 88.10
";
        let defaults = TransactionExtractor::new(&config).extract_with_patterns(text, Some(&june()));
        assert_eq!(defaults.candidates.len(), 2);
        assert_eq!(defaults.excluded, 1);

        // The user dropped INTERESES and added their gym membership
        let keywords = vec!["Gimnasio".to_string()];
        let outcome = TransactionExtractor::new(&config)
            .with_excluded_keywords(&keywords)
            .extract_with_patterns(text, Some(&june()));
        assert_eq!(outcome.excluded, 1);
        let descriptions: Vec<_> = outcome.candidates.iter().map(|c| c.description.as_str()).collect();
        assert_eq!(descriptions, vec!["INTERESES", "WONG SUPERMERCADO"]);

        let none = TransactionExtractor::new(&config)
            .with_excluded_keywords(&[])
            .extract_with_patterns(text, Some(&june()));
        assert_eq!(none.candidates.len(), 3);
        assert_eq!(none.excluded, 0);
    }

    #[test]
    fn test_card_lines_with_whole_amounts() {
        let config = config();
        let extractor = TransactionExtractor::new(&config);
        let text = "\
14Abr 15Abr NETFLIX.COM PE CONSUMO 45
14Abr 15Abr WONG SUPERMERCADO PE CONSUMO 1,250
14Abr 15Abr RAPPI LIMA PE CONSUMO 32.90
";
        let outcome = extractor.extract_with_patterns(text, Some(&april()));
        assert_eq!(outcome.candidates.len(), 3);
        assert_eq!(outcome.dropped, 0);

        let netflix = &outcome.candidates[0];
        assert_eq!(netflix.description, "NETFLIX.COM");
        assert_eq!(netflix.amount, 45.0);
        assert_eq!(netflix.currency, "PEN");
        assert_eq!(outcome.candidates[1].amount, 1250.0);
        assert_eq!(outcome.candidates[2].description, "RAPPI LIMA");
    }

    #[test]
    fn test_symbol_after_amount_line() {
        let config = config();
        let extractor = TransactionExtractor::new(&config);
        let outcome = extractor.extract_with_patterns("2025-06-09 Bookshop 12,50 €\n", None);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.dropped, 0);
        assert_eq!(outcome.candidates[0].description, "Bookshop");
        assert_eq!(outcome.candidates[0].amount, 12.5);
        assert_eq!(outcome.candidates[0].currency, "EUR");
    }

    #[test]
    fn test_payment_is_negative() {
        let config = config();
        let extractor = TransactionExtractor::new(&config);
        let outcome = extractor
            .extract_with_patterns("20Jun 20Jun PAGO BANCA MOVIL PAGO 500.00", Some(&june()));
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].amount, -500.0);
        assert!(!outcome.candidates[0].is_charge());
    }

    #[test]
    fn test_yearless_date_before_period_end() {
        let config = config();
        let extractor = TransactionExtractor::new(&config);
        let january = StatementPeriod::new(
            NaiveDate::from_ymd_opt(2024, 12, 15).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 14).unwrap(),
        )
        .unwrap();
        let outcome = extractor
            .extract_with_patterns("20Dic 21Dic TIENDA PE CONSUMO 10.00", Some(&january));
        assert_eq!(
            outcome.candidates[0].date,
            NaiveDate::from_ymd_opt(2024, 12, 21).unwrap()
        );
    }

    #[tokio::test]
    async fn test_ai_candidates_validated() {
        let config = config();
        let ai = AIClient::from(MockBackend::new().with_extraction(RawExtraction {
            period: Some(RawPeriod {
                start: Some("2025-06-01".into()),
                end: Some("2025-06-30".into()),
            }),
            transactions: vec![
                raw("2025-06-01", "Coffee Shop", serde_json::json!(4.5)),
                raw("not a date", "Broken", serde_json::json!(3.0)),
                raw("2025-06-02", "Zero", serde_json::json!("0.00")),
                raw("2025-06-03", "Mercado", serde_json::json!("S/ 42.10")),
            ],
        }));
        let extractor = TransactionExtractor::with_ai(&ai, &config);
        let outcome = extractor.extract("ignored", None).await.unwrap();

        assert_eq!(outcome.method, ExtractionMethod::Ai);
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.dropped, 2);
        assert_eq!(outcome.candidates[1].currency, "PEN");
        assert_eq!(outcome.period, Some(june()));
    }

    #[tokio::test]
    async fn test_inverted_ai_period_falls_back_to_hint() {
        let config = config();
        let ai = AIClient::from(MockBackend::new().with_extraction(RawExtraction {
            period: Some(RawPeriod {
                start: Some("2025-06-30".into()),
                end: Some("2025-06-01".into()),
            }),
            transactions: vec![raw("2025-06-01", "Coffee Shop", serde_json::json!(4.5))],
        }));
        let extractor = TransactionExtractor::with_ai(&ai, &config);
        let hint = june();
        let outcome = extractor.extract("ignored", Some(&hint)).await.unwrap();
        assert_eq!(outcome.period, Some(hint));
    }

    #[tokio::test]
    async fn test_unreachable_ai_uses_patterns() {
        let config = config();
        let mock = MockBackend::unreachable();
        let calls = mock.calls();
        let ai = AIClient::from(mock);
        let extractor = TransactionExtractor::with_ai(&ai, &config);
        let outcome = extractor
            .extract("2025-06-01 Coffee Shop $4.50", None)
            .await
            .unwrap();
        assert_eq!(calls.extraction(), 1);
        assert_eq!(outcome.method, ExtractionMethod::Pattern);
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_ai_answer_uses_patterns() {
        let config = config();
        let ai = AIClient::mock();
        let extractor = TransactionExtractor::with_ai(&ai, &config);
        let outcome = extractor
            .extract("2025-06-01 Coffee Shop $4.50", None)
            .await
            .unwrap();
        assert_eq!(outcome.method, ExtractionMethod::Pattern);
    }

    #[tokio::test]
    async fn test_nothing_extractable_is_empty_error() {
        let config = config();
        let ai = AIClient::from(MockBackend::unreachable());
        let extractor = TransactionExtractor::with_ai(&ai, &config);
        let err = extractor
            .extract("Statement header\nno transactions this month", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExtractionEmpty));
    }

    #[test]
    fn test_artifacts() {
        assert!(is_artifact("TOTAL: 123"));
        assert!(is_artifact("Saldo anterior"));
        assert!(is_artifact("-----"));
        assert!(!is_artifact("Totally Wine"));
        assert!(!is_artifact("Coffee Shop"));
    }
}
