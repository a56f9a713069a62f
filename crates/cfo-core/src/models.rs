//! Data models for statements, transactions, categories and alerts

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Processing status of a statement
///
/// `Uploaded` is initial, `Completed` is terminal. Failure states are terminal
/// until an explicit retry moves the statement back into the matching
/// in-progress state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementStatus {
    Uploaded,
    Extracting,
    Extracted,
    Categorizing,
    Completed,
    ExtractFailed,
    CategorizeFailed,
}

impl StatementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Extracting => "extracting",
            Self::Extracted => "extracted",
            Self::Categorizing => "categorizing",
            Self::Completed => "completed",
            Self::ExtractFailed => "extract_failed",
            Self::CategorizeFailed => "categorize_failed",
        }
    }

    pub fn all() -> &'static [StatementStatus] {
        &[
            Self::Uploaded,
            Self::Extracting,
            Self::Extracted,
            Self::Categorizing,
            Self::Completed,
            Self::ExtractFailed,
            Self::CategorizeFailed,
        ]
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::ExtractFailed | Self::CategorizeFailed)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Extracting | Self::Categorizing)
    }

    /// The stage this status belongs to, if it is an in-progress or failed state
    pub fn active_stage(&self) -> Option<Stage> {
        match self {
            Self::Extracting | Self::ExtractFailed => Some(Stage::Extraction),
            Self::Categorizing | Self::CategorizeFailed => Some(Stage::Categorization),
            _ => None,
        }
    }

    /// Coarse progress indicator for polling clients
    pub fn progress_percentage(&self) -> u8 {
        match self {
            Self::Uploaded => 10,
            Self::Extracting => 30,
            Self::Extracted => 60,
            Self::Categorizing => 80,
            Self::Completed => 100,
            Self::ExtractFailed | Self::CategorizeFailed => 0,
        }
    }

    pub fn current_step(&self) -> &'static str {
        match self {
            Self::Uploaded => "Waiting to extract transactions",
            Self::Extracting => "Extracting transactions from document",
            Self::Extracted => "Transactions extracted, ready to categorize",
            Self::Categorizing => "Categorizing transactions and analyzing trends",
            Self::Completed => "Processing complete",
            Self::ExtractFailed => "Extraction failed, retry available",
            Self::CategorizeFailed => "Categorization failed, retry available",
        }
    }
}

impl std::str::FromStr for StatementStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|status| status.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown statement status: {}", s))
    }
}

impl std::fmt::Display for StatementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Categorization,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Categorization => "categorization",
        }
    }

    pub fn in_progress(&self) -> StatementStatus {
        match self {
            Self::Extraction => StatementStatus::Extracting,
            Self::Categorization => StatementStatus::Categorizing,
        }
    }

    pub fn succeeded(&self) -> StatementStatus {
        match self {
            Self::Extraction => StatementStatus::Extracted,
            Self::Categorization => StatementStatus::Completed,
        }
    }

    pub fn failed(&self) -> StatementStatus {
        match self {
            Self::Extraction => StatementStatus::ExtractFailed,
            Self::Categorization => StatementStatus::CategorizeFailed,
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "extraction" | "extract" => Ok(Self::Extraction),
            "categorization" | "categorize" => Ok(Self::Categorization),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Format of an uploaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Text,
    Csv,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Csv => "csv",
        }
    }

    /// Detect format from filename extension, falling back to content sniffing
    pub fn detect(filename: &str, content: &[u8]) -> Self {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Self::Pdf,
            "csv" => Self::Csv,
            "txt" | "text" => Self::Text,
            _ if content.starts_with(b"%PDF") => Self::Pdf,
            _ => Self::Text,
        }
    }
}

impl std::str::FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "text" | "txt" => Ok(Self::Text),
            "csv" => Ok(Self::Csv),
            _ => Err(format!("Unknown document format: {}", s)),
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reporting period covered by a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// `YYYY-MM` of the period end
    pub month_key: String,
}

impl StatementPeriod {
    /// Build a period, rejecting inverted ranges
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        if start > end {
            return None;
        }
        Some(Self {
            start,
            end,
            month_key: format!("{:04}-{:02}", end.year(), end.month()),
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// How candidates were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Intelligence-service extraction
    Ai,
    /// Deterministic line-pattern parser
    Pattern,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Pattern => "pattern",
        }
    }
}

impl std::str::FromStr for ExtractionMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ai" => Ok(Self::Ai),
            "pattern" => Ok(Self::Pattern),
            _ => Err(format!("Unknown extraction method: {}", s)),
        }
    }
}

/// An uploaded document, not yet persisted
#[derive(Debug, Clone)]
pub struct NewStatement {
    pub user_id: i64,
    pub card_id: Option<i64>,
    pub filename: String,
    pub format: DocumentFormat,
    pub content_hash: String,
    pub document: Vec<u8>,
}

impl NewStatement {
    pub fn new(user_id: i64, filename: &str, document: Vec<u8>, card_id: Option<i64>) -> Self {
        let format = DocumentFormat::detect(filename, &document);
        let content_hash = hex::encode(Sha256::digest(&document));
        Self {
            user_id,
            card_id,
            filename: filename.to_string(),
            format,
            content_hash,
            document,
        }
    }
}

/// A statement being processed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub id: i64,
    pub user_id: i64,
    pub card_id: Option<i64>,
    pub filename: String,
    pub format: DocumentFormat,
    /// SHA-256 of the uploaded document bytes
    pub content_hash: String,
    /// Cached plain text, the extraction checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    pub period: Option<StatementPeriod>,
    pub status: StatementStatus,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    /// Candidates produced by the last successful extraction
    #[serde(skip)]
    pub candidates: Vec<TransactionCandidate>,
    pub extraction_method: Option<ExtractionMethod>,
    pub found_count: u32,
    pub dropped_count: u32,
    pub excluded_count: u32,
    pub extraction_retries: u32,
    pub categorization_retries: u32,
    pub uploaded_at: DateTime<Utc>,
    pub extraction_started_at: Option<DateTime<Utc>>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub categorization_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Statement {
    pub fn retries_for(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Extraction => self.extraction_retries,
            Stage::Categorization => self.categorization_retries,
        }
    }
}

/// Pipeline-internal transaction before categorization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCandidate {
    pub date: NaiveDate,
    pub description: String,
    /// Positive for charges, negative for payments and credits
    pub amount: f64,
    pub currency: String,
    pub raw_line: String,
}

impl TransactionCandidate {
    pub fn is_charge(&self) -> bool {
        self.amount > 0.0
    }

    /// Stable identity of this candidate within its statement
    ///
    /// Position is part of the hash so two identical purchases on the same
    /// day remain distinct rows.
    pub fn fingerprint(&self, position: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(position.to_le_bytes());
        hasher.update(self.date.to_string().as_bytes());
        hasher.update(self.description.as_bytes());
        hasher.update(format!("{:.2}", self.amount).as_bytes());
        hasher.update(self.currency.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A user-scoped category with its keyword set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub keywords: Vec<String>,
    /// The fixed fallback category; never counted toward the minimum
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

/// Name of the per-user fallback category
pub const UNCATEGORIZED: &str = "Uncategorized";

/// A user's keyword marking statement lines as non-spend (interest, fees)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludedKeyword {
    pub id: i64,
    pub user_id: i64,
    pub keyword: String,
    pub created_at: DateTime<Utc>,
}

/// How a transaction's category was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorySource {
    /// Keyword rule matched
    Rule,
    /// Intelligence-service classification
    Inferred,
    /// Nothing matched and classification failed
    None,
}

impl CategorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Inferred => "inferred",
            Self::None => "none",
        }
    }
}

impl std::str::FromStr for CategorySource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rule" => Ok(Self::Rule),
            "inferred" => Ok(Self::Inferred),
            "none" => Ok(Self::None),
            _ => Err(format!("Unknown category source: {}", s)),
        }
    }
}

impl std::fmt::Display for CategorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A categorized transaction ready to be committed
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub statement_id: i64,
    pub user_id: i64,
    pub card_id: Option<i64>,
    pub date: NaiveDate,
    pub merchant: String,
    pub amount: f64,
    pub currency: String,
    pub category_id: i64,
    pub category_source: CategorySource,
    pub matched_keyword: Option<String>,
    pub fingerprint: String,
}

/// A committed transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub statement_id: i64,
    pub user_id: i64,
    pub card_id: Option<i64>,
    pub date: NaiveDate,
    pub merchant: String,
    pub amount: f64,
    pub currency: String,
    pub category_id: i64,
    pub category_name: String,
    pub category_source: CategorySource,
    /// Category assigned by the pipeline, kept when the user recategorizes
    pub original_category_id: i64,
    pub matched_keyword: Option<String>,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// Alert types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    UnusualSpending,
    LargeTransaction,
    NewMerchant,
    BudgetExceeded,
    SpendingLimit,
    MerchantWatch,
    CategoryBudget,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnusualSpending => "unusual_spending",
            Self::LargeTransaction => "large_transaction",
            Self::NewMerchant => "new_merchant",
            Self::BudgetExceeded => "budget_exceeded",
            Self::SpendingLimit => "spending_limit",
            Self::MerchantWatch => "merchant_watch",
            Self::CategoryBudget => "category_budget",
        }
    }

    pub fn all() -> &'static [AlertType] {
        &[
            Self::UnusualSpending,
            Self::LargeTransaction,
            Self::NewMerchant,
            Self::BudgetExceeded,
            Self::SpendingLimit,
            Self::MerchantWatch,
            Self::CategoryBudget,
        ]
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("Unknown alert type: {}", s))
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    High,
    Medium,
    Low,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Sort key, lower is more urgent
    pub fn priority(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Unknown alert severity: {}", s)),
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert produced by the trend engine, not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub recommendation: Option<String>,
    pub currency: Option<String>,
    pub category_id: Option<i64>,
}

/// A persisted alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub user_id: i64,
    pub statement_id: Option<i64>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub recommendation: Option<String>,
    pub currency: Option<String>,
    pub category_id: Option<i64>,
    pub is_read: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// What a monitoring rule measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdType {
    /// Total spend in a category over the rule's frequency window
    CategorySpend,
    /// Any single transaction at a merchant
    SingleTransaction,
}

impl ThresholdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CategorySpend => "category_spend",
            Self::SingleTransaction => "single_transaction",
        }
    }
}

impl std::str::FromStr for ThresholdType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "category_spend" => Ok(Self::CategorySpend),
            "single_transaction" => Ok(Self::SingleTransaction),
            _ => Err(format!("Unknown threshold type: {}", s)),
        }
    }
}

/// What a monitoring rule applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleScope {
    Category { id: i64, name: String },
    Merchant { name: String },
}

impl RuleScope {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Category { .. } => "category",
            Self::Merchant { .. } => "merchant",
        }
    }

    /// Identifier stored alongside the kind
    pub fn key(&self) -> String {
        match self {
            Self::Category { id, .. } => id.to_string(),
            Self::Merchant { name } => name.to_lowercase(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Category { name, .. } | Self::Merchant { name } => name,
        }
    }
}

/// How often a monitoring rule is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(format!("Unknown frequency: {}", s)),
        }
    }
}

/// Monitoring rule produced by the trend engine, not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringRuleDraft {
    pub threshold_type: ThresholdType,
    pub scope: RuleScope,
    pub threshold: f64,
    pub currency: String,
    pub frequency: Frequency,
}

/// A persisted monitoring rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringRule {
    pub id: i64,
    pub user_id: i64,
    pub statement_id: Option<i64>,
    pub threshold_type: ThresholdType,
    pub scope: RuleScope,
    pub threshold: f64,
    pub currency: String,
    pub frequency: Frequency,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Side-effect free snapshot returned to polling clients
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub statement_id: i64,
    pub status: StatementStatus,
    pub current_step: &'static str,
    pub progress_percentage: u8,
    /// A stage is executing right now
    pub in_flight: bool,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    pub retry_available: bool,
    pub extraction_retries: u32,
    pub categorization_retries: u32,
    pub found_count: Option<u32>,
    pub dropped_count: Option<u32>,
    pub excluded_count: Option<u32>,
    pub period: Option<StatementPeriod>,
    pub uploaded_at: DateTime<Utc>,
    pub extraction_started_at: Option<DateTime<Utc>>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub categorization_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_strings() {
        for status in StatementStatus::all() {
            assert_eq!(status.as_str().parse::<StatementStatus>().unwrap(), *status);
        }
        assert!("archived".parse::<StatementStatus>().is_err());
    }

    #[test]
    fn test_progress_percentage() {
        assert_eq!(StatementStatus::Uploaded.progress_percentage(), 10);
        assert_eq!(StatementStatus::Categorizing.progress_percentage(), 80);
        assert_eq!(StatementStatus::Completed.progress_percentage(), 100);
        assert_eq!(StatementStatus::ExtractFailed.progress_percentage(), 0);
    }

    #[test]
    fn test_alert_type_parse_rejects_unknown() {
        assert_eq!(
            "unusual-spending".parse::<AlertType>().unwrap(),
            AlertType::UnusualSpending
        );
        assert_eq!(
            "Large Transaction".parse::<AlertType>().unwrap(),
            AlertType::LargeTransaction
        );
        assert!("fraud_detected".parse::<AlertType>().is_err());
    }

    #[test]
    fn test_period_rejects_inverted_range() {
        let start = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert!(StatementPeriod::new(start, end).is_none());

        let period = StatementPeriod::new(end, start).unwrap();
        assert_eq!(period.month_key, "2025-06");
        assert!(period.contains(NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()));
    }

    #[test]
    fn test_fingerprint_depends_on_position() {
        let candidate = TransactionCandidate {
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            description: "Coffee Shop".into(),
            amount: 4.5,
            currency: "USD".into(),
            raw_line: "2025-06-01 Coffee Shop $4.50".into(),
        };
        assert_eq!(candidate.fingerprint(0), candidate.fingerprint(0));
        assert_ne!(candidate.fingerprint(0), candidate.fingerprint(1));
    }

    #[test]
    fn test_document_format_detect() {
        assert_eq!(DocumentFormat::detect("june.PDF", b""), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::detect("export.csv", b""), DocumentFormat::Csv);
        assert_eq!(
            DocumentFormat::detect("statement", b"%PDF-1.7"),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::detect("statement", b"2025-06-01"),
            DocumentFormat::Text
        );
    }
}
