//! Pipeline configuration
//!
//! Config is loaded with a two-layer resolution:
//! 1. Check for override in data dir (~/.local/share/cfo/config/pipeline.toml)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! Every field in the file is optional; missing fields keep their defaults.

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/pipeline.toml");

/// Thresholds and limits used by the pipeline stages
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Categories a user must hold before extraction may start
    pub min_categories: usize,
    /// Currency for lines without a recognizable marker
    pub base_currency: String,
    /// Currencies the extraction stage accepts
    pub supported_currencies: Vec<String>,
    /// Read `01/06/2025` as 1 June rather than 6 January
    pub day_first_dates: bool,
    /// Retries allowed per stage before `retry` refuses
    pub max_stage_retries: u32,
    /// Months of history compared against a new statement
    pub history_months: u32,
    /// Category spend above `mean * multiplier` is an anomaly
    pub category_spike_multiplier: f64,
    /// Spike ratio at or above which severity is high
    pub high_severity_multiplier: f64,
    /// A transaction above `avg * multiplier` for its category is large
    pub large_transaction_multiplier: f64,
    /// Historical means below this are too small to compare against
    pub min_baseline: f64,
    /// Cap on new-merchant alerts per statement
    pub max_new_merchant_alerts: usize,
    /// Description keywords for lines that are not spend (interest, fees)
    pub excluded_keywords: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_categories: 5,
            base_currency: "USD".to_string(),
            supported_currencies: ["USD", "EUR", "GBP", "JPY", "PEN", "BRL", "INR", "MXN"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            day_first_dates: true,
            max_stage_retries: 3,
            history_months: 3,
            category_spike_multiplier: 2.0,
            high_severity_multiplier: 3.0,
            large_transaction_multiplier: 3.0,
            min_baseline: 10.0,
            max_new_merchant_alerts: 10,
            excluded_keywords: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Load from the override location or the embedded defaults
    pub fn load() -> Result<Self> {
        load_config(None)
    }

    /// Load with a custom override path
    pub fn with_config_path(path: PathBuf) -> Result<Self> {
        load_config(Some(&path))
    }

    /// Embedded defaults only, ignoring any override file
    pub fn embedded() -> Result<Self> {
        parse_config(DEFAULT_CONFIG)
    }

    pub fn is_supported_currency(&self, code: &str) -> bool {
        self.supported_currencies
            .iter()
            .any(|c| c.eq_ignore_ascii_case(code))
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("cfo").join("config").join("pipeline.toml"))
}

fn load_config(override_path: Option<&PathBuf>) -> Result<PipelineConfig> {
    let path = override_path.cloned().or_else(default_config_path);
    let content = match path {
        Some(path) if path.exists() => fs::read_to_string(&path)
            .map_err(|e| Error::InvalidData(format!("Failed to read config: {}", e)))?,
        _ => DEFAULT_CONFIG.to_string(),
    };

    parse_config(&content)
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    pipeline: Option<RawPipeline>,
    extraction: Option<RawExtraction>,
    trends: Option<RawTrends>,
}

#[derive(Debug, Deserialize)]
struct RawPipeline {
    min_categories: Option<usize>,
    max_stage_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    base_currency: Option<String>,
    supported_currencies: Option<Vec<String>>,
    day_first_dates: Option<bool>,
    excluded_keywords: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawTrends {
    history_months: Option<u32>,
    category_spike_multiplier: Option<f64>,
    high_severity_multiplier: Option<f64>,
    large_transaction_multiplier: Option<f64>,
    min_baseline: Option<f64>,
    max_new_merchant_alerts: Option<usize>,
}

/// Parse config from TOML content
fn parse_config(content: &str) -> Result<PipelineConfig> {
    let raw: RawConfig = toml::from_str(content)
        .map_err(|e| Error::InvalidData(format!("Invalid config TOML: {}", e)))?;

    let mut config = PipelineConfig::default();

    if let Some(pipeline) = raw.pipeline {
        if let Some(min) = pipeline.min_categories {
            config.min_categories = min;
        }
        if let Some(retries) = pipeline.max_stage_retries {
            config.max_stage_retries = retries;
        }
    }

    if let Some(extraction) = raw.extraction {
        if let Some(base) = extraction.base_currency {
            config.base_currency = base.to_uppercase();
        }
        if let Some(currencies) = extraction.supported_currencies {
            config.supported_currencies = currencies.into_iter().map(|c| c.to_uppercase()).collect();
        }
        if let Some(day_first) = extraction.day_first_dates {
            config.day_first_dates = day_first;
        }
        if let Some(keywords) = extraction.excluded_keywords {
            config.excluded_keywords = keywords;
        }
    }

    if let Some(trends) = raw.trends {
        if let Some(months) = trends.history_months {
            config.history_months = months.max(1);
        }
        if let Some(m) = trends.category_spike_multiplier {
            config.category_spike_multiplier = m;
        }
        if let Some(m) = trends.high_severity_multiplier {
            config.high_severity_multiplier = m;
        }
        if let Some(m) = trends.large_transaction_multiplier {
            config.large_transaction_multiplier = m;
        }
        if let Some(min) = trends.min_baseline {
            config.min_baseline = min;
        }
        if let Some(max) = trends.max_new_merchant_alerts {
            config.max_new_merchant_alerts = max;
        }
    }

    if !config.is_supported_currency(&config.base_currency) {
        return Err(Error::InvalidData(format!(
            "Base currency {} is not in supported_currencies",
            config.base_currency
        )));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_config() {
        let config = parse_config(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.min_categories, 5);
        assert_eq!(config.max_stage_retries, 3);
        assert_eq!(config.category_spike_multiplier, 2.0);
        assert!(config.is_supported_currency("pen"));
        assert!(config
            .excluded_keywords
            .iter()
            .any(|k| k.eq_ignore_ascii_case("intereses")));
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config = parse_config(
            r#"
            [pipeline]
            min_categories = 3

            [extraction]
            base_currency = "pen"
            "#,
        )
        .unwrap();
        assert_eq!(config.min_categories, 3);
        assert_eq!(config.base_currency, "PEN");
        assert_eq!(config.history_months, 3);
    }

    #[test]
    fn test_unsupported_base_currency_rejected() {
        let result = parse_config(
            r#"
            [extraction]
            base_currency = "XYZ"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_override_uses_embedded() {
        let config =
            PipelineConfig::with_config_path(PathBuf::from("/nonexistent/pipeline.toml")).unwrap();
        assert_eq!(config, PipelineConfig::embedded().unwrap());
    }
}
