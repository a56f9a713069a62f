//! Wire types for intelligence-service responses
//!
//! Fields are optional and amounts may arrive as numbers or strings. The
//! extraction stage and trend engine validate these against the fixed schema
//! before anything is kept.

use serde::{Deserialize, Serialize};

use crate::models::Category;

/// Structured extraction response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub period: Option<RawPeriod>,
    #[serde(default)]
    pub transactions: Vec<RawCandidate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPeriod {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub date: Option<String>,
    #[serde(alias = "merchant")]
    pub description: Option<String>,
    pub amount: Option<serde_json::Value>,
    pub currency: Option<String>,
    pub raw_line: Option<String>,
}

impl RawCandidate {
    /// Amount text as the service sent it, for parsing and currency scanning
    pub fn amount_text(&self) -> Option<String> {
        match self.amount.as_ref()? {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Inputs to a single classification call
#[derive(Debug, Clone)]
pub struct ClassificationRequest<'a> {
    pub description: &'a str,
    pub amount: f64,
    pub currency: &'a str,
    /// Assignable categories; the answer must be one of these ids
    pub categories: &'a [Category],
}

impl ClassificationRequest<'_> {
    /// `id: name` lines for the prompt
    pub fn category_listing(&self) -> String {
        self.categories
            .iter()
            .map(|c| format!("{}: {}", c.id, c.name))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Narrative synthesis response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSynthesis {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub alerts: Vec<RawAlert>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAlert {
    #[serde(rename = "type", alias = "alert_type")]
    pub alert_type: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub recommendation: Option<String>,
}

/// Backend and routing details for logging
#[derive(Debug, Clone, Serialize)]
pub struct RouterInfo {
    pub default_model: String,
    pub fallback_model: Option<String>,
    pub task_models: Vec<(String, String)>,
}
