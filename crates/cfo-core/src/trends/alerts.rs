//! Alert drafting: fixed templates per anomaly kind, and validation of
//! synthesized alerts against the alert enumeration

use tracing::warn;

use crate::ai::RawSynthesis;
use crate::models::{AlertDraft, AlertSeverity, AlertType};

use super::{Anomaly, AnomalyKind, CurrencyGroup, DigestAnomaly, DigestCategory, DigestGroup, SynthesisDigest};

/// Templated alert for one anomaly
pub fn template_alert(anomaly: &Anomaly, history_months: u32) -> AlertDraft {
    let currency = &anomaly.currency;
    let category = anomaly.category_name.as_deref().unwrap_or("Uncategorized");
    let merchant = anomaly.merchant.as_deref().unwrap_or("an unknown merchant");
    let baseline = anomaly.baseline.unwrap_or(0.0);
    let ratio = anomaly.ratio.unwrap_or(0.0);

    let (title, description, recommendation) = match anomaly.kind {
        AnomalyKind::CategorySpike => (
            format!("Unusual spending in {}", category),
            format!(
                "{} spending reached {:.2} {}, {:.1}x your monthly average of {:.2} {}.",
                category, anomaly.observed, currency, ratio, baseline, currency
            ),
            format!(
                "Review recent {} purchases and consider a monthly limit for this category.",
                category
            ),
        ),
        AnomalyKind::LargeTransaction => (
            format!("Large transaction at {}", merchant),
            format!(
                "A charge of {:.2} {} at {} is {:.1}x your average {} transaction of {:.2} {}.",
                anomaly.observed, currency, merchant, ratio, category, baseline, currency
            ),
            "Confirm you recognize this charge.".to_string(),
        ),
        AnomalyKind::NewMerchant => (
            format!("New merchant: {}", merchant),
            format!(
                "{:.2} {} spent at {}, which does not appear in the previous {} months.",
                anomaly.observed, currency, merchant, history_months
            ),
            "Check that this merchant is one you expect to see.".to_string(),
        ),
    };

    AlertDraft {
        alert_type: anomaly.kind.alert_type(),
        severity: anomaly.severity,
        title,
        description,
        recommendation: Some(recommendation),
        currency: Some(currency.clone()),
        category_id: anomaly.category_id,
    }
}

pub fn template_alerts(groups: &[CurrencyGroup], history_months: u32) -> Vec<AlertDraft> {
    groups
        .iter()
        .flat_map(|g| g.anomalies.iter())
        .map(|a| template_alert(a, history_months))
        .collect()
}

/// Templated one-line summary per currency group
pub fn template_summary(groups: &[CurrencyGroup], history_months: u32) -> String {
    if groups.is_empty() {
        return "No spending recorded for this statement.".to_string();
    }

    groups
        .iter()
        .map(|g| {
            let change = match g.percent_change {
                Some(pct) => format!(
                    " ({:+.0}% vs the {}-month average of {:.2})",
                    pct, history_months, g.historical_monthly_mean
                ),
                None => String::new(),
            };
            let flagged = g.anomalies.len();
            format!(
                "Spent {:.2} {} across {} transactions{}; {} item{} flagged.",
                g.total,
                g.currency,
                g.transaction_count,
                change,
                flagged,
                if flagged == 1 { "" } else { "s" }
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Recommendations derived from the anomaly mix
pub fn template_recommendations(groups: &[CurrencyGroup]) -> Vec<String> {
    let mut recommendations = Vec::new();
    for group in groups {
        for anomaly in &group.anomalies {
            let text = match anomaly.kind {
                AnomalyKind::CategorySpike => format!(
                    "Set a monthly budget for {} in {}.",
                    anomaly.category_name.as_deref().unwrap_or("this category"),
                    group.currency
                ),
                AnomalyKind::LargeTransaction => {
                    "Review large one-off purchases before the next statement closes.".to_string()
                }
                AnomalyKind::NewMerchant => {
                    "Add keywords for new merchants so they categorize automatically.".to_string()
                }
            };
            if !recommendations.contains(&text) {
                recommendations.push(text);
            }
        }
    }
    recommendations
}

/// Keep only synthesized alerts that fit the fixed enumeration
pub fn validate_synthesis(synthesis: &RawSynthesis) -> Vec<AlertDraft> {
    synthesis
        .alerts
        .iter()
        .filter_map(|raw| {
            let Ok(alert_type) = raw.alert_type.parse::<AlertType>() else {
                warn!(alert_type = %raw.alert_type, "Rejected synthesized alert with unknown type");
                return None;
            };
            let Ok(severity) = raw.severity.parse::<AlertSeverity>() else {
                warn!(severity = %raw.severity, "Rejected synthesized alert with unknown severity");
                return None;
            };
            if raw.title.trim().is_empty() || raw.description.trim().is_empty() {
                warn!(alert_type = %raw.alert_type, "Rejected synthesized alert without text");
                return None;
            }
            Some(AlertDraft {
                alert_type,
                severity,
                title: raw.title.trim().to_string(),
                description: raw.description.trim().to_string(),
                recommendation: raw
                    .recommendation
                    .as_ref()
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty()),
                currency: None,
                category_id: None,
            })
        })
        .collect()
}

/// Numeric analysis for the synthesis call
///
/// Merchant strings are left out; new merchants are only counted.
pub fn digest(month_key: &str, groups: &[CurrencyGroup]) -> SynthesisDigest {
    SynthesisDigest {
        month_key: month_key.to_string(),
        groups: groups
            .iter()
            .map(|g| DigestGroup {
                currency: g.currency.clone(),
                total: g.total,
                historical_monthly_mean: g.historical_monthly_mean,
                percent_change: g.percent_change,
                categories: g
                    .categories
                    .iter()
                    .map(|c| DigestCategory {
                        name: c.category_name.clone(),
                        current: c.current,
                        historical_monthly_mean: c.historical_monthly_mean,
                        percent_change: c.percent_change,
                    })
                    .collect(),
                anomalies: g
                    .anomalies
                    .iter()
                    .filter(|a| a.kind != AnomalyKind::NewMerchant)
                    .map(|a| DigestAnomaly {
                        alert_type: a.kind.alert_type().as_str().to_string(),
                        severity: a.severity.as_str().to_string(),
                        category: a.category_name.clone(),
                        observed: a.observed,
                        baseline: a.baseline,
                        ratio: a.ratio,
                    })
                    .collect(),
                new_merchant_count: g
                    .anomalies
                    .iter()
                    .filter(|a| a.kind == AnomalyKind::NewMerchant)
                    .count(),
            })
            .collect(),
    }
}
