//! Monitoring rules derived from high-severity anomalies

use std::collections::HashSet;

use crate::models::{AlertSeverity, Frequency, MonitoringRuleDraft, RuleScope, ThresholdType};

use super::{Anomaly, AnomalyKind, CurrencyGroup};

/// Round a threshold up to a readable boundary
pub fn round_threshold(value: f64) -> f64 {
    let step = if value < 100.0 {
        10.0
    } else if value < 1000.0 {
        50.0
    } else {
        100.0
    };
    (value / step).ceil() * step
}

fn rule_for(anomaly: &Anomaly) -> Option<MonitoringRuleDraft> {
    if anomaly.severity != AlertSeverity::High {
        return None;
    }

    let (threshold_type, scope, frequency) = match anomaly.kind {
        AnomalyKind::CategorySpike => (
            ThresholdType::CategorySpend,
            RuleScope::Category {
                id: anomaly.category_id?,
                name: anomaly.category_name.clone()?,
            },
            Frequency::Monthly,
        ),
        AnomalyKind::LargeTransaction => (
            ThresholdType::SingleTransaction,
            RuleScope::Merchant {
                name: anomaly.merchant.clone()?,
            },
            Frequency::Weekly,
        ),
        AnomalyKind::NewMerchant => return None,
    };

    Some(MonitoringRuleDraft {
        threshold_type,
        scope,
        threshold: round_threshold(anomaly.observed),
        currency: anomaly.currency.clone(),
        frequency,
    })
}

/// One rule per high-severity anomaly, deduplicated by type, scope and currency
pub fn build_rules(groups: &[CurrencyGroup]) -> Vec<MonitoringRuleDraft> {
    let mut seen = HashSet::new();
    groups
        .iter()
        .flat_map(|g| g.anomalies.iter())
        .filter_map(rule_for)
        .filter(|rule| {
            seen.insert((
                rule.threshold_type,
                rule.scope.kind(),
                rule.scope.key(),
                rule.currency.clone(),
            ))
        })
        .collect()
}
