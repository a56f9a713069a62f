//! Per-currency aggregation and anomaly detection

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, Months, NaiveDate};

use crate::config::PipelineConfig;
use crate::models::{AlertSeverity, StatementPeriod, Transaction};
use crate::normalize::merchant_key;

use super::{Anomaly, AnomalyKind, CategoryDelta, CurrencyGroup};

/// Large transactions at or above this multiple of the average are high severity
const HIGH_LARGE_TRANSACTION_RATIO: f64 = 5.0;

/// History window `[since, until)` preceding a statement
pub fn history_window(
    period: Option<&StatementPeriod>,
    current: &[Transaction],
    months: u32,
) -> Option<(NaiveDate, NaiveDate)> {
    let until = match period {
        Some(p) => p.start,
        None => {
            let earliest = current.iter().map(|t| t.date).min()?;
            earliest.with_day(1)?
        }
    };
    let since = until.checked_sub_months(Months::new(months))?;
    Some((since, until))
}

/// `YYYY-MM` for the statement
pub fn month_key(period: Option<&StatementPeriod>, current: &[Transaction]) -> Option<String> {
    if let Some(p) = period {
        return Some(p.month_key.clone());
    }
    current
        .iter()
        .map(|t| t.date)
        .max()
        .map(|d| format!("{:04}-{:02}", d.year(), d.month()))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent_change(current: f64, baseline: f64) -> Option<f64> {
    (baseline > 0.0).then(|| round2((current - baseline) / baseline * 100.0))
}

#[derive(Default)]
struct CategoryTotals {
    name: String,
    total: f64,
    count: usize,
}

/// Charges only, grouped by currency
fn charges_by_currency(transactions: &[Transaction]) -> BTreeMap<&str, Vec<&Transaction>> {
    let mut groups: BTreeMap<&str, Vec<&Transaction>> = BTreeMap::new();
    for t in transactions.iter().filter(|t| t.amount > 0.0) {
        groups.entry(t.currency.as_str()).or_default().push(t);
    }
    groups
}

fn totals_by_category(transactions: &[&Transaction]) -> BTreeMap<i64, CategoryTotals> {
    let mut totals: BTreeMap<i64, CategoryTotals> = BTreeMap::new();
    for t in transactions {
        let entry = totals.entry(t.category_id).or_default();
        entry.name.clone_from(&t.category_name);
        entry.total += t.amount;
        entry.count += 1;
    }
    totals
}

/// Aggregate the statement against its history, one group per currency
///
/// Amounts in different currencies never share an aggregate.
pub fn analyze_groups(
    current: &[Transaction],
    history: &[Transaction],
    config: &PipelineConfig,
) -> Vec<CurrencyGroup> {
    let current_groups = charges_by_currency(current);
    let history_groups = charges_by_currency(history);
    let empty = Vec::new();

    current_groups
        .into_iter()
        .map(|(currency, txns)| {
            let past = history_groups.get(currency).unwrap_or(&empty);
            analyze_currency(currency, &txns, past, config)
        })
        .collect()
}

fn analyze_currency(
    currency: &str,
    current: &[&Transaction],
    history: &[&Transaction],
    config: &PipelineConfig,
) -> CurrencyGroup {
    let total: f64 = current.iter().map(|t| t.amount).sum();
    let historical_total: f64 = history.iter().map(|t| t.amount).sum();
    let months_observed = history
        .iter()
        .map(|t| (t.date.year(), t.date.month()))
        .collect::<HashSet<_>>()
        .len();
    let divisor = months_observed.max(1) as f64;
    let historical_monthly_mean = historical_total / divisor;

    let current_totals = totals_by_category(current);
    let history_totals = totals_by_category(history);

    let mut categories = Vec::with_capacity(current_totals.len());
    let mut anomalies = Vec::new();

    for (category_id, now) in &current_totals {
        let past = history_totals.get(category_id);
        let mean = past.map(|p| p.total / divisor).unwrap_or(0.0);

        categories.push(CategoryDelta {
            category_id: *category_id,
            category_name: now.name.clone(),
            current: round2(now.total),
            transaction_count: now.count,
            historical_monthly_mean: round2(mean),
            percent_change: percent_change(now.total, mean),
        });

        if mean >= config.min_baseline && now.total > mean * config.category_spike_multiplier {
            let ratio = now.total / mean;
            anomalies.push(Anomaly {
                kind: AnomalyKind::CategorySpike,
                severity: if ratio >= config.high_severity_multiplier {
                    AlertSeverity::High
                } else {
                    AlertSeverity::Medium
                },
                currency: currency.to_string(),
                category_id: Some(*category_id),
                category_name: Some(now.name.clone()),
                merchant: None,
                observed: round2(now.total),
                baseline: Some(round2(mean)),
                ratio: Some(round2(ratio)),
            });
        }
    }

    anomalies.extend(large_transactions(currency, current, &history_totals, config));
    anomalies.extend(new_merchants(currency, current, history, config));

    anomalies.sort_by_key(|a| a.severity.priority());
    categories.sort_by(|a, b| b.current.total_cmp(&a.current));

    CurrencyGroup {
        currency: currency.to_string(),
        total: round2(total),
        transaction_count: current.len(),
        historical_total: round2(historical_total),
        historical_monthly_mean: round2(historical_monthly_mean),
        months_observed,
        percent_change: percent_change(total, historical_monthly_mean),
        categories,
        anomalies,
    }
}

fn large_transactions(
    currency: &str,
    current: &[&Transaction],
    history_totals: &BTreeMap<i64, CategoryTotals>,
    config: &PipelineConfig,
) -> Vec<Anomaly> {
    current
        .iter()
        .filter_map(|t| {
            let past = history_totals.get(&t.category_id).filter(|p| p.count > 0)?;
            let average = past.total / past.count as f64;
            if average < config.min_baseline || t.amount <= average * config.large_transaction_multiplier {
                return None;
            }
            let ratio = t.amount / average;
            Some(Anomaly {
                kind: AnomalyKind::LargeTransaction,
                severity: if ratio >= HIGH_LARGE_TRANSACTION_RATIO {
                    AlertSeverity::High
                } else {
                    AlertSeverity::Medium
                },
                currency: currency.to_string(),
                category_id: Some(t.category_id),
                category_name: Some(t.category_name.clone()),
                merchant: Some(t.merchant.clone()),
                observed: round2(t.amount),
                baseline: Some(round2(average)),
                ratio: Some(round2(ratio)),
            })
        })
        .collect()
}

fn new_merchants(
    currency: &str,
    current: &[&Transaction],
    history: &[&Transaction],
    config: &PipelineConfig,
) -> Vec<Anomaly> {
    // Without any history every merchant would be new
    if history.is_empty() {
        return Vec::new();
    }

    let known: HashSet<String> = history.iter().map(|t| merchant_key(&t.merchant)).collect();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut anomalies: Vec<Anomaly> = Vec::new();

    for t in current {
        let key = merchant_key(&t.merchant);
        if key.is_empty() || known.contains(&key) {
            continue;
        }
        if let Some(&idx) = seen.get(&key) {
            anomalies[idx].observed = round2(anomalies[idx].observed + t.amount);
            continue;
        }
        if anomalies.len() >= config.max_new_merchant_alerts {
            continue;
        }
        seen.insert(key, anomalies.len());
        anomalies.push(Anomaly {
            kind: AnomalyKind::NewMerchant,
            severity: AlertSeverity::Low,
            currency: currency.to_string(),
            category_id: Some(t.category_id),
            category_name: Some(t.category_name.clone()),
            merchant: Some(t.merchant.clone()),
            observed: round2(t.amount),
            baseline: None,
            ratio: None,
        });
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategorySource;
    use chrono::Utc;

    fn txn(id: i64, date: (i32, u32, u32), merchant: &str, amount: f64, currency: &str, category: (i64, &str)) -> Transaction {
        Transaction {
            id,
            statement_id: 1,
            user_id: 1,
            card_id: None,
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            merchant: merchant.into(),
            amount,
            currency: currency.into(),
            category_id: category.0,
            category_name: category.1.into(),
            category_source: CategorySource::Rule,
            original_category_id: category.0,
            matched_keyword: None,
            fingerprint: format!("fp{}", id),
            created_at: Utc::now(),
        }
    }

    const FUN: (i64, &str) = (5, "Entertainment");
    const FOOD: (i64, &str) = (1, "Food");

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    #[test]
    fn test_entertainment_spike_is_high() {
        let history = vec![
            txn(1, (2025, 3, 10), "Cinema", 50.0, "USD", FUN),
            txn(2, (2025, 4, 10), "Cinema", 50.0, "USD", FUN),
            txn(3, (2025, 5, 10), "Cinema", 50.0, "USD", FUN),
        ];
        let current = vec![
            txn(4, (2025, 6, 5), "Concert Hall", 150.0, "USD", FUN),
            txn(5, (2025, 6, 20), "Cinema", 150.0, "USD", FUN),
        ];

        let groups = analyze_groups(&current, &history, &config());
        assert_eq!(groups.len(), 1);
        let spike = groups[0]
            .anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::CategorySpike)
            .unwrap();
        assert_eq!(spike.severity, AlertSeverity::High);
        assert_eq!(spike.observed, 300.0);
        assert_eq!(spike.baseline, Some(50.0));
        assert_eq!(spike.ratio, Some(6.0));
    }

    #[test]
    fn test_moderate_spike_is_medium() {
        let history = vec![txn(1, (2025, 5, 10), "Cinema", 100.0, "USD", FUN)];
        let current = vec![txn(2, (2025, 6, 5), "Cinema", 250.0, "USD", FUN)];
        let groups = analyze_groups(&current, &history, &config());
        let spike = groups[0]
            .anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::CategorySpike)
            .unwrap();
        assert_eq!(spike.severity, AlertSeverity::Medium);
    }

    #[test]
    fn test_currencies_never_mixed() {
        let history = vec![txn(1, (2025, 5, 1), "Wong", 100.0, "PEN", FOOD)];
        let current = vec![
            txn(2, (2025, 6, 1), "Wong", 300.0, "PEN", FOOD),
            txn(3, (2025, 6, 2), "Coffee", 4.5, "USD", FOOD),
        ];
        let groups = analyze_groups(&current, &history, &config());
        assert_eq!(groups.len(), 2);

        let pen = groups.iter().find(|g| g.currency == "PEN").unwrap();
        let usd = groups.iter().find(|g| g.currency == "USD").unwrap();
        assert_eq!(pen.total, 300.0);
        assert_eq!(usd.total, 4.5);
        assert_eq!(usd.historical_total, 0.0);
        assert!(usd.anomalies.is_empty());
    }

    #[test]
    fn test_payments_excluded_from_totals() {
        let current = vec![
            txn(1, (2025, 6, 1), "Coffee", 4.5, "USD", FOOD),
            txn(2, (2025, 6, 2), "Payment", -500.0, "USD", FOOD),
        ];
        let groups = analyze_groups(&current, &[], &config());
        assert_eq!(groups[0].total, 4.5);
        assert_eq!(groups[0].transaction_count, 1);
    }

    #[test]
    fn test_large_transaction() {
        let history = vec![
            txn(1, (2025, 5, 1), "Restaurant", 20.0, "USD", FOOD),
            txn(2, (2025, 5, 8), "Restaurant", 20.0, "USD", FOOD),
        ];
        let current = vec![txn(3, (2025, 6, 1), "Steakhouse", 120.0, "USD", FOOD)];
        let groups = analyze_groups(&current, &history, &config());
        let large = groups[0]
            .anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::LargeTransaction)
            .unwrap();
        assert_eq!(large.severity, AlertSeverity::High);
        assert_eq!(large.merchant.as_deref(), Some("Steakhouse"));
    }

    #[test]
    fn test_new_merchant_needs_history() {
        let current = vec![txn(1, (2025, 6, 1), "Brand New Shop", 30.0, "USD", FOOD)];
        let groups = analyze_groups(&current, &[], &config());
        assert!(groups[0].anomalies.is_empty());

        let history = vec![txn(2, (2025, 5, 1), "UBER *TRIP 1234", 10.0, "USD", FOOD)];
        let current = vec![
            txn(3, (2025, 6, 1), "Uber Trip 9876", 10.0, "USD", FOOD),
            txn(4, (2025, 6, 2), "Brand New Shop", 30.0, "USD", FOOD),
            txn(5, (2025, 6, 3), "BRAND NEW SHOP", 5.0, "USD", FOOD),
        ];
        let groups = analyze_groups(&current, &history, &config());
        let new: Vec<_> = groups[0]
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::NewMerchant)
            .collect();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].observed, 35.0);
        assert_eq!(new[0].severity, AlertSeverity::Low);
    }

    #[test]
    fn test_history_window() {
        let period = StatementPeriod::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
        )
        .unwrap();
        let (since, until) = history_window(Some(&period), &[], 3).unwrap();
        assert_eq!(since, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(until, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());

        let current = vec![txn(1, (2025, 6, 14), "Coffee", 4.5, "USD", FOOD)];
        let (since, _) = history_window(None, &current, 3).unwrap();
        assert_eq!(since, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(month_key(None, &current).as_deref(), Some("2025-06"));
    }
}
