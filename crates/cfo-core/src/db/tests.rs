//! Database tests

use super::*;
use crate::extract::ExtractionOutcome;
use crate::models::*;
use crate::storage::Storage;
use chrono::NaiveDate;
use rusqlite::params;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn upload(db: &Database, user_id: i64) -> Statement {
    db.create_statement(&NewStatement::new(
        user_id,
        "june.txt",
        b"2025-06-01 Coffee Shop $4.50".to_vec(),
        None,
    ))
    .unwrap()
}

fn new_txn(statement: &Statement, category_id: i64, position: usize, amount: f64) -> NewTransaction {
    let candidate = TransactionCandidate {
        date: date(2025, 6, 1 + position as u32),
        description: format!("Merchant {}", position),
        amount,
        currency: "USD".into(),
        raw_line: String::new(),
    };
    NewTransaction {
        statement_id: statement.id,
        user_id: statement.user_id,
        card_id: None,
        date: candidate.date,
        merchant: candidate.description.clone(),
        amount,
        currency: "USD".into(),
        category_id,
        category_source: CategorySource::Rule,
        matched_keyword: Some("merchant".into()),
        fingerprint: candidate.fingerprint(position),
    }
}

#[test]
fn test_in_memory_db() {
    let db = Database::in_memory().unwrap();
    assert!(db.list_categories(1).unwrap().is_empty());
    assert!(!db.is_encrypted().unwrap());
}

#[test]
fn test_schema_tables_exist() {
    let db = Database::in_memory().unwrap();
    let conn = db.conn().unwrap();
    for table in [
        "categories",
        "user_excluded_keywords",
        "statements",
        "transactions",
        "alerts",
        "monitoring_rules",
    ] {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                params![table],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1, "missing table {}", table);
    }
}

#[test]
fn test_excluded_keywords_seeded_once_per_user() {
    let db = Database::in_memory().unwrap();
    let defaults = vec!["INTERESES".to_string(), "Comisiones".to_string(), " ".to_string()];

    assert_eq!(db.seed_excluded_keywords(1, &defaults).unwrap(), 2);
    assert_eq!(db.seed_excluded_keywords(1, &defaults).unwrap(), 0);
    assert!(db.list_excluded_keywords(2).unwrap().is_empty());

    // Removing every keyword but one keeps the user off the defaults
    let keywords = db.list_excluded_keywords(1).unwrap();
    db.delete_excluded_keyword(1, keywords[0].id).unwrap();
    assert_eq!(db.seed_excluded_keywords(1, &defaults).unwrap(), 0);
    let remaining: Vec<_> = db
        .list_excluded_keywords(1)
        .unwrap()
        .into_iter()
        .map(|k| k.keyword)
        .collect();
    assert_eq!(remaining, vec!["Comisiones".to_string()]);

    assert_eq!(db.reset_excluded_keywords(1, &defaults).unwrap(), 2);
    assert_eq!(db.list_excluded_keywords(1).unwrap().len(), 2);
}

#[test]
fn test_add_excluded_keyword_is_idempotent() {
    let db = Database::in_memory().unwrap();
    let first = db.add_excluded_keyword(1, "Comisiones").unwrap();
    let again = db.add_excluded_keyword(1, "  COMISIONES ").unwrap();
    assert_eq!(first.id, again.id);
    assert_eq!(again.keyword, "Comisiones");

    let other_user = db.add_excluded_keyword(2, "comisiones").unwrap();
    assert_ne!(other_user.id, first.id);

    assert!(matches!(
        db.add_excluded_keyword(1, " - "),
        Err(Error::InvalidData(_))
    ));
    assert!(matches!(
        db.delete_excluded_keyword(2, first.id),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_excluded_keyword_storage_snapshot() {
    let db = Database::in_memory().unwrap();
    let defaults = vec!["seguro".to_string()];
    let keywords = Storage::load_excluded_keywords(&db, 1, &defaults).unwrap();
    assert_eq!(keywords, defaults);

    db.add_excluded_keyword(1, "membresia").unwrap();
    let keywords = Storage::load_excluded_keywords(&db, 1, &[]).unwrap();
    assert_eq!(keywords, vec!["seguro".to_string(), "membresia".to_string()]);
}

#[test]
fn test_seed_and_count_categories() {
    let db = Database::in_memory().unwrap();
    assert_eq!(db.seed_default_categories(1).unwrap(), DEFAULT_CATEGORIES.len());
    // Seeding again creates nothing
    assert_eq!(db.seed_default_categories(1).unwrap(), 0);

    db.ensure_uncategorized(1).unwrap();
    assert_eq!(db.count_categories(1).unwrap(), DEFAULT_CATEGORIES.len());
    assert_eq!(db.count_categories(2).unwrap(), 0);

    let categories = db.list_categories(1).unwrap();
    assert_eq!(categories.len(), DEFAULT_CATEGORIES.len() + 1);
    assert_eq!(categories[0].name, "Food & Dining");
    assert!(categories[0].keywords.contains(&"coffee".to_string()));
}

#[test]
fn test_ensure_uncategorized_is_idempotent() {
    let db = Database::in_memory().unwrap();
    let first = db.ensure_uncategorized(1).unwrap();
    let second = db.ensure_uncategorized(1).unwrap();
    assert_eq!(first.id, second.id);
    assert!(first.is_system);
    assert_eq!(first.name, UNCATEGORIZED);
}

#[test]
fn test_add_category_rejects_duplicates_and_reserved_names() {
    let db = Database::in_memory().unwrap();
    let pets = db
        .add_category(1, "Pets", &["petco".to_string(), " ".to_string()])
        .unwrap();
    assert_eq!(pets.keywords, vec!["petco".to_string()]);

    assert!(matches!(
        db.add_category(1, "Pets", &[]),
        Err(Error::InvalidData(_))
    ));
    assert!(matches!(
        db.add_category(1, "uncategorized", &[]),
        Err(Error::InvalidData(_))
    ));
    // Same name for another user is fine
    assert!(db.add_category(2, "Pets", &[]).is_ok());
}

#[test]
fn test_statement_lifecycle_columns() {
    let db = Database::in_memory().unwrap();
    let statement = upload(&db, 1);
    assert_eq!(statement.status, StatementStatus::Uploaded);
    assert_eq!(statement.format, DocumentFormat::Text);
    assert_eq!(statement.content_hash.len(), 64);
    assert!(statement.extraction_started_at.is_none());

    db.set_statement_status(statement.id, StatementStatus::Extracting, None)
        .unwrap();
    let err = Error::ExtractionEmpty;
    db.set_statement_status(statement.id, StatementStatus::ExtractFailed, Some(&err))
        .unwrap();

    let loaded = db.get_statement(statement.id).unwrap();
    assert_eq!(loaded.status, StatementStatus::ExtractFailed);
    assert_eq!(loaded.error_kind.as_deref(), Some("extraction_empty"));
    assert!(loaded.extraction_started_at.is_some());
    assert!(loaded.failed_at.is_some());

    // Moving on clears the error detail
    db.set_statement_status(statement.id, StatementStatus::Extracting, None)
        .unwrap();
    let loaded = db.get_statement(statement.id).unwrap();
    assert!(loaded.error_message.is_none());
    assert!(loaded.error_kind.is_none());
}

#[test]
fn test_missing_statement_is_not_found() {
    let db = Database::in_memory().unwrap();
    assert!(matches!(db.get_statement(42), Err(Error::NotFound(_))));
    assert!(matches!(
        db.set_statement_status(42, StatementStatus::Extracting, None),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_retry_counters() {
    let db = Database::in_memory().unwrap();
    let statement = upload(&db, 1);
    assert_eq!(
        db.increment_statement_retries(statement.id, Stage::Extraction).unwrap(),
        1
    );
    assert_eq!(
        db.increment_statement_retries(statement.id, Stage::Extraction).unwrap(),
        2
    );
    let loaded = db.get_statement(statement.id).unwrap();
    assert_eq!(loaded.extraction_retries, 2);
    assert_eq!(loaded.categorization_retries, 0);
}

#[test]
fn test_extraction_checkpoint_roundtrip() {
    let db = Database::in_memory().unwrap();
    let statement = upload(&db, 1);

    let candidate = TransactionCandidate {
        date: date(2025, 6, 1),
        description: "Coffee Shop".into(),
        amount: 4.5,
        currency: "USD".into(),
        raw_line: "2025-06-01 Coffee Shop $4.50".into(),
    };
    let outcome = ExtractionOutcome {
        candidates: vec![candidate.clone()],
        period: StatementPeriod::new(date(2025, 6, 1), date(2025, 6, 30)),
        method: ExtractionMethod::Pattern,
        dropped: 2,
        excluded: 1,
    };
    db.set_statement_raw_text(statement.id, "2025-06-01 Coffee Shop $4.50")
        .unwrap();
    db.set_statement_extraction(statement.id, &outcome).unwrap();

    let loaded = db.get_statement(statement.id).unwrap();
    assert_eq!(loaded.candidates, vec![candidate]);
    assert_eq!(loaded.found_count, 1);
    assert_eq!(loaded.dropped_count, 2);
    assert_eq!(loaded.excluded_count, 1);
    assert_eq!(loaded.extraction_method, Some(ExtractionMethod::Pattern));
    assert_eq!(loaded.period.unwrap().month_key, "2025-06");
    assert!(loaded.raw_text.is_some());
}

#[test]
fn test_insert_transactions_skips_committed_fingerprints() {
    let db = Database::in_memory().unwrap();
    let statement = upload(&db, 1);
    let category = db.add_category(1, "Food", &[]).unwrap();

    let batch = vec![
        new_txn(&statement, category.id, 0, 10.0),
        new_txn(&statement, category.id, 1, 20.0),
    ];
    assert_eq!(db.insert_transactions(&batch).unwrap(), 2);
    assert_eq!(db.insert_transactions(&batch).unwrap(), 0);

    let committed = db.list_statement_transactions(statement.id).unwrap();
    assert_eq!(committed.len(), 2);
    assert_eq!(committed[0].category_name, "Food");
    assert_eq!(db.committed_fingerprints(statement.id).unwrap().len(), 2);
}

#[test]
fn test_insert_transactions_is_atomic() {
    let db = Database::in_memory().unwrap();
    let statement = upload(&db, 1);
    let category = db.add_category(1, "Food", &[]).unwrap();

    // Second row references a category that does not exist
    let batch = vec![
        new_txn(&statement, category.id, 0, 10.0),
        new_txn(&statement, 9999, 1, 20.0),
    ];
    assert!(db.insert_transactions(&batch).is_err());
    assert!(db.list_statement_transactions(statement.id).unwrap().is_empty());
}

#[test]
fn test_historical_window_excludes_statement() {
    let db = Database::in_memory().unwrap();
    let old = upload(&db, 1);
    let current = upload(&db, 1);
    let category = db.add_category(1, "Food", &[]).unwrap();

    db.insert_transactions(&[new_txn(&old, category.id, 0, 10.0)])
        .unwrap();
    db.insert_transactions(&[new_txn(&current, category.id, 1, 20.0)])
        .unwrap();

    let history = db
        .historical_transactions(1, date(2025, 5, 1), date(2025, 7, 1), Some(current.id))
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].statement_id, old.id);

    // Upper bound is exclusive
    let history = db
        .historical_transactions(1, date(2025, 5, 1), date(2025, 6, 1), None)
        .unwrap();
    assert!(history.is_empty());
}

#[test]
fn test_recategorize_keeps_original() {
    let db = Database::in_memory().unwrap();
    let statement = upload(&db, 1);
    let food = db.add_category(1, "Food", &[]).unwrap();
    let fun = db.add_category(1, "Fun", &[]).unwrap();
    let other_user = db.add_category(2, "Elsewhere", &[]).unwrap();

    db.insert_transactions(&[new_txn(&statement, food.id, 0, 10.0)])
        .unwrap();
    let txn = &db.list_statement_transactions(statement.id).unwrap()[0];

    assert!(matches!(
        db.recategorize_transaction(txn.id, other_user.id),
        Err(Error::NotFound(_))
    ));

    db.recategorize_transaction(txn.id, fun.id).unwrap();
    let updated = db.get_transaction(txn.id).unwrap().unwrap();
    assert_eq!(updated.category_id, fun.id);
    assert_eq!(updated.original_category_id, food.id);
    assert_eq!(updated.category_source, CategorySource::Rule);
}

#[test]
fn test_delete_statement_cascades() {
    let db = Database::in_memory().unwrap();
    let statement = upload(&db, 1);
    let category = db.add_category(1, "Food", &[]).unwrap();
    db.insert_transactions(&[new_txn(&statement, category.id, 0, 10.0)])
        .unwrap();
    db.insert_alerts(
        1,
        Some(statement.id),
        &[AlertDraft {
            alert_type: AlertType::NewMerchant,
            severity: AlertSeverity::Low,
            title: "New merchant".into(),
            description: "First time".into(),
            recommendation: None,
            currency: Some("USD".into()),
            category_id: Some(category.id),
        }],
    )
    .unwrap();

    db.delete_statement(statement.id).unwrap();
    assert!(db.list_statement_transactions(statement.id).unwrap().is_empty());
    assert!(db.list_statement_alerts(statement.id).unwrap().is_empty());
}

#[test]
fn test_alert_read_and_acknowledge() {
    let db = Database::in_memory().unwrap();
    let statement = upload(&db, 1);
    let drafts = vec![
        AlertDraft {
            alert_type: AlertType::NewMerchant,
            severity: AlertSeverity::Low,
            title: "New merchant".into(),
            description: "First time".into(),
            recommendation: None,
            currency: Some("USD".into()),
            category_id: None,
        },
        AlertDraft {
            alert_type: AlertType::UnusualSpending,
            severity: AlertSeverity::High,
            title: "Spike".into(),
            description: "Way up".into(),
            recommendation: Some("Slow down".into()),
            currency: Some("USD".into()),
            category_id: None,
        },
    ];
    let ids = db.insert_alerts(1, Some(statement.id), &drafts).unwrap();

    let alerts = db.list_statement_alerts(statement.id).unwrap();
    assert_eq!(alerts[0].severity, AlertSeverity::High);

    db.mark_alert_read(ids[0]).unwrap();
    db.acknowledge_alert(ids[1]).unwrap();
    assert!(db.list_alerts(1, true).unwrap().is_empty());

    let acknowledged = db
        .list_alerts(1, false)
        .unwrap()
        .into_iter()
        .find(|a| a.id == ids[1])
        .unwrap();
    assert!(acknowledged.acknowledged_at.is_some());
    assert!(matches!(db.mark_alert_read(999), Err(Error::NotFound(_))));
}

#[test]
fn test_statement_alerts_replaced_on_rerun() {
    let db = Database::in_memory().unwrap();
    let statement = upload(&db, 1);
    let other = upload(&db, 1);
    let draft = AlertDraft {
        alert_type: AlertType::NewMerchant,
        severity: AlertSeverity::Low,
        title: "New merchant: Brand New Bistro".into(),
        description: "First time".into(),
        recommendation: None,
        currency: Some("USD".into()),
        category_id: None,
    };

    db.insert_alerts(1, Some(other.id), &[draft.clone()]).unwrap();
    db.insert_alerts(1, None, &[draft.clone()]).unwrap();
    for _ in 0..3 {
        db.insert_alerts(1, Some(statement.id), &[draft.clone()]).unwrap();
    }
    assert_eq!(db.list_statement_alerts(statement.id).unwrap().len(), 1);
    assert_eq!(db.list_statement_alerts(other.id).unwrap().len(), 1);
    assert_eq!(db.list_alerts(1, false).unwrap().len(), 3);

    db.insert_alerts(1, Some(statement.id), &[]).unwrap();
    assert!(db.list_statement_alerts(statement.id).unwrap().is_empty());
}

#[test]
fn test_monitoring_rules_deduplicated_among_active() {
    let db = Database::in_memory().unwrap();
    let statement = upload(&db, 1);
    let rule = MonitoringRuleDraft {
        threshold_type: ThresholdType::CategorySpend,
        scope: RuleScope::Category {
            id: 5,
            name: "Entertainment".into(),
        },
        threshold: 300.0,
        currency: "USD".into(),
        frequency: Frequency::Monthly,
    };

    assert_eq!(
        db.insert_monitoring_rules(1, Some(statement.id), &[rule.clone()])
            .unwrap(),
        1
    );
    assert_eq!(
        db.insert_monitoring_rules(1, Some(statement.id), &[rule.clone()])
            .unwrap(),
        0
    );

    let stored = db.list_statement_rules(statement.id).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].scope, rule.scope);

    db.deactivate_rule(stored[0].id).unwrap();
    assert_eq!(
        db.insert_monitoring_rules(1, Some(statement.id), &[rule])
            .unwrap(),
        1
    );
    assert_eq!(db.list_active_rules(1).unwrap().len(), 1);
}
