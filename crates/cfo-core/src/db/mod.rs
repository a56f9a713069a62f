//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `categories` - User categories, keyword sets and the fallback category
//! - `statements` - Uploaded documents, status, checkpoints and stored analyses
//! - `transactions` - Batch-atomic commits, history windows, recategorization
//! - `alerts` - Alerts and monitoring rules

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod alerts;
mod categories;
mod excluded_keywords;
mod statements;
mod transactions;

#[cfg(test)]
mod tests;

pub use categories::DEFAULT_CATEGORIES;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "CFO_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this invalidates every existing encrypted database
    const APP_SALT: &[u8; 16] = b"cfo-salt-v1-fixd";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_default()
}

/// Parse an enum column, surfacing unknown values as a conversion failure
pub(crate) fn parse_column<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `CFO_DB_KEY` environment variable to be set.
    /// The database will be encrypted using SQLCipher with a key derived
    /// from the passphrase via Argon2.
    ///
    /// Returns an error if `CFO_DB_KEY` is not set. Use `new_unencrypted()`
    /// for development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        let encryption_key = std::env::var(DB_KEY_ENV).ok();
        match encryption_key {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// WARNING: This creates an unencrypted database. Only use for development
    /// or testing. For production, use `new()` with `CFO_DB_KEY` set.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let key_pragma = passphrase
            .map(derive_key)
            .transpose()?
            .map(|key| format!("PRAGMA key = 'x\"{}\"';", key));

        // Key and foreign keys are per-connection settings
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            if let Some(pragma) = &key_pragma {
                conn.execute_batch(pragma)?;
            }
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
            Ok(())
        });

        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because SQLCipher
    /// has issues with in-memory databases in the connection pool.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("cfo_test_{}_{}.db", std::process::id(), id));
        let path = path.to_string_lossy().to_string();

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- WAL mode: readers don't block writers
            PRAGMA journal_mode = WAL;
            PRAGMA cache_size = 2000;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Categories (user-scoped, with keyword sets)
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                keywords TEXT NOT NULL DEFAULT '[]',       -- JSON array of keywords
                is_system BOOLEAN NOT NULL DEFAULT 0,      -- the Uncategorized fallback
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, name)
            );

            CREATE INDEX IF NOT EXISTS idx_categories_user ON categories(user_id);

            -- Excluded keywords (user-scoped, seeded from configuration)
            CREATE TABLE IF NOT EXISTS user_excluded_keywords (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                keyword TEXT NOT NULL,
                keyword_normalized TEXT NOT NULL,          -- lookup and uniqueness key
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, keyword_normalized)
            );

            -- Statements (one uploaded document each)
            CREATE TABLE IF NOT EXISTS statements (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                card_id INTEGER,
                filename TEXT NOT NULL,
                format TEXT NOT NULL,                      -- pdf, text, csv
                content_hash TEXT NOT NULL,
                document BLOB NOT NULL,
                raw_text TEXT,                             -- extraction checkpoint
                period_start DATE,
                period_end DATE,
                status TEXT NOT NULL DEFAULT 'uploaded',
                error_message TEXT,
                error_kind TEXT,
                candidates_json TEXT,                      -- candidates from the last extraction
                extraction_method TEXT,                    -- ai, pattern
                found_count INTEGER NOT NULL DEFAULT 0,
                dropped_count INTEGER NOT NULL DEFAULT 0,
                excluded_count INTEGER NOT NULL DEFAULT 0,
                extraction_retries INTEGER NOT NULL DEFAULT 0,
                categorization_retries INTEGER NOT NULL DEFAULT 0,
                analysis_json TEXT,                        -- stored trend analysis
                uploaded_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                extraction_started_at DATETIME,
                extracted_at DATETIME,
                categorization_started_at DATETIME,
                completed_at DATETIME,
                failed_at DATETIME
            );

            CREATE INDEX IF NOT EXISTS idx_statements_user ON statements(user_id);
            CREATE INDEX IF NOT EXISTS idx_statements_status ON statements(status);

            -- Transactions (committed once per statement, batch-atomic)
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                statement_id INTEGER NOT NULL REFERENCES statements(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL,
                card_id INTEGER,
                date DATE NOT NULL,
                merchant TEXT NOT NULL,
                amount REAL NOT NULL,                      -- positive charges, negative credits
                currency TEXT NOT NULL,
                category_id INTEGER NOT NULL REFERENCES categories(id),
                category_source TEXT NOT NULL,             -- rule, inferred, none
                original_category_id INTEGER NOT NULL,     -- kept when the user recategorizes
                original_category_source TEXT NOT NULL,
                matched_keyword TEXT,
                fingerprint TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(statement_id, fingerprint)
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_user_date ON transactions(user_id, date);
            CREATE INDEX IF NOT EXISTS idx_transactions_statement ON transactions(statement_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category_id);

            -- Alerts (append-only from the pipeline)
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                statement_id INTEGER REFERENCES statements(id) ON DELETE CASCADE,
                type TEXT NOT NULL,
                severity TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                recommendation TEXT,
                currency TEXT,
                category_id INTEGER,
                is_read BOOLEAN NOT NULL DEFAULT 0,
                acknowledged_at DATETIME,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_user ON alerts(user_id);
            CREATE INDEX IF NOT EXISTS idx_alerts_statement ON alerts(statement_id);

            -- Monitoring rules (standing thresholds for a future evaluator)
            CREATE TABLE IF NOT EXISTS monitoring_rules (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                statement_id INTEGER REFERENCES statements(id) ON DELETE SET NULL,
                threshold_type TEXT NOT NULL,              -- category_spend, single_transaction
                scope_kind TEXT NOT NULL,                  -- category, merchant
                scope_key TEXT NOT NULL,
                scope_label TEXT NOT NULL,
                threshold REAL NOT NULL,
                currency TEXT NOT NULL,
                frequency TEXT NOT NULL,                   -- weekly, monthly
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_rules_user ON monitoring_rules(user_id, is_active);
            "#,
        )?;

        info!("Database migrations complete");
        Ok(())
    }
}
