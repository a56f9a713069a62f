//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

/// CFO - Turn card statements into categorized spending and alerts
#[derive(Parser)]
#[command(name = "cfo")]
#[command(about = "Personal CFO statement processing pipeline", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "cfo.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set CFO_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    /// Print reports as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init {
        /// Seed the default categories for this user
        #[arg(long)]
        user: Option<i64>,
    },

    /// Manage a user's categories
    Categories {
        #[command(subcommand)]
        action: CategoriesAction,
    },

    /// Manage the keywords that mark lines as non-spend (interest, fees)
    Excluded {
        #[command(subcommand)]
        action: ExcludedAction,
    },

    /// Upload a statement document (PDF, text or CSV)
    Upload {
        /// Owner of the statement
        #[arg(short, long)]
        user: i64,

        /// Statement file
        #[arg(short, long)]
        file: PathBuf,

        /// Card the statement belongs to
        #[arg(long)]
        card: Option<i64>,
    },

    /// Extract transactions from an uploaded statement
    Extract {
        /// Statement ID
        id: i64,

        #[command(flatten)]
        stage: StageArgs,
    },

    /// Categorize extracted transactions and analyze trends
    Categorize {
        /// Statement ID
        id: i64,

        #[command(flatten)]
        stage: StageArgs,
    },

    /// Run every remaining stage
    Process {
        /// Statement ID
        id: i64,

        #[command(flatten)]
        stage: StageArgs,
    },

    /// Show a statement's processing status
    Status {
        /// Statement ID
        id: i64,
    },

    /// Re-run a failed or abandoned stage
    Retry {
        /// Statement ID
        id: i64,

        #[command(flatten)]
        stage: StageArgs,
    },

    /// Show the stored analysis, alerts and monitoring rules
    Insights {
        /// Statement ID
        id: i64,
    },

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Allowed CORS origins (comma-separated)
        #[arg(long)]
        allowed_origins: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum CategoriesAction {
    /// List a user's categories
    List {
        #[arg(short, long)]
        user: i64,
    },

    /// Add a category with match keywords
    Add {
        #[arg(short, long)]
        user: i64,

        /// Category name
        name: String,

        /// Comma-separated keywords matched against transaction descriptions
        #[arg(short, long)]
        keywords: Option<String>,
    },

    /// Add the default category set
    Seed {
        #[arg(short, long)]
        user: i64,
    },
}

#[derive(Subcommand)]
pub enum ExcludedAction {
    /// List a user's excluded keywords, seeding the defaults on first use
    List {
        #[arg(short, long)]
        user: i64,
    },

    /// Exclude lines containing a keyword
    Add {
        #[arg(short, long)]
        user: i64,

        keyword: String,
    },

    /// Stop excluding a keyword
    Remove {
        #[arg(short, long)]
        user: i64,

        /// Keyword ID
        id: i64,
    },

    /// Replace a user's keywords with the configured defaults
    Reset {
        #[arg(short, long)]
        user: i64,
    },
}

/// Options shared by the stage commands
#[derive(Args, Debug, Default, Clone)]
pub struct StageArgs {
    /// Statement period start (YYYY-MM-DD), used when none is detected
    #[arg(long, requires = "to")]
    pub from: Option<NaiveDate>,

    /// Statement period end (YYYY-MM-DD)
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Card the transactions belong to
    #[arg(long)]
    pub card: Option<i64>,

    /// File with corrected statement text, replacing the cached text
    #[arg(long)]
    pub text: Option<PathBuf>,
}
