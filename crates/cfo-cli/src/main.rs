//! CFO CLI - Statement processing pipeline
//!
//! Usage:
//!   cfo init --user 1                 Initialize database and seed categories
//!   cfo excluded list --user 1        Show keywords marking non-spend lines
//!   cfo upload --user 1 --file FILE   Upload a statement
//!   cfo process ID                    Extract, categorize and analyze
//!   cfo status ID                     Poll processing status
//!   cfo serve --port 3000             Start web server

mod cli;
mod commands;


use anyhow::Result;
use cfo_core::PipelineConfig;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let output = if cli.json {
        commands::Output::Json
    } else {
        commands::Output::Text
    };

    match cli.command {
        Commands::Init { user } => commands::cmd_init(&cli.db, user, cli.no_encrypt),
        Commands::Categories { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                CategoriesAction::List { user } => commands::cmd_categories_list(&db, user, output),
                CategoriesAction::Add {
                    user,
                    name,
                    keywords,
                } => commands::cmd_categories_add(&db, user, &name, keywords.as_deref()),
                CategoriesAction::Seed { user } => commands::cmd_categories_seed(&db, user),
            }
        }
        Commands::Excluded { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let defaults = PipelineConfig::load()?.excluded_keywords;
            match action {
                ExcludedAction::List { user } => {
                    commands::cmd_excluded_list(&db, user, &defaults, output)
                }
                ExcludedAction::Add { user, keyword } => {
                    commands::cmd_excluded_add(&db, user, &keyword)
                }
                ExcludedAction::Remove { user, id } => commands::cmd_excluded_remove(&db, user, id),
                ExcludedAction::Reset { user } => {
                    commands::cmd_excluded_reset(&db, user, &defaults)
                }
            }
        }
        Commands::Upload { user, file, card } => {
            let pipeline = commands::open_pipeline(&cli.db, cli.no_encrypt)?;
            commands::cmd_upload(&pipeline, user, &file, card, output)
        }
        Commands::Extract { id, stage } => {
            let pipeline = commands::open_pipeline(&cli.db, cli.no_encrypt)?;
            commands::cmd_extract(&pipeline, id, &stage, output).await
        }
        Commands::Categorize { id, stage } => {
            let pipeline = commands::open_pipeline(&cli.db, cli.no_encrypt)?;
            commands::cmd_categorize(&pipeline, id, &stage, output).await
        }
        Commands::Process { id, stage } => {
            let pipeline = commands::open_pipeline(&cli.db, cli.no_encrypt)?;
            commands::cmd_process(&pipeline, id, &stage, output).await
        }
        Commands::Status { id } => {
            let pipeline = commands::open_pipeline(&cli.db, cli.no_encrypt)?;
            commands::cmd_status(&pipeline, id, output)
        }
        Commands::Retry { id, stage } => {
            let pipeline = commands::open_pipeline(&cli.db, cli.no_encrypt)?;
            commands::cmd_retry(&pipeline, id, &stage, output).await
        }
        Commands::Insights { id } => {
            let pipeline = commands::open_pipeline(&cli.db, cli.no_encrypt)?;
            commands::cmd_insights(&pipeline, id, output)
        }
        Commands::Serve {
            port,
            host,
            allowed_origins,
        } => {
            commands::cmd_serve(
                &cli.db,
                &host,
                port,
                allowed_origins.as_deref(),
                cli.no_encrypt,
            )
            .await
        }
    }
}
