//! Statement commands: upload and the processing stages

use std::path::Path;

use anyhow::{bail, Context, Result};

use cfo_core::db::Database;
use cfo_core::models::StatementPeriod;
use cfo_core::{
    CategorizeReport, ExtractReport, Pipeline, ProcessOptions, StageReport,
};

use crate::cli::StageArgs;

use super::{truncate, Output};

/// Turn stage flags into pipeline options, reading the replacement text file if given
pub fn stage_options(args: &StageArgs) -> Result<ProcessOptions> {
    let period = match (args.from, args.to) {
        (Some(start), Some(end)) => match StatementPeriod::new(start, end) {
            Some(period) => Some(period),
            None => bail!("--to ({}) is before --from ({})", end, start),
        },
        (None, None) => None,
        _ => bail!("--from and --to must be given together"),
    };

    let text = match &args.text {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read text file {}", path.display()))?,
        ),
        None => None,
    };

    Ok(ProcessOptions {
        period,
        card_id: args.card,
        text,
        cancel: None,
    })
}

pub fn cmd_upload(
    pipeline: &Pipeline<Database>,
    user_id: i64,
    file: &Path,
    card_id: Option<i64>,
    output: Output,
) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("statement");

    let statement = pipeline.upload(user_id, filename, bytes, card_id)?;

    output.emit(&statement, |statement| {
        println!(
            "📄 Uploaded {} as statement {} ({})",
            statement.filename, statement.id, statement.format
        );
        println!("   Next: cfo process {}", statement.id);
    })
}

fn print_extract(report: &ExtractReport) {
    println!(
        "🔍 Extracted {} transaction(s) from statement {} via {}",
        report.found,
        report.statement_id,
        report.method.as_str()
    );
    if report.dropped > 0 || report.excluded > 0 {
        println!(
            "   Dropped: {}  Excluded (payments/credits): {}",
            report.dropped, report.excluded
        );
    }
    if let Some(period) = &report.period {
        println!("   Period: {} to {} ({})", period.start, period.end, period.month_key);
    }
}

fn print_categorize(report: &CategorizeReport) {
    println!(
        "🏷️  Categorized statement {}: {} created, {} already committed",
        report.statement_id, report.created, report.skipped
    );
    println!(
        "   Rule: {}  Inferred: {}  Uncategorized: {}",
        report.rule_matched, report.inferred, report.uncategorized
    );
    println!(
        "   Alerts: {}  Monitoring rules: {}",
        report.alert_count, report.rule_count
    );
    println!();
    println!("{}", report.summary);
}

pub async fn cmd_extract(
    pipeline: &Pipeline<Database>,
    id: i64,
    stage: &StageArgs,
    output: Output,
) -> Result<()> {
    let options = stage_options(stage)?;
    let report = pipeline.extract(id, &options).await?;
    output.emit(&report, print_extract)
}

pub async fn cmd_categorize(
    pipeline: &Pipeline<Database>,
    id: i64,
    stage: &StageArgs,
    output: Output,
) -> Result<()> {
    let options = stage_options(stage)?;
    let report = pipeline.categorize(id, &options).await?;
    output.emit(&report, print_categorize)
}

pub async fn cmd_process(
    pipeline: &Pipeline<Database>,
    id: i64,
    stage: &StageArgs,
    output: Output,
) -> Result<()> {
    let options = stage_options(stage)?;
    let report = pipeline.process(id, &options).await?;

    output.emit(&report, |report| {
        println!("✅ Statement {} is {}", report.statement_id, report.status);
        println!(
            "   Found: {}  Created: {}  Dropped: {}  Excluded: {}  Alerts: {}",
            report.found, report.created, report.dropped, report.excluded, report.alert_count
        );
        if !report.summary.is_empty() {
            println!();
            println!("{}", report.summary);
        }
    })
}

pub fn cmd_status(pipeline: &Pipeline<Database>, id: i64, output: Output) -> Result<()> {
    let report = pipeline.status(id)?;

    output.emit(&report, |report| {
        println!("📊 Statement {}", report.statement_id);
        println!(
            "   Status:   {} ({}%)",
            report.status, report.progress_percentage
        );
        println!("   Step:     {}", report.current_step);
        if report.in_flight {
            println!("   Running:  yes");
        }
        if let Some(found) = report.found_count {
            println!(
                "   Found:    {} (dropped {}, excluded {})",
                found,
                report.dropped_count.unwrap_or(0),
                report.excluded_count.unwrap_or(0)
            );
        }
        if let Some(period) = &report.period {
            println!("   Period:   {} to {}", period.start, period.end);
        }
        if let Some(message) = &report.error_message {
            println!(
                "   Error:    {} [{}]",
                message,
                report.error_kind.as_deref().unwrap_or("unknown")
            );
        }
        if report.retry_available {
            println!("   Retry with: cfo retry {}", report.statement_id);
        }
    })
}

pub async fn cmd_retry(
    pipeline: &Pipeline<Database>,
    id: i64,
    stage: &StageArgs,
    output: Output,
) -> Result<()> {
    let options = stage_options(stage)?;
    let report = pipeline.retry(id, &options).await?;

    output.emit(&report, |report| match report {
        StageReport::Extraction(report) => print_extract(report),
        StageReport::Categorization(report) => print_categorize(report),
    })
}

pub fn cmd_insights(pipeline: &Pipeline<Database>, id: i64, output: Output) -> Result<()> {
    let insights = pipeline.insights(id)?;

    output.emit(&insights, |insights| {
        let Some(analysis) = &insights.analysis else {
            println!(
                "No analysis for statement {} yet (status: {})",
                insights.statement_id, insights.status
            );
            return;
        };

        println!(
            "📈 Statement {} ({})",
            insights.statement_id,
            analysis.month_key.as_deref().unwrap_or("no period")
        );
        for group in &analysis.groups {
            let change = group
                .percent_change
                .map(|p| format!("{:+.1}%", p))
                .unwrap_or_else(|| "n/a".to_string());
            println!();
            println!(
                "   {} {:.2} across {} transaction(s), vs history {}",
                group.currency, group.total, group.transaction_count, change
            );
            for category in &group.categories {
                println!(
                    "     {:<24} {:>12.2}",
                    truncate(&category.category_name, 24),
                    category.current
                );
            }
        }

        println!();
        println!("{}", analysis.narrative.summary);
        for recommendation in &analysis.narrative.recommendations {
            println!("   • {}", recommendation);
        }

        if !insights.alerts.is_empty() {
            println!();
            println!("Alerts:");
            for alert in &insights.alerts {
                println!("   [{}] {}", alert.severity, alert.title);
            }
        }

        if !insights.rules.is_empty() {
            println!();
            println!("Monitoring rules:");
            for rule in &insights.rules {
                println!(
                    "   {} {} > {:.2} {} ({})",
                    rule.scope.kind(),
                    rule.scope.label(),
                    rule.threshold,
                    rule.currency,
                    rule.frequency.as_str()
                );
            }
        }
    })
}
