//! Reap command - one retention sweep over the selected scopes

use crate::audit::AuditLog;
use crate::cli::args::{OutputFormat, ReapArgs};
use crate::config::Config;
use crate::error::CacheResult;
use crate::reaper::{Reaper, RetentionPolicy, SweepReport};
use crate::scope::{Scope, ScopeRegistry};
use console::style;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct ScopeReport<'a> {
    scope: &'a str,
    #[serde(flatten)]
    report: &'a SweepReport,
}

/// Execute the reap command
pub async fn execute(args: ReapArgs, config: &Config) -> CacheResult<()> {
    let registry = ScopeRegistry::from_config(config)?;
    let scopes: Vec<Arc<Scope>> = if args.scope.is_empty() {
        registry.iter().cloned().collect()
    } else {
        args.scope
            .iter()
            .map(|name| registry.get(name))
            .collect::<CacheResult<_>>()?
    };

    let days = args.days.unwrap_or(config.reaper.expiration_days);
    let reaper = Reaper::new(RetentionPolicy::new(days)).dry_run(args.dry_run);
    let audit = AuditLog::new(config);

    let mut reports = Vec::with_capacity(scopes.len());
    for scope in &scopes {
        let report = reaper.sweep_scope(scope, &audit).await?;
        reports.push((scope.name().to_string(), report));
    }

    match args.format {
        OutputFormat::Table => print_table(&reports, days, args.dry_run),
        OutputFormat::Json => print_json(&reports)?,
        OutputFormat::Plain => print_plain(&reports),
    }

    Ok(())
}

fn print_table(reports: &[(String, SweepReport)], days: u32, dry_run: bool) {
    let verb = if dry_run { "would remove" } else { "removed" };
    println!(
        "Sweeping files older than {} day(s){}",
        days,
        if dry_run { " (dry run)" } else { "" }
    );

    for (scope, report) in reports {
        println!(
            "  {} {:<16} scanned {}, {} {} file(s), {} dir(s), {} bytes",
            style("•").cyan(),
            scope,
            report.scanned_files,
            verb,
            report.removed_files(),
            report.removed_dirs(),
            report.removed_bytes()
        );
        for err in &report.errors {
            println!(
                "    {} {} ({}): {}",
                style("!").red(),
                err.path.display(),
                err.action,
                err.error
            );
        }
    }

    if dry_run {
        println!();
        println!("Dry run - nothing removed.");
    }
}

fn print_json(reports: &[(String, SweepReport)]) -> CacheResult<()> {
    let rows: Vec<ScopeReport<'_>> = reports
        .iter()
        .map(|(scope, report)| ScopeReport { scope, report })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn print_plain(reports: &[(String, SweepReport)]) {
    for (scope, report) in reports {
        println!(
            "{} {} {} {}",
            scope,
            report.removed_files(),
            report.removed_dirs(),
            report.removed_bytes()
        );
    }
}
