mod classifier;
mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, MutationFlags};
use dotenv::dotenv;
use progress::CliReporter;
use serde::Serialize;
use tidyguard_core::actions::CleanupReport;
use tidyguard_core::duplicates::KeepPlan;
use tidyguard_core::storage::StatsPeriod;
use tidyguard_core::{
    ActionResult, Classification, Engine, ExecuteOptions, FolderPolicy, RiskEvaluation, RiskLevel,
};
use tracing::{error, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match tidyguard_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    let json = args.json;

    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return Ok(());
    };

    if let Commands::PrintConfig = command {
        println!("Configuration: {:#?}", config);
        return Ok(());
    }

    let engine = match Engine::new(config.clone()) {
        Ok(engine) => engine,
        Err(err) => {
            error!(
                "Error opening audit store {}: {}",
                config.database_path.display(),
                err
            );
            process::exit(1);
        }
    };

    if let Err(err) = run(&engine, command, json) {
        error!("Error: {:#}", err);
        process::exit(1);
    }

    Ok(())
}

fn run(engine: &Engine, command: Commands, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Evaluate {
            source,
            destination,
            operation,
            category,
            confidence,
            approve,
        } => {
            let classification = category.map(|c| Classification::new(c, confidence));
            let evaluation = engine.evaluate(
                &source,
                &destination,
                operation,
                classification.as_ref(),
                approve,
            );
            emit(json, &evaluation, print_evaluation)
        }
        Commands::Execute {
            source,
            category,
            path,
            name,
            confidence,
            no_move,
            flags,
        } => {
            let mut classification = Classification::new(category, confidence);
            classification.suggested_path = path;
            classification.suggested_name = name;
            let options = ExecuteOptions {
                user_approved: flags.approve,
                folder_policy: no_move.then_some(FolderPolicy { allow_move: false }),
                dry_run: flags.dry_run,
            };
            let result = engine.actions().execute(&source, &classification, &options);
            emit_result(json, &result)
        }
        Commands::Delete { path, flags } => {
            let result = engine.actions().delete(&path, flags.approve, flags.dry_run);
            emit_result(json, &result)
        }
        Commands::Archive { path, dir, flags } => run_archive(engine, &path, dir.as_deref(), flags, json),
        Commands::Duplicates {
            roots,
            parallel,
            strategy,
            cleanup,
            dry_run,
        } => {
            let reporter = CliReporter::new();
            let scan = engine.scan_duplicates(roots, parallel, strategy, &reporter)?;
            if json {
                print_json(&scan)?;
            } else {
                info!(
                    "Scan: {}",
                    format!("{:.2}s", scan.scan_duration.as_secs_f64()).green()
                );
                print_plans(&scan.plans);
                info!(
                    "{} duplicate groups, {} files with duplicates, {} protected groups, {} bytes reclaimable",
                    format!("{}", scan.summary.groups).red(),
                    format!("{}", scan.summary.duplicate_files).red(),
                    format!("{}", scan.protected_groups.len()).yellow(),
                    format!("{}", scan.space_to_free()).red(),
                );
            }
            if cleanup {
                run_cleanup(engine, &scan.plans, dry_run, &reporter, json)?;
            }
            Ok(())
        }
        Commands::Discover {
            volumes,
            report: report_path,
            cleanup,
            dry_run,
        } => {
            let reporter = CliReporter::new();
            let volumes = (!volumes.is_empty()).then_some(volumes);
            let report = engine
                .finder()
                .find_duplicates_cross_drive(volumes, &reporter)?;
            if let Some(report_path) = report_path {
                let directories: Vec<_> = report.candidates.iter().map(|c| c.path.clone()).collect();
                engine
                    .finder()
                    .generate_structure_report(&directories, Some(&report_path));
            }
            if json {
                print_json(&report)?;
            } else {
                for candidate in &report.candidates {
                    println!(
                        "  {} {} files, {} bytes{}",
                        candidate.path.display().to_string().cyan(),
                        candidate.file_count,
                        candidate.total_size,
                        if candidate.truncated { " (sampled)" } else { "" }
                    );
                }
                print_plans(&report.plans);
                info!(
                    "{} candidate directories, {} duplicate groups, {} protected groups, {} bytes reclaimable",
                    format!("{}", report.candidates.len()).cyan(),
                    format!("{}", report.summary.groups).red(),
                    format!("{}", report.protected_groups).yellow(),
                    format!("{}", report.space_to_free).red(),
                );
            }
            if cleanup {
                run_cleanup(engine, &report.plans, dry_run, &reporter, json)?;
            }
            Ok(())
        }
        Commands::Junk {
            directory,
            delete,
            flags,
        } => run_junk(engine, &directory, delete, flags, json),
        Commands::Structure { directories, out } => {
            let report = engine
                .finder()
                .generate_structure_report(&directories, out.as_deref());
            if json {
                return print_json(&report);
            }
            for dir in &report.directories {
                match &dir.error {
                    Some(e) => println!("  {} {}", dir.path.display().to_string().cyan(), e.red()),
                    None => println!(
                        "  {} {} files, {} bytes",
                        dir.path.display().to_string().cyan(),
                        dir.file_count,
                        dir.total_size
                    ),
                }
            }
            Ok(())
        }
        Commands::Stats { period } => run_stats(engine, period, json),
        Commands::Blocked { limit } => {
            let records = engine.store().blocked_operations(limit)?;
            if json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("No blocked operations");
            }
            for record in records {
                println!(
                    "{} {} {} {} -> {}",
                    record.timestamp.dimmed(),
                    risk_label(&record.risk_level),
                    record.operation,
                    record.source,
                    record.destination
                );
            }
            Ok(())
        }
        Commands::Undo { dry_run } => {
            let result = engine.actions().undo_last(dry_run);
            emit_result(json, &result)
        }
        Commands::Logs {
            search,
            category,
            limit,
        } => {
            let entries = if search.is_some() || category.is_some() {
                engine.store().search_logs(
                    search.as_deref().unwrap_or_default(),
                    category.as_deref(),
                    limit,
                )?
            } else {
                engine.store().recent_logs(limit)?
            };
            if json {
                return print_json(&entries);
            }
            for entry in entries {
                let undone = if entry.undone_at.is_some() {
                    " (undone)".yellow().to_string()
                } else {
                    String::new()
                };
                println!(
                    "#{} {} {} {} -> {}{}",
                    entry.id,
                    entry.timestamp.dimmed(),
                    entry.operation.cyan(),
                    entry.old_path,
                    entry.new_path.as_deref().unwrap_or("-"),
                    undone
                );
            }
            Ok(())
        }
        Commands::Schedule {
            paths,
            delay,
            existing,
        } => {
            let scheduler = engine.scheduler(Arc::new(classifier::RuleClassifier));
            let config = scheduler.config().clone();
            let delay = delay.unwrap_or(config.default_delay_hours);
            for path in paths {
                let queued = if existing {
                    scheduler.schedule_existing(&path, config.move_if_older_days, delay)
                } else {
                    scheduler.schedule_new(&path, delay)
                }
                .with_context(|| format!("scheduling {}", path.display()))?;
                match queued {
                    Some(id) => println!("{} {} as #{}", "Queued".green(), path.display(), id),
                    None => println!("{} {}", "Skipped".yellow(), path.display()),
                }
            }
            Ok(())
        }
        Commands::Sweep { run_loop } => {
            let scheduler = engine.scheduler(Arc::new(classifier::RuleClassifier));
            if run_loop {
                info!(
                    "Sweeping every {}s, interrupt to stop",
                    scheduler.config().poll_interval_secs
                );
                scheduler.run();
                return Ok(());
            }
            let report = scheduler.sweep_once()?;
            if json {
                return print_json(&report);
            }
            if report.deferred {
                println!("{}", "Classifier unavailable, items stay queued".yellow());
            }
            info!(
                "{} fetched, {} done, {} skipped, {} errors",
                report.fetched,
                format!("{}", report.done).green(),
                format!("{}", report.skipped).yellow(),
                format!("{}", report.errors).red(),
            );
            Ok(())
        }
        Commands::PrintConfig => Ok(()),
        Commands::TruncateDb => {
            match prompt_confirm(
                "Are you SURE you want to COMPLETELY DELETE the audit history?",
                Some(false),
            ) {
                Ok(true) => {
                    engine.store().truncate_all()?;
                    println!("All tables truncated");
                }
                _ => process::exit(0),
            }
            Ok(())
        }
    }
}

fn run_archive(
    engine: &Engine,
    path: &Path,
    dir: Option<&Path>,
    flags: MutationFlags,
    json: bool,
) -> anyhow::Result<()> {
    let result = engine
        .actions()
        .archive(path, dir, flags.approve, flags.dry_run);
    emit_result(json, &result)
}

fn run_junk(
    engine: &Engine,
    directory: &Path,
    delete: bool,
    flags: MutationFlags,
    json: bool,
) -> anyhow::Result<()> {
    let scan = engine.finder().find_temp_and_junk_files(directory);
    if !delete {
        if json {
            return print_json(&scan);
        }
        for path in &scan.files {
            println!("  {}", path.display().to_string().yellow());
        }
        for (path, reason) in &scan.protected {
            println!("  {} {}", path.display().to_string().dimmed(), reason.dimmed());
        }
        info!(
            "{} junk files, {} bytes reclaimable, {} protected",
            format!("{}", scan.files.len()).yellow(),
            format!("{}", scan.total_size).red(),
            scan.protected.len()
        );
        return Ok(());
    }

    if !flags.dry_run && !engine.config().actions.dry_run {
        let confirmed = prompt_confirm(
            &format!("Delete {} junk files?", scan.files.len()),
            Some(false),
        )
        .unwrap_or(false);
        if !confirmed {
            return Ok(());
        }
    }
    let results: Vec<ActionResult> = scan
        .files
        .iter()
        .map(|path| engine.actions().delete(path, flags.approve, flags.dry_run))
        .collect();
    if json {
        return print_json(&results);
    }
    for result in &results {
        print_result(result);
    }
    Ok(())
}

fn run_cleanup(
    engine: &Engine,
    plans: &[KeepPlan],
    dry_run: bool,
    reporter: &CliReporter,
    json: bool,
) -> anyhow::Result<()> {
    if !dry_run && !engine.config().actions.dry_run {
        let confirmed = prompt_confirm(
            &format!("Delete duplicates from {} groups?", plans.len()),
            Some(false),
        )?;
        if !confirmed {
            return Ok(());
        }
    }
    let report = engine.cleanup(plans, dry_run, reporter);
    if json {
        return print_json(&report);
    }
    print_cleanup(&report);
    Ok(())
}

fn run_stats(engine: &Engine, period: StatsPeriod, json: bool) -> anyhow::Result<()> {
    let stats = engine.actions().stats(period)?;
    if json {
        return print_json(&stats);
    }
    println!(
        "Files organised: {}",
        format!("{}", stats.summary.files_organised).green()
    );
    println!(
        "Time saved: {} minutes",
        format!("{:.1}", stats.summary.time_saved_minutes).green()
    );
    println!(
        "Duplicates removed: {}",
        format!("{}", stats.summary.duplicates_removed).green()
    );
    println!(
        "Blocked operations: {} this session, {} recorded",
        format!("{}", stats.guardian.total_blocked).red(),
        format!("{}", stats.persisted_blocked).red()
    );
    for (threat, count) in &stats.guardian.threat_types {
        println!("  {}: {}", threat, count);
    }
    Ok(())
}

fn emit<T: Serialize>(json: bool, value: &T, print: fn(&T)) -> anyhow::Result<()> {
    if json {
        print_json(value)
    } else {
        print(value);
        Ok(())
    }
}

fn emit_result(json: bool, result: &ActionResult) -> anyhow::Result<()> {
    emit(json, result, print_result)?;
    if !result.success {
        process::exit(2);
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn risk_label(level: &str) -> ColoredString {
    match level {
        "safe" => level.green(),
        "caution" => level.yellow(),
        "high_risk" => level.red(),
        _ => level.red().bold(),
    }
}

fn print_evaluation(evaluation: &RiskEvaluation) {
    let verdict = if evaluation.approved {
        "approved".green()
    } else {
        "not approved".red()
    };
    println!(
        "{} ({})",
        risk_label(evaluation.risk_level.as_str()),
        verdict
    );
    for finding in &evaluation.findings {
        println!("  {}", finding);
    }
    for warning in &evaluation.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
    if evaluation.risk_level != RiskLevel::Safe {
        println!("  {}", evaluation.reasoning.dimmed());
    }
}

fn print_result(result: &ActionResult) {
    let status = if result.success {
        "OK".green()
    } else if result.is_blocked() {
        "BLOCKED".red().bold()
    } else {
        "FAILED".red()
    };
    println!("{} [{}] {}", status, result.action.label(), result.message);
    if let Some(new_path) = &result.new_path {
        println!("  {} -> {}", result.old_path.display(), new_path.display());
    }
    for warning in &result.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
}

fn print_plans(plans: &[KeepPlan]) {
    for plan in plans {
        println!("{} {} ({})", "keep".green(), plan.keep.display(), plan.reason.dimmed());
        for path in &plan.delete {
            println!("  {} {}", "drop".red(), path.display());
        }
    }
}

fn print_cleanup(report: &CleanupReport) {
    let prefix = if report.dry_run { "[DRY RUN] " } else { "" };
    info!(
        "{}{} files deleted from {} groups, {} bytes freed",
        prefix,
        format!("{}", report.files_deleted).red(),
        report.groups,
        format!("{}", report.space_freed).green(),
    );
    for path in &report.skipped_protected {
        println!("  {} {}", "protected".yellow(), path.display());
    }
    for err in &report.errors {
        println!("  {} {}", "error".red(), err);
    }
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
