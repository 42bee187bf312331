mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ConvertArgs};
use docshift_core::{
    discover, format_progress, format_summary, ConverterConfig, EventKind, Orchestrator,
    RenameMode, RenameOutcome, RenameReport, RunLog, Sanitizer,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise the verbose flag picks the level
    let default_filter = if cli.verbose {
        "docshift=debug,docshift_core=debug"
    } else {
        "docshift=info,docshift_core=info"
    };
    docshift_core::init_logging(default_filter);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Convert(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert(args, config_path))
        }
        Commands::CheckNames { root } => check_names(root, config_path),
        Commands::FixNames { root, apply } => fix_names(root, apply, config_path),
    }
}

fn load_config(path: Option<&Path>) -> Result<ConverterConfig> {
    match path {
        Some(path) => ConverterConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => Ok(ConverterConfig::default()),
    }
}

async fn convert(args: ConvertArgs, config_path: Option<&Path>) -> Result<ExitCode> {
    let mut config = load_config(config_path)?;

    if let Some(batch_size) = args.batch_size {
        config.batch.batch_size = batch_size;
    }
    if let Some(secs) = args.timeout {
        config.engine.conversion_timeout = Duration::from_secs(secs);
    }
    if let Some(threshold) = args.restart_every {
        config.engine.restart_threshold = threshold;
    }
    if let Some(max) = args.max_failures {
        config.engine.max_consecutive_failures = max;
    }
    if let Some(mode) = args.sanitize {
        config.batch.sanitize = mode.into();
    }
    if let Some(dir) = args.log_dir {
        config.batch.log_dir = Some(dir);
    }
    config.validate()?;
    tracing::debug!("Effective config: {:?}", config);

    let root = resolve_root(args.root)?;

    println!(
        "{} to {} converter",
        config.batch.source_extension, config.batch.target_extension
    );
    println!("Target directory: {}", root.display());

    let plan = discover(&root, &config.batch)?;
    println!("Documents found:   {}", plan.total());
    println!("Already converted: {}", plan.skipped.len());
    println!("To be converted:   {}", plan.pending.len());

    let log = Arc::new(RunLog::create(&config.batch.resolved_log_dir())?);
    if let Some(path) = log.path() {
        println!("Log file: {}", path.display());
    }

    if plan.pending.is_empty() {
        println!("Nothing to convert.");
        for folder in &plan.folder_errors {
            eprintln!("  ✗ folder {}: {}", folder.path.display(), folder.error);
        }
        log.record_idle_run(
            &plan,
            &config.batch.target_extension,
            EventKind::RunFinished,
            None,
        );
        return Ok(if plan.folder_errors.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    println!(
        "{} will restart every {} files. Originals move to '{}/' after conversion.",
        config.engine.application, config.engine.restart_threshold, config.batch.archive_dir_name
    );
    if !args.yes && !confirm("Continue? (y/n): ")? {
        println!("Cancelled.");
        log.record_idle_run(
            &plan,
            &config.batch.target_extension,
            EventKind::RunCancelled,
            Some("declined at confirmation"),
        );
        return Ok(ExitCode::SUCCESS);
    }

    let mut orchestrator = Orchestrator::with_script_bridge(config, Arc::clone(&log))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, stopping after the current file...");
            tracing::warn!("Cancellation requested by user");
            on_interrupt.cancel();
        }
    });

    let summary = orchestrator
        .run_with_progress(&root, &cancel, |progress| {
            eprint!("\r{}", format_progress(&progress));
            let _ = io::stderr().flush();
        })
        .await?;
    eprintln!();

    println!("{}", format_summary(&summary, log.path()));

    Ok(if summary.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn check_names(root: Option<PathBuf>, config_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let root = resolve_root(root)?;

    let report = Sanitizer::new().run(&root, &config.batch, RenameMode::DryRun)?;
    println!("Checked {} documents under {}", report.scanned, root.display());

    if report.entries.is_empty() {
        println!("✓ No problematic file names found.");
    } else {
        println!("Found {} problematic file names:\n", report.entries.len());
        for entry in &report.entries {
            let issues: Vec<String> = entry.issues.iter().map(|i| i.to_string()).collect();
            println!("  {}", entry.from.display());
            println!("    issues:    {}", issues.join(", "));
            println!("    suggested: {}", file_name(&entry.to));
        }
        println!("\nRun `docshift fix-names --apply` to rename them.");
    }
    print_folder_failures(&report);

    Ok(if report.entries.is_empty() && report.folder_failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn fix_names(root: Option<PathBuf>, apply: bool, config_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let root = resolve_root(root)?;
    let mode = if apply {
        RenameMode::Apply
    } else {
        RenameMode::DryRun
    };

    let report = Sanitizer::new().run(&root, &config.batch, mode)?;
    if report.entries.is_empty() {
        println!("✓ All {} file names are fine.", report.scanned);
    }
    for entry in &report.entries {
        let from = entry.from.display();
        let to = file_name(&entry.to);
        match &entry.outcome {
            RenameOutcome::Planned => println!("  Would rename: {} -> {}", from, to),
            RenameOutcome::Renamed => println!("  ✓ Renamed: {} -> {}", from, to),
            RenameOutcome::Failed(reason) => println!("  ✗ {}: {}", from, reason),
        }
    }
    if !apply && !report.entries.is_empty() {
        println!("\nDry run. Re-run with --apply to rename {} files.", report.entries.len());
    }
    print_folder_failures(&report);

    Ok(if report.failed().next().is_none() && report.folder_failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_folder_failures(report: &RenameReport) {
    for folder in &report.folder_failures {
        eprintln!("  ✗ folder {}: {}", folder.path.display(), folder.error);
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Use the given root, or ask for one on stdin.
fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    let root = match root {
        Some(root) => root,
        None => {
            let answer = prompt("Drag a folder here (or type its path) and press Enter: ")?;
            let answer = strip_quotes(answer.trim());
            if answer.is_empty() {
                bail!("No folder given");
            }
            PathBuf::from(answer)
        }
    };
    if !root.is_dir() {
        bail!("Folder does not exist: {}", root.display());
    }
    Ok(root)
}

/// Drag-and-drop into a terminal may wrap the path in quotes.
fn strip_quotes(raw: &str) -> &str {
    raw.trim_matches(|c| c == '\'' || c == '"')
}

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

fn confirm(message: &str) -> Result<bool> {
    let answer = prompt(message)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}
