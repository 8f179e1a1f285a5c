use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use fix_owner_core::{
    build_distribution_analysis, build_remediation_plan, collect_doctor_info, default_resolver,
    file_timestamp, is_elevated, load_remediation_plan, run_walk_with_callback,
    write_distribution_analysis, write_failure_log, write_remediation_plan, ConfigurationError,
    DistributionTracker, IdentityResolver, ItemOutcome, OwnershipClassification, RunOutcome,
    RunReport, TraversalConfig,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

const REPORT_BAR_WIDTH: usize = 80;
const EXIT_CONFIGURATION: u8 = 1;
const EXIT_INTERRUPTED: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "fix-owner",
    version,
    about = "Find files and directories owned by orphaned accounts and reassign them to a known-good owner."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Walk a tree and repair orphaned ownership (dry run unless --execute).
    Repair(RepairArgs),
    /// Show platform, privilege and current-account information.
    Doctor(DoctorArgs),
}

#[derive(Debug, Args)]
struct RepairArgs {
    /// Root directory to process.
    root_path: PathBuf,

    /// Account that takes ownership. Defaults to the current user.
    owner_account: Option<String>,

    /// Apply changes. Without this flag the run only reports what would change.
    #[arg(short = 'x', long)]
    execute: bool,

    /// Descend into subdirectories.
    #[arg(short, long)]
    recurse: bool,

    /// Process files as well as directories.
    #[arg(short, long)]
    files: bool,

    /// Console detail, 0 (summary only) to 3 (every item with its owner).
    #[arg(short, long, value_name = "LEVEL", default_value_t = 0)]
    verbose: u8,

    /// Suppress everything except errors.
    #[arg(short, long)]
    quiet: bool,

    /// Stop after this many seconds; 0 disables the limit.
    #[arg(long, value_name = "SECONDS", default_value_t = 0)]
    timeout: u64,

    /// Profile which accounts own the tree and export the analysis.
    #[arg(long)]
    track_sids: bool,

    /// Take the owner account from a remediation plan written by --track-sids.
    #[arg(long, value_name = "FILE")]
    yaml_remediation: Option<PathBuf>,

    /// Directory for the failure log and exports.
    #[arg(long, value_name = "DIR", default_value = "output")]
    output_dir: PathBuf,
}

#[derive(Debug, Args)]
struct DoctorArgs {
    /// Print the information as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy)]
enum Verbosity {
    Quiet,
    Level(u8),
}

impl Verbosity {
    fn from_args(args: &RepairArgs) -> Self {
        if args.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Level(args.verbose)
        }
    }

    fn filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Level(0 | 1) => "info",
            Verbosity::Level(2) => "debug",
            Verbosity::Level(_) => "trace",
        }
    }

    fn at_least(self, level: u8) -> bool {
        matches!(self, Verbosity::Level(current) if current >= level)
    }

    fn is_quiet(self) -> bool {
        matches!(self, Verbosity::Quiet)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Repair(args) => {
            let verbosity = Verbosity::from_args(&args);
            init_tracing(verbosity.filter());
            match run_repair_command(args, verbosity) {
                Ok(RunOutcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
                Ok(_) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("Error: {err:#}");
                    ExitCode::from(EXIT_CONFIGURATION)
                }
            }
        }
        Commands::Doctor(args) => {
            init_tracing("info");
            match run_doctor_command(args) {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("Error: {err:#}");
                    ExitCode::from(EXIT_CONFIGURATION)
                }
            }
        }
    }
}

fn validate_args(args: &RepairArgs) -> Result<(), ConfigurationError> {
    if args.quiet && args.verbose > 0 {
        return Err(ConfigurationError::InvalidOption(
            "--verbose and --quiet cannot be combined".to_string(),
        ));
    }
    if args.verbose > 3 {
        return Err(ConfigurationError::InvalidOption(format!(
            "--verbose must be between 0 and 3, got {}",
            args.verbose
        )));
    }
    if args.owner_account.is_some() && args.yaml_remediation.is_some() {
        return Err(ConfigurationError::InvalidOption(
            "owner_account and --yaml-remediation cannot be combined; the plan names the owner"
                .to_string(),
        ));
    }
    if !args.root_path.exists() {
        return Err(ConfigurationError::MissingRoot(args.root_path.clone()));
    }
    if !args.root_path.is_dir() {
        return Err(ConfigurationError::RootNotDirectory(args.root_path.clone()));
    }
    Ok(())
}

fn run_repair_command(args: RepairArgs, verbosity: Verbosity) -> Result<RunOutcome> {
    validate_args(&args)?;

    if args.execute && !is_elevated() {
        warn!("not running elevated; ownership changes will likely fail");
        if !verbosity.is_quiet() {
            println!("Warning: administrator privileges are required for ownership changes.");
        }
    }

    let resolver = default_resolver();
    let requested = match (&args.owner_account, &args.yaml_remediation) {
        (Some(account), _) => Some(account.clone()),
        (None, Some(plan)) => {
            let account = load_remediation_plan(plan)?;
            if !verbosity.is_quiet() {
                println!("Owner account from {}: {account}", plan.display());
            }
            Some(account)
        }
        (None, None) => None,
    };
    let target = resolver.resolve_account(requested.as_deref())?;

    let cancel_flag = Arc::new(AtomicBool::new(false));
    {
        let flag = cancel_flag.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
            .context("failed to install Ctrl+C handler")?;
    }

    let config = TraversalConfig {
        root: args.root_path.clone(),
        target: target.identifier.clone(),
        recurse: args.recurse,
        include_files: args.files,
        execute: args.execute,
        deadline: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        cancel_flag: Some(cancel_flag),
    };

    if !verbosity.is_quiet() {
        if args.execute {
            println!("EXECUTE MODE: ownership changes will be applied");
        } else {
            println!("DRY RUN MODE: no changes will be made");
        }
    }
    if verbosity.at_least(1) {
        println!("Root path: {}", config.root.display());
        println!("Target owner: {} ({})", target.display_name, target.identifier);
        println!("Recurse subdirectories: {}", yes_no(config.recurse));
        println!("Include files: {}", yes_no(config.include_files));
    }

    let timestamp = file_timestamp(&Local::now());
    let mut tracker = args
        .track_sids
        .then(|| DistributionTracker::new(&resolver));

    let report = run_walk_with_callback(&config, &resolver, tracker.as_mut(), |item| {
        print_item(&item, config.execute, verbosity)
    })?;

    if !verbosity.is_quiet() {
        print_statistics(&report, args.timeout);
    }

    if let Some(path) = write_failure_log(
        &args.output_dir,
        &timestamp,
        "fix-owner repair",
        &report.finished_at,
        &report.failures,
    )? {
        let what = format!("{} failed item(s) logged", report.failures.len());
        if let Some(line) = artifact_notice(verbosity, &what, &path) {
            println!("{line}");
        }
    }

    if let Some(tracker) = &tracker {
        export_distribution(
            tracker,
            &config.root,
            &target.display_name,
            &args.output_dir,
            &timestamp,
            verbosity,
        )?;
    }

    Ok(report.outcome)
}

fn print_item(item: &ItemOutcome, execute: bool, verbosity: Verbosity) {
    let kind = if item.is_directory { "directory" } else { "file" };
    if let Some(error) = &item.error {
        if verbosity.at_least(1) {
            eprintln!("Error processing {kind} {}: {error}", item.path.display());
        }
        return;
    }
    if verbosity.at_least(2) {
        println!(
            "Examining {kind}: {} [{}]",
            item.path.display(),
            item.classification.label()
        );
    }
    if verbosity.at_least(3) {
        if let Some(owner) = &item.owner {
            println!(
                "  owner: {} ({})",
                item.owner_name.as_deref().unwrap_or("<unresolved>"),
                owner
            );
        }
    }
    if item.changed && verbosity.at_least(1) {
        let action = if execute { "Changed" } else { "Would change" };
        println!("{action} owner for {kind}: {}", item.path.display());
    }
}

fn print_statistics(report: &RunReport, timeout: u64) {
    let stats = &report.statistics;
    let elapsed = report.elapsed_ms as f64 / 1000.0;
    match report.outcome {
        RunOutcome::TimedOut => {
            println!("Timeout reached after {elapsed:.1} seconds (limit: {timeout} seconds)")
        }
        RunOutcome::Interrupted => println!("Interrupted; statistics below are partial."),
        RunOutcome::Completed => {}
    }

    let title = if report.is_dry_run() {
        "SIMULATED EXECUTION STATISTICS"
    } else {
        "EXECUTION STATISTICS"
    };
    let changed = if report.is_dry_run() {
        "that would change"
    } else {
        "changed"
    };
    println!("{}", "-".repeat(REPORT_BAR_WIDTH));
    println!("{title:^REPORT_BAR_WIDTH$}");
    println!("{}", "-".repeat(REPORT_BAR_WIDTH));
    println!("Directories traversed: {}", stats.directories_seen);
    println!("Files traversed: {}", stats.files_seen);
    println!("Directory ownerships {changed}: {}", stats.directories_changed);
    println!("File ownerships {changed}: {}", stats.files_changed);
    println!("Exceptions encountered: {}", stats.exceptions);
    println!("Total duration: {elapsed:.1} seconds");
}

fn export_distribution(
    tracker: &DistributionTracker<'_>,
    root: &Path,
    target_account: &str,
    output_dir: &Path,
    timestamp: &str,
    verbosity: Verbosity,
) -> Result<()> {
    if tracker.is_empty() {
        if !verbosity.is_quiet() {
            println!("No SID data collected.");
        }
        return Ok(());
    }

    let entries = tracker.entries();
    let summary = tracker.summary();
    if !verbosity.is_quiet() {
        print_distribution_report(tracker);
    }

    let analysis = build_distribution_analysis(&entries, &summary, root, target_account);
    let analysis_path = write_distribution_analysis(&analysis, output_dir, timestamp)?;
    if let Some(line) = artifact_notice(verbosity, "Ownership analysis written", &analysis_path) {
        println!("{line}");
    }

    if let Some(plan) = build_remediation_plan(&entries, target_account) {
        let plan_path = write_remediation_plan(&plan, output_dir, timestamp)?;
        if let Some(line) = artifact_notice(verbosity, "Remediation plan written", &plan_path) {
            println!("{line}");
        }
    }
    Ok(())
}

fn artifact_notice(verbosity: Verbosity, what: &str, path: &Path) -> Option<String> {
    (!verbosity.is_quiet()).then(|| format!("{what} to {}", path.display()))
}

fn print_distribution_report(tracker: &DistributionTracker<'_>) {
    let summary = tracker.summary();
    println!();
    println!("{}", "=".repeat(REPORT_BAR_WIDTH));
    println!("{:^REPORT_BAR_WIDTH$}", "SID OWNERSHIP ANALYSIS REPORT");
    println!("{}", "=".repeat(REPORT_BAR_WIDTH));
    println!("Total files analyzed: {}", summary.total_files);
    println!("Total directories analyzed: {}", summary.total_directories);
    println!("Unique SIDs found: {}", summary.unique_identifiers);
    println!("Valid SIDs: {}", summary.resolvable_count);
    println!("Orphaned SIDs: {}", summary.orphaned_count);
    if summary.unknown_count > 0 {
        println!("Unknown SIDs: {}", summary.unknown_count);
    }
    println!();
    println!("SID DETAILS:");
    println!("{}", "-".repeat(REPORT_BAR_WIDTH));
    println!("{:<8} {:<8} {:<10} Account Name", "Files", "Dirs", "Status");
    println!("{}", "-".repeat(REPORT_BAR_WIDTH));
    for entry in tracker.entries() {
        println!(
            "{:<8} {:<8} {:<10} {}",
            entry.file_count,
            entry.directory_count,
            entry.classification.label(),
            entry.display_name
        );
    }
    println!("{}", "-".repeat(REPORT_BAR_WIDTH));
    println!("Legend:");
    println!("  Files: Number of files owned by this SID");
    println!("  Dirs:  Number of directories owned by this SID");
    for classification in [
        OwnershipClassification::Resolvable,
        OwnershipClassification::Orphaned,
        OwnershipClassification::Unknown,
    ] {
        println!(
            "  {}: {}",
            classification.label(),
            legend_text(classification)
        );
    }
    println!("{}", "=".repeat(REPORT_BAR_WIDTH));
}

fn legend_text(classification: OwnershipClassification) -> &'static str {
    match classification {
        OwnershipClassification::Resolvable => "SID corresponds to an existing account",
        OwnershipClassification::Orphaned => "SID does not correspond to any existing account",
        OwnershipClassification::Unknown => "SID validation could not be performed",
    }
}

fn run_doctor_command(args: DoctorArgs) -> Result<()> {
    let info = collect_doctor_info();
    if args.json {
        let payload =
            serde_json::to_string_pretty(&info).context("failed to serialize doctor info")?;
        println!("{payload}");
        return Ok(());
    }

    println!("OS: {} ({})", info.os, info.arch);
    if let Some(current_dir) = &info.current_dir {
        println!("Current directory: {}", current_dir);
    }
    println!("Elevated: {}", yes_no(info.elevated));
    if let (Some(account), Some(identifier)) = (&info.current_account, &info.current_identifier) {
        println!("Current account: {} ({})", account, identifier);
    }
    for note in &info.notes {
        println!("Note: {}", note);
    }
    Ok(())
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use std::path::Path;

    use super::{artifact_notice, validate_args, Cli, Commands, Verbosity};

    fn repair_args(extra: &[&str]) -> super::RepairArgs {
        let root = std::env::temp_dir();
        let mut argv = vec!["fix-owner", "repair", root.to_str().expect("utf-8 temp dir")];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Repair(args) => args,
            Commands::Doctor(_) => panic!("expected repair"),
        }
    }

    #[test]
    fn parses_short_flags() {
        let args = repair_args(&["Administrator", "-x", "-r", "-f", "-v", "2", "--timeout", "30"]);
        assert!(args.execute && args.recurse && args.files);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.timeout, 30);
        assert_eq!(args.owner_account.as_deref(), Some("Administrator"));
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn rejects_conflicting_options() {
        assert!(validate_args(&repair_args(&["-v", "1", "-q"])).is_err());
        assert!(validate_args(&repair_args(&["-v", "4"])).is_err());
        assert!(
            validate_args(&repair_args(&["Admin", "--yaml-remediation", "plan.yaml"])).is_err()
        );
    }

    #[test]
    fn quiet_suppresses_artifact_notices() {
        let path = Path::new("output").join("failed_items_20240101_000000.log");
        assert_eq!(artifact_notice(Verbosity::Quiet, "1 failed item(s) logged", &path), None);
        assert_eq!(
            artifact_notice(Verbosity::Level(0), "1 failed item(s) logged", &path),
            Some(format!("1 failed item(s) logged to {}", path.display()))
        );
    }

    #[test]
    fn verbosity_maps_to_filters() {
        assert_eq!(Verbosity::Quiet.filter(), "error");
        assert_eq!(Verbosity::Level(0).filter(), "info");
        assert_eq!(Verbosity::Level(3).filter(), "trace");
        assert!(Verbosity::Level(2).at_least(1));
        assert!(!Verbosity::Quiet.at_least(0));
    }
}
