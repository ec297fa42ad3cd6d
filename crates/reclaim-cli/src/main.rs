//! reclaim - disk-space audit and verified cleanup CLI
//!
//! ## Commands
//!
//! - `diagnose`: show disk usage per mount and subsystem, plus health
//! - `clean`: run cleanup steps, measuring disk usage around each one
//! - `steps`: list cleanup steps, risk tiers and the commands they run
//!
//! Exit codes: 0 success, 1 usage/configuration/baseline error, 2 a step failed.

use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use reclaim_core::{
    cancellation, parse_duration, parse_size, ByteSize, CancelSignal, CommandRunner,
    DiskUsageSampler, ProcessRunner, ReclaimConfig, SamplerOptions, SnapshotSource,
};
use reclaim_pipeline::{
    evaluate_health, run_dangerous, select_steps, AlwaysDecline, AssumeYes, CleanupPipeline,
    ConfirmationRequest, Confirmer, DangerousAction, DangerousUnlock, HealthThresholds,
    PipelineError, PipelineRun, ReportFormatter, RiskTier, StepError, StepName,
};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "reclaim")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Disk-space audit and verified cleanup for Linux hosts", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines (on stderr)
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

/// Thresholds and limits; every flag can also come from the environment.
#[derive(Args, Debug, Clone)]
struct Settings {
    /// Journal size target for the journal-size step
    #[arg(long, global = true, env = "RECLAIM_JOURNAL_MAX_SIZE", default_value = "200M", value_parser = parse_size)]
    journal_max_size: ByteSize,

    /// Journal age target for the journal-time step
    #[arg(long, global = true, env = "RECLAIM_JOURNAL_MAX_AGE", default_value = "7d", value_parser = parse_duration)]
    journal_max_age: Duration,

    /// Files smaller than this are not truncated
    #[arg(long, global = true, env = "RECLAIM_TRUNCATE_MIN_SIZE", default_value = "100M", value_parser = parse_size)]
    truncate_min_size: ByteSize,

    /// Truncation targets must live under this directory
    #[arg(long, global = true, env = "RECLAIM_TRUNCATE_ROOT", default_value = "/var/log")]
    truncate_root: PathBuf,

    /// Upper bound for one cleanup command
    #[arg(long, global = true, env = "RECLAIM_COMMAND_TIMEOUT", default_value = "10m", value_parser = parse_duration)]
    command_timeout: Duration,

    /// Upper bound for one diagnostic query
    #[arg(long, global = true, env = "RECLAIM_SAMPLE_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    sample_timeout: Duration,

    /// Minimum size reported by the large-file scan
    #[arg(long, global = true, env = "RECLAIM_LARGE_FILE_MIN", default_value = "500M", value_parser = parse_size)]
    large_file_min: ByteSize,

    /// Root filesystem usage above this percentage is reported as unhealthy
    #[arg(long, global = true, env = "RECLAIM_ROOT_MAX_USED_PERCENT", default_value = "80")]
    root_max_used_percent: f64,

    /// Lower bound of the healthy journal size band
    #[arg(long, global = true, env = "RECLAIM_JOURNAL_TARGET_MIN", default_value = "50MB", value_parser = parse_size)]
    journal_target_min: ByteSize,

    /// Upper bound of the healthy journal size band
    #[arg(long, global = true, env = "RECLAIM_JOURNAL_TARGET_MAX", default_value = "200MB", value_parser = parse_size)]
    journal_target_max: ByteSize,
}

impl Settings {
    fn to_config(&self) -> Result<ReclaimConfig> {
        let config = ReclaimConfig {
            journal_max_size: self.journal_max_size,
            journal_max_age: self.journal_max_age,
            truncate_min_size: self.truncate_min_size,
            truncate_root: self.truncate_root.clone(),
            command_timeout: self.command_timeout,
            sample_timeout: self.sample_timeout,
            large_file_min: self.large_file_min,
            ..ReclaimConfig::default()
        };
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn thresholds(&self) -> Result<HealthThresholds> {
        if !(self.root_max_used_percent > 0.0 && self.root_max_used_percent <= 100.0) {
            bail!(
                "--root-max-used-percent must be in (0, 100], got {}",
                self.root_max_used_percent
            );
        }
        if self.journal_target_min > self.journal_target_max {
            bail!(
                "--journal-target-min ({}) exceeds --journal-target-max ({})",
                self.journal_target_min,
                self.journal_target_max
            );
        }
        Ok(HealthThresholds {
            root_max_used_percent: self.root_max_used_percent,
            journal_min: self.journal_target_min,
            journal_max: self.journal_target_max,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show disk usage per mount and subsystem, with a health verdict
    Diagnose {
        /// Print the snapshot and verdict as JSON
        #[arg(long)]
        json: bool,

        /// Also scan the root filesystem for large files
        #[arg(long)]
        large_files: bool,
    },

    /// Run cleanup steps, measuring disk usage before and after each one
    Clean(CleanArgs),

    /// List cleanup steps, their risk tiers and commands
    Steps,
}

#[derive(Args, Debug)]
struct CleanArgs {
    /// Show what would run without running it
    #[arg(long)]
    dry_run: bool,

    /// Approve every step that asks for confirmation
    #[arg(short, long)]
    yes: bool,

    /// Comma-separated steps to run instead of the default set
    #[arg(long, value_delimiter = ',', value_name = "LIST")]
    steps: Option<Vec<StepName>>,

    /// Truncate this log file (repeatable; must be under --truncate-root)
    #[arg(long = "truncate", value_name = "PATH")]
    truncate: Vec<PathBuf>,

    /// Keep going after a failed step
    #[arg(long)]
    continue_on_error: bool,

    /// Print the run as JSON
    #[arg(long)]
    json: bool,

    /// Run one dangerous action instead of cleanup steps
    #[arg(long, value_name = "NAME", conflicts_with_all = ["steps", "truncate", "dry_run", "continue_on_error"])]
    dangerous: Option<DangerousAction>,

    /// Required alongside --dangerous
    #[arg(long, requires = "dangerous")]
    confirm: bool,
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Success = 0,
    Failure = 1,
    StepFailed = 2,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

fn run_exit(run: &PipelineRun) -> Exit {
    if run.success() {
        Exit::Success
    } else {
        Exit::StepFailed
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                Exit::Failure.into()
            } else {
                Exit::Success.into()
            };
        }
    };

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    reclaim_core::init_tracing(cli.json_logs, level);

    match dispatch(cli).await {
        Ok(exit) => exit.into(),
        Err(e) => {
            eprintln!("error: {e:#}");
            Exit::Failure.into()
        }
    }
}

async fn dispatch(cli: Cli) -> Result<Exit> {
    let config = cli.settings.to_config()?;
    let formatter = ReportFormatter::new(cli.settings.thresholds()?);

    match cli.command {
        Commands::Diagnose { json, large_files } => {
            cmd_diagnose(&config, &formatter, json, large_files).await
        }
        Commands::Clean(args) => cmd_clean(&config, &formatter, args).await,
        Commands::Steps => {
            print!("{}", formatter.render_catalog(&config));
            Ok(Exit::Success)
        }
    }
}

/// Sample once and print the snapshot with its health verdict.
async fn cmd_diagnose(
    config: &ReclaimConfig,
    formatter: &ReportFormatter,
    json: bool,
    large_files: bool,
) -> Result<Exit> {
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::default());
    let mut options = SamplerOptions::from_config(config);
    if large_files {
        options = options.with_large_file_scan(config);
    }
    let sampler = DiskUsageSampler::new(runner, options);

    let snapshot = sampler.sample().await.context("disk usage query failed")?;

    if json {
        let verdict = evaluate_health(&snapshot, formatter.thresholds());
        let doc = serde_json::json!({
            "snapshot": snapshot,
            "health": verdict,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print!("{}", formatter.render_snapshot(&snapshot));
    }
    Ok(Exit::Success)
}

/// Run the selected cleanup steps, or one dangerous action.
async fn cmd_clean(
    config: &ReclaimConfig,
    formatter: &ReportFormatter,
    args: CleanArgs,
) -> Result<Exit> {
    let (cancel_handle, cancel_signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            cancel_handle.cancel();
        }
    });

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(cancel_signal.clone()));
    let sampler: Arc<dyn SnapshotSource> = Arc::new(DiskUsageSampler::new(
        runner.clone(),
        SamplerOptions::from_config(config),
    ));

    let exit = match args.dangerous {
        Some(action) => {
            let confirmer = choose_confirmer(args.yes, false, &cancel_signal);
            cmd_dangerous(
                runner.as_ref(),
                sampler.as_ref(),
                config,
                formatter,
                action,
                args.confirm,
                args.json,
                confirmer.as_ref(),
            )
            .await?
        }
        None => {
            let steps = select_steps(
                args.steps.as_deref(),
                &args.truncate,
                args.continue_on_error,
                config,
            )?;
            info!(steps = steps.len(), dry_run = args.dry_run, "selected cleanup steps");

            let confirmer = choose_confirmer(args.yes, args.dry_run, &cancel_signal);
            let pipeline = CleanupPipeline::new(runner.clone(), sampler.clone(), config.clone())
                .with_dry_run(args.dry_run)
                .with_cancel(cancel_signal.clone());

            let run = pipeline.execute(steps, confirmer.as_ref()).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                print!("{}", formatter.render(&run));
            }
            run_exit(&run)
        }
    };

    if cancel_signal.is_cancelled() {
        // A prompt thread may still be blocked on stdin; do not wait for it.
        let _ = std::io::stdout().flush();
        std::process::exit(exit as i32);
    }
    Ok(exit)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_dangerous(
    runner: &dyn CommandRunner,
    sampler: &dyn SnapshotSource,
    config: &ReclaimConfig,
    formatter: &ReportFormatter,
    action: DangerousAction,
    confirm_flag: bool,
    json: bool,
    confirmer: &dyn Confirmer,
) -> Result<Exit> {
    let Some(unlock) = DangerousUnlock::from_confirm_flag(action, confirm_flag) else {
        bail!("refusing to run {action} without --confirm");
    };

    let outcome = match run_dangerous(runner, sampler, config, action, unlock, confirmer).await {
        Ok(outcome) => outcome,
        Err(PipelineError::Step(StepError::ConfirmationDeclined { .. })) => {
            eprintln!("{action} not confirmed; nothing was run");
            return Ok(Exit::Failure);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", formatter.render_dangerous(&outcome));
    }
    Ok(if outcome.succeeded() {
        Exit::Success
    } else {
        Exit::StepFailed
    })
}

/// `--yes` and dry runs approve everything; otherwise ask on a terminal, or
/// decline when nobody can answer.
fn choose_confirmer(yes: bool, dry_run: bool, cancel: &CancelSignal) -> Box<dyn Confirmer> {
    if yes || dry_run {
        Box::new(AssumeYes)
    } else if std::io::stdin().is_terminal() {
        Box::new(TerminalConfirmer {
            cancel: cancel.clone(),
        })
    } else {
        warn!("stdin is not a terminal; steps that need confirmation will be skipped (use --yes)");
        Box::new(AlwaysDecline)
    }
}

/// Asks on stderr and reads the answer from stdin.
///
/// Dangerous actions require typing the action name; everything else takes `y`.
struct TerminalConfirmer {
    cancel: CancelSignal,
}

#[async_trait]
impl Confirmer for TerminalConfirmer {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        let prompt = prompt_text(request);
        let expected = expected_answer(request);
        let mut cancel = self.cancel.clone();

        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{prompt}");
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        });

        tokio::select! {
            result = answer => match result {
                Ok(Ok(line)) => answer_matches(&line, &expected),
                _ => false,
            },
            _ = cancel.cancelled() => false,
        }
    }
}

fn prompt_text(request: &ConfirmationRequest) -> String {
    let mut text = format!("\n{} [{}] will run:\n", request.label, request.tier);
    for command in &request.commands {
        text.push_str(&format!("    $ {command}\n"));
    }
    if request.tier == RiskTier::Dangerous {
        text.push_str(&format!(
            "This cannot be undone. Type '{}' to proceed: ",
            request.action
        ));
    } else {
        text.push_str("Proceed? [y/N] ");
    }
    text
}

fn expected_answer(request: &ConfirmationRequest) -> String {
    if request.tier == RiskTier::Dangerous {
        request.action.clone()
    } else {
        "y".to_string()
    }
}

fn answer_matches(line: &str, expected: &str) -> bool {
    let answer = line.trim();
    if expected == "y" {
        answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
    } else {
        answer == expected
    }
}
