//! Runs the commands behind one cleanup step.

use std::path::{Path, PathBuf};

use reclaim_core::parse::parse_snap_disabled_revisions;
use reclaim_core::{format_bytes, CommandOutput, CommandRunner, CommandSpec, ReclaimConfig};
use tracing::debug;

use crate::error::StepError;
use crate::step::{check_truncate_target, CleanupStep, StepKind};

/// How a step ended when none of its commands failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    Ran,
    NothingToDo(String),
}

/// Everything observed while running a step's commands.
#[derive(Debug)]
pub(crate) struct StepExecution {
    pub commands: Vec<String>,
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub result: Result<Completion, StepError>,
}

impl StepExecution {
    fn new() -> Self {
        Self {
            commands: Vec::new(),
            exit_status: None,
            stdout: String::new(),
            stderr: String::new(),
            result: Ok(Completion::Ran),
        }
    }

    fn record(&mut self, output: &CommandOutput) {
        self.exit_status = Some(output.exit_code);
        append(&mut self.stdout, &output.stdout);
        append(&mut self.stderr, &output.stderr);
    }
}

/// Append one command's output, separating it from the previous one.
pub(crate) fn append(buf: &mut String, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(text);
}

pub(crate) struct StepExecutor<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a ReclaimConfig,
}

impl<'a> StepExecutor<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a ReclaimConfig) -> Self {
        Self { runner, config }
    }

    /// Run the step's commands in order, stopping at the first failure.
    pub async fn execute(&self, step: &CleanupStep) -> StepExecution {
        let mut exec = StepExecution::new();
        exec.result = self.dispatch(step, &mut exec).await;
        exec
    }

    async fn dispatch(
        &self,
        step: &CleanupStep,
        exec: &mut StepExecution,
    ) -> Result<Completion, StepError> {
        let t = self.config.command_timeout;
        match step.kind() {
            StepKind::PruneDanglingImages => {
                self.run(CommandSpec::prune_dangling_images(t), exec).await?;
            }
            StepKind::PruneBuildCache => {
                self.run(CommandSpec::prune_build_cache(t), exec).await?;
            }
            StepKind::VacuumLogsBySize(size) => {
                self.run(CommandSpec::vacuum_journal_size(*size, t), exec)
                    .await?;
            }
            StepKind::VacuumLogsByTime(age) => {
                self.run(CommandSpec::vacuum_journal_time(*age, t), exec)
                    .await?;
            }
            StepKind::PurgePackageCache => {
                self.run(CommandSpec::apt_clean(t), exec).await?;
                self.run(CommandSpec::apt_autoremove(t), exec).await?;
            }
            StepKind::RemoveDisabledPackageRevisions => {
                let listing = self
                    .run(CommandSpec::snap_list_all(self.config.sample_timeout), exec)
                    .await?;
                let revisions = parse_snap_disabled_revisions(&listing.stdout);
                if revisions.is_empty() {
                    return Ok(Completion::NothingToDo(
                        "no disabled snap revisions".to_string(),
                    ));
                }
                for revision in &revisions {
                    debug!(revision = %revision, "removing disabled snap revision");
                    self.run(CommandSpec::snap_remove_revision(revision, t), exec)
                        .await?;
                }
            }
            StepKind::TruncateLogFile(path) => {
                let target = match self.truncate_target(path).await? {
                    Ok(target) => target,
                    Err(reason) => return Ok(Completion::NothingToDo(reason)),
                };
                self.run(CommandSpec::truncate_file(&target, t)?, exec)
                    .await?;
            }
            StepKind::RotateLogs => {
                self.run(CommandSpec::force_log_rotation(t), exec).await?;
            }
        }
        Ok(Completion::Ran)
    }

    async fn run(
        &self,
        spec: CommandSpec,
        exec: &mut StepExecution,
    ) -> Result<CommandOutput, StepError> {
        exec.commands.push(spec.to_string());
        let output = self.runner.run(&spec).await?;
        exec.record(&output);
        Ok(output.into_checked()?)
    }

    /// Resolve a truncation target.
    ///
    /// `Ok(Err(reason))` means there is nothing to truncate: the file is gone
    /// or below the size floor.
    async fn truncate_target(&self, path: &Path) -> Result<Result<PathBuf, String>, StepError> {
        let root = &self.config.truncate_root;
        check_truncate_target(path, root)?;

        let invalid = |reason: String| StepError::InvalidTarget {
            path: path.to_path_buf(),
            reason,
        };

        let resolved = match tokio::fs::canonicalize(path).await {
            Ok(resolved) => resolved,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Err(format!("{} does not exist", path.display())));
            }
            Err(e) => return Err(invalid(e.to_string())),
        };
        let resolved_root = tokio::fs::canonicalize(root)
            .await
            .unwrap_or_else(|_| root.clone());
        if resolved == resolved_root || !resolved.starts_with(&resolved_root) {
            return Err(invalid(format!(
                "resolves to {}, outside {}",
                resolved.display(),
                root.display()
            )));
        }

        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| invalid(e.to_string()))?;
        if !metadata.is_file() {
            return Err(invalid("not a regular file".to_string()));
        }

        let floor = self.config.truncate_min_size.as_u64();
        if metadata.len() < floor {
            return Ok(Err(format!(
                "{} is {}, below the {} truncation floor",
                path.display(),
                format_bytes(metadata.len()),
                format_bytes(floor)
            )));
        }
        Ok(Ok(resolved))
    }
}
