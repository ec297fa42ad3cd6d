//! Verified cleanup pipeline: every executed step is bracketed by disk samples.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use reclaim_core::{
    bytes_freed, excerpt, obs, CancelSignal, CommandRunner, DiskSnapshot, ExecutionError,
    ReclaimConfig, SnapshotSource,
};
use serde::{Deserialize, Serialize};
use tracing::{warn, Instrument};
use uuid::Uuid;

use crate::confirm::Confirmer;
use crate::error::{PipelineError, StepError};
use crate::executor::{Completion, StepExecution, StepExecutor};
use crate::step::CleanupStep;

/// Why a step did not run (or had nothing to do).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    ConfirmationDeclined,
    ToolMissing { program: String },
    DryRun,
    NothingToDo { detail: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfirmationDeclined => write!(f, "confirmation declined"),
            Self::ToolMissing { program } => write!(f, "{program} not installed"),
            Self::DryRun => write!(f, "dry run"),
            Self::NothingToDo { detail } => write!(f, "nothing to do: {detail}"),
        }
    }
}

/// Coarse classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Timeout,
    PermissionDenied,
    ExecutionFailed,
    Cancelled,
    Spawn,
    InvalidCommand,
    InvalidTarget,
    Refused,
}

/// Serializable record of a [`StepError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&StepError> for StepFailure {
    fn from(error: &StepError) -> Self {
        let kind = match error {
            StepError::Execution(e) => match e {
                ExecutionError::NotFound { .. } => FailureKind::NotFound,
                ExecutionError::Timeout { .. } => FailureKind::Timeout,
                ExecutionError::PermissionDenied { .. } => FailureKind::PermissionDenied,
                ExecutionError::ExecutionFailed { .. } => FailureKind::ExecutionFailed,
                ExecutionError::Cancelled { .. } => FailureKind::Cancelled,
                ExecutionError::Spawn { .. } => FailureKind::Spawn,
                ExecutionError::InvalidCommand(_) => FailureKind::InvalidCommand,
            },
            StepError::InvalidTarget { .. } => FailureKind::InvalidTarget,
            StepError::ConfirmationDeclined { .. }
            | StepError::UnknownStep(_)
            | StepError::Locked { .. } => FailureKind::Refused,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Terminal state of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed(StepFailure),
    Skipped(SkipReason),
}

impl StepStatus {
    /// Short label for reports: ok, skipped or failed.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "ok",
            Self::Failed(_) => "failed",
            Self::Skipped(_) => "skipped",
        }
    }
}

/// Result of one step, with the snapshots that bracket it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: CleanupStep,
    pub status: StepStatus,

    /// Exit code of the last command that ran, if any did.
    pub exit_status: Option<i32>,

    pub stdout_excerpt: String,
    pub stderr_excerpt: String,

    pub snapshot_before: DiskSnapshot,
    pub snapshot_after: DiskSnapshot,

    /// Commands run, or planned for dry runs.
    pub commands: Vec<String>,

    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StepOutcome {
    /// A step that never ran; before and after are the same snapshot.
    fn skipped(
        step: CleanupStep,
        reason: SkipReason,
        snapshot: &DiskSnapshot,
        commands: Vec<String>,
    ) -> Self {
        obs::emit_step_skipped(step.name(), &reason.to_string());
        Self {
            step,
            status: StepStatus::Skipped(reason),
            exit_status: None,
            stdout_excerpt: String::new(),
            stderr_excerpt: String::new(),
            snapshot_before: snapshot.clone(),
            snapshot_after: snapshot.clone(),
            commands,
            duration_ms: 0,
            warnings: Vec::new(),
        }
    }

    /// `before.used - after.used`; negative when usage grew.
    pub fn bytes_freed(&self) -> i64 {
        bytes_freed(&self.snapshot_before, &self.snapshot_after)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, StepStatus::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, StepStatus::Skipped(_))
    }
}

/// Why a run stopped before its last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// A failing step without continue-on-error.
    StepFailed,
    /// Privileges are missing; later steps would fail the same way.
    PermissionDenied,
    /// The operator cancelled the run.
    Interrupted,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepFailed => write!(f, "step failed"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Where and why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Halt {
    /// Index of the step that caused the halt.
    pub index: usize,
    pub step: String,
    pub reason: HaltReason,
    pub message: String,
}

/// A finished pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub baseline: DiskSnapshot,

    /// In execution order; steps after a halt are absent.
    pub outcomes: Vec<StepOutcome>,

    pub halt: Option<Halt>,
}

impl PipelineRun {
    /// The most recent snapshot: the last step's after, or the baseline.
    pub fn final_snapshot(&self) -> &DiskSnapshot {
        self.outcomes
            .last()
            .map(|o| &o.snapshot_after)
            .unwrap_or(&self.baseline)
    }

    /// Bytes freed over the whole run.
    pub fn total_freed(&self) -> i64 {
        bytes_freed(&self.baseline, self.final_snapshot())
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == StepStatus::Succeeded)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_skipped()).count()
    }

    /// No step failed and the run was not halted.
    pub fn success(&self) -> bool {
        self.failed_count() == 0 && self.halt.is_none()
    }
}

/// Runs cleanup steps in order with a disk sample before and after each.
pub struct CleanupPipeline {
    runner: Arc<dyn CommandRunner>,
    sampler: Arc<dyn SnapshotSource>,
    config: ReclaimConfig,
    dry_run: bool,
    cancel: CancelSignal,
}

impl CleanupPipeline {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        sampler: Arc<dyn SnapshotSource>,
        config: ReclaimConfig,
    ) -> Self {
        Self {
            runner,
            sampler,
            config,
            dry_run: false,
            cancel: CancelSignal::never(),
        }
    }

    /// Record planned commands instead of running them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Stop before the next step once `cancel` fires. The runner should hold
    /// the same signal so the in-flight command is killed too.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute `steps` in the given order.
    ///
    /// Fails only when the baseline sample fails. Step failures are recorded
    /// in the returned run.
    pub async fn execute(
        &self,
        steps: Vec<CleanupStep>,
        confirm: &dyn Confirmer,
    ) -> Result<PipelineRun, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        self.run_steps(run_id, steps, confirm)
            .instrument(span)
            .await
    }

    async fn run_steps(
        &self,
        run_id: String,
        steps: Vec<CleanupStep>,
        confirm: &dyn Confirmer,
    ) -> Result<PipelineRun, PipelineError> {
        let clock = Instant::now();
        let started_at = Utc::now();
        obs::emit_run_started(&run_id, steps.len(), self.dry_run);

        let baseline = self.sampler.sample().await?;
        let executor = StepExecutor::new(self.runner.as_ref(), &self.config);

        let mut latest = baseline.clone();
        let mut outcomes = Vec::with_capacity(steps.len());
        let mut halt = None;

        for (index, step) in steps.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                halt = Some(Halt {
                    index,
                    step: step.label(),
                    reason: HaltReason::Interrupted,
                    message: "cancelled before the step started".to_string(),
                });
                break;
            }

            if step.risk_tier().requires_confirmation() {
                let request = step.confirmation_request(&self.config);
                let approved = confirm.confirm(&request).await;
                // An interrupted prompt reads as a decline; it must still halt.
                if self.cancel.is_cancelled() {
                    halt = Some(Halt {
                        index,
                        step: step.label(),
                        reason: HaltReason::Interrupted,
                        message: "cancelled while awaiting confirmation".to_string(),
                    });
                    break;
                }
                if !approved {
                    outcomes.push(StepOutcome::skipped(
                        step,
                        SkipReason::ConfirmationDeclined,
                        &latest,
                        Vec::new(),
                    ));
                    continue;
                }
            }

            if self.dry_run {
                let planned = step.planned_commands(&self.config);
                outcomes.push(StepOutcome::skipped(
                    step,
                    SkipReason::DryRun,
                    &latest,
                    planned,
                ));
                continue;
            }

            let (outcome, stop) = self.run_step(index, step, &executor, &latest).await;
            latest = outcome.snapshot_after.clone();
            outcomes.push(outcome);
            if stop.is_some() {
                halt = stop;
                break;
            }
        }

        if let Some(h) = &halt {
            obs::emit_run_halted(&run_id, &h.step, &h.reason);
        }

        let run = PipelineRun {
            run_id,
            started_at,
            dry_run: self.dry_run,
            baseline,
            outcomes,
            halt,
        };
        obs::emit_run_finished(
            &run.run_id,
            clock.elapsed().as_millis() as u64,
            run.total_freed(),
            run.success(),
        );
        Ok(run)
    }

    async fn run_step(
        &self,
        index: usize,
        step: CleanupStep,
        executor: &StepExecutor<'_>,
        latest: &DiskSnapshot,
    ) -> (StepOutcome, Option<Halt>) {
        let mut warnings = Vec::new();

        let before = match self.sampler.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(step = step.name(), error = %e, "pre-step sample failed");
                warnings.push(format!("pre-step sample failed ({e}); using the previous snapshot"));
                latest.clone()
            }
        };

        obs::emit_step_started(step.name(), &step.risk_tier().to_string());
        let clock = Instant::now();
        let StepExecution {
            commands,
            exit_status,
            stdout,
            stderr,
            result,
        } = executor.execute(&step).await;
        let duration_ms = clock.elapsed().as_millis() as u64;

        let after = match self.sampler.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(step = step.name(), error = %e, "post-step sample failed");
                warnings.push(format!("post-step sample failed ({e}); freed bytes unknown"));
                before.clone()
            }
        };

        let freed = bytes_freed(&before, &after);
        if freed < 0 {
            obs::emit_usage_grew(step.name(), freed.unsigned_abs());
            warnings.push(format!(
                "used space grew by {} during this step",
                reclaim_core::format_bytes(freed.unsigned_abs())
            ));
        }

        let mut halt_reason = None;
        let status = match &result {
            Ok(Completion::Ran) => StepStatus::Succeeded,
            Ok(Completion::NothingToDo(detail)) => StepStatus::Skipped(SkipReason::NothingToDo {
                detail: detail.clone(),
            }),
            Err(StepError::Execution(ExecutionError::NotFound { program })) => {
                StepStatus::Skipped(SkipReason::ToolMissing {
                    program: program.clone(),
                })
            }
            Err(e) => {
                halt_reason = if e.is_cancelled() {
                    Some(HaltReason::Interrupted)
                } else if e.is_always_fatal() {
                    Some(HaltReason::PermissionDenied)
                } else if !step.continue_on_error() {
                    Some(HaltReason::StepFailed)
                } else {
                    None
                };
                StepStatus::Failed(StepFailure::from(e))
            }
        };

        match &status {
            StepStatus::Skipped(reason) => obs::emit_step_skipped(step.name(), &reason.to_string()),
            _ => obs::emit_step_finished(
                step.name(),
                status == StepStatus::Succeeded,
                freed,
                duration_ms,
            ),
        }

        let halt = halt_reason.map(|reason| Halt {
            index,
            step: step.label(),
            reason,
            message: match &status {
                StepStatus::Failed(failure) => failure.message.clone(),
                _ => reason.to_string(),
            },
        });

        let outcome = StepOutcome {
            step,
            status,
            exit_status,
            stdout_excerpt: excerpt(&stdout, self.config.excerpt_chars),
            stderr_excerpt: excerpt(&stderr, self.config.excerpt_chars),
            snapshot_before: before,
            snapshot_after: after,
            commands,
            duration_ms,
            warnings,
        };
        (outcome, halt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::AssumeYes;
    use crate::step::StepKind;
    use reclaim_core::fakes::{ScriptedResponse, ScriptedRunner, ScriptedSampler};
    use reclaim_core::Program;

    fn pipeline(runner: Arc<ScriptedRunner>, sampler: Arc<ScriptedSampler>) -> CleanupPipeline {
        CleanupPipeline::new(runner, sampler, ReclaimConfig::default())
    }

    #[tokio::test]
    async fn test_before_sample_failure_falls_back_to_latest() {
        let runner = Arc::new(ScriptedRunner::new());
        let sampler = Arc::new(ScriptedSampler::new());
        sampler.push(DiskSnapshot::from_root_usage(1_000, 800));
        sampler.push_failure("df: transient");
        sampler.push(DiskSnapshot::from_root_usage(1_000, 700));

        let run = pipeline(runner, sampler)
            .execute(vec![CleanupStep::new(StepKind::PruneDanglingImages)], &AssumeYes)
            .await
            .unwrap();
        let outcome = &run.outcomes[0];
        assert_eq!(outcome.snapshot_before.used_bytes, 800);
        assert_eq!(outcome.bytes_freed(), 100);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_command_halts_as_interrupted() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(Program::Docker, ScriptedResponse::Cancelled);
        let sampler = Arc::new(ScriptedSampler::with_used(&[800]));

        let run = pipeline(runner, sampler)
            .execute(
                vec![
                    CleanupStep::new(StepKind::PruneDanglingImages).with_continue_on_error(true),
                    CleanupStep::new(StepKind::PruneBuildCache),
                ],
                &AssumeYes,
            )
            .await
            .unwrap();
        assert_eq!(run.outcomes.len(), 1);
        assert_eq!(run.halt.as_ref().unwrap().reason, HaltReason::Interrupted);
        assert!(!run.success());
    }

    #[tokio::test]
    async fn test_cancel_signal_stops_before_next_step() {
        let (handle, signal) = reclaim_core::cancellation();
        handle.cancel();
        let runner = Arc::new(ScriptedRunner::new());
        let sampler = Arc::new(ScriptedSampler::with_used(&[800]));

        let run = pipeline(runner.clone(), sampler)
            .with_cancel(signal)
            .execute(vec![CleanupStep::new(StepKind::PruneDanglingImages)], &AssumeYes)
            .await
            .unwrap();
        assert!(run.outcomes.is_empty());
        assert_eq!(run.halt.unwrap().index, 0);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_status_serialization() {
        let status = StepStatus::Skipped(SkipReason::ToolMissing {
            program: "snap".to_string(),
        });
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["detail"]["reason"], "tool_missing");
        assert_eq!(json["detail"]["program"], "snap");
    }
}
