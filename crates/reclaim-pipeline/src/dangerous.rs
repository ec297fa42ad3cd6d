//! Irreversible actions, gated behind a per-call unlock.
//!
//! These never appear in a step list. Running one takes a [`DangerousUnlock`]
//! for that exact action (built only from an explicit `--confirm`) and a fresh
//! confirmation.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use reclaim_core::{
    bytes_freed, excerpt, CommandRunner, CommandSpec, DiskSnapshot, ReclaimConfig, SnapshotSource,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::confirm::{ConfirmationRequest, Confirmer};
use crate::error::{PipelineError, StepError};
use crate::executor::append;
use crate::pipeline::{StepFailure, StepStatus};
use crate::risk::RiskTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DangerousAction {
    /// Remove every unused image, container, network, build cache and volume.
    PruneAll,
    /// Stop the engine, delete its data directory, start it again.
    WipeDockerData,
}

impl DangerousAction {
    pub const ALL: [DangerousAction; 2] = [DangerousAction::PruneAll, DangerousAction::WipeDockerData];

    pub fn name(self) -> &'static str {
        match self {
            Self::PruneAll => "prune-all",
            Self::WipeDockerData => "wipe-docker-data",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::PruneAll => "remove ALL unused container data, including volumes",
            Self::WipeDockerData => "delete the container engine's entire data directory",
        }
    }

    /// Commands in execution order. For `wipe-docker-data` the last command
    /// restarts the engine and runs even if removal failed.
    pub fn commands(self, config: &ReclaimConfig) -> Vec<CommandSpec> {
        let t = config.command_timeout;
        match self {
            Self::PruneAll => vec![CommandSpec::prune_everything(t)],
            Self::WipeDockerData => vec![
                CommandSpec::stop_container_engine(t),
                CommandSpec::remove_engine_data(t),
                CommandSpec::start_container_engine(t),
            ],
        }
    }
}

impl fmt::Display for DangerousAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DangerousAction {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.name() == s.trim())
            .ok_or_else(|| StepError::UnknownStep(s.trim().to_string()))
    }
}

/// Single-use permission to run one named dangerous action.
///
/// Not `Clone`; [`run_dangerous`] consumes it.
#[derive(Debug)]
pub struct DangerousUnlock {
    action: DangerousAction,
}

impl DangerousUnlock {
    /// Returns `None` unless the operator passed the literal confirm flag.
    pub fn from_confirm_flag(action: DangerousAction, confirm_flag: bool) -> Option<Self> {
        confirm_flag.then_some(Self { action })
    }

    pub fn action(&self) -> DangerousAction {
        self.action
    }
}

/// Result of a dangerous action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DangerousOutcome {
    pub action: DangerousAction,
    pub status: StepStatus,
    pub exit_status: Option<i32>,
    pub commands: Vec<String>,
    pub stdout_excerpt: String,
    pub stderr_excerpt: String,
    pub snapshot_before: DiskSnapshot,
    pub snapshot_after: DiskSnapshot,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DangerousOutcome {
    pub fn bytes_freed(&self) -> i64 {
        bytes_freed(&self.snapshot_before, &self.snapshot_after)
    }

    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// Run one dangerous action.
///
/// Errors (nothing was executed) when the unlock names a different action,
/// the confirmer declines, or the before-sample fails. Command failures are
/// reported in the outcome.
pub async fn run_dangerous(
    runner: &dyn CommandRunner,
    sampler: &dyn SnapshotSource,
    config: &ReclaimConfig,
    action: DangerousAction,
    unlock: DangerousUnlock,
    confirm: &dyn Confirmer,
) -> Result<DangerousOutcome, PipelineError> {
    if unlock.action != action {
        return Err(StepError::Locked {
            action: action.name().to_string(),
        }
        .into());
    }

    let specs = action.commands(config);
    let request = ConfirmationRequest {
        action: action.name().to_string(),
        label: format!("{} ({})", action.name(), action.description()),
        tier: RiskTier::Dangerous,
        commands: specs.iter().map(|s| s.to_string()).collect(),
    };
    if !confirm.confirm(&request).await {
        return Err(StepError::ConfirmationDeclined {
            action: action.name().to_string(),
        }
        .into());
    }

    let before = sampler.sample().await?;
    warn!(action = action.name(), "running dangerous action");
    let clock = Instant::now();

    let mut commands = Vec::new();
    let mut exit_status = None;
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut first_error: Option<StepError> = None;
    let last = specs.len().saturating_sub(1);

    for (i, spec) in specs.iter().enumerate() {
        // Only the engine restart runs after an earlier failure.
        let is_restart = action == DangerousAction::WipeDockerData && i == last;
        if first_error.is_some() && !is_restart {
            continue;
        }
        commands.push(spec.to_string());
        let result = match runner.run(spec).await {
            Ok(output) => {
                exit_status = Some(output.exit_code);
                append(&mut stdout, &output.stdout);
                append(&mut stderr, &output.stderr);
                output.into_checked().map(|_| ())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(command = %spec, error = %e, "dangerous action command failed");
            if first_error.is_none() {
                first_error = Some(e.into());
            }
        }
    }
    let duration_ms = clock.elapsed().as_millis() as u64;

    let mut warnings = Vec::new();
    let after = match sampler.sample().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warnings.push(format!("post-action sample failed ({e}); freed bytes unknown"));
            before.clone()
        }
    };

    let status = match &first_error {
        None => StepStatus::Succeeded,
        Some(e) => StepStatus::Failed(StepFailure::from(e)),
    };
    info!(
        action = action.name(),
        succeeded = first_error.is_none(),
        bytes_freed = bytes_freed(&before, &after),
        "dangerous action finished"
    );

    Ok(DangerousOutcome {
        action,
        status,
        exit_status,
        commands,
        stdout_excerpt: excerpt(&stdout, config.excerpt_chars),
        stderr_excerpt: excerpt(&stderr, config.excerpt_chars),
        snapshot_before: before,
        snapshot_after: after,
        duration_ms,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::{AlwaysDecline, AssumeYes};
    use reclaim_core::fakes::{ScriptedResponse, ScriptedRunner, ScriptedSampler};
    use reclaim_core::Program;

    #[test]
    fn test_unlock_requires_confirm_flag() {
        assert!(DangerousUnlock::from_confirm_flag(DangerousAction::PruneAll, false).is_none());
        let unlock = DangerousUnlock::from_confirm_flag(DangerousAction::PruneAll, true).unwrap();
        assert_eq!(unlock.action(), DangerousAction::PruneAll);
    }

    #[test]
    fn test_action_names() {
        assert_eq!(
            "wipe-docker-data".parse::<DangerousAction>().unwrap(),
            DangerousAction::WipeDockerData
        );
        assert!("images".parse::<DangerousAction>().is_err());
    }

    #[tokio::test]
    async fn test_mismatched_unlock_runs_nothing() {
        let runner = ScriptedRunner::new();
        let sampler = ScriptedSampler::with_used(&[800]);
        let unlock = DangerousUnlock::from_confirm_flag(DangerousAction::PruneAll, true).unwrap();
        let err = run_dangerous(
            &runner,
            &sampler,
            &ReclaimConfig::default(),
            DangerousAction::WipeDockerData,
            unlock,
            &AssumeYes,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Step(StepError::Locked { .. })));
        assert!(runner.calls().is_empty());
        assert_eq!(sampler.samples_taken(), 0);
    }

    #[tokio::test]
    async fn test_declined_runs_nothing() {
        let runner = ScriptedRunner::new();
        let sampler = ScriptedSampler::with_used(&[800]);
        let unlock = DangerousUnlock::from_confirm_flag(DangerousAction::PruneAll, true).unwrap();
        let err = run_dangerous(
            &runner,
            &sampler,
            &ReclaimConfig::default(),
            DangerousAction::PruneAll,
            unlock,
            &AlwaysDecline,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Step(StepError::ConfirmationDeclined { .. })
        ));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_prune_all_runs_and_measures() {
        let runner = ScriptedRunner::new();
        let sampler = ScriptedSampler::with_used(&[800_000_000_000, 700_000_000_000]);
        let unlock = DangerousUnlock::from_confirm_flag(DangerousAction::PruneAll, true).unwrap();
        let outcome = run_dangerous(
            &runner,
            &sampler,
            &ReclaimConfig::default(),
            DangerousAction::PruneAll,
            unlock,
            &AssumeYes,
        )
        .await
        .unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.bytes_freed(), 100_000_000_000);
        assert_eq!(
            runner.rendered_calls(),
            vec!["docker system prune -a --volumes -f"]
        );
    }

    #[tokio::test]
    async fn test_output_of_each_command_kept_apart() {
        let runner = ScriptedRunner::new();
        runner.respond(Program::Systemctl, ScriptedResponse::exit(0, "", "Stopping docker"));
        runner.respond(Program::Systemctl, ScriptedResponse::exit(0, "", "Starting docker"));
        let sampler = ScriptedSampler::with_used(&[800]);
        let unlock =
            DangerousUnlock::from_confirm_flag(DangerousAction::WipeDockerData, true).unwrap();
        let outcome = run_dangerous(
            &runner,
            &sampler,
            &ReclaimConfig::default(),
            DangerousAction::WipeDockerData,
            unlock,
            &AssumeYes,
        )
        .await
        .unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.stderr_excerpt, "Stopping docker\nStarting docker");
    }

    #[tokio::test]
    async fn test_wipe_restarts_engine_after_failed_removal() {
        let runner = ScriptedRunner::new();
        runner.respond(
            Program::Rm,
            ScriptedResponse::exit(1, "", "rm: cannot remove '/var/lib/docker/overlay2': Device or resource busy"),
        );
        let sampler = ScriptedSampler::with_used(&[800]);
        let unlock =
            DangerousUnlock::from_confirm_flag(DangerousAction::WipeDockerData, true).unwrap();
        let outcome = run_dangerous(
            &runner,
            &sampler,
            &ReclaimConfig::default(),
            DangerousAction::WipeDockerData,
            unlock,
            &AssumeYes,
        )
        .await
        .unwrap();
        assert!(!outcome.succeeded());
        assert_eq!(
            outcome.stderr_excerpt,
            "rm: cannot remove '/var/lib/docker/overlay2': Device or resource busy"
        );
        assert_eq!(
            runner.rendered_calls(),
            vec![
                "systemctl stop docker",
                "rm -rf --one-file-system /var/lib/docker",
                "systemctl start docker",
            ]
        );
    }
}
