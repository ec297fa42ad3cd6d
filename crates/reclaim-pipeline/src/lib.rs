//! Reclaim cleanup pipeline.
//!
//! Runs ordered cleanup steps through a [`reclaim_core::CommandRunner`],
//! sampling disk usage before and after each one, and renders the results.
//!
//! ## Key Components
//!
//! - `CleanupStep` / `StepKind`: what to clean, with a risk tier
//! - `CleanupPipeline`: fail-fast execution with per-step snapshots
//! - `run_dangerous`: irreversible actions behind a `DangerousUnlock`
//! - `ReportFormatter`: text reports with a health section

pub mod confirm;
pub mod dangerous;
mod error;
mod executor;
pub mod health;
pub mod pipeline;
pub mod report;
pub mod risk;
pub mod step;

pub use confirm::{AlwaysDecline, AssumeYes, ConfirmationRequest, Confirmer, ScriptedConfirmer};
pub use dangerous::{run_dangerous, DangerousAction, DangerousOutcome, DangerousUnlock};
pub use error::{PipelineError, StepError};
pub use health::{evaluate_health, HealthCheck, HealthThresholds, HealthVerdict};
pub use pipeline::{
    CleanupPipeline, FailureKind, Halt, HaltReason, PipelineRun, SkipReason, StepFailure,
    StepOutcome, StepStatus,
};
pub use report::ReportFormatter;
pub use risk::RiskTier;
pub use step::{default_steps, select_steps, CleanupStep, StepKind, StepName};
