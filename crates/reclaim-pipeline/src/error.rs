//! Errors for cleanup steps and pipeline runs.

use std::path::PathBuf;

use reclaim_core::{ExecutionError, SampleError};

/// Why a single step (or dangerous action) could not complete.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("{action} was not confirmed")]
    ConfirmationDeclined { action: String },

    #[error("refusing to touch {}: {reason}", path.display())]
    InvalidTarget { path: PathBuf, reason: String },

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("{action} requires --confirm for that exact action")]
    Locked { action: String },
}

impl StepError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Execution(e) if e.is_not_found())
    }

    /// Permission and cancellation failures stop a run regardless of policy.
    pub fn is_always_fatal(&self) -> bool {
        matches!(self, Self::Execution(e) if e.is_always_fatal())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Cancelled { .. }))
    }
}

/// A run that could not produce a [`PipelineRun`](crate::pipeline::PipelineRun).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("baseline sample failed: {0}")]
    Baseline(#[from] SampleError),

    #[error(transparent)]
    Step(#[from] StepError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let denied = StepError::from(ExecutionError::PermissionDenied {
            program: "apt-get".to_string(),
            detail: "are you root?".to_string(),
        });
        assert!(denied.is_always_fatal());
        assert!(!denied.is_not_found());

        let missing = StepError::from(ExecutionError::NotFound {
            program: "snap".to_string(),
        });
        assert!(missing.is_not_found());
        assert!(!missing.is_always_fatal());
    }

    #[test]
    fn test_invalid_target_message() {
        let err = StepError::InvalidTarget {
            path: PathBuf::from("/etc/passwd"),
            reason: "outside /var/log".to_string(),
        };
        assert_eq!(err.to_string(), "refusing to touch /etc/passwd: outside /var/log");
    }
}
