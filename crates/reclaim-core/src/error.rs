//! Error taxonomy for command execution, sampling and configuration.

/// Errors produced by a [`CommandRunner`](crate::runner::CommandRunner).
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The binary is not installed. Callers treat this as a skip.
    #[error("{program} is not installed or not in PATH")]
    NotFound { program: String },

    #[error("{program} timed out after {limit_ms}ms")]
    Timeout { program: String, limit_ms: u64 },

    #[error("{program}: permission denied: {detail}")]
    PermissionDenied { program: String, detail: String },

    #[error("{program} exited with code {exit_code}: {stderr}")]
    ExecutionFailed {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("{program} was cancelled")]
    Cancelled { program: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl ExecutionError {
    /// Whether the failure means "collaborator absent" rather than "collaborator failed".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Failures that stop a pipeline no matter what the step's policy says.
    pub fn is_always_fatal(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. } | Self::Cancelled { .. })
    }

    /// Name of the program involved, when known.
    pub fn program(&self) -> Option<&str> {
        match self {
            Self::NotFound { program }
            | Self::Timeout { program, .. }
            | Self::PermissionDenied { program, .. }
            | Self::ExecutionFailed { program, .. }
            | Self::Cancelled { program }
            | Self::Spawn { program, .. } => Some(program),
            Self::InvalidCommand(_) => None,
        }
    }
}

/// Result type for command execution.
pub type ExecResult<T> = std::result::Result<T, ExecutionError>;

/// Errors produced while taking a [`DiskSnapshot`](crate::snapshot::DiskSnapshot).
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    /// The filesystem usage query failed; without it there is no snapshot.
    #[error("filesystem usage query failed: {0}")]
    CoreQuery(#[from] ExecutionError),

    #[error("could not parse filesystem usage: {0}")]
    Parse(String),
}

/// Errors produced when parsing byte sizes and durations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("empty size")]
    Empty,

    #[error("invalid size '{0}'")]
    InvalidSize(String),

    #[error("unknown size unit '{unit}' in '{input}'")]
    UnknownUnit { input: String, unit: String },

    #[error("invalid duration '{input}': {reason}")]
    InvalidDuration { input: String, reason: String },
}

/// Errors produced by [`ReclaimConfig::validate`](crate::config::ReclaimConfig::validate).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be an absolute path, got {value}")]
    RelativePath { field: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_not_fatal() {
        let err = ExecutionError::NotFound {
            program: "docker".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_always_fatal());
        assert!(err.to_string().contains("docker is not installed"));
    }

    #[test]
    fn test_permission_and_cancel_are_fatal() {
        let denied = ExecutionError::PermissionDenied {
            program: "journalctl".to_string(),
            detail: "are you root?".to_string(),
        };
        assert!(denied.is_always_fatal());
        assert!(denied.to_string().contains("are you root?"));

        let cancelled = ExecutionError::Cancelled {
            program: "apt-get".to_string(),
        };
        assert!(cancelled.is_always_fatal());
        assert_eq!(cancelled.program(), Some("apt-get"));
    }

    #[test]
    fn test_execution_failed_display() {
        let err = ExecutionError::ExecutionFailed {
            program: "journalctl".to_string(),
            exit_code: 1,
            stderr: "Failed to vacuum".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("code 1"));
        assert!(msg.contains("Failed to vacuum"));
        assert!(!err.is_always_fatal());
    }
}
