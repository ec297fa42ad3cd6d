//! External command execution with a mandatory timeout and cancellation.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::watch;

use crate::command::CommandSpec;
use crate::error::{ExecResult, ExecutionError};

/// Captured result of one finished process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Rendered command line, for reports and logs.
    pub command: String,

    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a typed error.
    ///
    /// Privilege problems are told apart from ordinary failures by stderr,
    /// since collaborators report both with exit code 1.
    pub fn into_checked(self) -> ExecResult<Self> {
        if self.success() {
            return Ok(self);
        }

        let program = self
            .command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();

        if looks_like_permission_problem(&self.stderr) {
            let detail = self
                .stderr
                .lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("insufficient privileges")
                .trim()
                .to_string();
            return Err(ExecutionError::PermissionDenied { program, detail });
        }

        Err(ExecutionError::ExecutionFailed {
            program,
            exit_code: self.exit_code,
            stderr: excerpt(&self.stderr, 500),
        })
    }
}

fn looks_like_permission_problem(stderr: &str) -> bool {
    const MARKERS: [&str; 6] = [
        "permission denied",
        "are you root",
        "must be root",
        "superuser",
        "operation not permitted",
        "access denied",
    ];
    let lower = stderr.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

/// Keep at most `max_chars` characters from the end of `text`.
///
/// The tail is kept because collaborators print their summary last.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim_end();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    let skip = count - max_chars;
    let tail: String = trimmed.chars().skip(skip).collect();
    format!("…{tail}")
}

/// Executes allow-listed commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit is still `Ok`; see [`run_checked`](Self::run_checked).
    async fn run(&self, command: &CommandSpec) -> ExecResult<CommandOutput>;

    /// Run and map a non-zero exit to `ExecutionFailed` / `PermissionDenied`.
    async fn run_checked(&self, command: &CommandSpec) -> ExecResult<CommandOutput> {
        self.run(command).await?.into_checked()
    }
}

/// Create a linked cancel handle and signal.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

/// Fires the cancellation seen by every clone of the paired [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Observes a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is gone.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Runs commands as child processes of reclaim.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    cancel: CancelSignal,
}

impl ProcessRunner {
    pub fn new(cancel: CancelSignal) -> Self {
        Self { cancel }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(CancelSignal::never())
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandSpec) -> ExecResult<CommandOutput> {
        let mut cancel = self.cancel.clone();
        tracing::debug!(command = %command, timeout_ms = command.timeout().as_millis() as u64, "spawning");
        execute_argv(
            command.program().binary(),
            command.args(),
            command.timeout(),
            &mut cancel,
            command.to_string(),
        )
        .await
    }
}

/// Spawn `binary args...` and wait for it, the timeout, or cancellation.
///
/// The child is spawned with `kill_on_drop`, so losing the race to the timer
/// or the cancel signal drops and kills it.
async fn execute_argv(
    binary: &str,
    args: &[String],
    timeout: Duration,
    cancel: &mut CancelSignal,
    rendered: String,
) -> ExecResult<CommandOutput> {
    if timeout.is_zero() {
        return Err(ExecutionError::InvalidCommand(format!(
            "{binary}: timeout must be greater than zero"
        )));
    }
    if cancel.is_cancelled() {
        return Err(ExecutionError::Cancelled {
            program: binary.to_string(),
        });
    }

    let start = Instant::now();

    let child = Command::new(binary)
        .args(args)
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| spawn_error(binary, source))?;

    let output = tokio::select! {
        result = child.wait_with_output() => {
            result.map_err(|source| ExecutionError::Spawn {
                program: binary.to_string(),
                source,
            })?
        }
        _ = tokio::time::sleep(timeout) => {
            tracing::warn!(program = binary, limit_ms = timeout.as_millis() as u64, "command timed out, killed");
            return Err(ExecutionError::Timeout {
                program: binary.to_string(),
                limit_ms: timeout.as_millis() as u64,
            });
        }
        _ = cancel.cancelled() => {
            tracing::warn!(program = binary, "command cancelled, killed");
            return Err(ExecutionError::Cancelled {
                program: binary.to_string(),
            });
        }
    };

    Ok(CommandOutput {
        command: rendered,
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

fn spawn_error(binary: &str, source: std::io::Error) -> ExecutionError {
    match source.kind() {
        std::io::ErrorKind::NotFound => ExecutionError::NotFound {
            program: binary.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => ExecutionError::PermissionDenied {
            program: binary.to_string(),
            detail: source.to_string(),
        },
        _ => ExecutionError::Spawn {
            program: binary.to_string(),
            source,
        },
    }
}
