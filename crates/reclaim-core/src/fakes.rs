//! In-memory fakes for the runner and sampler traits (testing only)
//!
//! Provides `ScriptedRunner` and `ScriptedSampler` that satisfy the trait
//! contracts without spawning processes.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::command::{CommandSpec, Program};
use crate::error::{ExecResult, ExecutionError, SampleError};
use crate::runner::{CommandOutput, CommandRunner};
use crate::sampler::SnapshotSource;
use crate::snapshot::DiskSnapshot;

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// What a scripted program does when invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedResponse {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    NotFound,
    Timeout,
    PermissionDenied,
    Cancelled,
}

impl ScriptedResponse {
    pub fn ok() -> Self {
        Self::stdout("")
    }

    pub fn stdout(stdout: &str) -> Self {
        Self::exit(0, stdout, "")
    }

    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Self::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

/// Runner that answers from per-program queues and records every call.
///
/// The last queued response for a program repeats once the queue drains;
/// unscripted programs exit 0 with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<Program, VecDeque<ScriptedResponse>>>,
    calls: Mutex<Vec<CommandSpec>>,
    latency: Option<Duration>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every invocation sleeps for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a response for the next invocation of `program`.
    pub fn respond(&self, program: Program, response: ScriptedResponse) {
        let mut responses = self.responses.lock().unwrap();
        responses.entry(program).or_default().push_back(response);
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, program: Program) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.program() == program)
            .collect()
    }

    /// Rendered command lines, handy for asserting on order.
    pub fn rendered_calls(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.to_string()).collect()
    }

    fn next_response(&self, program: Program) -> ScriptedResponse {
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(&program) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(ScriptedResponse::ok),
            None => ScriptedResponse::ok(),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> ExecResult<CommandOutput> {
        self.calls.lock().unwrap().push(command.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let program = command.program().binary().to_string();
        match self.next_response(command.program()) {
            ScriptedResponse::Exit {
                code,
                stdout,
                stderr,
            } => Ok(CommandOutput {
                command: command.to_string(),
                exit_code: code,
                stdout,
                stderr,
                duration_ms: 1,
            }),
            ScriptedResponse::NotFound => Err(ExecutionError::NotFound { program }),
            ScriptedResponse::Timeout => Err(ExecutionError::Timeout {
                program,
                limit_ms: command.timeout().as_millis() as u64,
            }),
            ScriptedResponse::PermissionDenied => Err(ExecutionError::PermissionDenied {
                program,
                detail: "are you root?".to_string(),
            }),
            ScriptedResponse::Cancelled => Err(ExecutionError::Cancelled { program }),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedSampler
// ---------------------------------------------------------------------------

/// Sampler that hands out queued snapshots.
///
/// Like [`ScriptedRunner`], the last snapshot repeats once the queue drains.
#[derive(Debug)]
pub struct ScriptedSampler {
    queue: Mutex<VecDeque<Result<DiskSnapshot, String>>>,
    taken: Mutex<usize>,
}

impl ScriptedSampler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            taken: Mutex::new(0),
        }
    }

    /// Snapshots of a single 1 TB root whose used bytes follow `used`.
    pub fn with_used(used: &[u64]) -> Self {
        let sampler = Self::new();
        for u in used {
            sampler.push(DiskSnapshot::from_root_usage(1_000_000_000_000, *u));
        }
        sampler
    }

    pub fn push(&self, snapshot: DiskSnapshot) {
        self.queue.lock().unwrap().push_back(Ok(snapshot));
    }

    /// Queue a failing sample.
    pub fn push_failure(&self, message: &str) {
        self.queue.lock().unwrap().push_back(Err(message.to_string()));
    }

    /// How many samples have been taken.
    pub fn samples_taken(&self) -> usize {
        *self.taken.lock().unwrap()
    }
}

impl Default for ScriptedSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSampler {
    async fn sample(&self) -> Result<DiskSnapshot, SampleError> {
        *self.taken.lock().unwrap() += 1;

        let mut queue = self.queue.lock().unwrap();
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match next {
            Some(Ok(snapshot)) => Ok(snapshot),
            Some(Err(message)) => Err(SampleError::CoreQuery(ExecutionError::ExecutionFailed {
                program: "df".to_string(),
                exit_code: 1,
                stderr: message,
            })),
            None => Err(SampleError::Parse("no scripted snapshot".to_string())),
        }
    }
}
