//! Reclaim Core Library
//!
//! Command execution, disk sampling and the shared vocabulary of the reclaim
//! disk-space tool.
//!
//! ## Key Components
//!
//! - `CommandSpec`: the allow-list of external invocations
//! - `CommandRunner` / `ProcessRunner`: bounded, cancellable process execution
//! - `SnapshotSource` / `DiskUsageSampler`: point-in-time disk usage
//! - `ReclaimConfig`: thresholds and limits

pub mod command;
pub mod config;
mod error;
pub mod fakes;
pub mod obs;
pub mod parse;
pub mod runner;
pub mod sampler;
pub mod snapshot;
pub mod telemetry;
pub mod units;

pub use command::{CommandSpec, Program, SnapRevision};
pub use config::ReclaimConfig;
pub use error::{ConfigError, ExecResult, ExecutionError, SampleError, UnitError};
pub use runner::{
    cancellation, excerpt, CancelHandle, CancelSignal, CommandOutput, CommandRunner, ProcessRunner,
};
pub use sampler::{DiskUsageSampler, LargeFileScan, SamplerOptions, SnapshotSource};
pub use snapshot::{bytes_freed, DiskSnapshot, LargeFile, MountUsage, Subsystem};
pub use telemetry::init_tracing;
pub use units::{format_bytes, format_delta, parse_duration, parse_size, ByteSize};
