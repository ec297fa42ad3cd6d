//! Disk usage sampling across the fixed diagnostic set.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::config::ReclaimConfig;
use crate::error::{ExecutionError, SampleError};
use crate::obs;
use crate::parse;
use crate::runner::CommandRunner;
use crate::snapshot::{DiskSnapshot, LargeFile, MountUsage, Subsystem};
use crate::units::ByteSize;

/// Anything that can produce a [`DiskSnapshot`].
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn sample(&self) -> Result<DiskSnapshot, SampleError>;
}

/// Parameters for the optional large-file scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargeFileScan {
    pub root: PathBuf,
    pub min_size: ByteSize,
    pub limit: usize,
}

/// What the sampler queries and how long each query may take.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerOptions {
    pub query_timeout: Duration,
    pub max_staleness: Duration,
    pub directories: Vec<(Subsystem, PathBuf)>,
    pub large_files: Option<LargeFileScan>,
}

impl SamplerOptions {
    /// Options for per-step sampling: no large-file scan.
    pub fn from_config(config: &ReclaimConfig) -> Self {
        Self {
            query_timeout: config.sample_timeout,
            max_staleness: config.max_staleness,
            directories: Subsystem::ALL
                .iter()
                .filter_map(|s| s.directory().map(|d| (*s, d)))
                .collect(),
            large_files: None,
        }
    }

    /// Enable the large-file scan with the configured root, floor and limit.
    pub fn with_large_file_scan(mut self, config: &ReclaimConfig) -> Self {
        self.large_files = Some(LargeFileScan {
            root: config.large_file_root.clone(),
            min_size: config.large_file_min,
            limit: config.large_file_limit,
        });
        self
    }
}

/// Runs the diagnostic commands and folds their output into a snapshot.
///
/// Only the filesystem query is mandatory. Container, journal, directory and
/// large-file queries degrade to zero-valued, `unavailable` entries.
pub struct DiskUsageSampler {
    runner: Arc<dyn CommandRunner>,
    options: SamplerOptions,
}

impl DiskUsageSampler {
    pub fn new(runner: Arc<dyn CommandRunner>, options: SamplerOptions) -> Self {
        Self { runner, options }
    }

    pub fn options(&self) -> &SamplerOptions {
        &self.options
    }

    async fn query_filesystems(&self) -> Result<Vec<parse::DfRow>, SampleError> {
        let spec = CommandSpec::filesystem_usage(self.options.query_timeout);
        let output = self.runner.run(&spec).await?;
        let rows = parse::parse_df_posix(&output.stdout);
        // df exits 1 when a single mount is unreadable but still reports the rest.
        if rows.is_empty() {
            output.into_checked()?;
            return Err(SampleError::Parse("df reported no filesystems".to_string()));
        }
        Ok(rows)
    }

    async fn query_directories(&self) -> Option<Vec<(PathBuf, u64)>> {
        if self.options.directories.is_empty() {
            return Some(Vec::new());
        }
        let dirs: Vec<PathBuf> = self
            .options
            .directories
            .iter()
            .map(|(_, d)| d.clone())
            .collect();
        let spec = CommandSpec::directory_usage(&dirs, self.options.query_timeout);
        // du exits non-zero for unreadable entries but still prints totals.
        match self.runner.run(&spec).await {
            Ok(output) => Some(parse::parse_du(&output.stdout)),
            Err(e) => {
                optional_query_failed("du", &e);
                None
            }
        }
    }

    async fn query_containers(&self) -> Option<BTreeMap<Subsystem, u64>> {
        let spec = CommandSpec::container_usage(self.options.query_timeout);
        match self.runner.run_checked(&spec).await {
            Ok(output) => Some(parse::parse_docker_system_df(&output.stdout)),
            Err(e) => {
                optional_query_failed("docker", &e);
                None
            }
        }
    }

    async fn query_journal(&self) -> Option<u64> {
        let spec = CommandSpec::journal_usage(self.options.query_timeout);
        match self.runner.run_checked(&spec).await {
            Ok(output) => {
                let parsed = parse::parse_journal_disk_usage(&output.stdout);
                if parsed.is_none() {
                    debug!(stdout = %output.stdout.trim(), "journal usage not reported");
                }
                parsed
            }
            Err(e) => {
                optional_query_failed("journalctl", &e);
                None
            }
        }
    }

    async fn query_large_files(&self) -> Vec<LargeFile> {
        let Some(scan) = &self.options.large_files else {
            return Vec::new();
        };
        let spec = match CommandSpec::large_file_scan(
            &scan.root,
            scan.min_size,
            self.options.query_timeout,
        ) {
            Ok(spec) => spec,
            Err(e) => {
                optional_query_failed("find", &e);
                return Vec::new();
            }
        };
        match self.runner.run(&spec).await {
            Ok(output) => parse::parse_find_sizes(&output.stdout, scan.limit),
            Err(e) => {
                optional_query_failed("find", &e);
                Vec::new()
            }
        }
    }
}

fn optional_query_failed(program: &str, error: &ExecutionError) {
    if error.is_not_found() {
        debug!(program, "optional collaborator not installed");
    } else {
        warn!(program, error = %error, "optional disk usage query failed");
    }
}

#[async_trait]
impl SnapshotSource for DiskUsageSampler {
    async fn sample(&self) -> Result<DiskSnapshot, SampleError> {
        let taken_at = Utc::now();
        let clock = Instant::now();

        let (filesystems, directories, containers, journal, large_files) = tokio::join!(
            self.query_filesystems(),
            self.query_directories(),
            self.query_containers(),
            self.query_journal(),
            self.query_large_files(),
        );
        let rows = filesystems?;

        let elapsed = clock.elapsed();
        let stale = elapsed > self.options.max_staleness;
        if stale {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                window_ms = self.options.max_staleness.as_millis() as u64,
                "disk usage sub-queries spread beyond the staleness window"
            );
        }

        let mut per_mount = BTreeMap::new();
        let mut seen_sources = HashSet::new();
        let (mut total_bytes, mut used_bytes, mut free_bytes) = (0u64, 0u64, 0u64);
        for row in rows {
            // Bind mounts and overlays repeat a device; count each source once.
            if seen_sources.insert(row.source.clone()) {
                total_bytes += row.total_bytes;
                used_bytes += row.used_bytes;
                free_bytes += row.available_bytes;
            }
            per_mount.insert(
                row.mount,
                MountUsage {
                    total_bytes: row.total_bytes,
                    used_bytes: row.used_bytes,
                    free_bytes: row.available_bytes,
                },
            );
        }

        let mut subsystem_usage: BTreeMap<Subsystem, u64> =
            Subsystem::ALL.iter().map(|s| (*s, 0)).collect();
        let mut unavailable = BTreeSet::new();

        match containers {
            Some(usage) => subsystem_usage.extend(usage),
            None => unavailable.extend(Subsystem::ALL.iter().filter(|s| s.is_container())),
        }

        match journal {
            Some(bytes) => {
                subsystem_usage.insert(Subsystem::Journal, bytes);
            }
            None => {
                unavailable.insert(Subsystem::Journal);
            }
        }

        let measured = directories.unwrap_or_default();
        for (subsystem, dir) in &self.options.directories {
            match measured.iter().find(|(path, _)| path == dir) {
                Some((_, bytes)) => {
                    subsystem_usage.insert(*subsystem, *bytes);
                }
                None => {
                    unavailable.insert(*subsystem);
                }
            }
        }

        let snapshot = DiskSnapshot {
            taken_at,
            sample_duration_ms: elapsed.as_millis() as u64,
            stale,
            total_bytes,
            used_bytes,
            free_bytes,
            per_mount,
            subsystem_usage,
            unavailable,
            large_files,
        };
        obs::emit_sample_taken(&snapshot);
        Ok(snapshot)
    }
}
