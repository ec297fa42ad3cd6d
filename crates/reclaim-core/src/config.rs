//! Runtime thresholds and limits.
//!
//! There is no config file. The CLI fills this struct from flags, each of
//! which can also be set through a `RECLAIM_*` environment variable.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::units::ByteSize;

/// Thresholds and limits shared by the sampler and the cleanup pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ReclaimConfig {
    /// Target journal size for `journalctl --vacuum-size`.
    pub journal_max_size: ByteSize,
    /// Target journal age for `journalctl --vacuum-time`.
    pub journal_max_age: Duration,
    /// Files smaller than this are left alone by log truncation.
    pub truncate_min_size: ByteSize,
    /// Truncation targets must live below this directory.
    pub truncate_root: PathBuf,
    /// Upper bound for a single cleanup command.
    pub command_timeout: Duration,
    /// Upper bound for a single diagnostic query.
    pub sample_timeout: Duration,
    /// A sample slower than this is logged as possibly inconsistent.
    pub max_staleness: Duration,
    /// Minimum size for the large-file scan.
    pub large_file_min: ByteSize,
    /// Where the large-file scan starts (stays on that filesystem).
    pub large_file_root: PathBuf,
    /// How many large files to keep in a snapshot.
    pub large_file_limit: usize,
    /// Maximum characters kept from a command's stdout/stderr in outcomes.
    pub excerpt_chars: usize,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            journal_max_size: ByteSize::mib(200),
            journal_max_age: Duration::from_secs(7 * 86_400),
            truncate_min_size: ByteSize::mib(100),
            truncate_root: PathBuf::from("/var/log"),
            command_timeout: Duration::from_secs(600),
            sample_timeout: Duration::from_secs(30),
            max_staleness: Duration::from_secs(5),
            large_file_min: ByteSize::mib(500),
            large_file_root: PathBuf::from("/"),
            large_file_limit: 20,
            excerpt_chars: 2_000,
        }
    }
}

impl ReclaimConfig {
    /// Reject settings the runner or pipeline cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "command_timeout",
            });
        }
        if self.sample_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "sample_timeout",
            });
        }
        if self.max_staleness.is_zero() {
            return Err(ConfigError::Zero {
                field: "max_staleness",
            });
        }
        if self.journal_max_age.is_zero() {
            return Err(ConfigError::Zero {
                field: "journal_max_age",
            });
        }
        if self.large_file_limit == 0 {
            return Err(ConfigError::Zero {
                field: "large_file_limit",
            });
        }
        for (field, path) in [
            ("truncate_root", &self.truncate_root),
            ("large_file_root", &self.large_file_root),
        ] {
            if !path.is_absolute() {
                return Err(ConfigError::RelativePath {
                    field,
                    value: path.display().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ReclaimConfig::default();
        assert_eq!(cfg.journal_max_size, ByteSize::mib(200));
        assert_eq!(cfg.journal_max_age, Duration::from_secs(604_800));
        assert_eq!(cfg.truncate_root, PathBuf::from("/var/log"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let cfg = ReclaimConfig {
            command_timeout: Duration::ZERO,
            ..ReclaimConfig::default()
        };
        match cfg.validate() {
            Err(ConfigError::Zero { field }) => assert_eq!(field, "command_timeout"),
            other => panic!("expected Zero, got {:?}", other),
        }
    }

    #[test]
    fn test_relative_truncate_root_rejected() {
        let cfg = ReclaimConfig {
            truncate_root: PathBuf::from("var/log"),
            ..ReclaimConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::RelativePath { .. })
        ));
    }
}
