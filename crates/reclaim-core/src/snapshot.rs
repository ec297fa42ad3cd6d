//! Point-in-time disk usage.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked consumer of disk space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    ContainerImages,
    ContainerContainers,
    ContainerVolumes,
    ContainerBuildCache,
    Journal,
    LogDirectory,
    PackageCache,
    SnapStore,
}

impl Subsystem {
    pub const ALL: [Subsystem; 8] = [
        Subsystem::ContainerImages,
        Subsystem::ContainerContainers,
        Subsystem::ContainerVolumes,
        Subsystem::ContainerBuildCache,
        Subsystem::Journal,
        Subsystem::LogDirectory,
        Subsystem::PackageCache,
        Subsystem::SnapStore,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Subsystem::ContainerImages => "container_images",
            Subsystem::ContainerContainers => "container_containers",
            Subsystem::ContainerVolumes => "container_volumes",
            Subsystem::ContainerBuildCache => "container_build_cache",
            Subsystem::Journal => "journal",
            Subsystem::LogDirectory => "log_directory",
            Subsystem::PackageCache => "package_cache",
            Subsystem::SnapStore => "snap_store",
        }
    }

    /// Directory measured with `du` for this subsystem, if any.
    pub fn directory(self) -> Option<PathBuf> {
        let dir = match self {
            Subsystem::LogDirectory => "/var/log",
            Subsystem::PackageCache => "/var/cache/apt",
            Subsystem::SnapStore => "/var/lib/snapd/snaps",
            _ => return None,
        };
        Some(PathBuf::from(dir))
    }

    pub fn is_container(self) -> bool {
        matches!(
            self,
            Subsystem::ContainerImages
                | Subsystem::ContainerContainers
                | Subsystem::ContainerVolumes
                | Subsystem::ContainerBuildCache
        )
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Usage of one mounted filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

impl MountUsage {
    /// Used share of the filesystem, as `df` computes it (used / (used + free)).
    pub fn used_percent(&self) -> f64 {
        let denom = self.used_bytes + self.free_bytes;
        if denom == 0 {
            0.0
        } else {
            self.used_bytes as f64 * 100.0 / denom as f64
        }
    }
}

/// One hit of the large-file scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Immutable disk usage record taken by a sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSnapshot {
    pub taken_at: DateTime<Utc>,

    /// Wall-clock time the sub-queries took together.
    pub sample_duration_ms: u64,

    /// The sub-queries spread beyond the staleness window, so the figures
    /// may not describe one instant.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,

    /// Summed over distinct filesystems.
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,

    /// Mount path to usage.
    pub per_mount: BTreeMap<String, MountUsage>,

    /// Bytes attributed to each subsystem; 0 when unavailable.
    pub subsystem_usage: BTreeMap<Subsystem, u64>,

    /// Subsystems whose query could not run (collaborator missing or failing).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub unavailable: BTreeSet<Subsystem>,

    /// Largest files, descending; empty unless the scan was enabled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub large_files: Vec<LargeFile>,
}

impl DiskSnapshot {
    /// Single-filesystem snapshot mounted at `/`, with every subsystem at 0.
    pub fn from_root_usage(total_bytes: u64, used_bytes: u64) -> Self {
        let free_bytes = total_bytes.saturating_sub(used_bytes);
        let mut per_mount = BTreeMap::new();
        per_mount.insert(
            "/".to_string(),
            MountUsage {
                total_bytes,
                used_bytes,
                free_bytes,
            },
        );
        Self {
            taken_at: Utc::now(),
            sample_duration_ms: 0,
            stale: false,
            total_bytes,
            used_bytes,
            free_bytes,
            per_mount,
            subsystem_usage: Subsystem::ALL.iter().map(|s| (*s, 0)).collect(),
            unavailable: BTreeSet::new(),
            large_files: Vec::new(),
        }
    }

    pub fn root(&self) -> Option<&MountUsage> {
        self.per_mount.get("/")
    }

    /// Root filesystem usage, falling back to the aggregate.
    pub fn root_used_percent(&self) -> f64 {
        match self.root() {
            Some(root) => root.used_percent(),
            None => MountUsage {
                total_bytes: self.total_bytes,
                used_bytes: self.used_bytes,
                free_bytes: self.free_bytes,
            }
            .used_percent(),
        }
    }

    pub fn subsystem(&self, subsystem: Subsystem) -> u64 {
        self.subsystem_usage.get(&subsystem).copied().unwrap_or(0)
    }

    pub fn is_available(&self, subsystem: Subsystem) -> bool {
        !self.unavailable.contains(&subsystem)
    }
}

/// Bytes freed between two snapshots (`before.used - after.used`).
///
/// Negative when usage grew.
pub fn bytes_freed(before: &DiskSnapshot, after: &DiskSnapshot) -> i64 {
    before.used_bytes as i64 - after.used_bytes as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_freed_is_signed() {
        let before = DiskSnapshot::from_root_usage(1_000_000_000_000, 800_000_000_000);
        let after = DiskSnapshot::from_root_usage(1_000_000_000_000, 750_000_000_000);
        assert_eq!(bytes_freed(&before, &after), 50_000_000_000);
        assert_eq!(bytes_freed(&after, &before), -50_000_000_000);
    }

    #[test]
    fn test_root_used_percent() {
        let snap = DiskSnapshot::from_root_usage(100, 85);
        assert!((snap.root_used_percent() - 85.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_subsystem_defaults_to_zero() {
        let snap = DiskSnapshot::from_root_usage(100, 10);
        assert_eq!(snap.subsystem(Subsystem::Journal), 0);
        assert!(snap.is_available(Subsystem::Journal));
    }

    #[test]
    fn test_snapshot_serializes_subsystem_keys() {
        let snap = DiskSnapshot::from_root_usage(100, 10);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["subsystem_usage"]["container_build_cache"], 0);
        assert!(json.get("unavailable").is_none());
    }

    #[test]
    fn test_only_du_subsystems_have_directories() {
        assert_eq!(
            Subsystem::LogDirectory.directory(),
            Some(PathBuf::from("/var/log"))
        );
        assert!(Subsystem::Journal.directory().is_none());
        assert!(Subsystem::ContainerImages.is_container());
    }
}
