//! Parsers for collaborator output.
//!
//! Commands run under `LC_ALL=C`, so the formats below are stable. Every
//! parser is lenient: malformed lines are skipped, not fatal.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::command::SnapRevision;
use crate::snapshot::{LargeFile, Subsystem};
use crate::units::parse_size;

/// One data row of `df -P -B1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfRow {
    pub source: String,
    pub mount: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
}

/// Parse POSIX-format `df` output. The mount point is the last column and
/// may itself contain spaces.
pub fn parse_df_posix(stdout: &str) -> Vec<DfRow> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                return None;
            }
            Some(DfRow {
                source: fields[0].to_string(),
                total_bytes: fields[1].parse().ok()?,
                used_bytes: fields[2].parse().ok()?,
                available_bytes: fields[3].parse().ok()?,
                mount: fields[5..].join(" "),
            })
        })
        .collect()
}

/// Parse `du -s -b` output: `<bytes>\t<path>` per line.
pub fn parse_du(stdout: &str) -> Vec<(PathBuf, u64)> {
    stdout
        .lines()
        .filter_map(|line| {
            let (size, path) = line.split_once('\t')?;
            Some((PathBuf::from(path.trim()), size.trim().parse().ok()?))
        })
        .collect()
}

/// Parse `docker system df --format '{{.Type}}\t{{.Size}}\t{{.Reclaimable}}'`.
pub fn parse_docker_system_df(stdout: &str) -> BTreeMap<Subsystem, u64> {
    let mut usage = BTreeMap::new();
    for line in stdout.lines() {
        let mut cols = line.split('\t');
        let (Some(kind), Some(size)) = (cols.next(), cols.next()) else {
            continue;
        };
        let subsystem = match kind.trim() {
            "Images" => Subsystem::ContainerImages,
            "Containers" => Subsystem::ContainerContainers,
            "Local Volumes" => Subsystem::ContainerVolumes,
            "Build Cache" => Subsystem::ContainerBuildCache,
            _ => continue,
        };
        if let Ok(bytes) = parse_size(size.trim()) {
            usage.insert(subsystem, bytes.as_u64());
        }
    }
    usage
}

fn journal_usage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"take up\s+([0-9]+(?:\.[0-9]+)?)\s*([KMGTP]?)(?:i?B)?\b")
            .expect("static regex is valid")
    })
}

/// Parse `journalctl --disk-usage`, e.g.
/// `Archived and active journals take up 1.1G in the file system.`
pub fn parse_journal_disk_usage(stdout: &str) -> Option<u64> {
    let caps = journal_usage_re().captures(stdout)?;
    let number = caps.get(1)?.as_str();
    let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    parse_size(&format!("{number}{unit}"))
        .ok()
        .map(|size| size.as_u64())
}

/// Parse `find -printf '%s\t%p\n'` output, largest first, at most `limit` entries.
pub fn parse_find_sizes(stdout: &str, limit: usize) -> Vec<LargeFile> {
    let mut files: Vec<LargeFile> = stdout
        .lines()
        .filter_map(|line| {
            let (size, path) = line.split_once('\t')?;
            Some(LargeFile {
                path: PathBuf::from(path),
                size_bytes: size.trim().parse().ok()?,
            })
        })
        .collect();
    files.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then(a.path.cmp(&b.path)));
    files.truncate(limit);
    files
}

/// Parse `snap list --all` and return every revision whose notes mark it disabled.
///
/// Columns: `Name Version Rev Tracking Publisher Notes`.
pub fn parse_snap_disabled_revisions(stdout: &str) -> Vec<SnapRevision> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            let notes = fields.last()?;
            if !notes.split(',').any(|n| n == "disabled") {
                return None;
            }
            SnapRevision::new(fields[0], fields[2])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DF: &str = "\
Filesystem     1-blocks         Used    Available Capacity Mounted on
/dev/sda1  1000000000000 800000000000 200000000000      80% /
/dev/sdb1   500000000000 100000000000 400000000000      20% /mnt/data disk
overlay     1000000000000 800000000000 200000000000      80% /var/lib/docker/overlay2/abc/merged
/dev/loop0             -            -            -        - /snap/core/1
";

    #[test]
    fn test_parse_df_posix() {
        let rows = parse_df_posix(DF);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].mount, "/");
        assert_eq!(rows[0].used_bytes, 800_000_000_000);
        assert_eq!(rows[1].mount, "/mnt/data disk");
        assert_eq!(rows[2].source, "overlay");
    }

    #[test]
    fn test_parse_df_empty() {
        assert!(parse_df_posix("").is_empty());
        assert!(parse_df_posix("Filesystem 1-blocks Used Available Capacity Mounted on\n").is_empty());
    }

    #[test]
    fn test_parse_du() {
        let rows = parse_du("1048576\t/var/log\n52428800\t/var/cache/apt\ngarbage\n");
        assert_eq!(
            rows,
            vec![
                (PathBuf::from("/var/log"), 1_048_576),
                (PathBuf::from("/var/cache/apt"), 52_428_800),
            ]
        );
    }

    #[test]
    fn test_parse_docker_system_df() {
        let out = "Images\t12.5GB\t8.1GB (64%)\nContainers\t1.2kB\t0B (0%)\nLocal Volumes\t3GB\t1GB (33%)\nBuild Cache\t4.75GB\t4.75GB\n";
        let usage = parse_docker_system_df(out);
        assert_eq!(usage[&Subsystem::ContainerImages], 12_500_000_000);
        assert_eq!(usage[&Subsystem::ContainerContainers], 1_200);
        assert_eq!(usage[&Subsystem::ContainerVolumes], 3_000_000_000);
        assert_eq!(usage[&Subsystem::ContainerBuildCache], 4_750_000_000);
    }

    #[test]
    fn test_parse_journal_disk_usage() {
        let out = "Archived and active journals take up 1.5G in the file system.\n";
        assert_eq!(parse_journal_disk_usage(out), Some(1_610_612_736));

        let out = "Journal file /var/log/journal/x/system.journal is truncated, ignoring file.\nArchived and active journals take up 120.0M in the file system.\n";
        assert_eq!(parse_journal_disk_usage(out), Some(125_829_120));

        let out = "Archived and active journals take up 824B in the file system.\n";
        assert_eq!(parse_journal_disk_usage(out), Some(824));

        assert_eq!(parse_journal_disk_usage("No journal files were found."), None);
    }

    #[test]
    fn test_parse_find_sizes_sorted_and_limited() {
        let out = "600000000\t/var/lib/mysql/ibdata1\n900000000\t/home/u/big.iso\n700000000\t/opt/x.tar\n";
        let files = parse_find_sizes(out, 2);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, PathBuf::from("/home/u/big.iso"));
        assert_eq!(files[1].size_bytes, 700_000_000);
    }

    #[test]
    fn test_parse_snap_disabled_revisions() {
        let out = "\
Name    Version   Rev    Tracking       Publisher   Notes
core20  20230801  2015   latest/stable  canonical✓  base,disabled
core20  20231123  2105   latest/stable  canonical✓  base
lxd     5.0.2     24322  5.0/stable/…   canonical✓  disabled
snapd   2.61      20671  latest/stable  canonical✓  snapd
";
        let revs = parse_snap_disabled_revisions(out);
        assert_eq!(revs.len(), 2);
        assert_eq!(revs[0].name(), "core20");
        assert_eq!(revs[0].revision(), "2015");
        assert_eq!(revs[1].name(), "lxd");
    }
}
