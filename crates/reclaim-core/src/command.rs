//! The command allow-list.
//!
//! Every external invocation reclaim performs is built here from a fixed
//! argument template. Variable inputs (paths, sizes, durations, snap
//! revisions) are typed values that each become exactly one argv element;
//! nothing is ever passed through a shell.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExecResult, ExecutionError};
use crate::units::{journald_time_arg, ByteSize};

/// Data directory of the container engine, only touched by dangerous actions.
pub const ENGINE_DATA_DIR: &str = "/var/lib/docker";

/// Configuration file passed to a forced log rotation.
pub const LOGROTATE_CONF: &str = "/etc/logrotate.conf";

/// Programs reclaim is allowed to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Program {
    Df,
    Du,
    Find,
    Docker,
    Journalctl,
    AptGet,
    Snap,
    Logrotate,
    Truncate,
    Systemctl,
    Rm,
}

impl Program {
    /// Executable name looked up on `PATH`.
    pub fn binary(self) -> &'static str {
        match self {
            Program::Df => "df",
            Program::Du => "du",
            Program::Find => "find",
            Program::Docker => "docker",
            Program::Journalctl => "journalctl",
            Program::AptGet => "apt-get",
            Program::Snap => "snap",
            Program::Logrotate => "logrotate",
            Program::Truncate => "truncate",
            Program::Systemctl => "systemctl",
            Program::Rm => "rm",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// A disabled snap revision eligible for removal.
///
/// Both fields come from `snap list --all` output, so they are validated
/// before they can reach an argv.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapRevision {
    name: String,
    revision: String,
}

impl SnapRevision {
    /// Returns `None` unless the name is `[a-z0-9-]+` (not starting with `-`)
    /// and the revision is all digits.
    pub fn new(name: &str, revision: &str) -> Option<Self> {
        let name_ok = !name.is_empty()
            && name.len() <= 64
            && !name.starts_with('-')
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        let revision_ok = !revision.is_empty() && revision.chars().all(|c| c.is_ascii_digit());

        (name_ok && revision_ok).then(|| Self {
            name: name.to_string(),
            revision: revision.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }
}

impl fmt::Display for SnapRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (rev {})", self.name, self.revision)
    }
}

/// One allow-listed invocation: program, argv tail and a mandatory timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: Program,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSpec {
    fn new<I, S>(program: Program, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    pub fn program(&self) -> Program {
        self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Same command with a different bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    // ── diagnostics ──────────────────────────────────────────────────────

    /// Byte-exact usage of every real mount, in POSIX layout (no line wrapping).
    pub fn filesystem_usage(timeout: Duration) -> Self {
        Self::new(
            Program::Df,
            [
                "-P", "-B1", "-x", "tmpfs", "-x", "devtmpfs", "-x", "squashfs", "-x", "efivarfs",
            ],
            timeout,
        )
    }

    /// Apparent size of each directory, without crossing filesystem boundaries.
    ///
    /// Relative or non-UTF-8 paths are dropped.
    pub fn directory_usage(dirs: &[PathBuf], timeout: Duration) -> Self {
        let mut args = vec!["-s".to_string(), "-b".to_string(), "--one-file-system".to_string()];
        args.extend(dirs.iter().filter_map(|d| absolute_arg(d).ok()));
        Self::new(Program::Du, args, timeout)
    }

    /// Regular files larger than `min_size` under `root`, one `size\tpath` per line.
    pub fn large_file_scan(root: &Path, min_size: ByteSize, timeout: Duration) -> ExecResult<Self> {
        Ok(Self::new(
            Program::Find,
            [
                absolute_arg(root)?,
                "-xdev".to_string(),
                "-type".to_string(),
                "f".to_string(),
                "-size".to_string(),
                format!("+{}c", min_size.as_u64()),
                "-printf".to_string(),
                "%s\\t%p\\n".to_string(),
            ],
            timeout,
        ))
    }

    pub fn container_usage(timeout: Duration) -> Self {
        Self::new(
            Program::Docker,
            [
                "system",
                "df",
                "--format",
                "{{.Type}}\t{{.Size}}\t{{.Reclaimable}}",
            ],
            timeout,
        )
    }

    pub fn journal_usage(timeout: Duration) -> Self {
        Self::new(Program::Journalctl, ["--disk-usage"], timeout)
    }

    pub fn snap_list_all(timeout: Duration) -> Self {
        Self::new(Program::Snap, ["list", "--all"], timeout)
    }

    // ── cleanup ──────────────────────────────────────────────────────────

    pub fn prune_dangling_images(timeout: Duration) -> Self {
        Self::new(Program::Docker, ["image", "prune", "-f"], timeout)
    }

    pub fn prune_build_cache(timeout: Duration) -> Self {
        Self::new(Program::Docker, ["builder", "prune", "-f"], timeout)
    }

    pub fn vacuum_journal_size(max_size: ByteSize, timeout: Duration) -> Self {
        Self::new(
            Program::Journalctl,
            [format!("--vacuum-size={}", max_size.journald_arg())],
            timeout,
        )
    }

    pub fn vacuum_journal_time(max_age: Duration, timeout: Duration) -> Self {
        Self::new(
            Program::Journalctl,
            [format!("--vacuum-time={}", journald_time_arg(max_age))],
            timeout,
        )
    }

    pub fn apt_clean(timeout: Duration) -> Self {
        Self::new(Program::AptGet, ["clean"], timeout)
    }

    pub fn apt_autoremove(timeout: Duration) -> Self {
        Self::new(Program::AptGet, ["autoremove", "-y"], timeout)
    }

    pub fn snap_remove_revision(revision: &SnapRevision, timeout: Duration) -> Self {
        Self::new(
            Program::Snap,
            [
                "remove".to_string(),
                revision.name().to_string(),
                format!("--revision={}", revision.revision()),
            ],
            timeout,
        )
    }

    pub fn force_log_rotation(timeout: Duration) -> Self {
        Self::new(Program::Logrotate, ["-f", LOGROTATE_CONF], timeout)
    }

    pub fn truncate_file(path: &Path, timeout: Duration) -> ExecResult<Self> {
        Ok(Self::new(
            Program::Truncate,
            ["-s".to_string(), "0".to_string(), absolute_arg(path)?],
            timeout,
        ))
    }

    // ── dangerous ────────────────────────────────────────────────────────

    /// Removes every unused image, container, network, build cache and volume.
    pub fn prune_everything(timeout: Duration) -> Self {
        Self::new(
            Program::Docker,
            ["system", "prune", "-a", "--volumes", "-f"],
            timeout,
        )
    }

    pub fn stop_container_engine(timeout: Duration) -> Self {
        Self::new(Program::Systemctl, ["stop", "docker"], timeout)
    }

    pub fn start_container_engine(timeout: Duration) -> Self {
        Self::new(Program::Systemctl, ["start", "docker"], timeout)
    }

    pub fn remove_engine_data(timeout: Duration) -> Self {
        Self::new(
            Program::Rm,
            ["-rf", "--one-file-system", ENGINE_DATA_DIR],
            timeout,
        )
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program.binary())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Absolute, UTF-8 paths only; anything else could be mistaken for an option.
fn absolute_arg(path: &Path) -> ExecResult<String> {
    if !path.is_absolute() {
        return Err(ExecutionError::InvalidCommand(format!(
            "path must be absolute: {}",
            path.display()
        )));
    }
    path.to_str().map(str::to_string).ok_or_else(|| {
        ExecutionError::InvalidCommand(format!("path is not valid UTF-8: {}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(30);

    #[test]
    fn test_program_binaries() {
        assert_eq!(Program::AptGet.binary(), "apt-get");
        assert_eq!(Program::Journalctl.to_string(), "journalctl");
    }

    #[test]
    fn test_vacuum_templates() {
        let size = CommandSpec::vacuum_journal_size(ByteSize::mib(200), T);
        assert_eq!(size.program(), Program::Journalctl);
        assert_eq!(size.args(), ["--vacuum-size=200M"]);

        let time = CommandSpec::vacuum_journal_time(Duration::from_secs(7 * 86_400), T);
        assert_eq!(time.to_string(), "journalctl --vacuum-time=7d");
    }

    #[test]
    fn test_truncate_requires_absolute_path() {
        let spec = CommandSpec::truncate_file(Path::new("/var/log/syslog.1"), T).unwrap();
        assert_eq!(spec.args(), ["-s", "0", "/var/log/syslog.1"]);

        let err = CommandSpec::truncate_file(Path::new("-rf"), T).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidCommand(_)));
    }

    #[test]
    fn test_directory_usage_drops_relative_paths() {
        let spec = CommandSpec::directory_usage(
            &[PathBuf::from("/var/log"), PathBuf::from("relative")],
            T,
        );
        assert_eq!(spec.args().last().map(String::as_str), Some("/var/log"));
        assert!(!spec.args().iter().any(|a| a == "relative"));
    }

    #[test]
    fn test_snap_revision_validation() {
        assert!(SnapRevision::new("core20", "1974").is_some());
        assert!(SnapRevision::new("gnome-42-2204", "176").is_some());
        assert!(SnapRevision::new("-x", "1").is_none());
        assert!(SnapRevision::new("core; rm -rf /", "1").is_none());
        assert!(SnapRevision::new("core", "x1").is_none());

        let rev = SnapRevision::new("lxd", "24322").unwrap();
        let spec = CommandSpec::snap_remove_revision(&rev, T);
        assert_eq!(spec.args(), ["remove", "lxd", "--revision=24322"]);
    }

    #[test]
    fn test_display_quotes_whitespace() {
        let spec = CommandSpec::container_usage(T);
        assert_eq!(
            spec.to_string(),
            "docker system df --format '{{.Type}}\t{{.Size}}\t{{.Reclaimable}}'"
        );
    }

    #[test]
    fn test_large_file_scan_template() {
        let spec = CommandSpec::large_file_scan(Path::new("/"), ByteSize::mib(500), T).unwrap();
        assert_eq!(spec.program(), Program::Find);
        assert!(spec.args().contains(&format!("+{}c", 500 * 1024 * 1024)));
    }
}
