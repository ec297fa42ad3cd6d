//! Cleanup step definitions and selection.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use reclaim_core::{ByteSize, CommandSpec, ReclaimConfig};
use serde::{Deserialize, Serialize};

use crate::confirm::ConfirmationRequest;
use crate::error::StepError;
use crate::risk::RiskTier;

/// What a cleanup step does. Targets travel with the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum StepKind {
    /// docker image prune -f
    PruneDanglingImages,

    /// docker builder prune -f
    PruneBuildCache,

    /// journalctl --vacuum-size=<size>
    VacuumLogsBySize(ByteSize),

    /// journalctl --vacuum-time=<age>
    VacuumLogsByTime(Duration),

    /// apt-get clean; apt-get autoremove -y
    PurgePackageCache,

    /// snap remove <name> --revision=<rev> for every disabled revision
    RemoveDisabledPackageRevisions,

    /// truncate -s 0 <path>
    TruncateLogFile(PathBuf),

    /// logrotate -f /etc/logrotate.conf
    RotateLogs,
}

impl StepKind {
    pub fn step_name(&self) -> StepName {
        match self {
            StepKind::PruneDanglingImages => StepName::Images,
            StepKind::PruneBuildCache => StepName::BuildCache,
            StepKind::VacuumLogsBySize(_) => StepName::JournalSize,
            StepKind::VacuumLogsByTime(_) => StepName::JournalTime,
            StepKind::PurgePackageCache => StepName::Apt,
            StepKind::RemoveDisabledPackageRevisions => StepName::SnapRevisions,
            StepKind::TruncateLogFile(_) => StepName::Truncate,
            StepKind::RotateLogs => StepName::RotateLogs,
        }
    }

    pub fn name(&self) -> &'static str {
        self.step_name().as_str()
    }

    pub fn default_tier(&self) -> RiskTier {
        match self {
            StepKind::PruneDanglingImages
            | StepKind::PruneBuildCache
            | StepKind::VacuumLogsBySize(_)
            | StepKind::VacuumLogsByTime(_) => RiskTier::Safe,
            StepKind::PurgePackageCache
            | StepKind::RemoveDisabledPackageRevisions
            | StepKind::TruncateLogFile(_)
            | StepKind::RotateLogs => RiskTier::RequiresConfirmation,
        }
    }
}

/// Short names used on the command line, declared in safe execution order:
/// container data, then logs, then packages, then targeted truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepName {
    Images,
    BuildCache,
    JournalSize,
    JournalTime,
    RotateLogs,
    Apt,
    SnapRevisions,
    Truncate,
}

impl StepName {
    pub const ALL: [StepName; 8] = [
        StepName::Images,
        StepName::BuildCache,
        StepName::JournalSize,
        StepName::JournalTime,
        StepName::RotateLogs,
        StepName::Apt,
        StepName::SnapRevisions,
        StepName::Truncate,
    ];

    /// Run when no explicit selection is given (truncation is added per path).
    pub const DEFAULT: [StepName; 6] = [
        StepName::Images,
        StepName::BuildCache,
        StepName::JournalSize,
        StepName::JournalTime,
        StepName::Apt,
        StepName::SnapRevisions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepName::Images => "images",
            StepName::BuildCache => "build-cache",
            StepName::JournalSize => "journal-size",
            StepName::JournalTime => "journal-time",
            StepName::RotateLogs => "rotate-logs",
            StepName::Apt => "apt",
            StepName::SnapRevisions => "snap-revisions",
            StepName::Truncate => "truncate",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            StepName::Images => "remove dangling container images",
            StepName::BuildCache => "remove the container build cache",
            StepName::JournalSize => "vacuum the journal down to the size limit",
            StepName::JournalTime => "vacuum journal entries older than the age limit",
            StepName::RotateLogs => "force a logrotate pass",
            StepName::Apt => "clean the APT cache and autoremove unused packages",
            StepName::SnapRevisions => "remove disabled snap revisions",
            StepName::Truncate => "truncate one log file to zero bytes (per --truncate)",
        }
    }

    /// Position in the safe execution order.
    pub fn safe_rank(self) -> usize {
        self as usize
    }

    /// The step this name stands for, at its default tier. `Truncate` needs
    /// a path and has no path-free form.
    pub fn step(self, config: &ReclaimConfig) -> Option<CleanupStep> {
        self.kind(config).map(CleanupStep::new)
    }

    fn kind(self, config: &ReclaimConfig) -> Option<StepKind> {
        Some(match self {
            StepName::Images => StepKind::PruneDanglingImages,
            StepName::BuildCache => StepKind::PruneBuildCache,
            StepName::JournalSize => StepKind::VacuumLogsBySize(config.journal_max_size),
            StepName::JournalTime => StepKind::VacuumLogsByTime(config.journal_max_age),
            StepName::RotateLogs => StepKind::RotateLogs,
            StepName::Apt => StepKind::PurgePackageCache,
            StepName::SnapRevisions => StepKind::RemoveDisabledPackageRevisions,
            StepName::Truncate => return None,
        })
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        StepName::ALL
            .into_iter()
            .find(|n| n.as_str() == wanted)
            .ok_or_else(|| StepError::UnknownStep(wanted.to_string()))
    }
}

/// One cleanup action with its risk tier and failure policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStep {
    kind: StepKind,
    risk_tier: RiskTier,
    continue_on_error: bool,
}

impl CleanupStep {
    /// A step at its kind's default tier that halts the run on failure.
    pub fn new(kind: StepKind) -> Self {
        Self {
            risk_tier: kind.default_tier(),
            kind,
            continue_on_error: false,
        }
    }

    /// A truncation step, after checking that `path` lies under the
    /// configured truncation root.
    pub fn truncate(path: impl Into<PathBuf>, config: &ReclaimConfig) -> Result<Self, StepError> {
        let path = path.into();
        check_truncate_target(&path, &config.truncate_root)?;
        Ok(Self::new(StepKind::TruncateLogFile(path)))
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn risk_tier(&self) -> RiskTier {
        self.risk_tier
    }

    pub fn continue_on_error(&self) -> bool {
        self.continue_on_error
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Name plus target, e.g. `truncate /var/log/syslog.1`.
    pub fn label(&self) -> String {
        match &self.kind {
            StepKind::TruncateLogFile(path) => format!("truncate {}", path.display()),
            _ => self.name().to_string(),
        }
    }

    /// The commands this step would run, as printed by dry runs and `reclaim steps`.
    ///
    /// Snap removals depend on what `snap list --all` reports at run time, so
    /// they are shown as a template.
    pub fn planned_commands(&self, config: &ReclaimConfig) -> Vec<String> {
        let t = config.command_timeout;
        match &self.kind {
            StepKind::PruneDanglingImages => vec![CommandSpec::prune_dangling_images(t).to_string()],
            StepKind::PruneBuildCache => vec![CommandSpec::prune_build_cache(t).to_string()],
            StepKind::VacuumLogsBySize(size) => {
                vec![CommandSpec::vacuum_journal_size(*size, t).to_string()]
            }
            StepKind::VacuumLogsByTime(age) => {
                vec![CommandSpec::vacuum_journal_time(*age, t).to_string()]
            }
            StepKind::PurgePackageCache => vec![
                CommandSpec::apt_clean(t).to_string(),
                CommandSpec::apt_autoremove(t).to_string(),
            ],
            StepKind::RemoveDisabledPackageRevisions => vec![
                CommandSpec::snap_list_all(config.sample_timeout).to_string(),
                "snap remove <name> --revision=<rev> (each disabled revision)".to_string(),
            ],
            StepKind::TruncateLogFile(path) => match CommandSpec::truncate_file(path, t) {
                Ok(spec) => vec![spec.to_string()],
                Err(_) => vec![format!("truncate -s 0 {}", path.display())],
            },
            StepKind::RotateLogs => vec![CommandSpec::force_log_rotation(t).to_string()],
        }
    }

    pub fn confirmation_request(&self, config: &ReclaimConfig) -> ConfirmationRequest {
        ConfirmationRequest {
            action: self.name().to_string(),
            label: self.label(),
            tier: self.risk_tier,
            commands: self.planned_commands(config),
        }
    }
}

/// Lexical guard for truncation targets: absolute, no `..`, strictly below `root`.
pub(crate) fn check_truncate_target(path: &Path, root: &Path) -> Result<(), StepError> {
    let invalid = |reason: String| StepError::InvalidTarget {
        path: path.to_path_buf(),
        reason,
    };
    if !path.is_absolute() {
        return Err(invalid("path must be absolute".to_string()));
    }
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(invalid("path must not contain '..'".to_string()));
    }
    if path == root || !path.starts_with(root) {
        return Err(invalid(format!("not a file under {}", root.display())));
    }
    Ok(())
}

/// The default selection: every [`StepName::DEFAULT`] step, in safe order.
pub fn default_steps(config: &ReclaimConfig) -> Vec<CleanupStep> {
    StepName::DEFAULT
        .iter()
        .filter_map(|n| n.kind(config))
        .map(CleanupStep::new)
        .collect()
}

/// Build the steps for a run.
///
/// Without `names` the default set is used. Each `truncate` path adds one
/// truncation step. The result is sorted into safe order; truncation steps
/// keep the order their paths were given in.
pub fn select_steps(
    names: Option<&[StepName]>,
    truncate: &[PathBuf],
    continue_on_error: bool,
    config: &ReclaimConfig,
) -> Result<Vec<CleanupStep>, StepError> {
    let mut steps = match names {
        None => default_steps(config),
        Some(names) => {
            if names.contains(&StepName::Truncate) && truncate.is_empty() {
                return Err(StepError::InvalidTarget {
                    path: PathBuf::new(),
                    reason: "the truncate step needs at least one --truncate path".to_string(),
                });
            }
            let mut unique: Vec<StepName> = names.to_vec();
            unique.sort();
            unique.dedup();
            unique
                .into_iter()
                .filter_map(|n| n.kind(config))
                .map(CleanupStep::new)
                .collect()
        }
    };

    for path in truncate {
        steps.push(CleanupStep::truncate(path.clone(), config)?);
    }

    steps.sort_by_key(|s| s.kind().step_name().safe_rank());
    Ok(steps
        .into_iter()
        .map(|s| s.with_continue_on_error(continue_on_error))
        .collect())
}
