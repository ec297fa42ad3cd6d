//! Health evaluation for disk snapshots. Reporting only; never triggers cleanup.

use reclaim_core::{format_bytes, ByteSize, DiskSnapshot, Subsystem};
use serde::{Deserialize, Serialize};

/// Targets a healthy host stays within.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Root filesystem usage must stay below this percentage.
    pub root_max_used_percent: f64,
    /// Journal size band, inclusive.
    pub journal_min: ByteSize,
    pub journal_max: ByteSize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            root_max_used_percent: 80.0,
            journal_min: ByteSize::mb(50),
            journal_max: ByteSize::mb(200),
        }
    }
}

/// One evaluated threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    /// `None` when the measurement was unavailable.
    pub passed: Option<bool>,
    pub observed: String,
    pub expected: String,
}

/// Health verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthVerdict {
    /// Whether every available check passed.
    pub passed: bool,

    pub checks: Vec<HealthCheck>,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Evaluate `snapshot` against `thresholds`.
///
/// Checks:
/// - root filesystem used percent < `root_max_used_percent`
/// - journal size within [`journal_min`, `journal_max`] (skipped when the
///   journal could not be measured)
pub fn evaluate_health(snapshot: &DiskSnapshot, thresholds: &HealthThresholds) -> HealthVerdict {
    let mut checks = Vec::new();
    let mut violations = Vec::new();

    let root_percent = snapshot.root_used_percent();
    let root_ok = root_percent < thresholds.root_max_used_percent;
    if !root_ok {
        violations.push(format!(
            "root filesystem is {:.1}% used (limit {:.0}%)",
            root_percent, thresholds.root_max_used_percent
        ));
    }
    checks.push(HealthCheck {
        name: "root usage".to_string(),
        passed: Some(root_ok),
        observed: format!("{root_percent:.1}%"),
        expected: format!("< {:.0}%", thresholds.root_max_used_percent),
    });

    let journal_expected = format!(
        "{} to {}",
        format_bytes(thresholds.journal_min.as_u64()),
        format_bytes(thresholds.journal_max.as_u64())
    );
    if snapshot.is_available(Subsystem::Journal) {
        let journal = snapshot.subsystem(Subsystem::Journal);
        let journal_ok =
            journal >= thresholds.journal_min.as_u64() && journal <= thresholds.journal_max.as_u64();
        if !journal_ok {
            violations.push(format!(
                "journal uses {} (target {})",
                format_bytes(journal),
                journal_expected
            ));
        }
        checks.push(HealthCheck {
            name: "journal size".to_string(),
            passed: Some(journal_ok),
            observed: format_bytes(journal),
            expected: journal_expected,
        });
    } else {
        checks.push(HealthCheck {
            name: "journal size".to_string(),
            passed: None,
            observed: "unavailable".to_string(),
            expected: journal_expected,
        });
    }

    let passed = violations.is_empty();
    let message = if passed {
        "Disk health within thresholds".to_string()
    } else {
        format!("{} health violation(s)", violations.len())
    };

    HealthVerdict {
        passed,
        checks,
        violations,
        message,
    }
}
