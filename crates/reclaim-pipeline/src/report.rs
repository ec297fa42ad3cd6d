//! Plain-text rendering of snapshots, runs and dangerous actions.

use std::fmt::Write;

use reclaim_core::{format_bytes, format_delta, DiskSnapshot, ReclaimConfig, Subsystem};

use crate::dangerous::{DangerousAction, DangerousOutcome};
use crate::health::{evaluate_health, HealthThresholds, HealthVerdict};
use crate::pipeline::{PipelineRun, SkipReason, StepOutcome, StepStatus};
use crate::step::{CleanupStep, StepKind, StepName};

/// Renders reports. Pure: output depends only on the arguments.
#[derive(Debug, Clone, Default)]
pub struct ReportFormatter {
    thresholds: HealthThresholds,
}

impl ReportFormatter {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Per-step outcomes, the total freed and a health section.
    pub fn render(&self, run: &PipelineRun) -> String {
        let mut out = String::new();
        let mode = if run.dry_run { " (dry run)" } else { "" };
        let _ = writeln!(out, "Cleanup run {}{}", run.run_id, mode);
        let _ = writeln!(out, "Baseline: {}", usage_line(&run.baseline));
        let _ = writeln!(out);

        if run.outcomes.is_empty() {
            let _ = writeln!(out, "  no steps executed");
        }
        for outcome in &run.outcomes {
            render_outcome(&mut out, outcome);
        }

        if let Some(halt) = &run.halt {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "Halted at step {} ({}): {}",
                halt.index + 1,
                halt.step,
                halt.reason
            );
            if halt.message != halt.reason.to_string() {
                let _ = writeln!(out, "  {}", halt.message);
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Total: {} ({} ok, {} skipped, {} failed)",
            format_delta(run.total_freed()),
            run.succeeded_count(),
            run.skipped_count(),
            run.failed_count()
        );
        let _ = writeln!(out, "After: {}", usage_line(run.final_snapshot()));
        let _ = writeln!(out);
        self.render_health(&mut out, run.final_snapshot());
        out
    }

    /// Snapshot tables and health, for `diagnose`.
    pub fn render_snapshot(&self, snapshot: &DiskSnapshot) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Disk usage at {} (sampled in {} ms{})",
            snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC"),
            snapshot.sample_duration_ms,
            if snapshot.stale { ", stale" } else { "" }
        );
        let _ = writeln!(
            out,
            "  {:<32} {:>10} {:>10} {:>10} {:>6}",
            "Mount", "Size", "Used", "Free", "Use%"
        );
        for (mount, usage) in &snapshot.per_mount {
            let _ = writeln!(
                out,
                "  {:<32} {:>10} {:>10} {:>10} {:>5.1}%",
                mount,
                format_bytes(usage.total_bytes),
                format_bytes(usage.used_bytes),
                format_bytes(usage.free_bytes),
                usage.used_percent()
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Subsystems");
        for subsystem in Subsystem::ALL {
            let value = if snapshot.is_available(subsystem) {
                format_bytes(snapshot.subsystem(subsystem))
            } else {
                "not available".to_string()
            };
            let _ = writeln!(out, "  {:<24} {}", subsystem.name(), value);
        }

        if !snapshot.large_files.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Largest files");
            for file in &snapshot.large_files {
                let _ = writeln!(
                    out,
                    "  {:>10}  {}",
                    format_bytes(file.size_bytes),
                    file.path.display()
                );
            }
        }

        let _ = writeln!(out);
        self.render_health(&mut out, snapshot);
        out
    }

    pub fn render_dangerous(&self, outcome: &DangerousOutcome) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Dangerous action {}: {}",
            outcome.action,
            outcome.action.description()
        );
        for command in &outcome.commands {
            let _ = writeln!(out, "  $ {command}");
        }
        let _ = writeln!(out);
        match &outcome.status {
            StepStatus::Failed(failure) => {
                let _ = writeln!(out, "Result: failed ({failure})");
                if !outcome.stderr_excerpt.is_empty() {
                    let _ = writeln!(out, "  stderr: {}", outcome.stderr_excerpt);
                }
            }
            status => {
                let _ = writeln!(out, "Result: {}", status.label());
            }
        }
        for warning in &outcome.warnings {
            let _ = writeln!(out, "  warning: {warning}");
        }
        let _ = writeln!(out, "Total: {}", format_delta(outcome.bytes_freed()));
        let _ = writeln!(out, "After: {}", usage_line(&outcome.snapshot_after));
        let _ = writeln!(out);
        self.render_health(&mut out, &outcome.snapshot_after);
        out
    }

    /// Every step name with its tier and commands, then the dangerous actions.
    pub fn render_catalog(&self, config: &ReclaimConfig) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Cleanup steps (safe order; * = default)");
        for name in StepName::ALL {
            let step = match name {
                StepName::Truncate => CleanupStep::new(StepKind::TruncateLogFile(
                    config.truncate_root.join("<file>"),
                )),
                _ => match name.step(config) {
                    Some(step) => step,
                    None => continue,
                },
            };
            let marker = if StepName::DEFAULT.contains(&name) { "*" } else { " " };
            let _ = writeln!(
                out,
                "{} {:<16} {:<22} {}",
                marker,
                name.as_str(),
                step.risk_tier().to_string(),
                name.description()
            );
            for command in step.planned_commands(config) {
                let _ = writeln!(out, "      $ {command}");
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Dangerous actions (clean --dangerous <name> --confirm)");
        for action in DangerousAction::ALL {
            let _ = writeln!(out, "  {:<16} {}", action.name(), action.description());
            for command in action.commands(config) {
                let _ = writeln!(out, "      $ {command}");
            }
        }
        out
    }

    fn render_health(&self, out: &mut String, snapshot: &DiskSnapshot) {
        let verdict = evaluate_health(snapshot, &self.thresholds);
        render_verdict(out, &verdict);
    }
}

fn render_outcome(out: &mut String, outcome: &StepOutcome) {
    let freed = format_delta(outcome.bytes_freed());
    let detail = match &outcome.status {
        StepStatus::Succeeded => freed,
        StepStatus::Failed(failure) => format!("{freed} ({failure})"),
        StepStatus::Skipped(reason) => format!("{freed} ({reason})"),
    };
    let _ = writeln!(
        out,
        "  {:<8} {:<32} {}",
        outcome.status.label(),
        outcome.step.label(),
        detail
    );

    let planned = matches!(outcome.status, StepStatus::Skipped(SkipReason::DryRun));
    for command in &outcome.commands {
        let prefix = if planned { "would run" } else { "$" };
        let _ = writeln!(out, "           {prefix} {command}");
    }
    if outcome.is_failed() && !outcome.stderr_excerpt.is_empty() {
        for line in outcome.stderr_excerpt.lines().take(5) {
            let _ = writeln!(out, "           stderr: {line}");
        }
    }
    for warning in &outcome.warnings {
        let _ = writeln!(out, "           warning: {warning}");
    }
}

fn render_verdict(out: &mut String, verdict: &HealthVerdict) {
    let _ = writeln!(out, "Health: {}", verdict.message);
    for check in &verdict.checks {
        let mark = match check.passed {
            Some(true) => "pass",
            Some(false) => "FAIL",
            None => "n/a",
        };
        let _ = writeln!(
            out,
            "  [{:<4}] {:<14} {} (target {})",
            mark, check.name, check.observed, check.expected
        );
    }
}

fn usage_line(snapshot: &DiskSnapshot) -> String {
    format!(
        "{} used, {} free of {} (root {:.1}% used)",
        format_bytes(snapshot.used_bytes),
        format_bytes(snapshot.free_bytes),
        format_bytes(snapshot.total_bytes),
        snapshot.root_used_percent()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Halt;
    use crate::pipeline::HaltReason;
    use chrono::Utc;
    use reclaim_core::LargeFile;

    fn outcome(step: StepKind, status: StepStatus, before: u64, after: u64) -> StepOutcome {
        StepOutcome {
            step: CleanupStep::new(step),
            status,
            exit_status: Some(0),
            stdout_excerpt: String::new(),
            stderr_excerpt: String::new(),
            snapshot_before: DiskSnapshot::from_root_usage(1_000_000_000_000, before),
            snapshot_after: DiskSnapshot::from_root_usage(1_000_000_000_000, after),
            commands: vec!["docker image prune -f".to_string()],
            duration_ms: 10,
            warnings: Vec::new(),
        }
    }

    fn run(outcomes: Vec<StepOutcome>) -> PipelineRun {
        PipelineRun {
            run_id: "run-1".to_string(),
            started_at: Utc::now(),
            dry_run: false,
            baseline: DiskSnapshot::from_root_usage(1_000_000_000_000, 800_000_000_000),
            outcomes,
            halt: None,
        }
    }

    #[test]
    fn test_render_freed_bytes() {
        let text = ReportFormatter::default().render(&run(vec![outcome(
            StepKind::PruneDanglingImages,
            StepStatus::Succeeded,
            800_000_000_000,
            750_000_000_000,
        )]));
        assert!(text.contains("images"));
        assert_eq!(text.matches("freed 50.0 GB").count(), 2, "{text}");
        assert!(text.contains("Health:"));
    }

    #[test]
    fn test_render_skipped_and_halt() {
        let mut r = run(vec![outcome(
            StepKind::RemoveDisabledPackageRevisions,
            StepStatus::Skipped(SkipReason::ConfirmationDeclined),
            800_000_000_000,
            800_000_000_000,
        )]);
        r.halt = Some(Halt {
            index: 1,
            step: "journal-time".to_string(),
            reason: HaltReason::StepFailed,
            message: "journalctl exited with code 1: boom".to_string(),
        });
        let text = ReportFormatter::default().render(&r);
        assert!(text.contains("skipped"));
        assert!(text.contains("freed 0 B (confirmation declined)"));
        assert!(text.contains("Halted at step 2 (journal-time): step failed"));
        assert!(text.contains("journalctl exited with code 1: boom"));
    }

    #[test]
    fn test_skipped_rows_carry_their_delta() {
        let text = ReportFormatter::default().render(&run(vec![outcome(
            StepKind::RemoveDisabledPackageRevisions,
            StepStatus::Skipped(SkipReason::NothingToDo {
                detail: "no disabled snap revisions".to_string(),
            }),
            800_000_000_000,
            790_000_000_000,
        )]));
        assert!(
            text.contains("freed 10.0 GB (nothing to do: no disabled snap revisions)"),
            "{text}"
        );
        assert_eq!(text.matches("freed 10.0 GB").count(), 2, "{text}");
    }

    #[test]
    fn test_render_snapshot_marks_unavailable() {
        let mut snap = DiskSnapshot::from_root_usage(1_000_000_000_000, 900_000_000_000);
        snap.unavailable.insert(Subsystem::ContainerImages);
        snap.large_files.push(LargeFile {
            path: "/srv/dump.sql".into(),
            size_bytes: 2_000_000_000,
        });
        let text = ReportFormatter::default().render_snapshot(&snap);
        assert!(text.contains("container_images         not available"));
        assert!(text.contains("/srv/dump.sql"));
        assert!(text.contains("2.0 GB"));
        assert!(text.contains("FAIL"));
    }

    #[test]
    fn test_catalog_lists_every_step_and_action() {
        let text = ReportFormatter::default().render_catalog(&ReclaimConfig::default());
        for name in StepName::ALL {
            assert!(text.contains(name.as_str()), "missing {name}");
        }
        assert!(text.contains("wipe-docker-data"));
        assert!(text.contains("rm -rf --one-file-system /var/lib/docker"));
    }
}
