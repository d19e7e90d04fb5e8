//! Plain-text rendering of command results for stdout.
//!
//! Run output is built only from [`BlindRunView`] and [`RunEvent`], neither of
//! which carries a technique id.

use std::fmt::Write;
use std::time::Duration;

use crate::cleanup::CleanupOutcome;
use crate::core::record::{BlindRunView, RunRecord};
use crate::core::types::{RunMode, Technique};
use crate::io::lock::LockState;
use crate::reveal::Revelation;
use crate::run::{RunEvent, RunSummary};
use crate::status::StatusReport;

const RULE_WIDTH: usize = 60;

pub fn run_event(event: &RunEvent) -> String {
    match event {
        RunEvent::Started(view) => run_header(view),
        RunEvent::Dwelling(secs) => format!("Dwelling for {secs}s...\n"),
        RunEvent::StepSucceeded(step) => format!("{step} complete\n"),
    }
}

fn run_header(view: &BlindRunView) -> String {
    let mut out = format!("RUN_ID: {}\nMODE: {}\n", view.run_id, view.mode);
    if let Some(tactic) = view.tactic_filter {
        let _ = writeln!(out, "TACTIC: {tactic}");
    }
    out.push_str("Attack launching...\n\n");
    out
}

pub fn run_summary(summary: &RunSummary) -> String {
    let view = &summary.view;
    let mut out = format!("STATUS: {}\n", view.status);
    match view.mode {
        RunMode::Train => {
            out.push_str("Attack launched successfully.\n");
            out.push_str("Your move: detect, investigate, respond.\n");
            let _ = writeln!(out, "When done, run: randomizer reveal {}", view.run_id);
            let _ = writeln!(out, "Then clean up with: randomizer cleanup {}", view.run_id);
        }
        RunMode::Validate => {
            let _ = writeln!(
                out,
                "Validation run complete. Reveal with: randomizer reveal {}",
                view.run_id
            );
        }
    }
    out
}

pub fn revelation(revelation: &Revelation) -> String {
    let record = &revelation.record;
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "RUN DETAILS: {}", record.run_id);
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Technique:  {}", record.technique_id);
    let _ = writeln!(out, "Account:    {}", record.account);
    let _ = writeln!(out, "Region:     {}", record.region);
    let _ = writeln!(out, "Mode:       {}", record.mode);
    let _ = writeln!(out, "Status:     {}", record.status);
    if let Some(tactic) = record.tactic_filter {
        let _ = writeln!(out, "Tactic:     {tactic}");
    }
    let _ = writeln!(out, "Started:    {}", record.started_at.to_rfc3339());
    let stamps = [
        ("Warmup:     ", record.warmup_at),
        ("Detonated:  ", record.detonated_at),
        ("Cleaned:    ", record.cleaned_at),
        ("Failed:     ", record.failed_at),
    ];
    for (label, at) in stamps {
        if let Some(at) = at {
            let _ = writeln!(out, "{label}{}", at.to_rfc3339());
        }
    }
    if let Some(error) = &record.error {
        let _ = writeln!(out, "Error:      {error}");
    }
    if let Some(report) = &record.cleanup_report {
        let _ = writeln!(out, "Cleanup:    {}", report.summary());
    }
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "\nDocumentation:\n  {}", revelation.docs_url);
    out
}

/// Known run ids, printed on stderr after a not-found error.
pub fn available_runs(run_ids: &[String]) -> String {
    if run_ids.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nAvailable runs:\n");
    for id in run_ids {
        let _ = writeln!(out, "  {id}");
    }
    out
}

pub fn runs_table(runs: &[RunRecord]) -> String {
    if runs.is_empty() {
        return "No runs yet.\n".to_string();
    }
    let mut out = format!("{:<30} {:<16} {:<10}\n", "RUN ID", "STATUS", "MODE");
    let _ = writeln!(out, "{}", "-".repeat(56));
    for run in runs {
        let _ = writeln!(
            out,
            "{:<30} {:<16} {:<10}",
            run.run_id,
            run.status.as_str(),
            run.mode.as_str()
        );
    }
    out
}

pub fn techniques_table(techniques: &[Technique]) -> String {
    let mut out = format!("{:<50} {}\n", "TECHNIQUE ID", "NAME");
    let _ = writeln!(out, "{}", "-".repeat(80));
    for technique in techniques {
        let _ = writeln!(out, "{:<50} {}", technique.id, technique.name);
    }
    let _ = writeln!(out, "\nTotal: {} techniques", techniques.len());
    out
}

pub fn cleanup_outcome(run_id: &str, outcome: &CleanupOutcome) -> String {
    match outcome {
        CleanupOutcome::AlreadyClean(_) => format!("Run {run_id} is already cleaned.\n"),
        CleanupOutcome::Cleaned(record) => {
            let summary = record
                .cleanup_report
                .as_ref()
                .map(|report| report.summary())
                .unwrap_or_default();
            format!("Cleanup complete for run {run_id} ({summary}); status {}.\n", record.status)
        }
    }
}

pub fn status_report(report: &StatusReport) -> String {
    let rule = "-".repeat(40);
    let mut out = format!("LOCK:\n{rule}\n");
    match &report.lock {
        LockState::Free => out.push_str("free\n"),
        LockState::Held { owner, age, stale } => {
            let staleness = if *stale { " (stale, will be reclaimed)" } else { "" };
            match owner {
                Some(owner) => {
                    let _ = writeln!(
                        out,
                        "held by run {} (pid {}, {}) for {}{staleness}",
                        owner.run_id,
                        owner.pid,
                        owner.purpose.as_str(),
                        format_age(age.unwrap_or_default())
                    );
                }
                None => {
                    let _ = writeln!(out, "held by an unreadable marker{staleness}");
                }
            }
        }
    }

    let _ = write!(out, "\nSTRATUS STATUS:\n{rule}\n");
    match &report.tool_status {
        Ok(text) if text.trim().is_empty() => out.push_str("(no active state)\n"),
        Ok(text) => {
            out.push_str(text.trim_end());
            out.push('\n');
        }
        Err(reason) => {
            let _ = writeln!(out, "(unavailable: {reason})");
        }
    }

    if !report.recent_runs.is_empty() {
        let _ = write!(out, "\nRECENT RUNS:\n{rule}\n");
        for run in &report.recent_runs {
            let _ = writeln!(out, "  {}: {}", run.run_id, run.status);
        }
    }
    out
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}
