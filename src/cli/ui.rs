//! Plain-text and JSON rendering of reports.

use chrono::Utc;
use samstore::repair::Skipped;
use samstore::{
    CheckReport, CleanupReport, RebuildReport, RecentSamplesReport, ReconcileOutcome,
    RelatedLinksReport,
};
use serde::Serialize;
use std::fmt::Write;

/// `{"command", "generated_at", "report"}` envelope for `--json`.
pub fn json<T: Serialize>(command: &str, report: &T) -> anyhow::Result<String> {
    let envelope = serde_json::json!({
        "command": command,
        "generated_at": Utc::now(),
        "report": report,
    });
    Ok(serde_json::to_string_pretty(&envelope)?)
}

pub fn success(elapsed_ms: u64) -> String {
    format!("Success! [{}ms]", elapsed_ms)
}

pub fn cleanup(report: &CleanupReport) -> String {
    let mut out = String::new();
    if report.preview {
        let _ = writeln!(out, "Samples which will be deleted:");
        for pruned in &report.deleted_records {
            let _ = writeln!(out, "  {} ({})", pruned.key, pruned.reason);
        }
        let _ = writeln!(out, "Sample keys which will be deleted from master list:");
        for pruned in &report.master_removals {
            let _ = writeln!(out, "  {} ({})", pruned.key, pruned.reason);
        }
    } else {
        let _ = writeln!(
            out,
            "Deleted {} sample records, removed {} master list entries",
            report.records_deleted, report.master_removed
        );
    }
    let _ = writeln!(
        out,
        "Scope {}: {} master entries, {} sample keys scanned",
        report.scope, report.master_members, report.scanned
    );
    write_skipped(&mut out, &report.skipped);
    out.push_str(&success(report.elapsed_ms));
    out
}

fn write_skipped(out: &mut String, skipped: &[Skipped]) {
    if skipped.is_empty() {
        return;
    }
    let _ = writeln!(out, "Skipped {} keys the store did not answer for:", skipped.len());
    for item in skipped {
        let _ = writeln!(out, "  {}: {}", item.key, item.error);
    }
}

pub fn check(report: &CheckReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Index {} scope {}: out of {} samples, {} were found ({} missing)",
        report.index,
        report.scope,
        report.total,
        report.found_in_map,
        report.drift()
    );
    if report.errors > 0 {
        let _ = writeln!(out, "{} samples could not be checked", report.errors);
    }
    if report.unparseable > 0 {
        let _ = writeln!(out, "{} sample keys could not be parsed", report.unparseable);
    }
    for key in &report.missing {
        let _ = writeln!(out, "  missing: {}", key);
    }
    out.push_str(&success(report.elapsed_ms));
    out
}

pub fn rebuild(report: &RebuildReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Index {} scope {}: {} deleted, {} added",
        report.index, report.scope, report.deleted, report.added
    );
    out.push_str(&success(report.elapsed_ms));
    out
}

pub fn reconcile(outcome: &ReconcileOutcome) -> String {
    match outcome {
        ReconcileOutcome::Consistent { check: report } => {
            format!("Index consistent\n{}", check(report))
        }
        ReconcileOutcome::Rebuilt {
            check: checked,
            rebuild: rebuilt,
        } => format!("{}\n{}", check(checked), rebuild(rebuilt)),
        ReconcileOutcome::Skipped => "Reconcile already running, pass skipped".to_string(),
    }
}

pub fn related_links(report: &RelatedLinksReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Scope {}: {} of {} samples have placeholder related links",
        report.scope,
        report.flagged.len(),
        report.examined
    );
    for flagged in &report.flagged {
        let _ = writeln!(out, "  {} ({})", flagged.key, flagged.related_links);
    }
    write_skipped(&mut out, &report.skipped);
    out.push_str(&success(report.elapsed_ms));
    out
}

pub fn recent_samples(report: &RecentSamplesReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Scope {}: {} of {} samples updated since {}",
        report.scope,
        report.samples.len(),
        report.scanned,
        report.since.to_rfc3339()
    );
    for sample in &report.samples {
        let name = sample.name.as_deref().unwrap_or(&sample.key);
        let _ = writeln!(out, "  {} ({})", name, sample.updated_at.to_rfc3339());
    }
    if report.undated > 0 {
        let _ = writeln!(out, "{} samples have no readable updatedAt", report.undated);
    }
    write_skipped(&mut out, &report.skipped);
    out.push_str(&success(report.elapsed_ms));
    out
}
