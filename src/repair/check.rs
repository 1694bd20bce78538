use super::drive_pages;
use super::options::RepairOptions;
use crate::core::{IndexKind, Result, SampleRef, Scope};
use crate::storage::{SampleStore, timed};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Missing samples kept in a report for diagnostics.
pub const MISSING_SAMPLE_LIMIT: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub index: IndexKind,
    pub scope: Scope,
    /// Samples examined, excluding those the store failed to answer for.
    pub total: usize,
    /// Samples whose index membership test succeeded.
    pub found_in_map: usize,
    /// Sample keys that do not parse. Kept out of `total` and `missing`.
    pub unparseable: usize,
    /// Samples skipped because the membership test failed.
    pub errors: usize,
    /// First few samples missing from the index.
    pub missing: Vec<String>,
    pub elapsed_ms: u64,
}

impl CheckReport {
    /// Samples not reflected in the index.
    pub fn drift(&self) -> usize {
        self.total - self.found_in_map
    }

    pub fn is_consistent(&self) -> bool {
        self.drift() == 0
    }
}

#[derive(Default)]
struct PageTally {
    total: usize,
    found: usize,
    unparseable: usize,
    errors: usize,
    missing: Vec<String>,
}

async fn check_page<S: SampleStore + ?Sized>(
    store: &S,
    kind: IndexKind,
    options: &RepairOptions,
    batch: Vec<String>,
) -> Result<PageTally> {
    let mut tally = PageTally::default();
    let mut samples = Vec::with_capacity(batch.len());
    for sample_key in batch {
        match SampleRef::from_key(&sample_key) {
            Some(sample) => samples.push(sample),
            None => {
                // Not a sample, so no index can hold it.
                debug!(key = %sample_key, "unparseable sample key, not counted");
                tally.unparseable += 1;
            }
        }
    }

    let checks: Vec<(String, String)> = samples.iter().map(|s| kind.entry_for(s)).collect();
    let results = match timed(
        options.command_timeout,
        "sismember",
        store.is_member_many(&checks),
    )
    .await
    {
        Ok(results) => results,
        Err(err) => {
            warn!(error = %err, samples = samples.len(), "membership batch failed, skipping page");
            tally.errors += samples.len();
            return Ok(tally);
        }
    };

    for (sample, found) in samples.into_iter().zip(results) {
        match found {
            Ok(true) => {
                tally.total += 1;
                tally.found += 1;
            }
            Ok(false) => {
                debug!(key = %sample.key, index = %kind, "sample missing from index");
                tally.total += 1;
                tally.missing.push(sample.key);
            }
            Err(err) => {
                warn!(key = %sample.key, error = %err, "membership test failed");
                tally.errors += 1;
            }
        }
    }
    Ok(tally)
}

/// Count how many samples under `scope` the `kind` index reflects.
/// Read-only.
pub async fn check_index<S: SampleStore + ?Sized>(
    store: &S,
    kind: IndexKind,
    scope: &Scope,
    options: &RepairOptions,
) -> Result<CheckReport> {
    let started = Instant::now();
    info!(index = %kind, scope = %scope, "checking samples against index");

    let pages = drive_pages(store, scope.sample_pattern(), options, |batch| {
        check_page(store, kind, options, batch)
    })
    .await?;

    let mut report = CheckReport {
        index: kind,
        scope: scope.clone(),
        ..CheckReport::default()
    };
    for page in pages {
        report.total += page.total;
        report.found_in_map += page.found;
        report.unparseable += page.unparseable;
        report.errors += page.errors;
        let room = MISSING_SAMPLE_LIMIT.saturating_sub(report.missing.len());
        report.missing.extend(page.missing.into_iter().take(room));
    }
    report.elapsed_ms = started.elapsed().as_millis() as u64;

    info!(
        index = %kind,
        scope = %scope,
        total = report.total,
        found_in_map = report.found_in_map,
        unparseable = report.unparseable,
        errors = report.errors,
        "index check complete"
    );
    Ok(report)
}
