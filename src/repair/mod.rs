//! Consistency and repair engines for the sample store.
//!
//! - [`cleanup`]: prune samples that are orphaned, malformed or dangling and
//!   bring the master sample set in line with the records that exist.
//! - [`check`]: count how many samples a derived index reflects.
//! - [`rebuild`]: delete and repopulate a derived index.
//! - [`reconcile`]: periodic check, rebuilding whenever drift shows up.
//! - [`diagnostics`]: read-only reports on sample field contents.
//!
//! Every run builds and returns its own report; nothing is carried over
//! between invocations.

pub mod check;
pub mod cleanup;
pub mod diagnostics;
pub mod options;
pub mod rebuild;
pub mod reconcile;
pub mod validator;

pub use check::{CheckReport, check_index};
pub use cleanup::{CleanupEngine, CleanupReport, PruneReason, Pruned, Skipped};
pub use diagnostics::{
    FlaggedSample, RecentSample, RecentSamplesReport, RelatedLinksReport, check_related_links,
    recent_samples,
};
pub use options::RepairOptions;
pub use rebuild::{
    RebuildMode, RebuildReport, delete_index, populate_aspect_map_from_subject_map,
    populate_index, rebuild_index,
};
pub use reconcile::{ReconcileOutcome, ReconcileState, ReconcileWorker, Reconciler};
pub use validator::{SampleValidator, Violation, validate_sample};

use crate::core::Result;
use crate::storage::{KeyScanner, SampleStore};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tracing::debug;

/// Scan `pattern` and run `work` on every page.
///
/// Up to `max_in_flight` pages are processed while the scan keeps fetching.
/// All dispatched page work is joined before returning, so a report is never
/// produced while a page is still being evaluated. A scan error or a page
/// error stops further pages; work already in flight still runs to
/// completion and the first error is returned.
pub(crate) async fn drive_pages<S, F, Fut, T>(
    store: &S,
    pattern: String,
    options: &RepairOptions,
    mut work: F,
) -> Result<Vec<T>>
where
    S: SampleStore + ?Sized,
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut scanner = KeyScanner::new(store, pattern)
        .count(options.scan_count)
        .timeout(options.command_timeout)
        .cancel_on(options.cancel.clone())
        .dedupe();

    let max_in_flight = options.max_in_flight.max(1);
    let mut in_flight = FuturesUnordered::new();
    let mut outputs = Vec::new();
    let mut failure = None;
    let mut scanning = true;

    while scanning {
        tokio::select! {
            biased;
            Some(done) = in_flight.next(), if !in_flight.is_empty() => match done {
                Ok(output) => outputs.push(output),
                Err(err) => {
                    failure = Some(err);
                    scanning = false;
                }
            },
            batch = scanner.next_batch(), if in_flight.len() < max_in_flight => match batch {
                Ok(Some(keys)) => in_flight.push(work(keys)),
                Ok(None) => scanning = false,
                Err(err) => {
                    failure = Some(err);
                    scanning = false;
                }
            },
        }
    }

    // Barrier: every dispatched page finishes before the scan counts as done.
    while let Some(done) = in_flight.next().await {
        match done {
            Ok(output) => outputs.push(output),
            Err(err) => {
                failure.get_or_insert(err);
            }
        }
    }

    debug!(pattern = %scanner.pattern(), pages = scanner.pages(), "scan drained");

    match failure {
        Some(err) => Err(err),
        None => Ok(outputs),
    }
}
