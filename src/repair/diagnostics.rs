//! Read-only data diagnostics.
//!
//! - [`check_related_links`]: master-set samples whose `relatedLinks` field
//!   holds a serialized `null`/`undefined` placeholder instead of a list.
//! - [`recent_samples`]: samples whose `updatedAt` is at or after a cutoff.
//!
//! Neither writes to the store. Store failures on single keys are reported
//! as skipped; a failed scan aborts.

use super::cleanup::Skipped;
use super::drive_pages;
use super::options::RepairOptions;
use crate::core::keys::{self, key};
use crate::core::{Result, Scope, StoreError};
use crate::storage::{SampleStore, timed};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const RELATED_LINKS_FIELD: &str = "relatedLinks";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Values left behind by writers that stringified a missing list.
const PLACEHOLDER_LINKS: [&str; 2] = ["null", "undefined"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlaggedSample {
    pub key: String,
    pub name: Option<String>,
    pub related_links: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelatedLinksReport {
    pub scope: Scope,
    /// Master members whose record was read.
    pub examined: usize,
    pub flagged: Vec<FlaggedSample>,
    pub skipped: Vec<Skipped>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentSample {
    pub key: String,
    pub name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecentSamplesReport {
    pub scope: Scope,
    pub since: DateTime<Utc>,
    /// Sample records read.
    pub scanned: usize,
    /// Newest first.
    pub samples: Vec<RecentSample>,
    /// Records without a readable `updatedAt`.
    pub undated: usize,
    pub skipped: Vec<Skipped>,
    pub elapsed_ms: u64,
}

/// Parse an `updatedAt` value: RFC 3339, or epoch milliseconds.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

fn skipped(key: &str, err: &StoreError) -> Skipped {
    warn!(key, error = %err, "skipping sample, store did not answer");
    Skipped {
        key: key.to_string(),
        error: err.to_string(),
    }
}

/// Report master-set samples under `scope` whose `relatedLinks` is a
/// `"null"` or `"undefined"` string.
pub async fn check_related_links<S: SampleStore + ?Sized>(
    store: &S,
    scope: &Scope,
    options: &RepairOptions,
) -> Result<RelatedLinksReport> {
    let started = Instant::now();
    let timeout = options.command_timeout;
    let mut report = RelatedLinksReport {
        scope: scope.clone(),
        ..RelatedLinksReport::default()
    };

    info!(scope = %scope, "reading master sample list");
    let mut members: Vec<String> = timed(timeout, "smembers", store.set_members(key::SAMPLES))
        .await?
        .into_iter()
        .filter(|member| scope.contains_subject(keys::sample_name_from_key(member)))
        .collect();
    members.sort();

    for chunk in members.chunks(options.scan_count) {
        if options.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let records = match timed(timeout, "hgetall", store.hash_get_all_many(chunk)).await {
            Ok(records) => records,
            Err(err) => {
                report
                    .skipped
                    .extend(chunk.iter().map(|member| skipped(member, &err)));
                continue;
            }
        };

        for (member, fields) in chunk.iter().zip(records) {
            let fields = match fields {
                Ok(fields) => fields,
                Err(err) => {
                    report.skipped.push(skipped(member, &err));
                    continue;
                }
            };
            if fields.is_empty() {
                debug!(key = %member, "master member has no record");
                continue;
            }
            report.examined += 1;

            if let Some(links) = fields.get(RELATED_LINKS_FIELD) {
                if PLACEHOLDER_LINKS.contains(&links.as_str()) {
                    debug!(key = %member, related_links = %links, "placeholder related links");
                    report.flagged.push(FlaggedSample {
                        key: member.clone(),
                        name: fields.get("name").cloned(),
                        related_links: links.clone(),
                    });
                }
            }
        }
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        scope = %scope,
        examined = report.examined,
        flagged = report.flagged.len(),
        skipped = report.skipped.len(),
        "related links check complete"
    );
    Ok(report)
}

#[derive(Default)]
struct RecentPage {
    scanned: usize,
    samples: Vec<RecentSample>,
    undated: usize,
    skipped: Vec<Skipped>,
}

/// `None` when undated, `Some(None)` when older than `since`.
fn updated_since(
    fields: &HashMap<String, String>,
    since: DateTime<Utc>,
) -> Option<Option<DateTime<Utc>>> {
    let updated_at = parse_timestamp(fields.get(UPDATED_AT_FIELD)?)?;
    Some((updated_at >= since).then_some(updated_at))
}

async fn recent_page<S: SampleStore + ?Sized>(
    store: &S,
    options: &RepairOptions,
    since: DateTime<Utc>,
    batch: Vec<String>,
) -> Result<RecentPage> {
    let mut page = RecentPage::default();
    let records = match timed(
        options.command_timeout,
        "hgetall",
        store.hash_get_all_many(&batch),
    )
    .await
    {
        Ok(records) => records,
        Err(err) => {
            page.skipped = batch
                .iter()
                .map(|sample_key| skipped(sample_key, &err))
                .collect();
            return Ok(page);
        }
    };

    for (sample_key, fields) in batch.into_iter().zip(records) {
        let fields = match fields {
            Ok(fields) => fields,
            Err(err) => {
                page.skipped.push(skipped(&sample_key, &err));
                continue;
            }
        };
        if fields.is_empty() {
            continue;
        }
        page.scanned += 1;

        match updated_since(&fields, since) {
            None => {
                debug!(key = %sample_key, "sample has no readable updatedAt");
                page.undated += 1;
            }
            Some(None) => {}
            Some(Some(updated_at)) => page.samples.push(RecentSample {
                name: fields.get("name").cloned(),
                key: sample_key,
                updated_at,
            }),
        }
    }
    Ok(page)
}

/// List samples under `scope` updated at or after `since`.
pub async fn recent_samples<S: SampleStore + ?Sized>(
    store: &S,
    scope: &Scope,
    since: DateTime<Utc>,
    options: &RepairOptions,
) -> Result<RecentSamplesReport> {
    let started = Instant::now();
    info!(scope = %scope, %since, "scanning for recently updated samples");

    let pages = drive_pages(store, scope.sample_pattern(), options, |batch| {
        recent_page(store, options, since, batch)
    })
    .await?;

    let mut report = RecentSamplesReport {
        scope: scope.clone(),
        since,
        ..RecentSamplesReport::default()
    };
    for page in pages {
        report.scanned += page.scanned;
        report.undated += page.undated;
        report.samples.extend(page.samples);
        report.skipped.extend(page.skipped);
    }
    report
        .samples
        .sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.key.cmp(&b.key)));
    report.elapsed_ms = started.elapsed().as_millis() as u64;

    info!(
        scope = %scope,
        scanned = report.scanned,
        recent = report.samples.len(),
        undated = report.undated,
        "recent sample scan complete"
    );
    Ok(report)
}
