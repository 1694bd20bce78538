//! Sample cleanup.
//!
//! Brings the master sample set (`samsto:samples`) and the sample records in
//! line with each other:
//!
//! 1. master members without a record are dropped from the master set;
//! 2. every `samsto:sample:*` key is scanned; keys that do not parse, that
//!    point at a missing subject or aspect, that are not in the master set,
//!    or whose record fails validation are deleted (and removed from the
//!    master set when they were members);
//! 3. all deletions and removals are committed in batches after the scan.
//!
//! Preview runs the same evaluation and skips step 3, so it reports exactly
//! what a live run would change.

use super::options::RepairOptions;
use super::validator::{SampleValidator, Violation};
use super::drive_pages;
use crate::core::keys::{self, key};
use crate::core::{Result, SampleRecord, SampleRef, Scope, StoreError};
use crate::storage::{SampleStore, timed};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Why a key is pruned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PruneReason {
    /// Master set member without a backing record.
    NoRecord,
    /// Key does not carry a `<subject>|<aspect>` name.
    MalformedKey,
    /// Referenced subject or aspect record is missing.
    DanglingReference { missing: Vec<String> },
    /// Record exists but is not a master set member.
    NotInMaster,
    /// Record fails validation.
    InvalidRecord { violation: Violation },
}

impl fmt::Display for PruneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRecord => write!(f, "no record"),
            Self::MalformedKey => write!(f, "malformed key"),
            Self::DanglingReference { missing } => {
                write!(f, "dangling reference ({})", missing.join(", "))
            }
            Self::NotInMaster => write!(f, "not in master list"),
            Self::InvalidRecord { violation } => write!(f, "invalid record: {}", violation),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pruned {
    pub key: String,
    #[serde(flatten)]
    pub reason: PruneReason,
}

/// A key left alone because the store could not answer for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub scope: Scope,
    pub preview: bool,
    /// Master set members examined.
    pub master_members: usize,
    /// Sample keys produced by the scan.
    pub scanned: usize,
    /// Records that are (or in preview, would be) deleted.
    pub deleted_records: Vec<Pruned>,
    /// Master set entries that are (or would be) removed.
    pub master_removals: Vec<Pruned>,
    pub skipped: Vec<Skipped>,
    /// Keys the store actually deleted. Always 0 in preview.
    pub records_deleted: usize,
    /// Entries the store actually removed. Always 0 in preview.
    pub master_removed: usize,
    pub elapsed_ms: u64,
    #[serde(skip)]
    seen_deleted: HashSet<String>,
    #[serde(skip)]
    seen_removed: HashSet<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.deleted_records.is_empty() && self.master_removals.is_empty()
    }

    pub fn deleted_keys(&self) -> Vec<&str> {
        self.deleted_records.iter().map(|p| p.key.as_str()).collect()
    }

    pub fn removed_keys(&self) -> Vec<&str> {
        self.master_removals.iter().map(|p| p.key.as_str()).collect()
    }

    fn prune(&mut self, key: &str, reason: PruneReason, delete: bool, remove: bool) {
        if delete && self.seen_deleted.insert(key.to_string()) {
            self.deleted_records.push(Pruned {
                key: key.to_string(),
                reason: reason.clone(),
            });
        }
        if remove && self.seen_removed.insert(key.to_string()) {
            self.master_removals.push(Pruned {
                key: key.to_string(),
                reason,
            });
        }
    }

    fn merge(&mut self, page: PageVerdict) {
        self.scanned += page.scanned;
        for decision in page.decisions {
            self.prune(&decision.key, decision.reason, decision.delete, decision.remove);
        }
        self.skipped.extend(page.skipped);
    }
}

struct Decision {
    key: String,
    reason: PruneReason,
    delete: bool,
    remove: bool,
}

#[derive(Default)]
struct PageVerdict {
    scanned: usize,
    decisions: Vec<Decision>,
    skipped: Vec<Skipped>,
}

impl PageVerdict {
    fn skip(&mut self, key: &str, err: &StoreError) {
        warn!(key, error = %err, "skipping sample, store did not answer");
        self.skipped.push(Skipped {
            key: key.to_string(),
            error: err.to_string(),
        });
    }
}

pub struct CleanupEngine<'a, S: SampleStore + ?Sized> {
    store: &'a S,
    scope: Scope,
    options: RepairOptions,
    validator: SampleValidator,
}

impl<'a, S: SampleStore + ?Sized> CleanupEngine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            scope: Scope::all(),
            options: RepairOptions::default(),
            validator: SampleValidator::strict(),
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn options(mut self, options: RepairOptions) -> Self {
        self.options = options;
        self
    }

    pub fn validator(mut self, validator: SampleValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Evaluate without writing anything.
    pub async fn preview(&self) -> Result<CleanupReport> {
        let started = Instant::now();
        let mut report = self.evaluate().await?;
        report.preview = true;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Evaluate, then delete and remove everything found.
    pub async fn run(&self) -> Result<CleanupReport> {
        let started = Instant::now();
        let mut report = self.evaluate().await?;
        self.commit(&mut report).await?;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    async fn evaluate(&self) -> Result<CleanupReport> {
        let timeout = self.options.command_timeout;
        let mut report = CleanupReport {
            scope: self.scope.clone(),
            ..CleanupReport::default()
        };

        info!(scope = %self.scope, "reading master sample list");
        let master: HashSet<String> = timed(timeout, "smembers", self.store.set_members(key::SAMPLES))
            .await?
            .into_iter()
            .filter(|member| self.scope.contains_subject(keys::sample_name_from_key(member)))
            .collect();
        report.master_members = master.len();

        self.check_master_members(&master, &mut report).await?;

        info!(scope = %self.scope, "scanning sample keys");
        let pages = drive_pages(
            self.store,
            self.scope.sample_pattern(),
            &self.options,
            |batch| self.evaluate_page(batch, &master),
        )
        .await?;
        for page in pages {
            report.merge(page);
        }

        info!(
            scope = %self.scope,
            scanned = report.scanned,
            deletions = report.deleted_records.len(),
            removals = report.master_removals.len(),
            skipped = report.skipped.len(),
            "sample evaluation complete"
        );
        Ok(report)
    }

    /// Master members whose record is gone.
    async fn check_master_members(
        &self,
        master: &HashSet<String>,
        report: &mut CleanupReport,
    ) -> Result<()> {
        let mut members: Vec<String> = master.iter().cloned().collect();
        members.sort();
        for chunk in members.chunks(self.options.scan_count) {
            let results = match timed(
                self.options.command_timeout,
                "exists",
                self.store.exists_many(chunk),
            )
            .await
            {
                Ok(results) => results,
                Err(err) => {
                    for member in chunk {
                        warn!(key = %member, error = %err, "skipping master member");
                        report.skipped.push(Skipped {
                            key: member.clone(),
                            error: err.to_string(),
                        });
                    }
                    continue;
                }
            };

            for (member, exists) in chunk.iter().zip(results) {
                match exists {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(key = %member, "master member has no record");
                        report.prune(member, PruneReason::NoRecord, false, true);
                    }
                    Err(err) => {
                        warn!(key = %member, error = %err, "skipping master member");
                        report.skipped.push(Skipped {
                            key: member.clone(),
                            error: err.to_string(),
                        });
                    }
                }
            }

            if self.options.cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
        }
        Ok(())
    }

    async fn evaluate_page(&self, batch: Vec<String>, master: &HashSet<String>) -> Result<PageVerdict> {
        let timeout = self.options.command_timeout;
        let mut verdict = PageVerdict {
            scanned: batch.len(),
            ..PageVerdict::default()
        };
        let decide = |verdict: &mut PageVerdict, key: &str, reason: PruneReason, unregister: bool| {
            let member = master.contains(key);
            debug!(key, reason = %reason, member, "pruning sample");
            verdict.decisions.push(Decision {
                key: key.to_string(),
                reason,
                delete: true,
                remove: unregister && member,
            });
        };

        // Keys that do not even name a sample.
        let mut parsed = Vec::with_capacity(batch.len());
        for sample_key in &batch {
            match SampleRef::from_key(sample_key) {
                Some(sample) => parsed.push(sample),
                None => decide(&mut verdict, sample_key, PruneReason::MalformedKey, true),
            }
        }

        // Subject and aspect records must exist.
        let reference_keys: Vec<String> = parsed
            .iter()
            .flat_map(|s| [s.subject_key(), s.aspect_key()])
            .collect();
        let exists = match timed(timeout, "exists", self.store.exists_many(&reference_keys)).await {
            Ok(exists) => exists,
            Err(err) => {
                for sample in &parsed {
                    verdict.skip(&sample.key, &err);
                }
                return Ok(verdict);
            }
        };

        if exists.len() != reference_keys.len() {
            return Err(StoreError::Protocol(format!(
                "exists returned {} replies for {} keys",
                exists.len(),
                reference_keys.len()
            )));
        }

        let mut referenced = Vec::with_capacity(parsed.len());
        for (sample, pair) in parsed.into_iter().zip(exists.chunks_exact(2)) {
            let (subject, aspect) = match (&pair[0], &pair[1]) {
                (Ok(subject), Ok(aspect)) => (*subject, *aspect),
                (Err(err), _) | (_, Err(err)) => {
                    verdict.skip(&sample.key, err);
                    continue;
                }
            };
            if subject && aspect {
                referenced.push(sample);
                continue;
            }
            let mut missing = Vec::new();
            if !subject {
                missing.push(sample.subject_key());
            }
            if !aspect {
                missing.push(sample.aspect_key());
            }
            decide(
                &mut verdict,
                &sample.key,
                PruneReason::DanglingReference { missing },
                true,
            );
        }

        // Records outside the master set go; members are read and validated.
        let mut to_read = Vec::with_capacity(referenced.len());
        for sample in referenced {
            if master.contains(&sample.key) {
                to_read.push(sample.key);
            } else {
                decide(&mut verdict, &sample.key, PruneReason::NotInMaster, false);
            }
        }

        let records = match timed(timeout, "hgetall", self.store.hash_get_all_many(&to_read)).await {
            Ok(records) => records,
            Err(err) => {
                for sample_key in &to_read {
                    verdict.skip(sample_key, &err);
                }
                return Ok(verdict);
            }
        };

        for (sample_key, fields) in to_read.iter().zip(records) {
            let fields = match fields {
                Ok(fields) => fields,
                Err(err) => {
                    verdict.skip(sample_key, &err);
                    continue;
                }
            };
            if fields.is_empty() {
                // Deleted between the scan and the read.
                debug!(key = %sample_key, "sample vanished during scan");
                verdict.decisions.push(Decision {
                    key: sample_key.clone(),
                    reason: PruneReason::NoRecord,
                    delete: false,
                    remove: true,
                });
                continue;
            }
            let record = SampleRecord::from_hash(&fields);
            if let Err(violation) = self.validator.validate(sample_key, &record) {
                decide(
                    &mut verdict,
                    sample_key,
                    PruneReason::InvalidRecord { violation },
                    true,
                );
            }
        }

        Ok(verdict)
    }

    /// Apply the report's deletions and removals. Failures are returned as-is;
    /// destructive commands are never retried.
    async fn commit(&self, report: &mut CleanupReport) -> Result<()> {
        let timeout = self.options.command_timeout;
        let chunk_size = self.options.scan_count;

        let doomed: Vec<String> = report.deleted_records.iter().map(|p| p.key.clone()).collect();
        for chunk in doomed.chunks(chunk_size) {
            match timed(timeout, "del", self.store.delete_keys(chunk)).await {
                Ok(deleted) => report.records_deleted += deleted,
                Err(err) => {
                    error!(error = %err, deleted = report.records_deleted, "deleting samples failed");
                    return Err(err);
                }
            }
        }

        let removals: Vec<(String, String)> = report
            .master_removals
            .iter()
            .map(|p| (key::SAMPLES.to_string(), p.key.clone()))
            .collect();
        for chunk in removals.chunks(chunk_size) {
            match timed(timeout, "srem", self.store.remove_members(chunk)).await {
                Ok(removed) => report.master_removed += removed,
                Err(err) => {
                    error!(error = %err, removed = report.master_removed, "updating master sample list failed");
                    return Err(err);
                }
            }
        }

        info!(
            deleted = report.records_deleted,
            removed = report.master_removed,
            "cleanup committed"
        );
        Ok(())
    }
}

