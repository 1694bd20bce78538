//! Derived index maintenance: delete, populate, and the two combined.
//!
//! Populate only ever adds members. A clean rebuild deletes first, which is
//! what [`rebuild_index`] does unless asked for [`RebuildMode::Additive`].

use super::drive_pages;
use super::options::RepairOptions;
use crate::core::keys::{self, key, pfx};
use crate::core::{IndexKind, Result, SampleRef, Scope, StoreError};
use crate::storage::{SampleStore, timed};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildMode {
    /// Delete the scoped index, then populate it.
    #[default]
    Full,
    /// Populate only; stale members survive.
    Additive,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub index: IndexKind,
    pub scope: Scope,
    pub mode: RebuildMode,
    /// Index keys (or, for a scoped aspect-keyed delete, members) removed.
    pub deleted: usize,
    /// Membership adds applied.
    pub added: usize,
    pub elapsed_ms: u64,
}

/// First per-item failure of a write batch, if any.
fn first_failure<T>(results: Vec<std::result::Result<T, StoreError>>) -> Result<Vec<T>> {
    results.into_iter().collect()
}

/// Remove the `kind` index entries belonging to `scope`. Idempotent.
///
/// The subject-keyed index is keyed by subject, so a scoped delete drops
/// whole keys. The aspect-keyed index is keyed by aspect; under a scope only
/// the members naming subjects inside it are removed and every other
/// subject's membership is left in place.
pub async fn delete_index<S: SampleStore + ?Sized>(
    store: &S,
    kind: IndexKind,
    scope: &Scope,
    options: &RepairOptions,
) -> Result<usize> {
    let timeout = options.command_timeout;

    let deleted: usize = match kind {
        IndexKind::SubjectAspect => {
            let pattern = keys::scoped_pattern(pfx::SUBASPMAP, scope.as_str());
            info!(index = %kind, %pattern, "deleting index keys");
            drive_pages(store, pattern, options, |batch| async move {
                let deleted = timed(timeout, "del", store.delete_keys(&batch)).await?;
                debug!(deleted, "index keys deleted");
                Ok::<_, StoreError>(deleted)
            })
            .await?
            .into_iter()
            .sum()
        }
        IndexKind::AspectSubject if scope.is_all() => {
            let pattern = keys::scoped_pattern(pfx::ASPSUBMAP, "");
            info!(index = %kind, %pattern, "deleting index keys");
            drive_pages(store, pattern, options, |batch| async move {
                timed(timeout, "del", store.delete_keys(&batch)).await
            })
            .await?
            .into_iter()
            .sum()
        }
        IndexKind::AspectSubject => {
            let pattern = keys::scoped_pattern(pfx::ASPSUBMAP, "");
            info!(index = %kind, %scope, "removing scoped members from index");
            drive_pages(store, pattern, options, |batch| async move {
                let members = timed(timeout, "smembers", store.set_members_many(&batch)).await?;
                let mut removals = Vec::new();
                for (index_key, members) in batch.iter().zip(members) {
                    for member in members? {
                        if scope.contains_subject(&member) {
                            removals.push((index_key.clone(), member));
                        }
                    }
                }
                timed(timeout, "srem", store.remove_members(&removals)).await
            })
            .await?
            .into_iter()
            .sum()
        }
    };

    info!(index = %kind, scope = %scope, deleted, "index delete complete");
    Ok(deleted)
}

/// Add every sample under `scope` to the `kind` index. Never removes.
pub async fn populate_index<S: SampleStore + ?Sized>(
    store: &S,
    kind: IndexKind,
    scope: &Scope,
    options: &RepairOptions,
) -> Result<usize> {
    let timeout = options.command_timeout;
    info!(index = %kind, scope = %scope, "populating index from samples");

    let added: usize = drive_pages(store, scope.sample_pattern(), options, |batch| async move {
        let adds: Vec<(String, String)> = batch
            .iter()
            .filter_map(|sample_key| {
                let sample = SampleRef::from_key(sample_key);
                if sample.is_none() {
                    warn!(key = %sample_key, "unparseable sample key, not indexed");
                }
                sample
            })
            .map(|sample| kind.entry_for(&sample))
            .collect();
        let results = timed(timeout, "sadd", store.add_members(&adds)).await?;
        let applied = first_failure(results)?;
        debug!(added = applied.len(), "index entries added");
        Ok::<_, StoreError>(applied.len())
    })
    .await?
    .into_iter()
    .sum();

    info!(index = %kind, scope = %scope, added, "index populate complete");
    Ok(added)
}

/// Rebuild the `kind` index for `scope`.
pub async fn rebuild_index<S: SampleStore + ?Sized>(
    store: &S,
    kind: IndexKind,
    scope: &Scope,
    mode: RebuildMode,
    options: &RepairOptions,
) -> Result<RebuildReport> {
    let started = Instant::now();
    let deleted = match mode {
        RebuildMode::Full => delete_index(store, kind, scope, options).await?,
        RebuildMode::Additive => 0,
    };
    let added = populate_index(store, kind, scope, options).await?;

    Ok(RebuildReport {
        index: kind,
        scope: scope.clone(),
        mode,
        deleted,
        added,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

/// Derive the aspect-keyed index from the subject-keyed one.
///
/// Reads the master subject set, looks up each subject's
/// `samsto:subaspmap:` entry and adds the subject to the
/// `samsto:aspsubmap:` entry of every aspect found there.
pub async fn populate_aspect_map_from_subject_map<S: SampleStore + ?Sized>(
    store: &S,
    scope: &Scope,
    options: &RepairOptions,
) -> Result<usize> {
    let timeout = options.command_timeout;

    let subject_keys = timed(timeout, "smembers", store.set_members(key::SUBJECTS)).await?;
    let subjects: Vec<String> = keys::replace_prefix(&subject_keys, pfx::SUBJECT, "")
        .into_iter()
        .filter(|subject| scope.contains_subject(subject))
        .collect();
    info!(subjects = subjects.len(), scope = %scope, "deriving aspect map from subject map");

    let mut added = 0usize;
    for chunk in subjects.chunks(options.scan_count) {
        if options.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let map_keys = keys::replace_prefix(chunk, "", pfx::SUBASPMAP);
        let aspects = timed(timeout, "smembers", store.set_members_many(&map_keys)).await?;

        let mut adds = Vec::new();
        for (subject, aspects) in chunk.iter().zip(aspects) {
            match aspects {
                Ok(aspects) => {
                    for aspect in aspects {
                        adds.push((format!("{}{}", pfx::ASPSUBMAP, aspect), subject.clone()));
                    }
                }
                Err(err) => warn!(subject = %subject, error = %err, "cannot read subject map entry"),
            }
        }

        let results = timed(timeout, "sadd", store.add_members(&adds)).await?;
        added += first_failure(results)?.len();
    }

    info!(added, "aspect map derived");
    Ok(added)
}
