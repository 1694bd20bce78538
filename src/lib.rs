// ============================================================================
// samstore library
// ============================================================================

//! Consistency checking and repair for a redis-backed sample store.
//!
//! Samples live as hashes under `samsto:sample:<subject>|<aspect>` and are
//! registered in the master set `samsto:samples`. Two derived indexes map
//! subjects to aspects and back. This crate prunes broken samples, checks
//! the indexes against the samples and rebuilds them, once or on a timer.
//!
//! # Examples
//!
//! ```
//! use samstore::{CleanupEngine, InMemoryStore, SampleRecord};
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryStore::new();
//! store.put_subject("canada").await;
//! store.put_aspect("temperature").await;
//! let record = SampleRecord::new("canada|temperature", "subject-1", "aspect-1");
//! store.put_registered_sample("canada|temperature", &record).await;
//! store.put_member("samsto:samples", "samsto:sample:gone|missing").await;
//!
//! let report = CleanupEngine::new(&store).run().await.unwrap();
//! assert_eq!(report.master_removed, 1);
//! # });
//! ```

pub mod connection;
pub mod core;
pub mod repair;
pub mod storage;

pub use connection::config::StoreConfig;
pub use core::{IndexKind, Result, SampleRecord, SampleRef, Scope, StoreError};
pub use repair::{
    CheckReport, CleanupEngine, CleanupReport, RebuildMode, RebuildReport, ReconcileOutcome,
    ReconcileWorker, Reconciler, RecentSamplesReport, RelatedLinksReport, RepairOptions,
    check_index, check_related_links, delete_index, populate_aspect_map_from_subject_map,
    populate_index, rebuild_index, recent_samples,
};
pub use storage::{CancelHandle, CancelSignal, InMemoryStore, RedisStore, SampleStore, cancel_pair};
