//! Periodic reconciliation of a derived index against the samples.
//!
//! Each pass checks the index; any drift triggers a full rebuild of the
//! scope. Passes never overlap: a pass requested while another is running
//! is skipped, and the background worker drops ticks it fell behind on.

use super::check::{CheckReport, check_index};
use super::options::RepairOptions;
use super::rebuild::{RebuildMode, RebuildReport, rebuild_index};
use crate::core::{IndexKind, Result, Scope, StoreError};
use crate::storage::SampleStore;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

/// Smallest accepted interval between passes.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    Idle,
    Reconciling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The index reflected every sample; nothing was written.
    Consistent { check: CheckReport },
    /// Drift was found and the scope was rebuilt.
    Rebuilt {
        check: CheckReport,
        rebuild: RebuildReport,
    },
    /// Another pass was still running.
    Skipped,
}

impl ReconcileOutcome {
    pub fn rebuilt(&self) -> bool {
        matches!(self, Self::Rebuilt { .. })
    }
}

/// Clears the running flag however the pass ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Reconciler<S: SampleStore + ?Sized> {
    store: Arc<S>,
    index: IndexKind,
    scope: Scope,
    options: RepairOptions,
    running: AtomicBool,
    passes: AtomicU64,
}

impl<S: SampleStore + ?Sized> Reconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            index: IndexKind::SubjectAspect,
            scope: Scope::all(),
            options: RepairOptions::default(),
            running: AtomicBool::new(false),
            passes: AtomicU64::new(0),
        }
    }

    pub fn index(mut self, index: IndexKind) -> Self {
        self.index = index;
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn options(mut self, options: RepairOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> ReconcileState {
        if self.running.load(Ordering::Acquire) {
            ReconcileState::Reconciling
        } else {
            ReconcileState::Idle
        }
    }

    /// Completed passes, skipped ones excluded.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Run a single check-then-rebuild pass.
    pub async fn reconcile_once(&self) -> Result<ReconcileOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(index = %self.index, scope = %self.scope, "reconcile already running, skipping");
            return Ok(ReconcileOutcome::Skipped);
        }
        let _guard = RunningGuard(&self.running);

        let run_id = Uuid::new_v4();
        let span = info_span!("reconcile", %run_id, index = %self.index, scope = %self.scope);
        let outcome = self.pass().instrument(span).await;
        self.passes.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    async fn pass(&self) -> Result<ReconcileOutcome> {
        let store = self.store.as_ref();
        let check = check_index(store, self.index, &self.scope, &self.options).await?;
        if check.is_consistent() {
            info!(total = check.total, "index consistent");
            return Ok(ReconcileOutcome::Consistent { check });
        }

        info!(
            total = check.total,
            found_in_map = check.found_in_map,
            drift = check.drift(),
            "index drift detected, rebuilding"
        );
        let rebuild = rebuild_index(
            store,
            self.index,
            &self.scope,
            RebuildMode::Full,
            &self.options,
        )
        .await?;
        Ok(ReconcileOutcome::Rebuilt { check, rebuild })
    }
}

/// Background task running [`Reconciler::reconcile_once`] on a fixed
/// interval. The first pass starts immediately.
pub struct ReconcileWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl ReconcileWorker {
    pub fn spawn<S>(reconciler: Arc<Reconciler<S>>, every: Duration) -> Self
    where
        S: SampleStore + ?Sized + 'static,
    {
        let every = every.max(MIN_INTERVAL);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let join_handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = every.as_millis() as u64, "reconcile worker started");

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        match reconciler.reconcile_once().await {
                            Ok(outcome) => {
                                if outcome.rebuilt() {
                                    info!("reconcile pass rebuilt index");
                                }
                            }
                            Err(err) => error!(error = %err, "reconcile pass failed"),
                        }
                    }
                }
            }

            info!("reconcile worker stopped");
        });

        Self {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    /// Signals the worker to stop and waits for the current pass to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| StoreError::Worker(format!("reconcile worker join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for ReconcileWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
