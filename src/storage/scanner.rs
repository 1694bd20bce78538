//! Cursor-driven enumeration of keys matching a glob.
//!
//! A [`KeyScanner`] hands out one batch per store round trip and never holds
//! more than the current page, plus (when deduplicating) the keys already
//! returned. A failed page ends the scan: the caller gets the error and the
//! scanner refuses further pages, since nothing can be said about the keys it
//! did not reach.

use super::engine::SampleStore;
use super::timed;
use crate::core::{Result, StoreError};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Default `COUNT` hint for scans.
pub const DEFAULT_SCAN_COUNT: usize = 100;

/// Receiving side of a cancellation request.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once cancellation is requested. Pending forever for
    /// [`CancelSignal::never`] or after every handle is dropped.
    pub async fn cancelled(&mut self) {
        match self.rx.as_mut() {
            Some(rx) => {
                if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// Sending side of a cancellation request.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: Some(self.tx.subscribe()),
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
}

pub struct KeyScanner<'a, S: SampleStore + ?Sized> {
    store: &'a S,
    pattern: String,
    count: usize,
    cursor: u64,
    finished: bool,
    pages: usize,
    cancel: CancelSignal,
    timeout: Option<Duration>,
    seen: Option<HashSet<String>>,
}

impl<'a, S: SampleStore + ?Sized> KeyScanner<'a, S> {
    pub fn new(store: &'a S, pattern: impl Into<String>) -> Self {
        Self {
            store,
            pattern: pattern.into(),
            count: DEFAULT_SCAN_COUNT,
            cursor: 0,
            finished: false,
            pages: 0,
            cancel: CancelSignal::never(),
            timeout: None,
            seen: None,
        }
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count.max(1);
        self
    }

    pub fn cancel_on(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drop keys the scan already produced. Redis may return a key more
    /// than once over the life of a cursor.
    pub fn dedupe(mut self) -> Self {
        self.seen = Some(HashSet::new());
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Pages fetched so far, empty ones included.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Next non-empty batch, or `None` once the cursor wraps around.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<String>>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if self.cancel.is_cancelled() {
                self.finished = true;
                debug!(pattern = %self.pattern, pages = self.pages, "scan cancelled");
                return Err(StoreError::Cancelled);
            }

            let page = timed(
                self.timeout,
                "scan",
                self.store.scan_page(self.cursor, &self.pattern, self.count),
            )
            .await;
            let page = match page {
                Ok(page) => page,
                Err(err) => {
                    self.finished = true;
                    return Err(match err {
                        StoreError::Scan(_) | StoreError::Timeout { .. } => err,
                        other => StoreError::Scan(other.to_string()),
                    });
                }
            };

            self.pages += 1;
            self.cursor = page.cursor;
            if self.cursor == 0 {
                self.finished = true;
            }

            let keys = match self.seen.as_mut() {
                Some(seen) => page
                    .keys
                    .into_iter()
                    .filter(|k| seen.insert(k.clone()))
                    .collect::<Vec<_>>(),
                None => page.keys,
            };

            trace!(pattern = %self.pattern, page = self.pages, keys = keys.len(), "scan page");
            if !keys.is_empty() {
                return Ok(Some(keys));
            }
        }
    }
}
