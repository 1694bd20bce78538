pub mod engine;
pub mod memory;
pub mod pattern;
pub mod redis_store;
pub mod scanner;

pub use engine::{SampleStore, ScanPage};
pub use memory::InMemoryStore;
pub use redis_store::RedisStore;
pub use scanner::{CancelHandle, CancelSignal, KeyScanner, cancel_pair};

use crate::core::{Result, StoreError};
use std::future::Future;
use std::time::Duration;

/// Bound a store call by `limit`. Expiry yields [`StoreError::Timeout`],
/// never a retry.
pub async fn timed<T, F>(limit: Option<Duration>, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| StoreError::Timeout { op, after })?,
        None => fut.await,
    }
}
