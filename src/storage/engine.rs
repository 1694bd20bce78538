use crate::core::{ItemResult, Result};
use async_trait::async_trait;
use std::collections::HashMap;

/// One page of a cursor scan. A `cursor` of 0 means the scan is finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Store backend - the key-value operations the repair engines rely on.
///
/// Batched calls are pipelined: the returned vector has one entry per input,
/// in input order. An `Err` on the outer result means the whole batch
/// failed; an `Err` item means only that command failed.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Fetch one page of keys matching the glob `pattern`, starting at `cursor`.
    /// `count` is a hint, pages may be shorter or longer.
    async fn scan_page(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage>;

    /// All members of a set.
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Members of several sets.
    async fn set_members_many(&self, keys: &[String]) -> Result<Vec<ItemResult<Vec<String>>>>;

    /// Existence check per key.
    async fn exists_many(&self, keys: &[String]) -> Result<Vec<ItemResult<bool>>>;

    /// All fields of each hash. Missing keys yield an empty map.
    async fn hash_get_all_many(
        &self,
        keys: &[String],
    ) -> Result<Vec<ItemResult<HashMap<String, String>>>>;

    /// Membership test per `(set, member)` pair.
    async fn is_member_many(&self, checks: &[(String, String)]) -> Result<Vec<ItemResult<bool>>>;

    /// Add each `(set, member)` pair; `true` when the member was new.
    async fn add_members(&self, adds: &[(String, String)]) -> Result<Vec<ItemResult<bool>>>;

    /// Remove each `(set, member)` pair; returns how many were removed.
    async fn remove_members(&self, removes: &[(String, String)]) -> Result<usize>;

    /// Delete keys; absent keys are ignored. Returns how many existed.
    async fn delete_keys(&self, keys: &[String]) -> Result<usize>;
}
