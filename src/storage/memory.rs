use super::engine::{SampleStore, ScanPage};
use super::pattern::glob_match;
use crate::core::keys::{self, key};
use crate::core::{ItemResult, Result, SampleRecord, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Hash(HashMap<String, String>),
    /// Insertion ordered, no duplicates.
    Set(Vec<String>),
}

/// Injected failures, used to exercise the error paths of the engines.
#[derive(Debug, Default)]
struct Faults {
    /// Scans fail once this many pages have been served.
    scan_fail_after: Option<usize>,
    /// Reads of these keys fail per item.
    failing_keys: HashSet<String>,
    fail_writes: bool,
    latency: Option<Duration>,
}

/// In-process store with redis semantics for the commands the engines use.
pub struct InMemoryStore {
    data: RwLock<BTreeMap<String, Entry>>,
    /// Open scan cursors, mapped to the last key they examined.
    cursors: Mutex<HashMap<u64, String>>,
    next_cursor: AtomicU64,
    pages_served: AtomicUsize,
    faults: Mutex<Faults>,
    /// Scan patterns and mutated keys, in call order.
    journal: Mutex<Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            cursors: Mutex::new(HashMap::new()),
            next_cursor: AtomicU64::new(1),
            pages_served: AtomicUsize::new(0),
            faults: Mutex::new(Faults::default()),
            journal: Mutex::new(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Seeding and inspection
    // ------------------------------------------------------------------

    pub async fn put_hash(&self, key: &str, fields: HashMap<String, String>) {
        self.data.write().await.insert(key.to_string(), Entry::Hash(fields));
    }

    pub async fn put_member(&self, set: &str, member: &str) {
        let mut data = self.data.write().await;
        let entry = data
            .entry(set.to_string())
            .or_insert_with(|| Entry::Set(Vec::new()));
        if let Entry::Set(members) = entry {
            if !members.iter().any(|m| m == member) {
                members.push(member.to_string());
            }
        }
    }

    /// Store a sample hash under `samsto:sample:<name>`.
    pub async fn put_sample(&self, name: &str, record: &SampleRecord) -> String {
        let sample_key = keys::sample_key(name);
        self.put_hash(&sample_key, record.to_hash()).await;
        sample_key
    }

    /// Store a sample and register it in the master sample set.
    pub async fn put_registered_sample(&self, name: &str, record: &SampleRecord) -> String {
        let sample_key = self.put_sample(name, record).await;
        self.put_member(key::SAMPLES, &sample_key).await;
        sample_key
    }

    /// Store a subject record and register it in the master subject set.
    pub async fn put_subject(&self, name: &str) -> String {
        let subject_key = keys::subject_key(name);
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), name.to_string());
        fields.insert("isPublished".to_string(), "true".to_string());
        self.put_hash(&subject_key, fields).await;
        self.put_member(key::SUBJECTS, &subject_key).await;
        subject_key
    }

    /// Store an aspect record and register it in the master aspect set.
    pub async fn put_aspect(&self, name: &str) -> String {
        let aspect_key = keys::aspect_key(name);
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), name.to_string());
        fields.insert("isPublished".to_string(), "true".to_string());
        self.put_hash(&aspect_key, fields).await;
        self.put_member(key::ASPECTS, &aspect_key).await;
        aspect_key
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.data.read().await.contains_key(key)
    }

    /// Members in insertion order; empty for a missing key.
    pub async fn members(&self, set: &str) -> Vec<String> {
        match self.data.read().await.get(set) {
            Some(Entry::Set(members)) => members.clone(),
            _ => Vec::new(),
        }
    }

    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.data
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Scan patterns (`SCAN <pattern>`) and mutated keys (`DEL <key>`,
    /// `SADD <key>`, `SREM <key>`) seen so far.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }

    pub fn clear_journal(&self) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.clear();
        }
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    pub fn fail_scan_after(&self, pages: usize) {
        self.pages_served.store(0, Ordering::SeqCst);
        if let Ok(mut faults) = self.faults.lock() {
            faults.scan_fail_after = Some(pages);
        }
    }

    pub fn fail_reads_of(&self, key: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_keys.insert(key.to_string());
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_writes = fail;
        }
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.latency = latency;
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = Faults::default();
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn delay(&self) {
        let latency = self.faults.lock().ok().and_then(|f| f.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn read_fails(&self, key: &str) -> bool {
        self.faults
            .lock()
            .map(|f| f.failing_keys.contains(key))
            .unwrap_or(false)
    }

    fn check_writes(&self, op: &'static str) -> Result<()> {
        let fail = self.faults.lock().map(|f| f.fail_writes).unwrap_or(false);
        if fail {
            return Err(StoreError::command(op, "write rejected"));
        }
        Ok(())
    }

    fn record(&self, line: String) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(line);
        }
    }

    fn item_failure(op: &'static str, key: &str) -> StoreError {
        StoreError::command(op, format!("injected failure for '{}'", key))
    }

    fn wrong_type(op: &'static str, key: &str) -> StoreError {
        StoreError::command(
            op,
            format!("WRONGTYPE Operation against a key holding the wrong kind of value: '{}'", key),
        )
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleStore for InMemoryStore {
    async fn scan_page(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        self.delay().await;

        let served = self.pages_served.fetch_add(1, Ordering::SeqCst);
        let fail_after = self.faults.lock().ok().and_then(|f| f.scan_fail_after);
        if let Some(limit) = fail_after {
            if served >= limit {
                return Err(StoreError::Scan(format!(
                    "injected failure after {} pages",
                    limit
                )));
            }
        }

        if cursor == 0 {
            self.record(format!("SCAN {}", pattern));
        }

        let start = if cursor == 0 {
            Bound::Unbounded
        } else {
            let last = self
                .cursors
                .lock()
                .map_err(|e| StoreError::Protocol(e.to_string()))?
                .remove(&cursor)
                .ok_or_else(|| StoreError::Scan(format!("unknown cursor {}", cursor)))?;
            Bound::Excluded(last)
        };

        let data = self.data.read().await;
        let mut examined = 0usize;
        let mut last_examined = None;
        let mut keys = Vec::new();
        let mut more = false;

        for candidate in data.range((start, Bound::Unbounded)).map(|(k, _)| k) {
            if examined == count.max(1) {
                more = true;
                break;
            }
            examined += 1;
            if glob_match(candidate, pattern)? {
                keys.push(candidate.clone());
            }
            last_examined = Some(candidate.clone());
        }

        let next = match (more, last_examined) {
            (true, Some(last)) => {
                let id = self.next_cursor.fetch_add(1, Ordering::SeqCst);
                self.cursors
                    .lock()
                    .map_err(|e| StoreError::Protocol(e.to_string()))?
                    .insert(id, last);
                id
            }
            _ => 0,
        };

        Ok(ScanPage { cursor: next, keys })
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.delay().await;
        if self.read_fails(key) {
            return Err(Self::item_failure("smembers", key));
        }
        match self.data.read().await.get(key) {
            Some(Entry::Set(members)) => Ok(members.clone()),
            Some(Entry::Hash(_)) => Err(Self::wrong_type("smembers", key)),
            None => Ok(Vec::new()),
        }
    }

    async fn set_members_many(&self, keys: &[String]) -> Result<Vec<ItemResult<Vec<String>>>> {
        self.delay().await;
        let data = self.data.read().await;
        Ok(keys
            .iter()
            .map(|key| {
                if self.read_fails(key) {
                    return Err(Self::item_failure("smembers", key));
                }
                match data.get(key) {
                    Some(Entry::Set(members)) => Ok(members.clone()),
                    Some(Entry::Hash(_)) => Err(Self::wrong_type("smembers", key)),
                    None => Ok(Vec::new()),
                }
            })
            .collect())
    }

    async fn exists_many(&self, keys: &[String]) -> Result<Vec<ItemResult<bool>>> {
        self.delay().await;
        let data = self.data.read().await;
        Ok(keys
            .iter()
            .map(|key| {
                if self.read_fails(key) {
                    return Err(Self::item_failure("exists", key));
                }
                Ok(data.contains_key(key))
            })
            .collect())
    }

    async fn hash_get_all_many(
        &self,
        keys: &[String],
    ) -> Result<Vec<ItemResult<HashMap<String, String>>>> {
        self.delay().await;
        let data = self.data.read().await;
        Ok(keys
            .iter()
            .map(|key| {
                if self.read_fails(key) {
                    return Err(Self::item_failure("hgetall", key));
                }
                match data.get(key) {
                    Some(Entry::Hash(fields)) => Ok(fields.clone()),
                    Some(Entry::Set(_)) => Err(Self::wrong_type("hgetall", key)),
                    None => Ok(HashMap::new()),
                }
            })
            .collect())
    }

    async fn is_member_many(&self, checks: &[(String, String)]) -> Result<Vec<ItemResult<bool>>> {
        self.delay().await;
        let data = self.data.read().await;
        Ok(checks
            .iter()
            .map(|(set, member)| {
                if self.read_fails(set) {
                    return Err(Self::item_failure("sismember", set));
                }
                match data.get(set) {
                    Some(Entry::Set(members)) => Ok(members.iter().any(|m| m == member)),
                    Some(Entry::Hash(_)) => Err(Self::wrong_type("sismember", set)),
                    None => Ok(false),
                }
            })
            .collect())
    }

    async fn add_members(&self, adds: &[(String, String)]) -> Result<Vec<ItemResult<bool>>> {
        self.delay().await;
        self.check_writes("sadd")?;
        let mut data = self.data.write().await;
        let mut results = Vec::with_capacity(adds.len());
        for (set, member) in adds {
            self.record(format!("SADD {}", set));
            let entry = data
                .entry(set.clone())
                .or_insert_with(|| Entry::Set(Vec::new()));
            match entry {
                Entry::Set(members) => {
                    if members.iter().any(|m| m == member) {
                        results.push(Ok(false));
                    } else {
                        members.push(member.clone());
                        results.push(Ok(true));
                    }
                }
                Entry::Hash(_) => results.push(Err(Self::wrong_type("sadd", set))),
            }
        }
        Ok(results)
    }

    async fn remove_members(&self, removes: &[(String, String)]) -> Result<usize> {
        self.delay().await;
        self.check_writes("srem")?;
        let mut data = self.data.write().await;
        let mut removed = 0;
        for (set, member) in removes {
            self.record(format!("SREM {}", set));
            let mut now_empty = false;
            if let Some(Entry::Set(members)) = data.get_mut(set) {
                if let Some(pos) = members.iter().position(|m| m == member) {
                    members.remove(pos);
                    removed += 1;
                }
                now_empty = members.is_empty();
            }
            // redis drops empty sets
            if now_empty {
                data.remove(set);
            }
        }
        Ok(removed)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<usize> {
        self.delay().await;
        self.check_writes("del")?;
        let mut data = self.data.write().await;
        let mut deleted = 0;
        for key in keys {
            self.record(format!("DEL {}", key));
            if data.remove(key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
