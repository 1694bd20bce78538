use crate::core::{Result, Scope, StoreError};
use crate::repair::RepairOptions;
use crate::storage::scanner::DEFAULT_SCAN_COUNT;
use std::time::Duration;

pub const DEFAULT_URL: &str = "redis://localhost:6379";

/// One hour between reconciliation passes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(3_600_000);

pub const ENV_URL: &str = "REDIS_URL";
pub const ENV_SCOPE: &str = "ROOT_SUBJECT";
pub const ENV_INTERVAL: &str = "FREQUENCY";
pub const ENV_BATCH_SIZE: &str = "SAMSTORE_BATCH_SIZE";

/// Sample store connection and run configuration
///
/// Built with defaults, then overridden from the environment or by the
/// command line.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// `redis://` or `rediss://` connection URL
    pub url: String,

    /// Subject prefix limiting every operation
    pub scope: Scope,

    /// Time between reconciliation passes
    pub interval: Duration,

    /// `COUNT` hint per scan page
    pub scan_batch_size: usize,

    /// Scan pages processed concurrently
    pub max_in_flight: usize,

    /// Upper bound for a single store call
    pub command_timeout: Option<Duration>,
}

impl StoreConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            scope: Scope::all(),
            interval: DEFAULT_INTERVAL,
            scan_batch_size: DEFAULT_SCAN_COUNT,
            max_in_flight: 4,
            command_timeout: Some(Duration::from_secs(30)),
        }
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = size;
        self
    }

    pub fn max_in_flight(mut self, pages: usize) -> Self {
        self.max_in_flight = pages;
        self
    }

    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Defaults overridden by `REDIS_URL`, `ROOT_SUBJECT`, `FREQUENCY`
    /// (milliseconds) and `SAMSTORE_BATCH_SIZE`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`StoreConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = present(ENV_URL) {
            config.url = url;
        }
        if let Some(scope) = present(ENV_SCOPE) {
            config.scope = Scope::new(scope);
        }
        if let Some(interval) = present(ENV_INTERVAL) {
            config.interval = Duration::from_millis(parse_number(ENV_INTERVAL, &interval)?);
        }
        if let Some(size) = present(ENV_BATCH_SIZE) {
            config.scan_batch_size = parse_number(ENV_BATCH_SIZE, &size)? as usize;
        }

        Ok(config)
    }

    /// Connection URL with any password masked.
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        match rest.split_once('@') {
            Some((auth, host)) => match auth.split_once(':') {
                Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
                None => self.url.clone(),
            },
            None => self.url.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("redis://") || self.url.starts_with("rediss://")) {
            return Err(StoreError::Config(format!(
                "URL must start with 'redis://' or 'rediss://', got '{}'",
                self.redacted_url()
            )));
        }

        if self.interval.is_zero() {
            return Err(StoreError::Config("interval must be > 0".to_string()));
        }

        if self.scan_batch_size == 0 {
            return Err(StoreError::Config("scan_batch_size must be > 0".to_string()));
        }

        if self.max_in_flight == 0 {
            return Err(StoreError::Config("max_in_flight must be > 0".to_string()));
        }

        if self.command_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(StoreError::Config("command_timeout must be > 0".to_string()));
        }

        Ok(())
    }

    /// Engine options derived from this configuration.
    pub fn repair_options(&self) -> RepairOptions {
        RepairOptions::new()
            .scan_count(self.scan_batch_size)
            .max_in_flight(self.max_in_flight)
            .command_timeout(self.command_timeout)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| StoreError::Config(format!("{} must be a number, got '{}'", name, value)))
}
