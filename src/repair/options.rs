use crate::storage::CancelSignal;
use crate::storage::scanner::DEFAULT_SCAN_COUNT;
use std::time::Duration;

/// Tuning shared by the cleanup, check and rebuild engines.
#[derive(Debug, Clone)]
pub struct RepairOptions {
    /// `COUNT` hint per scan page.
    pub scan_count: usize,

    /// Pages whose follow-up commands may be in flight at once.
    pub max_in_flight: usize,

    /// Upper bound for any single store call.
    pub command_timeout: Option<Duration>,

    /// Stops further scan pages when fired.
    pub cancel: CancelSignal,
}

impl RepairOptions {
    pub fn new() -> Self {
        Self {
            scan_count: DEFAULT_SCAN_COUNT,
            max_in_flight: 4,
            command_timeout: Some(Duration::from_secs(30)),
            cancel: CancelSignal::never(),
        }
    }

    pub fn scan_count(mut self, count: usize) -> Self {
        self.scan_count = count.max(1);
        self
    }

    pub fn max_in_flight(mut self, pages: usize) -> Self {
        self.max_in_flight = pages.max(1);
        self
    }

    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn cancel_on(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self::new()
    }
}
