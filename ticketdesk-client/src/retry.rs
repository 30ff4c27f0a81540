use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use ticketdesk_core::{DEFAULT_RETRY_WAIT, EndpointKey};

#[derive(Debug, Clone, Copy)]
struct RetryEntry {
    started_at: Instant,
    wait: Duration,
}

/// Per-endpoint retry windows for rate-limited operations.
///
/// Keys are logical operation names (`"login"`, `"changePassword"`).
/// At most one window exists per key; a new rate-limit signal replaces
/// the old window outright, it never stacks. Lookups fail soft: an
/// unknown key is simply not limited.
#[derive(Debug)]
pub struct RetryWindows {
    entries: HashMap<EndpointKey, RetryEntry>,
    default_wait: Duration,
}

impl Default for RetryWindows {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryWindows {
    pub fn new() -> Self {
        Self::with_default_wait(DEFAULT_RETRY_WAIT)
    }

    /// Override the wait substituted when a signal carries no usable
    /// duration.
    pub fn with_default_wait(default_wait: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_wait,
        }
    }

    /// True when no window is open for `endpoint` or the open window has
    /// elapsed. Read-only.
    pub fn can_retry(&self, endpoint: &str) -> bool {
        self.can_retry_at(endpoint, Instant::now())
    }

    /// Time left before `endpoint` becomes eligible again; zero when it
    /// already is.
    pub fn remaining_wait(&self, endpoint: &str) -> Duration {
        self.remaining_wait_at(endpoint, Instant::now())
    }

    /// Opens (or replaces) the window for `endpoint`, starting now. A
    /// zero `wait` is substituted with the configured default rather
    /// than rejected.
    pub fn set_retry_timer(&mut self, endpoint: &str, wait: Duration) {
        self.set_retry_timer_at(endpoint, wait, Instant::now());
    }

    /// Drops the window for `endpoint`. Idempotent.
    pub fn clear_retry_timer(&mut self, endpoint: &str) {
        self.entries.remove(endpoint);
    }

    fn can_retry_at(&self, endpoint: &str, now: Instant) -> bool {
        self.remaining_wait_at(endpoint, now).is_zero()
    }

    fn remaining_wait_at(&self, endpoint: &str, now: Instant) -> Duration {
        match self.entries.get(endpoint) {
            Some(entry) => (entry.started_at + entry.wait).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    fn set_retry_timer_at(&mut self, endpoint: &str, wait: Duration, now: Instant) {
        let wait = if wait.is_zero() {
            self.default_wait
        } else {
            wait
        };
        self.entries.insert(
            endpoint.to_owned(),
            RetryEntry {
                started_at: now,
                wait,
            },
        );
    }
}
