//! Per-credential request rate limiting over a fixed 60-second window.
//!
//! Two implementations of the same [`RateLimiter`] trait:
//!
//! - [`InMemoryRateLimiter`] keeps per-credential timestamp lists in
//!   process memory. Correct for a single process; counts reset on
//!   restart.
//! - [`SharedRateLimiter`] increments a window-keyed counter in a
//!   pluggable [`CounterBackend`], so several processes can share one
//!   budget. When the backend is unreachable it degrades according to
//!   its [`FailMode`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use super::Principal;

/// Window length. Quotas are expressed as requests per window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Admission decision for one request against one credential's quota.
pub trait RateLimiter: Send + Sync {
    /// Returns `true` if the request is admitted and counted.
    fn admit(&self, principal: &Principal) -> bool;
}

/// Timestamp-list limiter for single-process deployments.
#[derive(Default)]
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, Vec<Instant>>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn admit(&self, principal: &Principal) -> bool {
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            // A poisoned map only ever holds timestamps; keep serving.
            Err(poisoned) => poisoned.into_inner(),
        };

        let entries = windows
            .entry(principal.credential_id.clone())
            .or_default();
        entries.retain(|t| now.duration_since(*t) < WINDOW);

        if entries.len() as u64 >= u64::from(principal.rate_limit) {
            tracing::debug!(
                credential_id = %principal.credential_id,
                limit = principal.rate_limit,
                "rate limit exceeded"
            );
            return false;
        }

        entries.push(now);
        true
    }
}

/// Error from a shared counter backend.
#[derive(Error, Debug)]
#[error("Counter backend unavailable: {0}")]
pub struct BackendError(pub String);

/// Storage for shared window counters. Implementations must make
/// `incr` atomic across all processes sharing the store.
pub trait CounterBackend: Send + Sync {
    /// Atomically increments `key` and returns the new value.
    fn incr(&self, key: &str) -> Result<u64, BackendError>;

    /// Sets a time-to-live on `key`. Called once per key, on the
    /// increment that created it.
    fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError>;

    /// Health probe used to detect recovery after an outage.
    fn ping(&self) -> Result<(), BackendError>;
}

/// What to do with requests while the counter backend is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Admit everything. Favors availability over quota enforcement.
    Open,
    /// Reject everything. Favors quota enforcement over availability.
    Closed,
}

/// Window-counter limiter over a shared [`CounterBackend`].
pub struct SharedRateLimiter<B: CounterBackend> {
    backend: B,
    fail_mode: FailMode,
    available: AtomicBool,
}

impl<B: CounterBackend> SharedRateLimiter<B> {
    pub fn new(backend: B, fail_mode: FailMode) -> Self {
        Self {
            backend,
            fail_mode,
            available: AtomicBool::new(true),
        }
    }

    /// Key is stable across processes for the same credential and
    /// window, so concurrent increments hit the same counter.
    fn window_key(credential_id: &str) -> String {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        format!("rate:{}:{}", credential_id, epoch / WINDOW.as_secs())
    }

    fn degraded_decision(&self, principal: &Principal, error: &BackendError) -> bool {
        match self.fail_mode {
            FailMode::Open => {
                tracing::warn!(
                    credential_id = %principal.credential_id,
                    error = %error,
                    "counter backend down, admitting without rate limit (fail-open)"
                );
                true
            }
            FailMode::Closed => {
                tracing::warn!(
                    credential_id = %principal.credential_id,
                    error = %error,
                    "counter backend down, rejecting request (fail-closed)"
                );
                false
            }
        }
    }
}

impl<B: CounterBackend> RateLimiter for SharedRateLimiter<B> {
    fn admit(&self, principal: &Principal) -> bool {
        if !self.available.load(Ordering::Relaxed) {
            if self.backend.ping().is_err() {
                return self.degraded_decision(
                    principal,
                    &BackendError("still unreachable".into()),
                );
            }
            self.available.store(true, Ordering::Relaxed);
            tracing::info!("counter backend recovered, rate limiting re-enabled");
        }

        let key = Self::window_key(&principal.credential_id);
        let count = match self.backend.incr(&key) {
            Ok(count) => count,
            Err(e) => {
                self.available.store(false, Ordering::Relaxed);
                return self.degraded_decision(principal, &e);
            }
        };

        if count == 1 {
            // Double the window so a counter read near the boundary
            // still sees the full key lifetime.
            if let Err(e) = self.backend.expire(&key, WINDOW * 2) {
                tracing::warn!(key = %key, error = %e, "failed to set counter expiry");
            }
        }

        if count > u64::from(principal.rate_limit) {
            tracing::debug!(
                credential_id = %principal.credential_id,
                count,
                limit = principal.rate_limit,
                "rate limit exceeded"
            );
            return false;
        }

        true
    }
}

/// In-process [`CounterBackend`] for single-node deployments that still
/// want the window-counter semantics.
#[derive(Default)]
pub struct InProcessCounterStore {
    counters: Mutex<HashMap<String, (u64, Option<Instant>)>>,
}

impl InProcessCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (u64, Option<Instant>)>> {
        match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CounterBackend for InProcessCounterStore {
    fn incr(&self, key: &str) -> Result<u64, BackendError> {
        let mut counters = self.lock();
        let now = Instant::now();
        counters.retain(|_, (_, deadline)| deadline.map_or(true, |d| d > now));
        let entry = counters.entry(key.to_string()).or_insert((0, None));
        entry.0 += 1;
        Ok(entry.0)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError> {
        let mut counters = self.lock();
        if let Some(entry) = counters.get_mut(key) {
            entry.1 = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
