//! Fixed-window rate accounting and usage metering.
//!
//! The first hit in a window creates the counter with a TTL equal to the
//! window; later hits increment it. A request is allowed while the
//! post-increment count is within the limit. Atomicity comes from the
//! counter store, never from a read-then-write in this module.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::clock::{span_secs, Clock, MAX_SPAN_SECS};
use crate::config::PlanQuota;
use crate::errors::{AppError, Result};

/// Usage counters outlive their month so billing can read them
pub const USAGE_TTL_SECS: u64 = 62 * 86_400;

/// Atomic windowed counters
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key`, creating it with a `window_secs` TTL when absent,
    /// and return the new count
    async fn increment(&self, key: &str, window_secs: u64) -> Result<u64>;

    /// Current count, zero when absent or expired
    async fn current(&self, key: &str) -> Result<u64>;
}

/// Key builders
pub mod keys {
    use chrono::{DateTime, Datelike, Utc};
    use uuid::Uuid;

    /// Counter for one fixed window, aligned to the epoch
    pub fn rate_window(subject: &str, window_start: i64) -> String {
        format!("rate:{}:{}", subject, window_start)
    }

    /// Monthly usage bucket
    pub fn usage(tenant_id: Uuid, at: DateTime<Utc>) -> String {
        format!("usage:{}:{:04}{:02}", tenant_id, at.year(), at.month())
    }
}

/// Start of the fixed window containing `now`
pub fn window_start(now: DateTime<Utc>, window_secs: u64) -> i64 {
    let window = i64::try_from(window_secs.max(1)).unwrap_or(i64::MAX);
    now.timestamp().div_euclid(window) * window
}

/// Result of one accounting call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub count: u64,
    pub limit: u64,
    pub window_secs: u64,
    /// Seconds until the current window closes
    pub reset_after_secs: u64,
}

impl RateDecision {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }

    /// Convert a denial into the matching error
    pub fn into_result(self) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(AppError::RateLimited {
                limit: self.limit,
                window_secs: self.window_secs,
            })
        }
    }
}

#[derive(Clone)]
pub struct RateAccountant {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateAccountant {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Count one hit against `key` and report whether it is allowed
    pub async fn try_consume(&self, key: &str, limit: u64, window_secs: u64) -> Result<bool> {
        Ok(self.consume(key, limit, window_secs).await?.allowed)
    }

    /// Like [`try_consume`](Self::try_consume) with the full decision
    pub async fn consume(&self, key: &str, limit: u64, window_secs: u64) -> Result<RateDecision> {
        let window_secs = window_secs.clamp(1, MAX_SPAN_SECS as u64);
        let count = self.store.increment(key, window_secs).await?;

        let now = self.clock.now();
        let closes_at = window_start(now, window_secs) + window_secs as i64;
        let reset_after_secs = u64::try_from(closes_at - now.timestamp()).unwrap_or(0);

        let allowed = count <= limit;
        tracing::debug!(key = %key, count, limit, allowed, "Rate accounting");

        Ok(RateDecision {
            allowed,
            count,
            limit,
            window_secs,
            reset_after_secs,
        })
    }

    /// Account a request for `subject` in its epoch-aligned window
    pub async fn consume_window(&self, subject: &str, quota: &PlanQuota) -> Result<RateDecision> {
        let window_secs = quota.window_secs.clamp(1, MAX_SPAN_SECS as u64);
        let start = window_start(self.clock.now(), window_secs);
        let key = keys::rate_window(subject, start);
        self.consume(&key, quota.requests_per_window, window_secs).await
    }
}

/// Monthly per-tenant request counter
#[derive(Clone)]
pub struct UsageMeter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl UsageMeter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Count one request; returns the month-to-date total
    pub async fn record(&self, tenant_id: Uuid) -> Result<u64> {
        let key = keys::usage(tenant_id, self.clock.now());
        self.store.increment(&key, USAGE_TTL_SECS).await
    }

    /// Month-to-date total
    pub async fn current(&self, tenant_id: Uuid) -> Result<u64> {
        let key = keys::usage(tenant_id, self.clock.now());
        self.store.current(&key).await
    }

    pub fn month_label(&self) -> String {
        let now = self.clock.now();
        format!("{:04}-{:02}", now.year(), now.month())
    }
}

/// Process-local counters for tests and single-node deployments
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<String, (u64, DateTime<Utc>)>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window_secs: u64) -> Result<u64> {
        let now = self.clock.now();
        let ttl = span_secs(i64::try_from(window_secs).unwrap_or(i64::MAX));
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());

        let entry = counters.entry(key.to_string()).or_insert((0, now + ttl));
        if entry.1 <= now {
            *entry = (0, now + ttl);
        }
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn current(&self, key: &str) -> Result<u64> {
        let now = self.clock.now();
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        Ok(counters
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(count, _)| *count)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::time::Duration;

    fn accountant() -> (RateAccountant, MockClock) {
        let clock = MockClock::default();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(InMemoryCounterStore::new(shared.clone()));
        (RateAccountant::new(store, shared), clock)
    }

    #[tokio::test]
    async fn test_sixth_call_denied_then_window_resets() {
        let (accountant, clock) = accountant();

        for _ in 0..5 {
            assert!(accountant.try_consume("tenant-a", 5, 60).await.unwrap());
        }
        assert!(!accountant.try_consume("tenant-a", 5, 60).await.unwrap());

        clock.advance(Duration::from_secs(61));
        assert!(accountant.try_consume("tenant-a", 5, 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (accountant, _) = accountant();
        assert!(accountant.try_consume("a", 1, 60).await.unwrap());
        assert!(!accountant.try_consume("a", 1, 60).await.unwrap());
        assert!(accountant.try_consume("b", 1, 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_limit_denies_everything() {
        let (accountant, _) = accountant();
        assert!(!accountant.try_consume("z", 0, 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_exact() {
        let (accountant, _) = accountant();
        let mut handles = Vec::new();
        for _ in 0..50 {
            let accountant = accountant.clone();
            handles.push(tokio::spawn(async move {
                accountant.try_consume("hot", 20, 60).await.unwrap()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 20);
    }

    #[tokio::test]
    async fn test_decision_details() {
        let (accountant, _) = accountant();
        let decision = accountant.consume("d", 3, 60).await.unwrap();
        assert_eq!(decision.count, 1);
        assert_eq!(decision.remaining(), 2);
        assert!(decision.reset_after_secs <= 60);
        assert!(decision.into_result().is_ok());

        accountant.consume("d", 3, 60).await.unwrap();
        accountant.consume("d", 3, 60).await.unwrap();
        let denied = accountant.consume("d", 3, 60).await.unwrap();
        assert!(matches!(
            denied.into_result(),
            Err(AppError::RateLimited { limit: 3, window_secs: 60 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_window_is_clamped() {
        let (accountant, _) = accountant();
        let quota = PlanQuota {
            requests_per_window: 2,
            window_secs: 10_000_000_000_000_000,
            max_connections: 1,
        };
        let decision = accountant.consume_window("huge", &quota).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.window_secs, MAX_SPAN_SECS as u64);
        assert!(decision.reset_after_secs <= MAX_SPAN_SECS as u64);
    }

    #[tokio::test]
    async fn test_window_aligned_keys_roll_over() {
        let (accountant, clock) = accountant();
        let quota = PlanQuota {
            requests_per_window: 1,
            window_secs: 60,
            max_connections: 1,
        };

        assert!(accountant.consume_window("t", &quota).await.unwrap().allowed);
        assert!(!accountant.consume_window("t", &quota).await.unwrap().allowed);
        clock.advance(Duration::from_secs(60));
        assert!(accountant.consume_window("t", &quota).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_usage_meter() {
        let clock = MockClock::default();
        let shared: Arc<dyn Clock> = Arc::new(clock);
        let store = Arc::new(InMemoryCounterStore::new(shared.clone()));
        let meter = UsageMeter::new(store, shared);
        let tenant = Uuid::new_v4();

        assert_eq!(meter.current(tenant).await.unwrap(), 0);
        meter.record(tenant).await.unwrap();
        assert_eq!(meter.record(tenant).await.unwrap(), 2);
        assert_eq!(meter.current(tenant).await.unwrap(), 2);
    }

    #[test]
    fn test_key_builders() {
        let tenant = Uuid::nil();
        assert_eq!(keys::rate_window("abc", 120), "rate:abc:120");
        let at = DateTime::parse_from_rfc3339("2024-03-05T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            keys::usage(tenant, at),
            "usage:00000000-0000-0000-0000-000000000000:202403"
        );
        assert_eq!(window_start(at, 60) % 60, 0);
    }
}
