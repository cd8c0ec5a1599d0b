//! Per-run circuit breaker.
//!
//! [`CircuitBreakerState`] is a plain serializable state machine driven with an
//! explicit clock. [`SharedBreaker`] is the one synchronization point in the
//! engine: parallel chunk dispatches mutate the breaker only through it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::types::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerStatus::Closed => "closed",
            BreakerStatus::Open => "open",
            BreakerStatus::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CircuitOpenError {
    #[error("circuit open, cooling down until {}", retry_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string()))]
    Cooling { retry_at: Option<DateTime<Utc>> },

    #[error("circuit half-open, trial attempt already in flight")]
    TrialInFlight,

    #[error("call budget exhausted after {calls} inference calls")]
    BudgetExhausted { calls: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub status: BreakerStatus,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub cooldown_deadline: Option<DateTime<Utc>>,
    #[serde(with = "humantime_serde")]
    pub base_cooldown: Duration,
    #[serde(with = "humantime_serde")]
    pub current_cooldown: Duration,
    #[serde(with = "humantime_serde")]
    pub max_cooldown: Duration,
    #[serde(default)]
    pub trial_in_flight: bool,
    #[serde(default)]
    pub calls: u64,
    #[serde(default)]
    pub max_calls: Option<u64>,
}

impl CircuitBreakerState {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            status: BreakerStatus::Closed,
            consecutive_failures: 0,
            failure_threshold: config.failure_threshold,
            cooldown_deadline: None,
            base_cooldown: config.cooldown,
            current_cooldown: config.cooldown,
            max_cooldown: config.max_cooldown,
            trial_in_flight: false,
            calls: 0,
            max_calls: config.max_calls,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == BreakerStatus::Open
    }

    /// Gate in front of every external call. On success the call is counted
    /// against the budget.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> Result<(), CircuitOpenError> {
        if let Some(max_calls) = self.max_calls {
            if self.calls >= max_calls {
                self.status = BreakerStatus::Open;
                self.cooldown_deadline = None;
                return Err(CircuitOpenError::BudgetExhausted { calls: self.calls });
            }
        }

        match self.status {
            BreakerStatus::Closed => {}
            BreakerStatus::Open => match self.cooldown_deadline {
                Some(deadline) if now >= deadline => {
                    tracing::info!("Circuit breaker cooldown elapsed, moving to half-open");
                    self.status = BreakerStatus::HalfOpen;
                    self.trial_in_flight = true;
                }
                retry_at => return Err(CircuitOpenError::Cooling { retry_at }),
            },
            BreakerStatus::HalfOpen => {
                if self.trial_in_flight {
                    return Err(CircuitOpenError::TrialInFlight);
                }
                self.trial_in_flight = true;
            }
        }

        self.calls += 1;
        Ok(())
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        if self.status == BreakerStatus::HalfOpen {
            tracing::info!("Circuit breaker trial succeeded, closing");
            self.status = BreakerStatus::Closed;
            self.trial_in_flight = false;
            self.current_cooldown = self.base_cooldown;
            self.cooldown_deadline = None;
        }
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        match self.status {
            BreakerStatus::Closed => {
                if self.consecutive_failures >= self.failure_threshold {
                    tracing::warn!(
                        failures = self.consecutive_failures,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened"
                    );
                    self.open(now, self.base_cooldown);
                }
            }
            BreakerStatus::HalfOpen => {
                self.trial_in_flight = false;
                let extended = self
                    .current_cooldown
                    .saturating_mul(2)
                    .min(self.max_cooldown);
                tracing::warn!(cooldown = ?extended, "Circuit breaker trial failed, reopening");
                self.open(now, extended);
            }
            // Late failures from calls that were already in flight.
            BreakerStatus::Open => {}
        }
    }

    fn open(&mut self, now: DateTime<Utc>, cooldown: Duration) {
        self.status = BreakerStatus::Open;
        self.current_cooldown = cooldown;
        self.cooldown_deadline = chrono::Duration::from_std(cooldown)
            .ok()
            .and_then(|d| now.checked_add_signed(d));
    }
}

/// Cloneable handle over one run's breaker, shared by its dispatch tasks.
///
/// Every mutation republishes the status, so callers turned away by an
/// in-flight half-open trial can wait for it to settle.
#[derive(Debug, Clone)]
pub struct SharedBreaker {
    inner: Arc<Mutex<CircuitBreakerState>>,
    status: Arc<watch::Sender<BreakerStatus>>,
}

impl SharedBreaker {
    pub fn new(mut state: CircuitBreakerState) -> Self {
        // A trial recorded in a checkpoint died with the process that ran it.
        state.trial_in_flight = false;
        let (status, _) = watch::channel(state.status);
        Self {
            inner: Arc::new(Mutex::new(state)),
            status: Arc::new(status),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        // The state is plain data; a panicked holder cannot leave it half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &CircuitBreakerState) {
        self.status.send_if_modified(|current| {
            let changed = *current != state.status;
            *current = state.status;
            changed
        });
    }

    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut guard = self.lock();
        let result = guard.try_acquire(Utc::now());
        self.publish(&guard);
        result
    }

    pub fn record_success(&self) {
        let mut guard = self.lock();
        guard.record_success();
        self.publish(&guard);
    }

    /// Records a failure and reports whether the breaker is now open.
    pub fn record_failure(&self) -> bool {
        let mut guard = self.lock();
        guard.record_failure(Utc::now());
        self.publish(&guard);
        guard.is_open()
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_open()
    }

    /// Resolves once the breaker has left half-open, i.e. the trial succeeded
    /// or failed.
    pub async fn trial_settled(&self) {
        let mut rx = self.status.subscribe();
        let _ = rx.wait_for(|status| *status != BreakerStatus::HalfOpen).await;
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            cooldown: Duration::from_secs(10),
            max_cooldown: Duration::from_secs(25),
            max_calls: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[test]
    fn test_opens_exactly_at_threshold() {
        let mut breaker = CircuitBreakerState::new(&config(3));
        for _ in 0..2 {
            breaker.try_acquire(t0()).unwrap();
            breaker.record_failure(t0());
            assert_eq!(breaker.status, BreakerStatus::Closed);
        }
        breaker.try_acquire(t0()).unwrap();
        breaker.record_failure(t0());
        assert_eq!(breaker.status, BreakerStatus::Open);
        assert_eq!(breaker.consecutive_failures, 3);
        assert_eq!(breaker.cooldown_deadline, Some(t0() + secs(10)));
    }

    #[test]
    fn test_success_resets_counter() {
        let mut breaker = CircuitBreakerState::new(&config(3));
        breaker.record_failure(t0());
        breaker.record_failure(t0());
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures, 0);
        breaker.record_failure(t0());
        assert_eq!(breaker.status, BreakerStatus::Closed);
    }

    #[test]
    fn test_rejects_while_open_then_half_opens() {
        let mut breaker = CircuitBreakerState::new(&config(1));
        breaker.record_failure(t0());
        assert!(breaker.is_open());

        let err = breaker.try_acquire(t0() + secs(9)).unwrap_err();
        assert!(matches!(err, CircuitOpenError::Cooling { .. }));
        assert_eq!(breaker.status, BreakerStatus::Open);

        breaker.try_acquire(t0() + secs(10)).unwrap();
        assert_eq!(breaker.status, BreakerStatus::HalfOpen);

        // Exactly one trial is allowed.
        assert_eq!(
            breaker.try_acquire(t0() + secs(10)),
            Err(CircuitOpenError::TrialInFlight)
        );
    }

    #[test]
    fn test_trial_success_closes() {
        let mut breaker = CircuitBreakerState::new(&config(1));
        breaker.record_failure(t0());
        breaker.try_acquire(t0() + secs(11)).unwrap();
        breaker.record_success();
        assert_eq!(breaker.status, BreakerStatus::Closed);
        assert_eq!(breaker.consecutive_failures, 0);
        assert!(breaker.cooldown_deadline.is_none());
        breaker.try_acquire(t0() + secs(11)).unwrap();
    }

    #[test]
    fn test_trial_failure_extends_cooldown() {
        let mut breaker = CircuitBreakerState::new(&config(1));
        breaker.record_failure(t0());

        let trial_at = t0() + secs(10);
        breaker.try_acquire(trial_at).unwrap();
        breaker.record_failure(trial_at);
        assert_eq!(breaker.status, BreakerStatus::Open);
        assert_eq!(breaker.current_cooldown, Duration::from_secs(20));
        assert_eq!(breaker.cooldown_deadline, Some(trial_at + secs(20)));

        // Second extension is capped by max_cooldown.
        let trial_at = trial_at + secs(20);
        breaker.try_acquire(trial_at).unwrap();
        breaker.record_failure(trial_at);
        assert_eq!(breaker.current_cooldown, Duration::from_secs(25));
    }

    #[test]
    fn test_call_budget() {
        let mut cfg = config(5);
        cfg.max_calls = Some(2);
        let mut breaker = CircuitBreakerState::new(&cfg);
        breaker.try_acquire(t0()).unwrap();
        breaker.record_success();
        breaker.try_acquire(t0()).unwrap();
        breaker.record_success();
        assert_eq!(
            breaker.try_acquire(t0()),
            Err(CircuitOpenError::BudgetExhausted { calls: 2 })
        );
        assert!(breaker.is_open());
        assert!(breaker.cooldown_deadline.is_none());
    }

    #[test]
    fn test_shared_breaker_reports_open() {
        let shared = SharedBreaker::new(CircuitBreakerState::new(&config(2)));
        let clone = shared.clone();
        assert!(!shared.record_failure());
        assert!(clone.record_failure());
        assert!(shared.is_open());
        assert!(shared.try_acquire().is_err());
        assert_eq!(shared.snapshot().consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_trial_settled_wakes_waiters() {
        let mut state = CircuitBreakerState::new(&config(1));
        state.record_failure(t0());
        state.cooldown_deadline = Some(Utc::now() - secs(60));
        let shared = SharedBreaker::new(state);

        shared.try_acquire().unwrap();
        assert_eq!(shared.try_acquire(), Err(CircuitOpenError::TrialInFlight));

        let waiter = {
            let shared = shared.clone();
            tokio::spawn(async move { shared.trial_settled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        shared.record_success();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(shared.try_acquire().is_ok());
    }

    #[test]
    fn test_persisted_trial_is_released() {
        let mut state = CircuitBreakerState::new(&config(1));
        state.status = BreakerStatus::HalfOpen;
        state.trial_in_flight = true;
        let shared = SharedBreaker::new(state);
        assert!(shared.try_acquire().is_ok());
    }

    #[test]
    fn test_serde_round_trip() {
        let mut breaker = CircuitBreakerState::new(&config(1));
        breaker.record_failure(t0());
        let json = serde_json::to_string(&breaker).unwrap();
        let loaded: CircuitBreakerState = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, breaker);
    }
}
