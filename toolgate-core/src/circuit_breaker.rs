//! Circuit Breaker Pattern
//!
//! Isolates failing tools: after `failure_threshold` consecutive failures the
//! circuit opens and calls fail fast until `cooldown` has elapsed. The first
//! request after cooldown is admitted as a single trial; its outcome closes
//! or re-opens the circuit.
//!
//! Each tool owns its own breaker and lock, so a failing tool never blocks
//! callers of an unrelated one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitStatus {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit open - requests are rejected
    Open,
    /// Cooldown elapsed - a single trial request is admitted
    HalfOpen,
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitStatus::Closed => f.write_str("CLOSED"),
            CircuitStatus::Open => f.write_str("OPEN"),
            CircuitStatus::HalfOpen => f.write_str("HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time to wait before admitting a trial request
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Builder: set failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Builder: set cooldown period
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    /// Tool guarded by the breaker
    pub tool_name: String,
    /// Current status
    pub status: CircuitStatus,
    /// Consecutive failures recorded
    pub consecutive_failures: u32,
    /// When the circuit last opened, if it is not closed
    pub opened_at: Option<DateTime<Utc>>,
}

/// Rejection returned while the circuit refuses calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Circuit open for tool '{tool_name}'")]
pub struct CircuitOpenError {
    /// Tool whose circuit rejected the call
    pub tool_name: String,
    /// Remaining cooldown, when known
    pub retry_after: Option<Duration>,
}

#[derive(Debug)]
struct CircuitCell {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    // Bumped on every status change; stale trial permits are ignored
    generation: u64,
}

/// Per-tool circuit breaker
pub struct CircuitBreaker {
    tool_name: String,
    config: CircuitBreakerConfig,
    cell: Mutex<CircuitCell>,
    trial_in_flight: AtomicBool,
}

impl CircuitBreaker {
    /// Create a closed breaker for `tool_name`
    pub fn new(tool_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            tool_name: tool_name.into(),
            config,
            cell: Mutex::new(CircuitCell {
                status: CircuitStatus::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_wall: None,
                generation: 0,
            }),
            trial_in_flight: AtomicBool::new(false),
        }
    }

    /// Create with default config
    pub fn default_config(tool_name: impl Into<String>) -> Self {
        Self::new(tool_name, CircuitBreakerConfig::default())
    }

    /// Tool guarded by this breaker
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn cell(&self) -> MutexGuard<'_, CircuitCell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current status, without applying cooldown
    pub fn status(&self) -> CircuitStatus {
        self.cell().status
    }

    /// Consecutive failures recorded
    pub fn failure_count(&self) -> u32 {
        self.cell().consecutive_failures
    }

    /// Point-in-time view of the breaker
    pub fn snapshot(&self) -> CircuitSnapshot {
        let cell = self.cell();
        CircuitSnapshot {
            tool_name: self.tool_name.clone(),
            status: cell.status,
            consecutive_failures: cell.consecutive_failures,
            opened_at: cell.opened_at_wall,
        }
    }

    /// Ask to make a call
    ///
    /// Returns a permit that must be settled with the call's outcome. A
    /// permit dropped without settling counts as neither success nor
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitOpenError`] while the circuit is open, or while it is
    /// half-open and another caller already holds the trial.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, CircuitOpenError> {
        let mut cell = self.cell();

        if cell.status == CircuitStatus::Open {
            let elapsed = cell
                .opened_at
                .map(|opened| Instant::now().saturating_duration_since(opened))
                .unwrap_or(self.config.cooldown);

            if elapsed < self.config.cooldown {
                return Err(CircuitOpenError {
                    tool_name: self.tool_name.clone(),
                    retry_after: Some(self.config.cooldown - elapsed),
                });
            }

            cell.status = CircuitStatus::HalfOpen;
            cell.generation += 1;
            self.trial_in_flight.store(false, Ordering::SeqCst);
            tracing::info!(tool = %self.tool_name, "Circuit half-open; admitting trial");
        }

        match cell.status {
            CircuitStatus::Closed => Ok(BreakerPermit::new(self, false, cell.generation)),
            CircuitStatus::HalfOpen => {
                if self
                    .trial_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    Ok(BreakerPermit::new(self, true, cell.generation))
                } else {
                    Err(CircuitOpenError {
                        tool_name: self.tool_name.clone(),
                        retry_after: None,
                    })
                }
            }
            CircuitStatus::Open => Err(CircuitOpenError {
                tool_name: self.tool_name.clone(),
                retry_after: None,
            }),
        }
    }

    fn record_success(&self, trial: bool, generation: u64) {
        let mut cell = self.cell();
        cell.consecutive_failures = 0;

        if trial && cell.generation == generation {
            self.close(&mut cell);
            tracing::info!(tool = %self.tool_name, "Trial succeeded; circuit closed");
        }
    }

    fn record_failure(&self, trial: bool, generation: u64) {
        let mut cell = self.cell();
        cell.consecutive_failures = cell.consecutive_failures.saturating_add(1);

        if trial && cell.generation == generation {
            self.open(&mut cell);
            tracing::warn!(tool = %self.tool_name, "Trial failed; circuit re-opened");
            return;
        }

        if cell.status == CircuitStatus::Closed
            && cell.consecutive_failures >= self.config.failure_threshold
        {
            self.open(&mut cell);
            tracing::warn!(
                tool = %self.tool_name,
                failures = cell.consecutive_failures,
                cooldown = ?self.config.cooldown,
                "Failure threshold reached; circuit opened"
            );
        }
    }

    fn release(&self, trial: bool, generation: u64) {
        if !trial {
            return;
        }
        let cell = self.cell();
        if cell.generation == generation {
            self.trial_in_flight.store(false, Ordering::SeqCst);
            tracing::debug!(tool = %self.tool_name, "Trial abandoned; next request may retry");
        }
    }

    /// Open the circuit
    fn open(&self, cell: &mut CircuitCell) {
        cell.status = CircuitStatus::Open;
        cell.opened_at = Some(Instant::now());
        cell.opened_at_wall = Some(Utc::now());
        cell.generation += 1;
        self.trial_in_flight.store(false, Ordering::SeqCst);
    }

    /// Close the circuit
    fn close(&self, cell: &mut CircuitCell) {
        cell.status = CircuitStatus::Closed;
        cell.consecutive_failures = 0;
        cell.opened_at = None;
        cell.opened_at_wall = None;
        cell.generation += 1;
        self.trial_in_flight.store(false, Ordering::SeqCst);
    }

    /// Manually force the circuit closed
    pub fn reset(&self) {
        let mut cell = self.cell();
        self.close(&mut cell);
        tracing::info!(tool = %self.tool_name, "Circuit manually reset");
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.cell();
        f.debug_struct("CircuitBreaker")
            .field("tool_name", &self.tool_name)
            .field("status", &cell.status)
            .field("failure_count", &cell.consecutive_failures)
            .field("config", &self.config)
            .finish()
    }
}

/// Admission to call a tool, settled with the call's outcome
#[must_use = "a permit must be settled with succeed() or fail()"]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    generation: u64,
    settled: bool,
}

impl BreakerPermit {
    fn new(breaker: &Arc<CircuitBreaker>, trial: bool, generation: u64) -> Self {
        Self {
            breaker: Arc::clone(breaker),
            trial,
            generation,
            settled: false,
        }
    }

    /// Whether this permit is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record a successful call
    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success(self.trial, self.generation);
    }

    /// Record a failed call
    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.trial, self.generation);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.trial, self.generation);
        }
    }
}

impl fmt::Debug for BreakerPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerPermit")
            .field("tool_name", &self.breaker.tool_name)
            .field("trial", &self.trial)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn breaker(threshold: u32, cooldown: Duration) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "search",
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_cooldown(cooldown),
        ))
    }

    fn fail_times(cb: &Arc<CircuitBreaker>, n: u32) {
        for _ in 0..n {
            cb.try_acquire().unwrap().fail();
        }
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = Arc::new(CircuitBreaker::default_config("search"));
        assert_eq!(cb.status(), CircuitStatus::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.config().failure_threshold, 5);
        assert_eq!(cb.config().cooldown, Duration::from_secs(30));
    }

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = breaker(3, Duration::from_secs(30));

        fail_times(&cb, 2);
        assert_eq!(cb.status(), CircuitStatus::Closed);

        fail_times(&cb, 1);
        assert_eq!(cb.status(), CircuitStatus::Open);
        assert!(cb.snapshot().opened_at.is_some());

        let err = cb.try_acquire().unwrap_err();
        assert_eq!(err.tool_name, "search");
        assert!(err.retry_after.is_some());
    }

    #[test]
    fn test_success_resets_count_below_threshold() {
        let cb = breaker(5, Duration::from_secs(30));

        fail_times(&cb, 4);
        assert_eq!(cb.failure_count(), 4);

        cb.try_acquire().unwrap().succeed();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.status(), CircuitStatus::Closed);
    }

    #[test]
    fn test_dropped_permit_is_neutral() {
        let cb = breaker(2, Duration::from_secs(30));
        fail_times(&cb, 1);

        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.failure_count(), 1);
        assert_eq!(cb.status(), CircuitStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_admits_single_trial() {
        let cb = breaker(2, Duration::from_secs(30));
        fail_times(&cb, 2);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cb.try_acquire().is_err());
        assert_eq!(cb.status(), CircuitStatus::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(cb.status(), CircuitStatus::HalfOpen);

        // Second caller while the trial is in flight fails fast
        assert!(cb.try_acquire().is_err());

        trial.succeed();
        assert_eq!(cb.status(), CircuitStatus::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.snapshot().opened_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_reopens() {
        let cb = breaker(1, Duration::from_secs(10));
        fail_times(&cb, 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        cb.try_acquire().unwrap().fail();
        assert_eq!(cb.status(), CircuitStatus::Open);

        // openedAt was reset: a fresh full cooldown applies
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cb.try_acquire().is_err());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.try_acquire().unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_frees_slot() {
        let cb = breaker(1, Duration::from_secs(5));
        fail_times(&cb, 1);
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = cb.try_acquire().unwrap();
        drop(trial);
        assert_eq!(cb.status(), CircuitStatus::HalfOpen);

        let next = cb.try_acquire().unwrap();
        assert!(next.is_trial());
        next.succeed();
        assert_eq!(cb.status(), CircuitStatus::Closed);
    }

    #[test]
    fn test_concurrent_trial_admission() {
        let cb = breaker(1, Duration::ZERO);
        fail_times(&cb, 1);
        assert_eq!(cb.status(), CircuitStatus::Open);

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let cb = Arc::clone(&cb);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    // Hold the permit so the trial stays in flight
                    cb.try_acquire().map(|permit| {
                        std::thread::sleep(Duration::from_millis(50));
                        permit.is_trial()
                    })
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let admitted = outcomes.iter().filter(|o| o.is_ok()).count();
        let rejected = outcomes.iter().filter(|o| o.is_err()).count();
        assert_eq!(admitted, 1);
        assert_eq!(rejected, 1);
        assert!(outcomes.iter().any(|o| matches!(o, Ok(true))));
    }

    #[test]
    fn test_stale_trial_ignored_after_reset() {
        let cb = breaker(2, Duration::ZERO);
        fail_times(&cb, 2);

        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());

        cb.reset();
        assert_eq!(cb.status(), CircuitStatus::Closed);

        // The trial predates the reset and must not re-open the circuit
        trial.fail();
        assert_eq!(cb.status(), CircuitStatus::Closed);
        assert_eq!(cb.failure_count(), 1);
    }

    #[test]
    fn test_config_builders() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(0)
            .with_cooldown(Duration::from_secs(120));
        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.cooldown, Duration::from_secs(120));
    }

    #[test]
    fn test_snapshot_serializes_status() {
        let cb = Arc::new(CircuitBreaker::default_config("codemod"));
        let json = serde_json::to_value(cb.snapshot()).unwrap();
        assert_eq!(json["status"], "CLOSED");
        assert_eq!(json["tool_name"], "codemod");
    }
}
