//! Circuit breaker for provider outages
//!
//! After `threshold` consecutive hard failures every call is rejected locally until
//! `cooldown` has passed; the first call after that tries the provider again.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// Cooldown elapsed; the next call is a trial
    HalfOpen,
}

/// Lock-free consecutive-failure counter shared by every call to one provider
///
/// ```
/// use scrapegen_llm::CircuitBreaker;
///
/// let cb = CircuitBreaker::new(2, 30);
/// cb.record_failure();
/// cb.record_failure();
/// assert!(!cb.can_execute());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    failures: AtomicU32,
    last_failure_ms: AtomicU64,
    threshold: u32,
    cooldown: Duration,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            failures: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            threshold,
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }

    fn elapsed_since_failure_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_failure_ms.load(Ordering::Relaxed))
    }

    pub fn state(&self) -> CircuitState {
        if self.failures.load(Ordering::Relaxed) < self.threshold {
            CircuitState::Closed
        } else if self.elapsed_since_failure_ms() >= self.cooldown.as_millis() as u64 {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let count = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_ms.store(now_ms(), Ordering::Relaxed);
        tracing::debug!("Circuit breaker failure count: {}", count);
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Remaining cooldown in seconds, 0 unless open
    pub fn retry_in_secs(&self) -> u64 {
        match self.state() {
            CircuitState::Open => {
                let remaining = (self.cooldown.as_millis() as u64)
                    .saturating_sub(self.elapsed_since_failure_ms());
                remaining.div_ceil(1000)
            }
            _ => 0,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, 60)
    }
}
