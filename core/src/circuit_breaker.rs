use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{CdeError, Result};

/// Circuit breaker guarding one remote endpoint or agent transport.
///
/// Counts consecutive failures; at `failure_threshold` the breaker opens for
/// `cooldown`, during which every call fails fast with `Unavailable`. After
/// the cooldown it half-opens and permits exactly one probe: a success
/// closes it, another failure re-opens it for a full cooldown.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use cde_core::circuit_breaker::CircuitBreaker;
///
/// let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
/// assert!(breaker.check().is_ok());
/// breaker.record_failure();
/// breaker.record_failure();
/// breaker.record_failure();
/// assert!(breaker.check().is_err()); // open
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    state: CircuitState,
    opened_at: Option<Instant>,
}

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing fast until the cooldown elapses
    Open,
    /// Cooldown elapsed; one probe may pass
    HalfOpen,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            consecutive_failures: 0,
            state: CircuitState::Closed,
            opened_at: None,
        }
    }

    /// Gate a call. `Ok` means the caller may proceed (and must then report
    /// the outcome); `Err(Unavailable)` means fail fast without calling.
    pub fn check(&mut self) -> Result<()> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.cooldown {
                    // Half-open: let exactly one probe through
                    self.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    let remaining = self.cooldown.saturating_sub(elapsed);
                    Err(CdeError::Unavailable(format!(
                        "Circuit open for another {}s",
                        remaining.as_secs().max(1)
                    )))
                }
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                // Failed probe re-opens for a full cooldown
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
            }
            _ => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
        }
    }

    /// Record a successful call, closing the breaker
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
        self.opened_at = None;
    }

    /// Current state, resolving an expired cooldown to `HalfOpen`
    pub fn state(&self) -> CircuitState {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= self.cooldown {
                    return CircuitState::HalfOpen;
                }
            }
        }
        self.state
    }

    /// Whether a call would currently be allowed through
    pub fn can_attempt(&self) -> bool {
        self.state() != CircuitState::Open
    }
}

/// Key identifying one guarded endpoint: a host or agent id plus an
/// endpoint class (e.g. `("raw.githubusercontent.com", "recipes")`).
pub type BreakerKey = (String, String);

/// Registry of circuit breakers shared across components.
///
/// RecipeStore keys breakers by `(host, endpoint-class)`; the router keys
/// them by `(agent_id, "transport")`. Each key gets an independent breaker
/// created on first use.
#[derive(Debug)]
pub struct BreakerRegistry {
    failure_threshold: u32,
    cooldown: Duration,
    breakers: Mutex<HashMap<BreakerKey, CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Gate a call against the breaker for `key`
    pub fn check(&self, key: &BreakerKey) -> Result<()> {
        let mut breakers = self.breakers.lock().expect("breaker registry poisoned");
        breakers
            .entry(key.clone())
            .or_insert_with(|| CircuitBreaker::new(self.failure_threshold, self.cooldown))
            .check()
    }

    /// Record a failure for `key`
    pub fn record_failure(&self, key: &BreakerKey) {
        let mut breakers = self.breakers.lock().expect("breaker registry poisoned");
        breakers
            .entry(key.clone())
            .or_insert_with(|| CircuitBreaker::new(self.failure_threshold, self.cooldown))
            .record_failure();
    }

    /// Record a success for `key`
    pub fn record_success(&self, key: &BreakerKey) {
        let mut breakers = self.breakers.lock().expect("breaker registry poisoned");
        if let Some(breaker) = breakers.get_mut(key) {
            breaker.record_success();
        }
    }

    /// Whether the breaker for `key` currently admits calls
    pub fn can_attempt(&self, key: &BreakerKey) -> bool {
        let breakers = self.breakers.lock().expect("breaker registry poisoned");
        breakers.get(key).map(|b| b.can_attempt()).unwrap_or(true)
    }
}
