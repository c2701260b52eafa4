//! # Circuit Breaker
//!
//! Fault isolation for one external dependency. Closed until a configured
//! number of consecutive failures, then open for a cool-down window during
//! which calls short-circuit without touching the dependency. After the
//! cool-down, exactly one trial call is admitted (half-open); its outcome
//! closes or re-opens the breaker.
//!
//! State transitions are recorded and logged, never silent.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ecx_core::IntegrationError;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls short-circuit until the cool-down elapses.
    Open,
    /// One trial call is in flight; its outcome decides the next state.
    HalfOpen,
}

impl BreakerState {
    /// The canonical string name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One observed breaker state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerTransition {
    /// State before.
    pub from: BreakerState,
    /// State after.
    pub to: BreakerState,
    /// When the transition happened.
    pub at: Instant,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    transitions: Vec<BreakerTransition>,
}

/// A three-state circuit breaker guarding one external dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: &'static str,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for a dependency.
    pub fn new(dependency: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            dependency,
            failure_threshold,
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                transitions: Vec::new(),
            }),
        }
    }

    /// The guarded dependency's name.
    pub fn dependency(&self) -> &'static str {
        self.dependency
    }

    /// Ask permission to make a call.
    ///
    /// While open, short-circuits with [`IntegrationError::CircuitOpen`]
    /// until the cool-down elapses; then admits exactly one trial call.
    pub fn admit(&self) -> Result<(), IntegrationError> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.cooldown {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(())
                } else {
                    let remaining = self.cooldown.saturating_sub(elapsed);
                    Err(IntegrationError::CircuitOpen {
                        dependency: self.dependency,
                        cooldown_remaining_ms: remaining.as_millis() as u64,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    // Only one probe at a time.
                    Err(IntegrationError::CircuitOpen {
                        dependency: self.dependency,
                        cooldown_remaining_ms: 0,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
        if inner.state != BreakerState::Closed {
            self.transition(&mut inner, BreakerState::Closed);
            inner.opened_at = None;
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.trial_in_flight = false;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let should_open = match inner.state {
            // A failed trial re-opens immediately.
            BreakerState::HalfOpen => true,
            BreakerState::Closed => inner.consecutive_failures >= self.failure_threshold,
            BreakerState::Open => false,
        };
        if should_open {
            self.transition(&mut inner, BreakerState::Open);
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Every state transition observed so far, oldest first.
    pub fn transitions(&self) -> Vec<BreakerTransition> {
        self.inner.lock().transitions.clone()
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        inner.transitions.push(BreakerTransition {
            from,
            to,
            at: Instant::now(),
        });
        tracing::warn!(
            dependency = self.dependency,
            from = %from,
            to = %to,
            consecutive_failures = inner.consecutive_failures,
            "circuit breaker state change"
        );
    }
}
