//! Circuit breaker for upstream service calls.
//!
//! One breaker guards each upstream. It opens after a configured number of
//! consecutive connection-class failures, stays open for a configured
//! window, then allows a single half-open probe. Well-formed error
//! responses from the upstream (any HTTP status) do not count toward the
//! failure budget.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use courier_common::{CourierError, CourierResult};
use tracing::{info, warn};

/// Breaker tuning parameters.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive connection failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a probe.
    pub open_for: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_for: Duration::from_secs(60),
        }
    }
}

/// Observable breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Failing fast, no calls issued.
    Open,
    /// One probe in flight.
    HalfOpen,
}

#[derive(Debug)]
enum State {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    consecutive_failures: u32,
}

/// A three-state circuit breaker mediating calls to one upstream.
///
/// State transitions are monotonic except for the timer-driven half-open
/// probe; all state lives under a mutex shared by the gateway handlers.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker for the named upstream.
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    /// Create a breaker with the default policy (5 failures, 60 s open).
    pub fn with_defaults(service: impl Into<String>) -> Self {
        Self::new(service, BreakerConfig::default())
    }

    /// The upstream this breaker guards.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Fail fast when the breaker is open; otherwise admit the call.
    ///
    /// When the open window has elapsed, the first caller transitions the
    /// breaker to half-open and is admitted as the probe. Further callers
    /// fail fast until the probe reports back.
    pub fn check(&self) -> CourierResult<()> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            State::Closed => Ok(()),
            State::Open { since } => {
                if since.elapsed() >= self.config.open_for {
                    info!(service = %self.service, "circuit breaker half-open, admitting probe");
                    inner.state = State::HalfOpen;
                    Ok(())
                } else {
                    Err(CourierError::CircuitOpen {
                        service: self.service.clone(),
                    })
                }
            }
            State::HalfOpen => Err(CourierError::CircuitOpen {
                service: self.service.clone(),
            }),
        }
    }

    /// Record a successful (or well-formed) upstream exchange.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if matches!(inner.state, State::Open { .. } | State::HalfOpen) {
            info!(service = %self.service, "circuit breaker closed");
        }
        inner.state = State::Closed;
        inner.consecutive_failures = 0;
    }

    /// Record a connection-class failure.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            State::HalfOpen => {
                warn!(service = %self.service, "probe failed, circuit breaker re-opened");
                inner.state = State::Open {
                    since: Instant::now(),
                };
            }
            State::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                warn!(
                    service = %self.service,
                    failures = inner.consecutive_failures,
                    "circuit breaker opened"
                );
                inner.state = State::Open {
                    since: Instant::now(),
                };
            }
            _ => {}
        }
    }

    /// Record the outcome of an upstream call against the failure budget.
    pub fn observe<T>(&self, result: &CourierResult<T>) {
        match result {
            Err(err) if err.is_connection_failure() => self.record_failure(),
            _ => self.record_success(),
        }
    }

    /// Current breaker position.
    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            State::Closed => BreakerState::Closed,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen => BreakerState::HalfOpen,
        }
    }
}
