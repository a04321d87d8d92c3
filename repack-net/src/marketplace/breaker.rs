// repack-net/src/marketplace/breaker.rs
// Three-state health guard in front of the structured marketplace API.
// One instance covers the whole client: failures in any operation count
// toward the same budget.
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// What the breaker says about one prospective API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiPermit {
    /// Breaker closed; call the API normally.
    Allowed,
    /// Breaker recovering; this call is the single half-open probe and its
    /// outcome alone decides whether the breaker closes or reopens.
    Probe,
    /// Breaker open (or a probe is already in flight); skip the API and use
    /// the fallback path.
    Denied,
}

/// Operational view for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        CircuitBreaker {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                probe_in_flight: false,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    /// Decides whether the next structured-API call may proceed.
    pub fn admit(&self) -> ApiPermit {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => ApiPermit::Allowed,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.reset_timeout);
                if elapsed < self.reset_timeout {
                    ApiPermit::Denied
                } else if inner.probe_in_flight {
                    // Another caller already holds the probe slot; avoid a
                    // thundering herd against a recovering service.
                    ApiPermit::Denied
                } else {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    debug!("Circuit breaker half-open, admitting probe call");
                    ApiPermit::Probe
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    ApiPermit::Denied
                } else {
                    inner.probe_in_flight = true;
                    ApiPermit::Probe
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            debug!("Circuit breaker closing after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                // A failed probe re-opens immediately.
                warn!("Circuit breaker probe failed, re-opening");
                inner.state = CircuitState::Open;
                inner.probe_in_flight = false;
                inner.failure_count = inner.failure_count.saturating_add(1);
            }
            _ => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.failure_threshold
                    && inner.state != CircuitState::Open
                {
                    warn!(
                        "Circuit breaker opening after {} consecutive failures",
                        inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                }
                inner.probe_in_flight = false;
            }
        }
    }

    /// Guard for one admitted call. Armed only for a probe permit: if the
    /// call future is dropped before its outcome is recorded, the guard
    /// frees the probe slot on drop so the breaker cannot wedge shut.
    pub fn probe_guard(&self, permit: ApiPermit) -> ProbeGuard<'_> {
        ProbeGuard {
            breaker: (permit == ApiPermit::Probe).then_some(self),
        }
    }

    fn release_probe(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.probe_in_flight {
            warn!("Half-open probe abandoned before its outcome was recorded");
            inner.probe_in_flight = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            reset_timeout_secs: self.reset_timeout.as_secs(),
        }
    }
}

#[must_use]
pub struct ProbeGuard<'a> {
    breaker: Option<&'a CircuitBreaker>,
}

impl ProbeGuard<'_> {
    /// Hands the probe slot over to the recorded outcome; call right before
    /// `record_success`/`record_failure`.
    pub fn disarm(mut self) {
        self.breaker = None;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker {
            breaker.release_probe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        for _ in 0..4 {
            assert_eq!(breaker.admit(), ApiPermit::Allowed);
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        assert_eq!(breaker.admit(), ApiPermit::Allowed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Within the reset window the API is untouched.
        assert_eq!(breaker.admit(), ApiPermit::Denied);
    }

    #[test]
    fn success_resets_the_failure_budget() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        assert_eq!(breaker.snapshot().failure_count, 0);
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Reset timeout of zero means the next admit is the probe.
        assert_eq!(breaker.admit(), ApiPermit::Probe);
        // Concurrent calls during the probe window are denied.
        assert_eq!(breaker.admit(), ApiPermit::Denied);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.admit(), ApiPermit::Allowed);
    }

    #[test]
    fn abandoned_probe_releases_the_slot() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();

        let permit = breaker.admit();
        assert_eq!(permit, ApiPermit::Probe);
        // Dropping the armed guard without recording an outcome frees the
        // slot; the next caller may probe instead of being denied forever.
        drop(breaker.probe_guard(permit));
        assert_eq!(breaker.admit(), ApiPermit::Probe);
    }

    #[test]
    fn disarmed_guard_leaves_the_slot_to_the_recorded_outcome() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();

        let permit = breaker.admit();
        assert_eq!(permit, ApiPermit::Probe);
        breaker.probe_guard(permit).disarm();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.admit(), ApiPermit::Allowed);
    }

    #[test]
    fn failed_probe_reopens_immediately() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        assert_eq!(breaker.admit(), ApiPermit::Probe);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
