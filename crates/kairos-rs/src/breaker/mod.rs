//! Per-service windowed circuit breaker.
//!
//! Unlike a simple consecutive-failure counter, admission is decided from a
//! failure *rate* over a rolling time window: outcomes older than
//! `window_s` are pruned on every write, and the breaker opens only once
//! both `min_requests` observations and the failure-rate threshold are met
//! within that window. This mirrors the breaker used by this system's Go
//! sibling service rather than the simpler counter-based design this crate
//! previously carried.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::models::route::BreakerPolicy;

#[derive(Debug, Error)]
pub enum CircuitBreakerError<E: std::fmt::Display + std::fmt::Debug> {
    #[error("circuit breaker open for service {service}")]
    CircuitOpen { service: String },
    #[error("{0}")]
    OperationFailed(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RawState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for RawState {
    fn from(v: u8) -> Self {
        match v {
            1 => RawState::Open,
            2 => RawState::HalfOpen,
            _ => RawState::Closed,
        }
    }
}

/// Publicly observable breaker state, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Outcome {
    at: Instant,
    success: bool,
}

struct Window {
    results: VecDeque<Outcome>,
}

impl Window {
    fn new() -> Self {
        Self {
            results: VecDeque::new(),
        }
    }

    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some(front) = self.results.front() {
            if now.duration_since(front.at) > window {
                self.results.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_rate(&self) -> (u32, f64) {
        let total = self.results.len() as u32;
        if total == 0 {
            return (0, 0.0);
        }
        let failures = self.results.iter().filter(|o| !o.success).count() as f64;
        (total, failures / total as f64)
    }
}

/// One breaker instance per service (host:port or logical service name).
pub struct CircuitBreaker {
    service: String,
    policy: BreakerPolicy,
    state: AtomicU8,
    opened_at: Mutex<Option<Instant>>,
    half_open_admitted: AtomicU8,
    window: Mutex<Window>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, policy: BreakerPolicy) -> Arc<Self> {
        Arc::new(Self {
            service: service.into(),
            policy,
            state: AtomicU8::new(RawState::Closed as u8),
            opened_at: Mutex::new(None),
            half_open_admitted: AtomicU8::new(0),
            window: Mutex::new(Window::new()),
        })
    }

    pub fn state(&self) -> CircuitState {
        match RawState::from(self.state.load(Ordering::Acquire)) {
            RawState::Closed => CircuitState::Closed,
            RawState::Open => CircuitState::Open,
            RawState::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// The per-call deadline this breaker enforces on top of the route
    /// timeout, if configured. `None` when `policy.timeout_s == 0`.
    pub fn call_timeout(&self) -> Option<Duration> {
        if self.policy.timeout_s == 0 {
            None
        } else {
            Some(Duration::from_secs(self.policy.timeout_s))
        }
    }

    /// Double-checked Open→HalfOpen transition: only one caller wins the
    /// compare-exchange and actually resets the half-open admit counter.
    fn allow_request(&self) -> bool {
        if !self.policy.enabled {
            return true;
        }
        match RawState::from(self.state.load(Ordering::Acquire)) {
            RawState::Closed => true,
            RawState::HalfOpen => {
                let admitted = self.half_open_admitted.fetch_add(1, Ordering::AcqRel);
                admitted < self.policy.half_open_requests as u8
            }
            RawState::Open => {
                let elapsed = {
                    let guard = self.opened_at.lock().unwrap();
                    guard.map(|t| t.elapsed())
                };
                match elapsed {
                    Some(e) if e >= Duration::from_secs(self.policy.open_s) => {
                        // Try to claim the Open -> HalfOpen transition exactly once.
                        if self
                            .state
                            .compare_exchange(
                                RawState::Open as u8,
                                RawState::HalfOpen as u8,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_ok()
                        {
                            self.half_open_admitted.store(1, Ordering::Release);
                            true
                        } else {
                            // Someone else already flipped it; re-evaluate as half-open.
                            self.allow_request()
                        }
                    }
                    _ => false,
                }
            }
        }
    }

    fn record(&self, success: bool) {
        if !self.policy.enabled {
            return;
        }
        let now = Instant::now();
        let window_dur = Duration::from_secs(self.policy.window_s);

        let current = RawState::from(self.state.load(Ordering::Acquire));
        match current {
            RawState::HalfOpen => {
                if success {
                    self.transition_closed();
                } else {
                    self.transition_open(now);
                }
                return;
            }
            RawState::Open => return,
            RawState::Closed => {}
        }

        let mut window = self.window.lock().unwrap();
        window.results.push_back(Outcome { at: now, success });
        window.prune(window_dur, now);
        let (total, rate) = window.failure_rate();
        drop(window);

        if total >= self.policy.min_requests && rate >= self.policy.threshold {
            self.transition_open(now);
        }
    }

    fn transition_open(&self, now: Instant) {
        self.state.store(RawState::Open as u8, Ordering::Release);
        *self.opened_at.lock().unwrap() = Some(now);
    }

    fn transition_closed(&self) {
        self.state.store(RawState::Closed as u8, Ordering::Release);
        self.half_open_admitted.store(0, Ordering::Release);
        self.window.lock().unwrap().results.clear();
    }

    /// Failure criterion at the breaker layer is decided by the caller:
    /// transport error, status >= 500, or duration exceeding
    /// `policy.timeout_s` (if set) all count as failures; 4xx counts as
    /// success (the downstream is up, it rejected bad input).
    pub async fn call<F, Fut, T, E>(self: &Arc<Self>, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.allow_request() {
            return Err(CircuitBreakerError::CircuitOpen {
                service: self.service.clone(),
            });
        }
        match op().await {
            Ok(value) => {
                self.record(true);
                Ok(value)
            }
            Err(e) => {
                self.record(false);
                Err(CircuitBreakerError::OperationFailed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn policy() -> BreakerPolicy {
        BreakerPolicy {
            enabled: true,
            threshold: 0.5,
            min_requests: 10,
            window_s: 60,
            open_s: 1,
            half_open_requests: 1,
            timeout_s: 0,
        }
    }

    async fn fail() -> Result<(), &'static str> {
        Err("boom")
    }

    async fn ok() -> Result<(), &'static str> {
        Ok(())
    }

    #[tokio::test]
    async fn opens_after_threshold_breached_within_window() {
        let breaker = CircuitBreaker::new("svc", policy());
        for _ in 0..10 {
            let _ = breaker.call(fail).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            breaker.call(ok).await,
            Err(CircuitBreakerError::CircuitOpen { .. })
        ));
    }

    #[tokio::test]
    async fn half_open_admits_bounded_requests_then_closes_on_success() {
        let breaker = CircuitBreaker::new("svc", policy());
        for _ in 0..10 {
            let _ = breaker.call(fail).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        sleep(Duration::from_millis(1100)).await;
        let result = breaker.call(ok).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("svc", policy());
        for _ in 0..10 {
            let _ = breaker.call(fail).await;
        }
        sleep(Duration::from_millis(1100)).await;
        let _ = breaker.call(fail).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn stays_closed_below_min_requests() {
        let breaker = CircuitBreaker::new("svc", policy());
        for _ in 0..5 {
            let _ = breaker.call(fail).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn disabled_breaker_always_admits() {
        let mut p = policy();
        p.enabled = false;
        let breaker = CircuitBreaker::new("svc", p);
        for _ in 0..50 {
            let _ = breaker.call(fail).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn call_timeout_is_none_when_unset() {
        let breaker = CircuitBreaker::new("svc", policy());
        assert_eq!(breaker.call_timeout(), None);
    }

    #[test]
    fn call_timeout_reflects_configured_seconds() {
        let mut p = policy();
        p.timeout_s = 2;
        let breaker = CircuitBreaker::new("svc", p);
        assert_eq!(breaker.call_timeout(), Some(Duration::from_secs(2)));
    }
}
