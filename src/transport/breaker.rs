//! Lock-free circuit breaker.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                │ cooldown elapsed,
//!     │ probe succeeds                 │ first caller wins the probe
//!     │                                ▼
//!     └──────────────────────────── HalfOpen
//!                probe fails: back to Open (cooldown restarts)
//! ```
//!
//! All state lives in atomics so concurrent fetches can share one breaker
//! without a lock. While `HalfOpen`, exactly one probe is in flight; every
//! other caller is short-circuited until the probe resolves.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            OPEN => BreakerState::Open,
            HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    /// Milliseconds since `epoch` at which the breaker last opened.
    opened_at_ms: AtomicU64,
    epoch: Instant,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Ask for permission to send a request.
    ///
    /// Returns `None` when the call must be short-circuited. The returned
    /// permit must be resolved with [`BreakerPermit::succeed`] or
    /// [`BreakerPermit::fail`]; a probe permit dropped unresolved (e.g. the
    /// caller was cancelled) hands the probe slot back.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        loop {
            match self.state.load(Ordering::Acquire) {
                CLOSED => return Some(BreakerPermit::new(self, false)),
                OPEN => {
                    if !self.cooldown_elapsed() {
                        return None;
                    }
                    if self
                        .state
                        .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        tracing::info!("circuit breaker half-open, sending probe");
                        return Some(BreakerPermit::new(self, true));
                    }
                    // Lost the race; re-read the state.
                }
                _ => return None,
            }
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        let opened_at = self.opened_at_ms.load(Ordering::Acquire);
        let now = self.now_ms();
        now.saturating_sub(opened_at) >= self.cooldown.as_millis() as u64
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Only the probe may close the breaker. A success from a request that
    /// was admitted before the breaker opened just resets the failure run
    /// while still closed.
    fn record_success(&self, probe: bool) {
        if probe {
            self.consecutive_failures.store(0, Ordering::Release);
            if self
                .state
                .compare_exchange(HALF_OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                tracing::info!("circuit breaker closed");
            }
            return;
        }
        if self.state.load(Ordering::Acquire) == CLOSED {
            self.consecutive_failures.store(0, Ordering::Release);
        }
    }

    fn record_failure(&self, probe: bool) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if probe {
            self.opened_at_ms.store(self.now_ms(), Ordering::Release);
            self.state.store(OPEN, Ordering::Release);
            tracing::warn!(failures, "circuit breaker probe failed, reopening");
            return;
        }
        // Late failures from requests admitted while closed leave an open
        // breaker and its cooldown alone.
        if failures < self.threshold || self.state.load(Ordering::Acquire) != CLOSED {
            return;
        }
        self.opened_at_ms.store(self.now_ms(), Ordering::Release);
        if self
            .state
            .compare_exchange(CLOSED, OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::warn!(
                failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "circuit breaker opened"
            );
        }
    }

    /// Probe permit abandoned without an outcome: reopen without restarting
    /// the cooldown so the next caller may probe immediately.
    fn release_probe(&self) {
        let _ = self
            .state
            .compare_exchange(HALF_OPEN, OPEN, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// Permission to send one request through the breaker.
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            resolved: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        self.breaker.record_success(self.probe);
    }

    pub fn fail(mut self) {
        self.resolved = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.release_probe();
        }
    }
}
