//! Threat/rate gate guarding credential verification
//!
//! Consulted before any password check, keyed by the identity under attack
//! (the email), not the caller address. Failure accounting must be exact
//! under concurrency: a brute-force burst that lands on several worker tasks
//! still counts every attempt.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use thiserror::Error;
use tracing::warn;

use crate::config::GateConfig;

/// Why the gate denied an attempt
#[derive(Debug, Error)]
pub enum GateDenied {
    /// The identity is locked out after repeated failures
    #[error("Account temporarily locked, retry in {}s", retry_after.as_secs())]
    LockedOut {
        /// Time remaining in the lockout window
        retry_after: Duration,
    },
    /// Burst ceiling exceeded
    #[error("Too many attempts, slow down")]
    Throttled,
}

impl From<GateDenied> for crate::Error {
    fn from(denied: GateDenied) -> Self {
        crate::Error::TooManyAttempts(denied.to_string())
    }
}

/// Gate contract: allowance check before verification, failure/reset
/// bookkeeping after.
pub trait ThreatGate: Send + Sync {
    /// May this identity attempt verification right now?
    fn check_allowance(&self, email: &str) -> Result<(), GateDenied>;

    /// Record a failed verification.
    fn record_failure(&self, email: &str);

    /// Clear all state for an identity after a successful verification.
    fn reset(&self, email: &str);
}

#[derive(Debug)]
struct FailureWindow {
    failures: u32,
    locked_until: Option<Instant>,
}

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Default gate: per-identity failure counter with a lockout window, plus a
/// keyed burst quota. The counter lives behind the map's per-key exclusive
/// access, so concurrent failures are never undercounted.
pub struct SlidingGate {
    windows: DashMap<String, FailureWindow>,
    burst: KeyedLimiter,
    max_failures: u32,
    lockout: Duration,
}

impl SlidingGate {
    /// Build from gate tuning.
    #[must_use]
    pub fn new(config: &GateConfig) -> Self {
        let per_minute = NonZeroU32::new(config.attempts_per_minute.max(1))
            .expect("max(1) guarantees nonzero");
        Self {
            windows: DashMap::new(),
            burst: RateLimiter::keyed(Quota::per_minute(per_minute)),
            max_failures: config.max_failures.max(1),
            lockout: config.lockout,
        }
    }
}

impl ThreatGate for SlidingGate {
    fn check_allowance(&self, email: &str) -> Result<(), GateDenied> {
        if let Some(window) = self.windows.get(email) {
            if let Some(until) = window.locked_until {
                let now = Instant::now();
                if until > now {
                    return Err(GateDenied::LockedOut {
                        retry_after: until - now,
                    });
                }
            }
        }
        if self.burst.check_key(&email.to_string()).is_err() {
            return Err(GateDenied::Throttled);
        }
        Ok(())
    }

    fn record_failure(&self, email: &str) {
        let mut window = self.windows.entry(email.to_string()).or_insert(FailureWindow {
            failures: 0,
            locked_until: None,
        });
        // An expired lockout starts a fresh count
        if window.locked_until.is_some_and(|until| until <= Instant::now()) {
            window.locked_until = None;
            window.failures = 0;
        }
        window.failures += 1;
        if window.failures >= self.max_failures {
            window.locked_until = Some(Instant::now() + self.lockout);
            window.failures = 0;
            warn!(email = %email, lockout_secs = self.lockout.as_secs(), "Identity locked out");
        }
    }

    fn reset(&self, email: &str) {
        self.windows.remove(email);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn gate(max_failures: u32, lockout: Duration) -> SlidingGate {
        SlidingGate::new(&GateConfig {
            max_failures,
            lockout,
            attempts_per_minute: 1000,
        })
    }

    #[test]
    fn fresh_identity_is_allowed() {
        let gate = gate(5, Duration::from_secs(300));
        gate.check_allowance("a@test.com").unwrap();
    }

    #[test]
    fn lockout_after_failure_ceiling() {
        let gate = gate(3, Duration::from_secs(300));
        for _ in 0..3 {
            gate.check_allowance("a@test.com").unwrap();
            gate.record_failure("a@test.com");
        }
        let denied = gate.check_allowance("a@test.com").unwrap_err();
        assert!(matches!(denied, GateDenied::LockedOut { .. }));
        // Other identities are unaffected
        gate.check_allowance("b@test.com").unwrap();
    }

    #[test]
    fn reset_clears_failure_state() {
        let gate = gate(3, Duration::from_secs(300));
        gate.record_failure("a@test.com");
        gate.record_failure("a@test.com");
        gate.reset("a@test.com");
        for _ in 0..2 {
            gate.record_failure("a@test.com");
        }
        // Two failures after reset: still below the ceiling of three
        gate.check_allowance("a@test.com").unwrap();
    }

    #[tokio::test]
    async fn expired_lockout_admits_again() {
        let gate = gate(1, Duration::from_millis(20));
        gate.record_failure("a@test.com");
        assert!(gate.check_allowance("a@test.com").is_err());
        tokio::time::sleep(Duration::from_millis(40)).await;
        gate.check_allowance("a@test.com").unwrap();
    }

    #[test]
    fn burst_ceiling_throttles() {
        let gate = SlidingGate::new(&GateConfig {
            max_failures: 100,
            lockout: Duration::from_secs(300),
            attempts_per_minute: 2,
        });
        // governor admits an initial burst equal to the quota
        gate.check_allowance("a@test.com").unwrap();
        gate.check_allowance("a@test.com").unwrap();
        let denied = gate.check_allowance("a@test.com").unwrap_err();
        assert!(matches!(denied, GateDenied::Throttled));
    }

    #[tokio::test]
    async fn concurrent_failures_all_counted() {
        let gate = Arc::new(gate(16, Duration::from_secs(300)));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                gate.record_failure("race@test.com");
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // Exactly 16 failures recorded: the ceiling of 16 was hit
        assert!(gate.check_allowance("race@test.com").is_err());
    }
}
