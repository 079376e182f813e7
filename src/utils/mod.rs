//! Bounded-retry helpers
//!
//! The bring-up path has two places where it must wait for an asynchronous
//! kernel-side effect to catch up: udev creating a freshly added device node,
//! and DRM/KMS enumerating a newly connected virtual connector. Both are
//! expressed as a bounded poll over a [`RetryPolicy`] rather than ad-hoc
//! sleeps, so tests can drive them with a zero-delay [`Sleeper`].

use std::time::Duration;

use tracing::warn;

/// Fixed-interval, fixed-attempt-count retry strategy.
///
/// Waits are not cancellable mid-interval; a caller that needs to abort has to
/// wait out the remaining bounded duration. Callers needing finer control can
/// supply their own [`Sleeper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts
    pub interval: Duration,
    /// Maximum number of attempts before giving up
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Build a policy from millisecond interval and attempt count.
    pub fn new(interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            max_attempts,
        }
    }

    /// Total worst-case wall-clock time this policy can block for.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Clock abstraction so retry loops can run with zero delay under test.
pub trait Sleeper: Send {
    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Poll `condition` until it returns true or the policy is exhausted.
///
/// Returns `true` when the condition was met, `false` on exhaustion. The first
/// check happens before any sleep, so an already-satisfied condition costs
/// nothing.
pub fn wait_for<F>(policy: RetryPolicy, sleeper: &dyn Sleeper, what: &str, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for attempt in 0..policy.max_attempts {
        if condition() {
            return true;
        }
        if attempt + 1 < policy.max_attempts {
            sleeper.sleep(policy.interval);
        }
    }

    warn!(
        "Gave up waiting for {} after {} attempts ({:?} total)",
        what,
        policy.max_attempts,
        policy.max_wait()
    );
    false
}

/// Test support: a sleeper that records requested sleep time without blocking.
#[cfg(test)]
pub(crate) mod testing {
    use super::Sleeper;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    pub(crate) struct NoopSleeper {
        slept_ms: AtomicU64,
    }

    impl NoopSleeper {
        pub(crate) fn new() -> Self {
            Self {
                slept_ms: AtomicU64::new(0),
            }
        }

        pub(crate) fn slept_ms(&self) -> u64 {
            self.slept_ms.load(Ordering::Relaxed)
        }
    }

    impl Sleeper for NoopSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept_ms
                .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        }
    }
}
