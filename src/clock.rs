// Clock abstraction used everywhere this crate schedules a delay:
// retry backoff, MCP reconnect backoff and health probe intervals.
//
// Calling `tokio::time::{sleep, timeout}` directly is untestable
// without real wall-clock waits, so retry/backoff and reconnect-policy
// tests here go through this trait instead and substitute a manually-
// advanced clock.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock time, backed by `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A manually-advanced clock for deterministic tests. `sleep` suspends
/// the calling task until the clock has been advanced past the
/// requested duration, rather than until real time elapses.
pub struct TestClock {
    inner: Mutex<TestClockState>,
    notify: Notify,
}

struct TestClockState {
    now: Instant,
}

impl TestClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(TestClockState { now: Instant::now() }),
            notify: Notify::new(),
        })
    }

    /// Advance the clock and wake any task whose `sleep` deadline has
    /// since elapsed.
    pub async fn advance(&self, by: Duration) {
        {
            let mut state = self.inner.lock().await;
            state.now += by;
        }
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now(&self) -> Instant {
        // try_lock is safe here: callers never hold the lock across an
        // await point and `now()` itself doesn't await.
        self.inner
            .try_lock()
            .map(|s| s.now)
            .unwrap_or_else(|_| Instant::now())
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        loop {
            if self.now() >= deadline {
                return;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clock_sleep_resolves_after_advance() {
        let clock = TestClock::new();
        let waiter = {
            let clock = clock.clone();
            tokio::spawn(async move {
                clock.sleep(Duration::from_millis(500)).await;
            })
        };

        // Give the spawned task a chance to register its wait.
        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        clock.advance(Duration::from_millis(300)).await;
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn system_clock_sleeps_for_real_time() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() >= start + Duration::from_millis(5));
    }
}
