//! Shared ticking permit source for outbound analytics calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default time between analytics calls.
pub const DEFAULT_RATE_INTERVAL: Duration = Duration::from_secs(2);

/// Token bucket with capacity one, refilled by one permit per tick.
///
/// Every caller of [`acquire`](Self::acquire) across the process takes a
/// permit from the same bucket, so analytics calls are serialized at most one
/// per tick.
#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    interval: Duration,
}

impl RateLimiter {
    /// Creates a limiter holding one permit. Call [`start`](Self::start) to
    /// begin refilling.
    pub fn new(interval: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
            interval,
        }
    }

    /// Tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Currently available permits (0 or 1).
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Spawns the refill ticker. Cancelling `shutdown` stops the ticker and
    /// closes the bucket, waking every waiter.
    pub fn start(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let permits = Arc::clone(&self.permits);
        let period = self.interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if permits.available_permits() == 0 {
                            permits.add_permits(1);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        permits.close();
                        tracing::debug!("Rate limiter stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Waits for a permit. Returns false if the limiter was shut down or
    /// `cancel` fired first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            permit = self.permits.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                Err(_) => false,
            },
            _ = cancel.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_permit_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let token = CancellationToken::new();
        assert!(limiter.acquire(&token).await);
        assert_eq!(limiter.available(), 0);
    }

    #[tokio::test]
    async fn second_acquire_waits_for_a_tick() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let token = CancellationToken::new();
        assert!(limiter.acquire(&token).await);

        let mut waiting = tokio_test::task::spawn(limiter.acquire(&token));
        tokio_test::assert_pending!(waiting.poll());

        token.cancel();
        assert!(waiting.is_woken());
        assert!(!tokio_test::assert_ready!(waiting.poll()));
    }

    #[tokio::test(start_paused = true)]
    async fn refills_one_permit_per_tick() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let token = CancellationToken::new();
        let ticker = limiter.start(token.clone());

        let started = Instant::now();
        for _ in 0..3 {
            assert!(limiter.acquire(&token).await);
        }
        assert!(started.elapsed() >= Duration::from_millis(200));

        // Idle ticks never bank more than one permit.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(limiter.available(), 1);

        token.cancel();
        ticker.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_releases_waiters() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60)));
        let token = CancellationToken::new();
        let ticker = limiter.start(token.clone());
        assert!(limiter.acquire(&token).await);

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let never = CancellationToken::new();
            tokio::spawn(async move { limiter.acquire(&never).await })
        };
        token.cancel();
        assert!(!waiter.await.unwrap());
        ticker.await.unwrap();
    }
}
