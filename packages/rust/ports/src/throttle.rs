//! Shared, run-agnostic request throttle.
//!
//! All outbound port calls — search, fetch, model — acquire a slot here
//! before hitting the network. One `Throttle` is shared by every concurrent
//! run so that parallel bulk runs still respect external rate limits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;

/// Semaphore-bounded throttle with a minimum spacing between dispatches.
pub struct Throttle {
    semaphore: Semaphore,
    min_interval: Duration,
    last_dispatch: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Create a throttle allowing at most `max_in_flight` concurrent calls
    /// with at least `min_interval_ms` between dispatch times.
    pub fn new(max_in_flight: u32, min_interval_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Semaphore::new(max_in_flight.max(1) as usize),
            min_interval: Duration::from_millis(min_interval_ms),
            last_dispatch: Mutex::new(None),
        })
    }

    /// Acquire a dispatch slot, sleeping as needed to honor the spacing.
    /// The returned permit bounds in-flight concurrency; drop it when the
    /// call completes.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("throttle semaphore closed");

        if !self.min_interval.is_zero() {
            let mut last = self.last_dispatch.lock().await;
            let now = Instant::now();
            if let Some(prev) = *last {
                let elapsed = now.duration_since(prev);
                if elapsed < self.min_interval {
                    tokio::time::sleep(self.min_interval - elapsed).await;
                }
            }
            *last = Some(Instant::now());
        }

        permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spaces_out_dispatches() {
        let throttle = Throttle::new(4, 50);
        let start = Instant::now();
        for _ in 0..3 {
            let _permit = throttle.acquire().await;
        }
        // Second and third dispatch each wait ~50ms.
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn bounds_in_flight_calls() {
        let throttle = Throttle::new(1, 0);
        let p1 = throttle.acquire().await;
        // With one slot, a second acquire must wait until p1 drops.
        let pending = tokio::time::timeout(Duration::from_millis(20), throttle.acquire()).await;
        assert!(pending.is_err());
        drop(p1);
        let p2 = tokio::time::timeout(Duration::from_millis(20), throttle.acquire()).await;
        assert!(p2.is_ok());
    }

    #[tokio::test]
    async fn zero_interval_does_not_sleep() {
        let throttle = Throttle::new(2, 0);
        let start = Instant::now();
        for _ in 0..5 {
            let _permit = throttle.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
