//! Coarse call throttle for external lookups
//!
//! Token bucket with a single refill step: after `bucket_size` calls the next
//! caller sleeps for `refill_period` and the counter starts over. Callers share
//! one instance behind an async mutex, so the pause holds back every address
//! in the cycle, not just the one that hit the limit.

use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    issued: u32,
    total: u64,
    pauses: u64,
}

/// Shared lookup throttle
#[derive(Debug)]
pub struct CallThrottle {
    bucket_size: u32,
    refill_period: Duration,
    bucket: Mutex<Bucket>,
}

impl CallThrottle {
    pub fn new(bucket_size: u32, refill_period: Duration) -> Self {
        Self {
            bucket_size: bucket_size.max(1),
            refill_period,
            bucket: Mutex::new(Bucket {
                issued: 0,
                total: 0,
                pauses: 0,
            }),
        }
    }

    /// Take one call slot, pausing first if the bucket is exhausted
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        if bucket.issued >= self.bucket_size {
            debug!(
                issued = bucket.issued,
                pause_ms = self.refill_period.as_millis() as u64,
                "Lookup bucket exhausted, pausing"
            );
            tokio::time::sleep(self.refill_period).await;
            bucket.issued = 0;
            bucket.pauses += 1;
        }
        bucket.issued += 1;
        bucket.total += 1;
    }

    /// (calls issued, forced pauses) since creation
    pub async fn counters(&self) -> (u64, u64) {
        let bucket = self.bucket.lock().await;
        (bucket.total, bucket.pauses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_no_pause_within_bucket() {
        let throttle = CallThrottle::new(10, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..10 {
            throttle.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(10));
        assert_eq!(throttle.counters().await, (10, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_after_bucket_exhausted() {
        let throttle = CallThrottle::new(10, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..25 {
            throttle.acquire().await;
        }
        // Calls 11 and 21 each wait one refill period
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(throttle.counters().await, (25, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_across_tasks() {
        let throttle = Arc::new(CallThrottle::new(5, Duration::from_secs(1)));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                tokio::spawn(async move {
                    for _ in 0..5 {
                        throttle.acquire().await;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(throttle.counters().await, (15, 2));
    }
}
