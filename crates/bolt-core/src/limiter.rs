//! Token-bucket speed limiter.
//!
//! Shared by every worker of one engine; each worker acquires tokens
//! for a chunk before writing it. The bucket is kept shallow (100 ms
//! worth of data) so concurrent segments queue on tokens instead of
//! bursting past the limit.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct RateLimiter {
    bucket: Option<Arc<Mutex<Bucket>>>,
}

struct Bucket {
    /// Bytes per second added to the bucket.
    rate: u64,
    /// Bucket depth in bytes.
    capacity: f64,
    tokens: f64,
    refilled: Instant,
}

impl Bucket {
    fn new(rate: u64) -> Self {
        let capacity = (rate as f64 * 0.1).max(1024.0);
        Self {
            rate,
            capacity,
            tokens: capacity,
            refilled: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.refilled).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate as f64).min(self.capacity);
            self.refilled = now;
        }
    }

    /// Take `bytes` tokens if available, otherwise drain the bucket and
    /// report how long the remainder takes to accrue.
    fn take(&mut self, bytes: u64) -> Option<Duration> {
        self.refill();
        let bytes = bytes as f64;
        if self.tokens >= bytes {
            self.tokens -= bytes;
            None
        } else {
            let missing = bytes - self.tokens;
            self.tokens = 0.0;
            Some(Duration::from_secs_f64(missing / self.rate as f64))
        }
    }
}

impl RateLimiter {
    /// Limit to `bytes_per_second` across all holders of this clone.
    pub fn new(bytes_per_second: u64) -> Self {
        if bytes_per_second == 0 || bytes_per_second == u64::MAX {
            return Self::unlimited();
        }
        Self {
            bucket: Some(Arc::new(Mutex::new(Bucket::new(bytes_per_second)))),
        }
    }

    /// No throttling; `acquire` returns immediately.
    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    pub fn from_limit(limit: Option<u64>) -> Self {
        match limit {
            Some(rate) => Self::new(rate),
            None => Self::unlimited(),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.bucket.is_none()
    }

    /// Wait until `bytes` may pass. The lock is never held across the
    /// sleep, so other workers refill and drain concurrently.
    pub async fn acquire(&self, bytes: u64) {
        let Some(bucket) = &self.bucket else {
            return;
        };

        loop {
            let wait = bucket.lock().expect("limiter poisoned").take(bytes);
            match wait {
                None => return,
                Some(wait) => {
                    tokio::time::sleep(wait.min(Duration::from_millis(100))).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limits_acquisition_rate() {
        let limiter = RateLimiter::new(1000); // 1 KB/s, 1 KiB bucket

        let start = Instant::now();
        limiter.acquire(500).await; // bucket starts full
        limiter.acquire(500).await; // still within the initial burst
        assert!(start.elapsed().as_millis() < 50);

        limiter.acquire(500).await; // needs ~0.5 s of refill
        assert!(start.elapsed().as_millis() >= 400);
    }

    #[tokio::test]
    async fn unlimited_is_free() {
        let limiter = RateLimiter::unlimited();
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire(1_000_000).await;
        }
        assert!(start.elapsed().as_millis() < 50);
    }

    #[tokio::test]
    async fn zero_limit_means_unlimited() {
        assert!(RateLimiter::new(0).is_unlimited());
        assert!(RateLimiter::from_limit(None).is_unlimited());
        assert!(!RateLimiter::from_limit(Some(4096)).is_unlimited());
    }
}
