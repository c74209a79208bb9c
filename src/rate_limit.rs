use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Token bucket shared by every outbound translation call in the process.
///
/// Holds `capacity` tokens and refills continuously at `capacity` per window.
/// `try_acquire` never waits: a caller that finds the bucket empty gets
/// `false` and treats it like a transient API failure.
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// A limiter allowing `calls_per_minute` calls in any 60 second window.
    pub fn per_minute(calls_per_minute: u32) -> Self {
        Self::new(calls_per_minute, Duration::from_secs(60))
    }

    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let Ok(mut bucket) = self.bucket.lock() else {
            return false;
        };

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill);
        let refill = elapsed.as_secs_f64() / self.window.as_secs_f64() * self.capacity as f64;
        bucket.tokens = (bucket.tokens + refill).min(self.capacity as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
