// =============================================================================
// rate_limiter.rs - TOKEN BUCKET PACING PER PLATFORM
// =============================================================================
//
// Each platform gets one bucket shared by all of its workers. A worker takes
// a token before every call; with an empty bucket it sleeps until the next
// token is due. With the default capacity of one and a one-second refill
// this spaces calls to a platform one second apart no matter how many
// workers the pool runs.
//
// A zero interval disables pacing, which is what the tests use.
// =============================================================================

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    /// Time to mint one token. Zero == unlimited.
    interval: Duration,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    /// `capacity` tokens, one new token every `interval`.
    pub fn new(capacity: u32, interval: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            interval,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Take a token if one is available, otherwise report how long until one
    /// will be.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        if self.interval.is_zero() {
            return Ok(());
        }

        let now = Instant::now();
        let mut bucket = self.bucket.lock();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        let refill_per_sec = 1.0 / self.interval.as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(self.capacity);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / refill_per_sec))
        }
    }

    /// Wait for a token. Sleeps, never spins.
    pub async fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            tokio::time::sleep(wait).await;
        }
    }
}
