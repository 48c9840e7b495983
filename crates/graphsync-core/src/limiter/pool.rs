//! Static token bucket shared by every caller of one service class.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::context::OpContext;
use crate::error::Result;

/// Lowest refill rate a pool accepts, so waits stay finite.
const MIN_RATE_PER_SEC: f64 = 0.01;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    rate_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, capacity: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(capacity);
        self.last_refill = now;
    }
}

/// Token bucket: `capacity` burst, refilled continuously at `rate_per_sec`.
///
/// Waiters sleep for exactly the time needed to accumulate their cost, then
/// re-check; the bucket lock is never held across an await.
#[derive(Debug)]
pub struct TokenPool {
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl TokenPool {
    /// New pool, initially full.
    pub fn new(capacity: u32, rate_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                rate_per_sec: rate_per_sec.max(MIN_RATE_PER_SEC),
                last_refill: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Tokens available right now (after refill).
    pub fn available(&self) -> f64 {
        let mut b = self.lock();
        b.refill(self.capacity, Instant::now());
        b.tokens
    }

    pub fn rate_per_sec(&self) -> f64 {
        self.lock().rate_per_sec
    }

    pub(crate) fn set_rate_per_sec(&self, rate: f64) {
        let mut b = self.lock();
        b.refill(self.capacity, Instant::now());
        b.rate_per_sec = rate.max(MIN_RATE_PER_SEC);
    }

    /// Take `cost` tokens if present; otherwise report how long until they will be.
    pub fn try_take(&self, cost: u32) -> std::result::Result<(), Duration> {
        let cost = f64::from(cost).min(self.capacity);
        let mut b = self.lock();
        b.refill(self.capacity, Instant::now());
        if b.tokens >= cost {
            b.tokens -= cost;
            return Ok(());
        }
        let missing = cost - b.tokens;
        Err(Duration::from_secs_f64(missing / b.rate_per_sec))
    }

    /// Wait until `cost` tokens can be taken or the context finishes.
    /// Nothing is consumed when the context wins.
    pub async fn acquire(&self, ctx: &OpContext, cost: u32) -> Result<()> {
        loop {
            ctx.check()?;
            match self.try_take(cost) {
                Ok(()) => return Ok(()),
                Err(wait) => ctx.sleep(wait.max(Duration::from_millis(1))).await?,
            }
        }
    }
}
