//! Adaptive ("sliding") pool: the refill rate follows observed throttling.
//!
//! Multiplicative decrease on throttling, additive increase after a run of
//! successes, bounded by `[floor, ceiling]`. The ceiling is the static pool's
//! configured rate.

use std::sync::{Mutex, PoisonError};

use super::pool::TokenPool;
use super::ServiceClass;

/// Fraction of the ceiling restored per recovery step.
const RECOVERY_STEP: f64 = 0.1;

#[derive(Debug)]
struct Adaptive {
    consecutive_successes: u32,
    throttled_events: u32,
}

#[derive(Debug)]
pub struct SlidingPool {
    class: ServiceClass,
    pool: TokenPool,
    ceiling_per_sec: f64,
    floor_per_sec: f64,
    recovery_successes: u32,
    adaptive: Mutex<Adaptive>,
}

impl SlidingPool {
    pub fn new(
        class: ServiceClass,
        capacity: u32,
        ceiling_per_sec: f64,
        floor_per_sec: f64,
        recovery_successes: u32,
    ) -> Self {
        let floor = floor_per_sec.min(ceiling_per_sec);
        Self {
            class,
            pool: TokenPool::new(capacity, ceiling_per_sec),
            ceiling_per_sec,
            floor_per_sec: floor,
            recovery_successes: recovery_successes.max(1),
            adaptive: Mutex::new(Adaptive {
                consecutive_successes: 0,
                throttled_events: 0,
            }),
        }
    }

    pub fn pool(&self) -> &TokenPool {
        &self.pool
    }

    pub fn ceiling_per_sec(&self) -> f64 {
        self.ceiling_per_sec
    }

    pub fn floor_per_sec(&self) -> f64 {
        self.floor_per_sec
    }

    pub fn throttled_events(&self) -> u32 {
        self.adaptive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .throttled_events
    }

    /// Halve the rate, never below the floor.
    pub fn record_throttled(&self) {
        let mut a = self.adaptive.lock().unwrap_or_else(PoisonError::into_inner);
        a.consecutive_successes = 0;
        a.throttled_events = a.throttled_events.saturating_add(1);
        let current = self.pool.rate_per_sec();
        let next = (current / 2.0).max(self.floor_per_sec);
        if next < current {
            self.pool.set_rate_per_sec(next);
            tracing::debug!(
                service_class = ?self.class,
                from = current,
                to = next,
                "sliding limiter slowed down"
            );
        }
    }

    /// Every `recovery_successes` consecutive successes, step the rate back up.
    pub fn record_success(&self) {
        let mut a = self.adaptive.lock().unwrap_or_else(PoisonError::into_inner);
        a.consecutive_successes = a.consecutive_successes.saturating_add(1);
        if a.consecutive_successes < self.recovery_successes {
            return;
        }
        a.consecutive_successes = 0;
        let current = self.pool.rate_per_sec();
        let next = (current + self.ceiling_per_sec * RECOVERY_STEP).min(self.ceiling_per_sec);
        if next > current {
            self.pool.set_rate_per_sec(next);
            tracing::debug!(
                service_class = ?self.class,
                from = current,
                to = next,
                "sliding limiter sped up"
            );
        }
    }
}
