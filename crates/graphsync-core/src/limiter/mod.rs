//! Admission limiter: per-service-class token pools shared by every outbound call.
//!
//! One [`AdmissionLimiter`] is built by the top-level orchestrator and handed
//! (behind an `Arc`) to every executor, so all callers in the process draw
//! from the same pools. Each service class owns a static pool and, when
//! configured, an adaptive sliding pool; the context decides which one a call
//! uses and how many tokens it costs.

mod pool;
mod sliding;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::LimiterConfig;
use crate::context::OpContext;
use crate::error::Result;

pub use pool::TokenPool;
pub use sliding::SlidingPool;

/// Logical traffic class; each class draws from its own pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceClass {
    /// Mail, contacts, calendar and anything unclassified.
    #[default]
    Default,
    /// File-library listing and delta traffic.
    BulkContainer,
}

/// Remote backend a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCategory {
    Mail,
    Contacts,
    Calendar,
    Drive,
    Sites,
    Groups,
    Unknown,
}

impl BackendCategory {
    /// Pool selection for a backend: file libraries get their own pool.
    pub fn service_class(self) -> ServiceClass {
        match self {
            BackendCategory::Drive | BackendCategory::Sites | BackendCategory::Groups => {
                ServiceClass::BulkContainer
            }
            BackendCategory::Mail
            | BackendCategory::Contacts
            | BackendCategory::Calendar
            | BackendCategory::Unknown => ServiceClass::Default,
        }
    }
}

/// Which pool served an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Static,
    Sliding,
}

/// What the call observed, fed back to the pool when the admission completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Success,
    Throttled,
    Neutral,
}

#[derive(Debug)]
struct ClassPools {
    fixed: TokenPool,
    sliding: Option<Arc<SlidingPool>>,
}

/// Process-wide admission control.
#[derive(Debug)]
pub struct AdmissionLimiter {
    default: ClassPools,
    bulk: ClassPools,
}

impl Default for AdmissionLimiter {
    fn default() -> Self {
        Self::new(&LimiterConfig::default())
    }
}

impl AdmissionLimiter {
    pub fn new(cfg: &LimiterConfig) -> Self {
        let build = |class: ServiceClass| {
            let pool_cfg = match class {
                ServiceClass::Default => &cfg.default,
                ServiceClass::BulkContainer => &cfg.bulk,
            };
            let sliding = cfg
                .sliding
                .as_ref()
                .filter(|s| s.classes.contains(&class))
                .map(|s| {
                    Arc::new(SlidingPool::new(
                        class,
                        pool_cfg.capacity,
                        pool_cfg.refill_per_sec,
                        s.floor_per_sec,
                        s.recovery_successes,
                    ))
                });
            ClassPools {
                fixed: TokenPool::new(pool_cfg.capacity, pool_cfg.refill_per_sec),
                sliding,
            }
        };
        Self {
            default: build(ServiceClass::Default),
            bulk: build(ServiceClass::BulkContainer),
        }
    }

    fn pools(&self, class: ServiceClass) -> &ClassPools {
        match class {
            ServiceClass::Default => &self.default,
            ServiceClass::BulkContainer => &self.bulk,
        }
    }

    /// Pool a call with this context would draw from. A sliding request for a
    /// class without a sliding pool falls back to the static one.
    pub fn pool_kind(&self, ctx: &OpContext) -> PoolKind {
        let pools = self.pools(ctx.service_class());
        if ctx.options().sliding_limiter && pools.sliding.is_some() {
            PoolKind::Sliding
        } else {
            PoolKind::Static
        }
    }

    /// Acquire using the service class and cost carried by `ctx`.
    pub async fn acquire(&self, ctx: &OpContext) -> Result<Admission> {
        self.acquire_with(ctx, ctx.service_class(), ctx.cost()).await
    }

    /// Acquire `cost` tokens from `class`'s pool (`cost <= 0` counts as 1).
    pub async fn acquire_for(
        &self,
        ctx: &OpContext,
        class: ServiceClass,
        cost: i64,
    ) -> Result<Admission> {
        let cost = ctx.with_cost(cost).cost();
        self.acquire_with(ctx, class, cost).await
    }

    async fn acquire_with(
        &self,
        ctx: &OpContext,
        class: ServiceClass,
        cost: u32,
    ) -> Result<Admission> {
        ctx.check()?;
        let pools = self.pools(class);
        let sliding = match &pools.sliding {
            Some(s) if ctx.options().sliding_limiter => Some(Arc::clone(s)),
            _ => None,
        };
        let pool = sliding.as_ref().map_or(&pools.fixed, |s| s.pool());

        if let Err(wait) = pool.try_take(cost) {
            tracing::debug!(
                service_class = ?class,
                cost,
                wait_ms = wait.as_millis() as u64,
                "waiting for admission tokens"
            );
            pool.acquire(ctx, cost).await?;
        }

        Ok(Admission {
            class,
            tokens: cost,
            sliding,
        })
    }

    /// Tokens currently available in `class`'s static pool.
    pub fn available(&self, class: ServiceClass) -> f64 {
        self.pools(class).fixed.available()
    }

    /// The sliding pool for `class`, when configured.
    pub fn sliding_pool(&self, class: ServiceClass) -> Option<&SlidingPool> {
        self.pools(class).sliding.as_deref()
    }
}

/// Proof of admission for one attempt. Tokens are never returned to the
/// pool; completing the admission only feeds the observed outcome to the
/// sliding pool it came from, if any.
#[derive(Debug)]
#[must_use = "complete the admission with the observed outcome"]
pub struct Admission {
    class: ServiceClass,
    tokens: u32,
    sliding: Option<Arc<SlidingPool>>,
}

impl Admission {
    pub fn service_class(&self) -> ServiceClass {
        self.class
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn complete(self, feedback: Feedback) {
        let Some(sliding) = &self.sliding else {
            return;
        };
        match feedback {
            Feedback::Success => sliding.record_success(),
            Feedback::Throttled => sliding.record_throttled(),
            Feedback::Neutral => {}
        }
    }
}
