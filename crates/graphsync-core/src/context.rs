//! Ambient operation context: cancellation, deadline and call options.
//!
//! Every blocking call in this crate takes an [`OpContext`]. It carries a
//! cancellation token, an optional deadline and an immutable snapshot of
//! per-call options (service class, token cost, retry budget override).
//! Decorators such as [`OpContext::with_cost`] return a new context with an
//! updated snapshot; the original is left untouched, so nested calls
//! (enumerator -> limiter -> retry) all observe one consistent configuration.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CancelReason, Error, Result};
use crate::limiter::ServiceClass;
use crate::retry::RetryBudget;

/// Per-call options read by the limiter and the retry executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    pub service_class: Option<ServiceClass>,
    /// Raw requested cost; normalised by [`OpContext::cost`].
    pub cost: Option<i64>,
    pub retry_budget: Option<RetryBudget>,
    pub sliding_limiter: bool,
}

/// Cancellable, deadline-bearing context with an immutable options snapshot.
#[derive(Debug, Clone)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    options: Arc<CallOptions>,
}

impl Default for OpContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OpContext {
    /// Fresh root context: never cancelled until [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            options: Arc::new(CallOptions::default()),
        }
    }

    /// Child context: cancelled when the parent is, but cancelling it leaves the parent alone.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            options: Arc::clone(&self.options),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token for tying external work to this context.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns a context whose deadline is the earlier of the current one and `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
            options: Arc::clone(&self.options),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    fn with_options(&self, update: impl FnOnce(&mut CallOptions)) -> Self {
        let mut options = (*self.options).clone();
        update(&mut options);
        Self {
            token: self.token.clone(),
            deadline: self.deadline,
            options: Arc::new(options),
        }
    }

    /// Route admission for calls made with this context through `class`'s pool.
    pub fn with_service_class(&self, class: ServiceClass) -> Self {
        self.with_options(|o| o.service_class = Some(class))
    }

    /// Charge `n` tokens per admission. Values <= 0 fall back to the default of 1.
    pub fn with_cost(&self, n: i64) -> Self {
        self.with_options(|o| o.cost = Some(n))
    }

    /// Override the executor's retry budget for calls made with this context.
    pub fn with_retry_budget(&self, budget: RetryBudget) -> Self {
        self.with_options(|o| o.retry_budget = Some(budget))
    }

    /// Prefer the sliding (adaptive) pool for this context's service class, when one exists.
    pub fn with_sliding_limiter(&self, enabled: bool) -> Self {
        self.with_options(|o| o.sliding_limiter = enabled)
    }

    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    pub fn service_class(&self) -> ServiceClass {
        self.options.service_class.unwrap_or_default()
    }

    /// Token cost for one admission; `cost <= 0` or unset normalises to 1.
    pub fn cost(&self) -> u32 {
        match self.options.cost {
            Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
            _ => 1,
        }
    }

    pub fn retry_budget(&self) -> Option<RetryBudget> {
        self.options.retry_budget
    }

    /// Why this context is done, if it is.
    pub fn done(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            return Some(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// `Err(Cancelled)` once the context is done.
    pub fn check(&self) -> Result<()> {
        match self.done() {
            Some(reason) => Err(Error::Cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn cancelled(&self) -> CancelReason {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => CancelReason::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => CancelReason::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                CancelReason::Cancelled
            }
        }
    }

    /// Runs `fut` unless the context finishes first; cancellation wins ties.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(Error::Cancelled(reason)),
            out = fut => Ok(out),
        }
    }

    /// Cancellable sleep.
    pub async fn sleep(&self, d: Duration) -> Result<()> {
        self.run(tokio::time::sleep(d)).await
    }
}
