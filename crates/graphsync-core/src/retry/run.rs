//! Retry loop: replay an outbound call until success, a terminal failure, or budget exhaustion.

use std::sync::Arc;

use crate::context::OpContext;
use crate::error::{Error, Result, TransportError};
use crate::limiter::{AdmissionLimiter, Feedback};
use crate::wire::{AuthProvider, Request, Response, WireClient};

use super::classify::{classify_error, classify_response, Decision};
use super::policy::{RetryBudget, RetryDecision};

/// Wraps the wire client with admission control and retry semantics.
///
/// Every attempt acquires from the [`AdmissionLimiter`] before touching the
/// wire; no admission is held across a backoff sleep.
pub struct RetryExecutor {
    client: Arc<dyn WireClient>,
    limiter: Arc<AdmissionLimiter>,
    auth: Option<Arc<dyn AuthProvider>>,
    budget: RetryBudget,
}

impl RetryExecutor {
    pub fn new(
        client: Arc<dyn WireClient>,
        limiter: Arc<AdmissionLimiter>,
        budget: RetryBudget,
    ) -> Self {
        Self {
            client,
            limiter,
            auth: None,
            budget,
        }
    }

    /// Attach an auth provider; its header is fetched again on every attempt.
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Process-wide default budget (contexts may override it).
    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    pub fn limiter(&self) -> &Arc<AdmissionLimiter> {
        &self.limiter
    }

    /// Run one logical call. `build` is invoked once per attempt because a
    /// request body may only be consumed once.
    pub async fn execute<F>(&self, ctx: &OpContext, mut build: F) -> Result<Response>
    where
        F: FnMut() -> Result<Request> + Send,
    {
        let budget = ctx.retry_budget().unwrap_or(self.budget);
        let mut attempt = 1u32;
        let mut first_body_len: Option<usize> = None;

        loop {
            ctx.check()?;

            let request = build()?;
            let body_len = request.body.len();
            match first_body_len {
                None => first_body_len = Some(body_len),
                Some(expected) if expected != body_len => {
                    return Err(Error::fatal(
                        None,
                        format!(
                            "request body changed between attempts: expected {expected} bytes, got {body_len}"
                        ),
                    ));
                }
                Some(_) => {}
            }
            let url = request.url.clone();

            let outcome = self.attempt(ctx, request, &budget).await?;
            // Cancellation observed alongside a transport failure takes precedence;
            // a response that made it back is still returned.
            if outcome.is_err() {
                ctx.check()?;
            }

            let decision = match &outcome {
                Ok(resp) => classify_response(resp),
                Err(e) => classify_error(e),
            };

            match budget.decide(attempt, decision) {
                RetryDecision::Stop => {
                    return finish(outcome, decision, attempt);
                }
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        url = %url,
                        attempt,
                        max_attempts = budget.max_attempts,
                        status = ?outcome.as_ref().ok().map(|r| r.status),
                        error = ?outcome.as_ref().err(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying outbound call"
                    );
                    if !delay.is_zero() {
                        ctx.sleep(delay).await?;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// One admitted wire exchange. The outer `Result` only carries cancellation.
    async fn attempt(
        &self,
        ctx: &OpContext,
        mut request: Request,
        budget: &RetryBudget,
    ) -> Result<std::result::Result<Response, TransportError>> {
        if let Some(auth) = &self.auth {
            match ctx.run(auth.authorization(ctx)).await? {
                Ok(value) => request.set_header("Authorization", value),
                Err(e) => return Ok(Err(e)),
            }
        }

        let admission = self.limiter.acquire(ctx).await?;

        let exchange = tokio::time::timeout(
            budget.per_call_timeout,
            self.client.do_request(ctx, request),
        );
        let outcome = match ctx.run(exchange).await? {
            Ok(result) => result,
            Err(_elapsed) => Err(TransportError::HandlerTimeout),
        };

        admission.complete(feedback_for(&outcome));
        Ok(outcome)
    }
}

fn feedback_for(outcome: &std::result::Result<Response, TransportError>) -> Feedback {
    match outcome {
        Ok(resp) if resp.status == 429 || resp.status == 503 => Feedback::Throttled,
        Ok(resp) if resp.is_success() => Feedback::Success,
        _ => Feedback::Neutral,
    }
}

/// Turn the final attempt into the caller-facing result.
fn finish(
    outcome: std::result::Result<Response, TransportError>,
    decision: Decision,
    attempts: u32,
) -> Result<Response> {
    match (outcome, decision) {
        (Ok(resp), Decision::NoRetry) if resp.is_success() => Ok(resp),
        (Ok(resp), Decision::NoRetry) => Err(Error::fatal(Some(resp.status), resp.body_excerpt())),
        (Ok(resp), Decision::Fatal) => Err(Error::fatal(
            Some(resp.status),
            format!("unexpected status {}", resp.status),
        )),
        (Err(e), Decision::Fatal | Decision::NoRetry) => Err(Error::fatal(None, e.to_string())),
        (Ok(resp), _) => {
            tracing::warn!(attempts, status = resp.status, "retry budget exhausted");
            Err(Error::Throttled {
                attempts,
                last_status: Some(resp.status),
                last_error: None,
            })
        }
        (Err(e), _) if e.is_transient_transport() => {
            tracing::warn!(attempts, error = %e, "retry budget exhausted");
            Err(Error::Throttled {
                attempts,
                last_status: None,
                last_error: Some(e.to_string()),
            })
        }
        (Err(e), _) => Err(Error::fatal(
            None,
            format!("giving up after {attempts} attempts: {e}"),
        )),
    }
}

