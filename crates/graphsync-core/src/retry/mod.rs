//! Retry and backoff policy.
//!
//! This module encapsulates classification of an attempt (status code,
//! transport error) and the exponential backoff budget, and wraps both around
//! the wire client in [`RetryExecutor`] so that every outbound call (page
//! fetches included) shares one consistent policy.

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_error, classify_response, Decision};
pub use policy::{RetryBudget, RetryDecision};
pub use run::RetryExecutor;
