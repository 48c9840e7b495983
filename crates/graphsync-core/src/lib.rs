//! Resilient access to a throttling remote API: a retrying request pipeline,
//! process-wide admission control, and a delta-synced cache of download URLs.

pub mod config;
pub mod context;
pub mod delta;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod retry;
pub mod url_cache;
pub mod wire;

pub use context::{CallOptions, OpContext};
pub use error::{CancelReason, Error, ErrorKind, Result, TransportError};
pub use limiter::{AdmissionLimiter, BackendCategory, ServiceClass};
pub use retry::{RetryBudget, RetryExecutor};
pub use url_cache::{RefreshStrategy, ResourceRecord, UrlCache, UrlCacheOptions};
