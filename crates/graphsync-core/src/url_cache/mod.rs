//! Per-container cache of download URLs, refreshed lazily by delta sync.
//!
//! The cache maps item id to its current download URL (or tombstone). It is
//! stale when empty or when `refresh_interval` has elapsed since the last
//! completed refresh; a lookup against a stale cache triggers a refresh first.
//!
//! Two locks are involved:
//! - `refresh_lock` serializes refreshers. A caller that waited on it while
//!   another refresh ran takes that refresh's outcome instead of starting a
//!   duplicate delta sync.
//! - `state` guards the record map. With [`RefreshStrategy::Exclusive`] it is
//!   held in write mode for the whole refresh, so readers wait for the new
//!   snapshot. With [`RefreshStrategy::Shadow`] pages are fetched without it
//!   and only the final merge takes the write lock; readers keep using the old
//!   snapshot while a refresh is in flight.

mod merge;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::time::Instant;

use crate::context::OpContext;
use crate::delta::{DeltaEnumerator, DeltaItem, PageConfig};
use crate::error::{Error, Result};

pub use merge::{merge_records, MergeOutcome, RecordMap, ResourceRecord};

/// Shortest accepted refresh interval.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// How a refresh interacts with concurrent readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStrategy {
    /// Hold the record map exclusively for the entire refresh.
    #[default]
    Exclusive,
    /// Fetch into a staging area, swap under a short write lock.
    Shadow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlCacheOptions {
    pub refresh_interval: Duration,
    pub strategy: RefreshStrategy,
    pub page: PageConfig,
}

impl UrlCacheOptions {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            refresh_interval,
            strategy: RefreshStrategy::default(),
            page: PageConfig::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: RefreshStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_page(mut self, page: PageConfig) -> Self {
        self.page = page;
        self
    }
}

#[derive(Debug, Default)]
struct CacheState {
    records: RecordMap,
    /// Where the next delta sync resumes; `None` means a full enumeration.
    cursor: Option<String>,
}

#[derive(Debug, Default)]
struct Freshness {
    populated: bool,
    last_refresh_at: Option<Instant>,
}

/// Outcome of the most recent refresh, handed to callers that waited on it.
#[derive(Debug)]
struct RefreshLedger {
    last_result: Result<()>,
}

struct Enumeration {
    items: Vec<DeltaItem>,
    cursor: Option<String>,
    /// Full listing: replaces the record map instead of merging into it.
    reset: bool,
    pages: usize,
}

pub struct UrlCache {
    container_id: String,
    options: UrlCacheOptions,
    enumerator: Arc<dyn DeltaEnumerator>,
    state: RwLock<CacheState>,
    freshness: Mutex<Freshness>,
    refresh_lock: AsyncMutex<RefreshLedger>,
    /// Completed refreshes whose outcome is shareable (everything but cancellation).
    refresh_attempts: AtomicU64,
    delta_query_count: AtomicU64,
}

impl UrlCache {
    pub fn new(
        container_id: impl Into<String>,
        options: UrlCacheOptions,
        enumerator: Arc<dyn DeltaEnumerator>,
    ) -> Result<Self> {
        let container_id = container_id.into();
        if container_id.is_empty() {
            return Err(Error::invalid("container id is empty"));
        }
        if options.refresh_interval < MIN_REFRESH_INTERVAL {
            return Err(Error::invalid(format!(
                "refresh interval {:?} is below {:?}",
                options.refresh_interval, MIN_REFRESH_INTERVAL
            )));
        }

        Ok(Self {
            container_id,
            options,
            enumerator,
            state: RwLock::new(CacheState::default()),
            freshness: Mutex::new(Freshness::default()),
            refresh_lock: AsyncMutex::new(RefreshLedger {
                last_result: Ok(()),
            }),
            refresh_attempts: AtomicU64::new(0),
            delta_query_count: AtomicU64::new(0),
        })
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn options(&self) -> &UrlCacheOptions {
        &self.options
    }

    /// Number of completed delta syncs.
    pub fn delta_query_count(&self) -> u64 {
        self.delta_query_count.load(Ordering::Acquire)
    }

    pub fn last_refresh_at(&self) -> Option<Instant> {
        self.freshness().last_refresh_at
    }

    /// Records currently cached, tombstones included.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn freshness(&self) -> std::sync::MutexGuard<'_, Freshness> {
        self.freshness.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when the cache is empty or the refresh interval has elapsed.
    pub fn needs_refresh(&self) -> bool {
        let f = self.freshness();
        if !f.populated {
            return true;
        }
        match f.last_refresh_at {
            Some(at) => Instant::now().saturating_duration_since(at) > self.options.refresh_interval,
            None => true,
        }
    }

    /// Look up an item, refreshing first when the cache is stale.
    pub async fn get_locator(&self, ctx: &OpContext, item_id: &str) -> Result<ResourceRecord> {
        if item_id.is_empty() {
            return Err(Error::invalid("item id is empty"));
        }

        if self.needs_refresh() && !self.serve_stale_snapshot() {
            match self.refresh_cache(ctx).await {
                Ok(()) => {}
                Err(Error::Partial(errors)) => {
                    tracing::warn!(
                        container_id = %self.container_id,
                        errors = errors.len(),
                        "url cache refresh skipped malformed records"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.read_cache(ctx, item_id).await
    }

    /// Shadow mode lets readers use the previous snapshot while a refresh is in flight.
    fn serve_stale_snapshot(&self) -> bool {
        self.options.strategy == RefreshStrategy::Shadow
            && self.freshness().populated
            && self.refresh_lock.try_lock().is_err()
    }

    /// Run a delta sync unless another caller already did one while we waited.
    pub async fn refresh_cache(&self, ctx: &OpContext) -> Result<()> {
        let observed = self.refresh_attempts.load(Ordering::Acquire);
        let mut ledger = ctx.run(self.refresh_lock.lock()).await?;

        if self.refresh_attempts.load(Ordering::Acquire) != observed {
            return ledger.last_result.clone();
        }
        if !self.needs_refresh() {
            return Ok(());
        }

        let result = self.run_refresh(ctx).await;
        // A cancelled refresher's outcome is not shared; the next waiter refreshes itself.
        if !matches!(result, Err(Error::Cancelled(_))) {
            ledger.last_result = result.clone();
            self.refresh_attempts.fetch_add(1, Ordering::AcqRel);
        }
        result
    }

    async fn run_refresh(&self, ctx: &OpContext) -> Result<()> {
        let started = Instant::now();
        tracing::info!(
            container_id = %self.container_id,
            strategy = ?self.options.strategy,
            "refreshing url cache"
        );

        let result = match self.options.strategy {
            RefreshStrategy::Exclusive => {
                let mut state = ctx.run(self.state.write()).await?;
                let cursor = state.cursor.clone();
                match self.enumerate(ctx, cursor).await {
                    Ok(enumeration) => self.commit(&mut state, enumeration),
                    Err(e) => Err(e),
                }
            }
            RefreshStrategy::Shadow => {
                let cursor = ctx.run(self.state.read()).await?.cursor.clone();
                match self.enumerate(ctx, cursor).await {
                    Ok(enumeration) => {
                        let mut state = ctx.run(self.state.write()).await?;
                        self.commit(&mut state, enumeration)
                    }
                    Err(e) => Err(e),
                }
            }
        };

        match &result {
            Ok(()) | Err(Error::Partial(_)) => tracing::info!(
                container_id = %self.container_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "url cache refreshed"
            ),
            Err(e) => tracing::warn!(
                container_id = %self.container_id,
                error = %e,
                "url cache refresh failed; keeping previous state"
            ),
        }
        result
    }

    /// Drive the enumerator to the end of the current delta round.
    async fn enumerate(&self, ctx: &OpContext, cursor: Option<String>) -> Result<Enumeration> {
        let mut reset = cursor.is_none();
        let mut cursor = cursor;
        let mut items = Vec::new();
        let mut pages = 0usize;

        loop {
            ctx.check()?;
            let fetched = self
                .enumerator
                .fetch_page(ctx, &self.container_id, cursor.as_deref(), &self.options.page)
                .await;
            let page = match fetched {
                Err(Error::CursorExpired) if !reset => {
                    tracing::warn!(
                        container_id = %self.container_id,
                        "delta cursor expired; restarting full enumeration"
                    );
                    reset = true;
                    cursor = None;
                    items.clear();
                    pages = 0;
                    continue;
                }
                Err(Error::CursorExpired) => {
                    return Err(Error::fatal(
                        None,
                        "delta cursor expired during a full enumeration",
                    ));
                }
                other => other?,
            };

            pages += 1;
            tracing::debug!(
                container_id = %self.container_id,
                page = pages,
                items = page.items.len(),
                has_more = page.has_more,
                "delta page fetched"
            );
            items.extend(page.items);

            if !page.has_more {
                return Ok(Enumeration {
                    items,
                    cursor: page.cursor,
                    reset,
                    pages,
                });
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => {
                    return Err(Error::fatal(
                        None,
                        "delta page reported more results without a cursor",
                    ));
                }
            }
        }
    }

    /// Apply a finished enumeration. Caller holds the state write lock.
    fn commit(&self, state: &mut CacheState, enumeration: Enumeration) -> Result<()> {
        let base = if enumeration.reset {
            RecordMap::new()
        } else {
            std::mem::take(&mut state.records)
        };
        let MergeOutcome {
            records,
            errors,
            skipped,
        } = merge_records(base, &enumeration.items);

        state.records = records;
        state.cursor = enumeration.cursor;
        {
            let mut f = self.freshness();
            f.populated = !state.records.is_empty();
            f.last_refresh_at = Some(Instant::now());
        }
        self.delta_query_count.fetch_add(1, Ordering::AcqRel);

        tracing::debug!(
            container_id = %self.container_id,
            pages = enumeration.pages,
            items = enumeration.items.len(),
            records = state.records.len(),
            skipped,
            reset = enumeration.reset,
            "delta merged"
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Partial(errors))
        }
    }

    async fn read_cache(&self, ctx: &OpContext, item_id: &str) -> Result<ResourceRecord> {
        let state = ctx.run(self.state.read()).await?;
        match state.records.get(item_id) {
            Some(r) if r.tombstoned => Err(Error::Gone {
                id: item_id.to_string(),
            }),
            Some(r) if r.is_available() => Ok(r.clone()),
            _ => Err(Error::NotFound {
                id: item_id.to_string(),
            }),
        }
    }
}
