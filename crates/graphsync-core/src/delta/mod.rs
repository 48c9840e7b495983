//! Delta enumeration: the collaborator that lists a container's changes page by page.
//!
//! The URL cache only needs [`DeltaEnumerator::fetch_page`]. [`GraphDeltaEnumerator`]
//! is the implementation for drive delta endpoints, running every page fetch
//! through the shared [`crate::retry::RetryExecutor`].

mod graph;

use async_trait::async_trait;

use crate::context::OpContext;
use crate::error::Result;

pub use graph::{decode_page, GraphDeltaEnumerator, DOWNLOAD_URL_KEYS};

/// One entry of a delta page, before it is merged into the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaItem {
    pub id: Option<String>,
    /// File-type marker; entries without it (folders, packages) are not cached.
    pub is_file: bool,
    pub download_url: Option<String>,
    /// Tombstone marker.
    pub deleted: bool,
}

impl DeltaItem {
    pub fn file(id: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            is_file: true,
            download_url: Some(download_url.into()),
            deleted: false,
        }
    }

    pub fn tombstone(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            is_file: true,
            download_url: None,
            deleted: true,
        }
    }

    pub fn folder(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }
}

/// A page of results plus the cursor for whatever comes next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaPage {
    pub items: Vec<DeltaItem>,
    /// With `has_more`, the cursor for the next page; otherwise the cursor to
    /// resume from on the next delta sync (if the remote supplied one).
    pub cursor: Option<String>,
    pub has_more: bool,
}

/// Page shaping options passed through to the enumerator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageConfig {
    pub page_size: Option<u32>,
    /// Properties to request; empty means the remote's default set.
    pub select: Vec<String>,
}

#[async_trait]
pub trait DeltaEnumerator: Send + Sync {
    /// Fetch one page for `container_id`. `cursor` is `None` for a full
    /// enumeration. An expired cursor is reported as `Error::CursorExpired`.
    async fn fetch_page(
        &self,
        ctx: &OpContext,
        container_id: &str,
        cursor: Option<&str>,
        page: &PageConfig,
    ) -> Result<DeltaPage>;
}
