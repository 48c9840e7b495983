//! Drive delta over HTTP: `GET {base}/drives/{id}/root/delta`, following
//! `@odata.nextLink` until an `@odata.deltaLink` closes the round.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::context::OpContext;
use crate::error::{Error, Result};
use crate::limiter::ServiceClass;
use crate::retry::RetryExecutor;
use crate::wire::Request;

use super::{DeltaEnumerator, DeltaItem, DeltaPage, PageConfig};

/// Annotation keys that may carry the pre-authenticated download URL, in priority order.
pub const DOWNLOAD_URL_KEYS: [&str; 2] = ["@microsoft.graph.downloadUrl", "@content.downloadUrl"];

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    value: Vec<RawItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: Option<String>,
    file: Option<serde_json::Value>,
    deleted: Option<serde_json::Value>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl RawItem {
    fn download_url(&self) -> Option<String> {
        DOWNLOAD_URL_KEYS
            .iter()
            .find_map(|k| self.extra.get(*k).and_then(|v| v.as_str()))
            .map(str::to_string)
    }
}

/// Decode one delta response body.
pub fn decode_page(body: &[u8]) -> Result<DeltaPage> {
    let raw: RawPage = serde_json::from_slice(body)
        .map_err(|e| Error::fatal(None, format!("malformed delta page: {e}")))?;

    let items = raw
        .value
        .into_iter()
        .map(|item| DeltaItem {
            download_url: item.download_url(),
            is_file: item.file.as_ref().is_some_and(|f| !f.is_null()),
            deleted: item.deleted.as_ref().is_some_and(|d| !d.is_null()),
            id: item.id,
        })
        .collect();

    let has_more = raw.next_link.is_some();
    Ok(DeltaPage {
        items,
        cursor: raw.next_link.or(raw.delta_link),
        has_more,
    })
}

/// [`DeltaEnumerator`] for drive containers.
pub struct GraphDeltaEnumerator {
    executor: Arc<RetryExecutor>,
    base_url: String,
}

impl GraphDeltaEnumerator {
    /// `base_url` is the API root, e.g. `https://graph.microsoft.com/v1.0`.
    pub fn new(executor: Arc<RetryExecutor>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { executor, base_url }
    }

    /// First-page URL for a full enumeration of `drive_id`.
    pub fn initial_url(&self, drive_id: &str, page: &PageConfig) -> Result<String> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| Error::invalid(format!("invalid base url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| Error::invalid(format!("base url cannot be a base: {}", self.base_url)))?
            .extend(["drives", drive_id, "root", "delta"]);
        {
            let mut query = url.query_pairs_mut();
            if let Some(top) = page.page_size {
                query.append_pair("$top", &top.to_string());
            }
            if !page.select.is_empty() {
                query.append_pair("$select", &page.select.join(","));
            }
        }
        let mut url = String::from(url);
        if url.ends_with('?') {
            url.pop();
        }
        Ok(url)
    }
}

#[async_trait]
impl DeltaEnumerator for GraphDeltaEnumerator {
    async fn fetch_page(
        &self,
        ctx: &OpContext,
        container_id: &str,
        cursor: Option<&str>,
        page: &PageConfig,
    ) -> Result<DeltaPage> {
        if container_id.is_empty() {
            return Err(Error::invalid("drive id is empty"));
        }

        let url = match cursor {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => self.initial_url(container_id, page)?,
        };
        let ctx = ctx.with_service_class(ServiceClass::BulkContainer);

        let resp = match self
            .executor
            .execute(&ctx, || Ok(Request::get(url.as_str())))
            .await
        {
            Err(Error::Fatal {
                status: Some(410), ..
            }) if cursor.is_some() => return Err(Error::CursorExpired),
            other => other?,
        };

        decode_page(&resp.body).map_err(|e| match e {
            Error::Fatal { message, .. } => Error::Fatal {
                status: Some(resp.status),
                message,
            },
            other => other,
        })
    }
}
