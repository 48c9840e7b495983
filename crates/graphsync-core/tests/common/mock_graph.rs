//! In-memory drive delta endpoint for integration tests.
//!
//! Serves `/drives/{id}/root/delta` as JSON pages of `page_size` items. Page
//! N>0 is addressed by `?token=pN` in the nextLink; the final page carries a
//! deltaLink with `?token=delta-K`. Requesting a deltaLink returns the
//! changes queued with [`MockGraph::delete`] / [`MockGraph::update`] since
//! that round. Canned responses queued with [`MockGraph::inject`] are served
//! first, one per request.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use graphsync_core::wire::{Request, Response, WireClient};
use graphsync_core::{OpContext, TransportError};
use serde_json::{json, Value};

pub const BASE_URL: &str = "https://graph.test/v1.0";

pub struct MockGraph {
    drive_id: String,
    item_count: usize,
    page_size: usize,
    latency: Duration,
    requests: AtomicUsize,
    urls: Mutex<Vec<String>>,
    injected: Mutex<VecDeque<Response>>,
    changes: Mutex<Vec<Value>>,
    rounds: AtomicUsize,
}

pub fn download_url(id: &str) -> String {
    format!("https://download.test/{id}?sig=abc")
}

impl MockGraph {
    pub fn new(drive_id: &str, item_count: usize, page_size: usize) -> Self {
        Self {
            drive_id: drive_id.to_string(),
            item_count,
            page_size,
            latency: Duration::from_millis(50),
            requests: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            injected: Mutex::new(VecDeque::new()),
            changes: Mutex::new(Vec::new()),
            rounds: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn inject(&self, resp: Response) {
        self.injected.lock().unwrap().push_back(resp);
    }

    pub fn delete(&self, id: &str) {
        self.changes
            .lock()
            .unwrap()
            .push(json!({"id": id, "file": {}, "deleted": {"state": "deleted"}}));
    }

    pub fn update(&self, id: &str, url: &str) {
        self.changes
            .lock()
            .unwrap()
            .push(json!({"id": id, "file": {}, "@microsoft.graph.downloadUrl": url}));
    }

    fn delta_url(&self, token: &str) -> String {
        format!("{BASE_URL}/drives/{}/root/delta?token={token}", self.drive_id)
    }

    fn full_page(&self, index: usize) -> Value {
        let start = index * self.page_size;
        let end = (start + self.page_size).min(self.item_count);
        let mut value: Vec<Value> = (start..end)
            .map(|i| {
                let id = format!("item-{i}");
                json!({
                    "id": id,
                    "name": format!("{id}.bin"),
                    "file": {"mimeType": "application/octet-stream"},
                    "@microsoft.graph.downloadUrl": download_url(&id),
                })
            })
            .collect();
        if index == 0 {
            value.insert(0, json!({"id": "root", "folder": {"childCount": self.item_count}}));
        }

        if end < self.item_count {
            json!({"value": value, "@odata.nextLink": self.delta_url(&format!("p{}", index + 1))})
        } else {
            let round = self.rounds.fetch_add(1, Ordering::SeqCst);
            json!({"value": value, "@odata.deltaLink": self.delta_url(&format!("delta-{round}"))})
        }
    }

    fn changes_page(&self) -> Value {
        let value = std::mem::take(&mut *self.changes.lock().unwrap());
        let round = self.rounds.fetch_add(1, Ordering::SeqCst);
        json!({"value": value, "@odata.deltaLink": self.delta_url(&format!("delta-{round}"))})
    }

    fn route(&self, request: &Request) -> Response {
        let Ok(url) = url::Url::parse(&request.url) else {
            return Response::new(400).with_body("bad url");
        };
        let expected = format!("/v1.0/drives/{}/root/delta", self.drive_id);
        if url.path() != expected {
            return Response::new(404).with_body("itemNotFound");
        }
        let token = url
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned());

        let page = match token.as_deref() {
            None => self.full_page(0),
            Some(t) if t.starts_with("delta-") => self.changes_page(),
            Some(t) => match t.strip_prefix('p').and_then(|n| n.parse().ok()) {
                Some(n) => self.full_page(n),
                None => return Response::new(400).with_body("bad token"),
            },
        };
        Response::new(200).with_body(page.to_string())
    }
}

#[async_trait]
impl WireClient for MockGraph {
    async fn do_request(
        &self,
        _ctx: &OpContext,
        request: Request,
    ) -> Result<Response, TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(request.url.clone());
        tokio::time::sleep(self.latency).await;

        let injected = self.injected.lock().unwrap().pop_front();
        Ok(injected.unwrap_or_else(|| self.route(&request)))
    }
}
