//! Request/response types and the collaborator traits for a single HTTP exchange.
//!
//! The crate never talks to the network itself: a [`WireClient`] performs one
//! exchange, and an optional [`AuthProvider`] supplies the `Authorization`
//! header. Both are injected into [`crate::retry::RetryExecutor`].

use std::time::Duration;

use async_trait::async_trait;

use crate::context::OpContext;
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// One outbound request. Built fresh for every attempt by the executor's builder closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self::new(Method::Post, url).with_body(body)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Replace any existing header with the same (case-insensitive) name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Status, headers and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// 2xx or 3xx.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// `Retry-After` expressed in delay-seconds. HTTP-date values are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }

    /// Short body excerpt for error messages.
    pub fn body_excerpt(&self) -> String {
        const MAX: usize = 256;
        let text = String::from_utf8_lossy(&self.body);
        match text.char_indices().nth(MAX) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.into_owned(),
        }
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Performs exactly one HTTP exchange. Retrying is the executor's job, not the client's.
#[async_trait]
pub trait WireClient: Send + Sync {
    async fn do_request(
        &self,
        ctx: &OpContext,
        request: Request,
    ) -> Result<Response, TransportError>;
}

/// Supplies the `Authorization` header value for a request.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authorization(&self, ctx: &OpContext) -> Result<String, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_seconds() {
        let resp = Response::new(429).with_header("Retry-After", " 7 ");
        assert_eq!(resp.retry_after(), Some(Duration::from_secs(7)));
        let date = Response::new(429).with_header("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(date.retry_after(), None);
        assert_eq!(Response::new(429).retry_after(), None);
    }

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut req = Request::get("https://example.com").with_header("authorization", "a");
        req.set_header("Authorization", "b");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("AUTHORIZATION"), Some("b"));
    }

    #[test]
    fn body_excerpt_truncates_long_bodies() {
        let resp = Response::new(500).with_body(vec![b'x'; 1000]);
        let excerpt = resp.body_excerpt();
        assert!(excerpt.ends_with("..."));
        assert_eq!(excerpt.len(), 259);
    }
}
