//! # Transport
//!
//! The seam between the cache and the network. A [`Transport`] performs one
//! HTTP exchange and reports transfer counters through a [`TransferMonitor`];
//! everything else (coalescing, decoding, caching) happens above it.

pub mod client;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use url::Url;

use crate::error::TransportError;
use crate::progress::RequestTransferMetrics;
use crate::request::RequestSignature;

pub use self::client::{ReqwestTransport, create_client};

/// An outgoing HTTP request description.
#[derive(Clone)]
pub struct HttpRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    signature: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            signature: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>, content_type: &str) -> Self {
        self.body = Some(body.into());
        if let Ok(value) = HeaderValue::from_str(content_type) {
            self.headers.insert(CONTENT_TYPE, value);
        }
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_body(text.into(), "text/plain; charset=utf-8")
    }

    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_body(value.to_string(), "application/json")
    }

    /// Overrides the key used to coalesce identical requests.
    pub fn with_signature(mut self, key: impl Into<String>) -> Self {
        self.signature = Some(key.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn set_url(&mut self, url: Url) {
        self.url = url;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn signature(&self) -> RequestSignature {
        match &self.signature {
            Some(key) => RequestSignature::explicit(key.clone()),
            None => RequestSignature::compute(
                &self.method,
                &self.url,
                self.body.as_deref(),
            ),
        }
    }

    pub fn into_parts(self) -> (Method, Url, HeaderMap, Option<Bytes>) {
        (self.method, self.url, self.headers, self.body)
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .finish()
    }
}

/// Status, headers and unprocessed body of a completed exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Shared counters a transport updates while a request is in progress.
#[derive(Debug, Clone, Default)]
pub struct TransferMonitor {
    metrics: Arc<Mutex<RequestTransferMetrics>>,
}

impl TransferMonitor {
    pub fn snapshot(&self) -> RequestTransferMetrics {
        *self.metrics.lock()
    }

    pub fn set_request_total(&self, total: Option<u64>) {
        self.metrics.lock().request_bytes_total = total.map(clamp_total);
    }

    pub fn add_sent(&self, bytes: u64) {
        self.metrics.lock().request_bytes_sent += bytes;
    }

    /// Marks the request body as fully sent.
    pub fn finish_upload(&self) {
        let mut metrics = self.metrics.lock();
        if let Some(total) = metrics.request_bytes_total.and_then(|t| u64::try_from(t).ok()) {
            metrics.request_bytes_sent = metrics.request_bytes_sent.max(total);
        }
        metrics.response_started = true;
    }

    pub fn set_response_total(&self, total: Option<u64>) {
        let mut metrics = self.metrics.lock();
        metrics.response_bytes_total = total.map(clamp_total);
        metrics.response_started = true;
    }

    pub fn add_received(&self, bytes: u64) {
        let mut metrics = self.metrics.lock();
        metrics.response_bytes_received += bytes;
        metrics.response_started = true;
    }
}

fn clamp_total(total: u64) -> i64 {
    i64::try_from(total).unwrap_or(i64::MAX)
}

/// Performs HTTP exchanges on behalf of the cache.
///
/// Implementations should update `monitor` as bytes move so that progress can
/// be estimated. Cancellation is handled by dropping the returned future.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(
        &self,
        request: HttpRequest,
        monitor: TransferMonitor,
    ) -> Result<RawResponse, TransportError>;
}
