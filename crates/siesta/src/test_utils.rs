//! Helpers for exercising services without a network.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use tokio::sync::watch;

use crate::error::{TransportError, TransportErrorKind};
use crate::transport::{HttpRequest, RawResponse, TransferMonitor, Transport};

/// Macro to initialize tracing for tests
///
/// Usage:
/// - `init_test_tracing!()` - uses DEBUG level (default)
/// - `init_test_tracing!(INFO)` - uses specified level
#[macro_export]
macro_rules! init_test_tracing {
    () => {
        init_test_tracing!(DEBUG);
    };
    ($level:ident) => {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::$level)
            .with_test_writer()
            .try_init();
    };
}

// Re-export the macro
pub use crate::init_test_tracing;

#[derive(Clone)]
enum Stub {
    Response(RawResponse),
    Failure(TransportError),
}

/// Holds matching requests until released.
#[derive(Clone)]
pub struct StubGate {
    open: watch::Sender<bool>,
}

impl StubGate {
    pub fn release(&self) {
        self.open.send_replace(true);
    }
}

#[derive(Default)]
struct StubInner {
    stubs: HashMap<(Method, String), Stub>,
    gates: HashMap<String, watch::Receiver<bool>>,
    calls: Vec<HttpRequest>,
}

/// In-memory [`Transport`] answering from canned responses keyed by method
/// and URL. Unknown routes fail with a connection error.
#[derive(Clone, Default)]
pub struct StubTransport {
    inner: Arc<Mutex<StubInner>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stub(&self, method: Method, url: &str, response: RawResponse) -> &Self {
        self.inner
            .lock()
            .stubs
            .insert((method, url.to_owned()), Stub::Response(response));
        self
    }

    /// Stubs a GET answered with a text body.
    pub fn stub_text(&self, url: &str, status: u16, content_type: &str, body: &str) -> &Self {
        let mut response = RawResponse::new(status, Bytes::from(body.to_owned()));
        if let Ok(value) = HeaderValue::from_str(content_type) {
            response.headers.insert(CONTENT_TYPE, value);
        }
        self.stub(Method::GET, url, response)
    }

    /// Stubs a GET that fails before any response arrives.
    pub fn stub_error(&self, url: &str, error: TransportError) -> &Self {
        self.inner
            .lock()
            .stubs
            .insert((Method::GET, url.to_owned()), Stub::Failure(error));
        self
    }

    /// Blocks requests to `url` until the returned gate is released.
    pub fn hold(&self, url: &str) -> StubGate {
        let (open, gate) = watch::channel(false);
        self.inner.lock().gates.insert(url.to_owned(), gate);
        StubGate { open }
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|request| request.url().as_str() == url)
            .count()
    }

    /// Every request performed so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.inner.lock().calls.clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn perform(
        &self,
        request: HttpRequest,
        monitor: TransferMonitor,
    ) -> Result<RawResponse, TransportError> {
        let url = request.url().as_str().to_owned();
        let (stub, gate) = {
            let mut inner = self.inner.lock();
            inner.calls.push(request.clone());
            let stub = inner.stubs.get(&(request.method().clone(), url.clone())).cloned();
            (stub, inner.gates.get(&url).cloned())
        };

        if let Some(body) = request.body() {
            monitor.set_request_total(Some(body.len() as u64));
            monitor.add_sent(body.len() as u64);
        }
        monitor.finish_upload();

        if let Some(mut gate) = gate {
            let released = gate.wait_for(|open| *open).await.is_ok();
            if !released {
                return Err(TransportError::cancelled());
            }
        }

        match stub {
            Some(Stub::Response(response)) => {
                monitor.set_response_total(Some(response.body.len() as u64));
                monitor.add_received(response.body.len() as u64);
                Ok(response)
            }
            Some(Stub::Failure(error)) => Err(error),
            None => Err(TransportError::new(
                TransportErrorKind::Connect,
                format!("No stub for {} {url}", request.method()),
            )),
        }
    }
}
