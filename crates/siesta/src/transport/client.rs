//! reqwest-backed [`Transport`].

use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::Client;
use tracing::{debug, info, instrument};

use super::{HttpRequest, RawResponse, TransferMonitor, Transport};
use crate::config::TransportConfig;
use crate::error::{ServiceError, TransportError, TransportErrorKind};

/// Builds the HTTP client used by [`ReqwestTransport`].
pub fn create_client(config: &TransportConfig) -> Result<Client, ServiceError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if let Some(proxy_url) = &config.proxy {
        client_builder = client_builder.proxy(reqwest::Proxy::all(proxy_url)?);
        info!(proxy_url = %proxy_url, "Using explicitly configured proxy");
    } else if !config.use_system_proxy {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled");
    }

    client_builder.build().map_err(ServiceError::from)
}

/// Default transport performing requests with a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request, monitor), fields(method = %request.method(), url = %request.url()), level = "debug")]
    async fn perform(
        &self,
        request: HttpRequest,
        monitor: TransferMonitor,
    ) -> Result<RawResponse, TransportError> {
        let (method, url, headers, body) = request.into_parts();

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            monitor.set_request_total(Some(body.len() as u64));
            builder = builder.body(body);
        }

        let mut response = builder.send().await.map_err(map_reqwest_error)?;
        monitor.finish_upload();
        monitor.set_response_total(response.content_length());

        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
            monitor.add_received(chunk.len() as u64);
            body.extend_from_slice(&chunk);
        }

        debug!(status, bytes = body.len(), "Response received");

        Ok(RawResponse {
            status,
            headers,
            body: body.freeze(),
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_redirect() {
        TransportErrorKind::Redirect
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, err.to_string()).with_source(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_client_with_defaults() {
        let config = TransportConfig::default();
        assert!(create_client(&config).is_ok());
    }

    #[tokio::test]
    async fn test_connection_failure_maps_to_transport_error() {
        let transport = ReqwestTransport::new(&TransportConfig::default()).unwrap();
        let url = url::Url::parse("http://127.0.0.1:9/unreachable").unwrap();
        let result = transport
            .perform(HttpRequest::get(url), TransferMonitor::default())
            .await;
        let error = result.unwrap_err();
        assert_ne!(error.kind(), TransportErrorKind::Cancelled);
        assert!(!error.message().is_empty());
    }
}
