//! # Builder for Service
//!
//! Fluent construction of a [`Service`]: where it points, how it talks to the
//! network and the defaults every resource starts from.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use siesta_engine::Service;
//!
//! let service = Service::builder()
//!     .with_base_url("https://api.example.com/v1")
//!     .with_timeout(Duration::from_secs(20))
//!     .with_user_agent("MyApp/1.0")
//!     .with_header("X-Api-Key", "my-secret-key")
//!     .with_expiration_time(Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use tokio::runtime::Handle;
use url::Url;

use crate::config::{Configuration, TransportConfig};
use crate::context::OwningContext;
use crate::error::ServiceError;
use crate::pipeline::Pipeline;
use crate::service::Service;
use crate::transport::{ReqwestTransport, Transport};

/// Number of recently used resources kept alive after the application lets go.
pub const DEFAULT_RESOURCE_CACHE_CAPACITY: u64 = 500;

/// Builder for creating [`Service`] instances with a fluent API
pub struct ServiceBuilder {
    base_url: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    transport_config: TransportConfig,
    configuration: Configuration,
    cache_capacity: u64,
    runtime: Option<Handle>,
}

impl ServiceBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            base_url: None,
            transport: None,
            transport_config: TransportConfig::default(),
            configuration: Configuration::default(),
            cache_capacity: DEFAULT_RESOURCE_CACHE_CAPACITY,
            runtime: None,
        }
    }

    /// Set the URL that relative resource paths resolve against
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Use a custom transport instead of the reqwest-backed one
    pub fn with_transport<T: Transport + 'static>(self, transport: T) -> Self {
        self.with_shared_transport(Arc::new(transport))
    }

    pub fn with_shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the HTTP client options wholesale
    pub fn with_transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    /// Set the overall timeout for the entire HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport_config.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.transport_config.connect_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.transport_config.follow_redirects = follow;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.transport_config.user_agent = user_agent.into();
        self
    }

    /// Add a header sent by the HTTP client on every request
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.transport_config.headers.insert(name, value);
        }
        self
    }

    /// Route every request through a proxy
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.transport_config.proxy = Some(proxy.into());
        self.transport_config.use_system_proxy = false; // Explicit proxy overrides system proxy
        self
    }

    /// Set whether to use system proxy settings if available
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        if self.transport_config.proxy.is_none() {
            self.transport_config.use_system_proxy = use_system_proxy;
        }
        self
    }

    /// Set how many unreferenced resources are kept in memory
    pub fn with_resource_cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Run network work on `runtime` instead of the ambient one
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Start resources with the JSON and text decoders, or with an empty pipeline
    pub fn with_default_pipeline(mut self, enabled: bool) -> Self {
        self.configuration.pipeline = if enabled {
            Pipeline::standard()
        } else {
            Pipeline::new()
        };
        self
    }

    /// Set how long fetched data stays fresh
    pub fn with_expiration_time(mut self, expiration: Duration) -> Self {
        self.configuration.expiration_time = expiration;
        self
    }

    /// Set how long to wait after a failure before loading again
    pub fn with_retry_time(mut self, retry: Duration) -> Self {
        self.configuration.retry_time = retry;
        self
    }

    /// Replace the configuration every resource starts from
    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Build the service
    pub fn build(self) -> Result<Service, ServiceError> {
        let base_url = self.base_url.as_deref().map(Url::parse).transpose()?;
        if let Some(base) = &base_url {
            if base.cannot_be_a_base() {
                return Err(ServiceError::CannotBeABase(base.to_string()));
            }
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.transport_config)?),
        };

        Ok(Service::from_parts(
            base_url,
            transport,
            OwningContext::new(self.runtime),
            self.configuration,
            self.cache_capacity,
        ))
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("base_url", &self.base_url)
            .field("custom_transport", &self.transport.is_some())
            .field("transport_config", &self.transport_config)
            .field("configuration", &self.configuration)
            .field("cache_capacity", &self.cache_capacity)
            .finish()
    }
}
