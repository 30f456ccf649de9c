//! # Siesta
//!
//! An observable, client-side cache of HTTP resources.
//!
//! A [`Service`] hands out one [`Resource`] per URL. Each resource remembers
//! the latest data and error it has seen, coalesces identical loads, and tells
//! its observers about every state change. Responses flow through a
//! configurable [`Pipeline`] of transformers that turn raw bytes into text,
//! JSON or application models before they reach the cache.
//!
//! ## Features
//!
//! - One shared resource instance per URL, evicted once nothing uses it
//! - Request coalescing with per-caller cancellation
//! - Conditional reloads with `If-None-Match` and `304 Not Modified`
//! - Content-type routed response transformers
//! - Smoothed progress reporting that never goes backwards
//! - Glob-based per-resource configuration
//!
//! ## Example
//!
//! ```no_run
//! use siesta_engine::{Owner, ResourceEvent, Service};
//!
//! # async fn run() -> Result<(), siesta_engine::ServiceError> {
//! let service = Service::new("https://api.example.com")?;
//! let user = service.resource("users/42")?;
//!
//! let owner = Owner::new();
//! user.add_observer_fn(&owner, |resource, event| {
//!     if let ResourceEvent::NewData(_) = event {
//!         println!("{}", resource.json());
//!     }
//! });
//!
//! let outcome = user.load().await;
//! if let Some(error) = outcome.error() {
//!     eprintln!("{error}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod content_type;
mod context;
pub mod entity;
pub mod error;
pub mod observer;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod resource;
pub mod service;
pub mod test_utils;
pub mod transport;

pub use builder::ServiceBuilder;
pub use config::{Configuration, ConfigurationPattern, TransportConfig};
pub use content_type::ContentTypePattern;
pub use entity::{Content, ContentKind, ContentValue, CustomContent, Entity};
pub use error::{ErrorCause, ParseError, RequestError, ServiceError, TransportError, TransportErrorKind};
pub use observer::{NewDataSource, Owner, ResourceEvent, ResourceObserver};
pub use pipeline::{ContentTransformer, InputTypeMismatch, Pipeline, ResponseTransformer};
pub use progress::{ProgressConfig, RequestTransferMetrics};
pub use request::{Request, RequestSignature, RequestState, Response, ResponseInfo};
pub use resource::Resource;
pub use service::Service;
pub use transport::{HttpRequest, RawResponse, ReqwestTransport, TransferMonitor, Transport};
