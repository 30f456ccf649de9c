//! # Errors
//!
//! Two families of errors live here:
//!
//! - [`ServiceError`]: misuse or misconfiguration of the service itself (bad URLs,
//!   invalid configuration patterns, HTTP client construction failures). These are
//!   returned synchronously from builder and lookup calls.
//! - [`RequestError`]: the failure outcome of a request. It always carries a
//!   human-readable message and, where available, the HTTP status, the decoded
//!   error body and a machine-inspectable [`ErrorCause`].

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use reqwest::StatusCode;
use thiserror::Error;

use crate::entity::{ContentKind, Entity};

/// Message used when a transformer cannot make sense of a response body.
pub const PARSE_FAILURE_MESSAGE: &str = "Cannot parse server response";

/// Last-resort user message when nothing more specific is known.
pub const GENERIC_FAILURE_MESSAGE: &str = "Request failed";

/// Errors raised while building or using a [`Service`](crate::Service).
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("URL cannot be used as a base: {0}")]
    CannotBeABase(String),

    #[error("No base URL configured; use resource_from_url for absolute URLs")]
    NoBaseUrl,

    #[error("Invalid pattern \"{pattern}\": {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Service has been dropped")]
    ServiceDropped,
}

/// Broad classification of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Redirect,
    Body,
    Cancelled,
    Other,
}

/// A failure reported by a [`Transport`](crate::Transport) before any HTTP
/// response could be produced.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "Request cancelled")
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failures decoding a response body.
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    #[error("unknown charset \"{0}\"")]
    UnknownCharset(String),

    #[error("response body is not valid {0}")]
    InvalidEncoding(&'static str),

    #[error("malformed JSON: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("JSON content must be an object or array, found {0}")]
    UnexpectedJsonShape(&'static str),
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::Json(Arc::new(err))
    }
}

/// Machine-inspectable reason behind a [`RequestError`].
#[derive(Error, Debug, Clone)]
pub enum ErrorCause {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("server responded with status {0}")]
    HttpStatus(u16),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("content rejected: {0}")]
    Validation(String),

    #[error("expected {expected:?} content, found {actual:?}")]
    WrongInputType {
        expected: ContentKind,
        actual: ContentKind,
    },

    #[error("server reported no change but there is no cached data to reuse")]
    NoDataForNotModified,

    #[error("no async runtime available to perform the request")]
    NoRuntime,

    #[error(transparent)]
    Other(Arc<dyn StdError + Send + Sync>),
}

/// The failure half of a request outcome.
///
/// `Display` shows only the user-facing message; the underlying cause is exposed
/// through [`StdError::source`] and [`RequestError::cause`].
#[derive(Debug, Clone)]
pub struct RequestError {
    user_message: String,
    http_status_code: Option<u16>,
    entity: Option<Entity>,
    cause: Option<ErrorCause>,
    timestamp: SystemTime,
}

impl RequestError {
    /// Creates an error with only a user message.
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            http_status_code: None,
            entity: None,
            cause: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_cause(user_message: impl Into<String>, cause: ErrorCause) -> Self {
        let mut error = Self::new(user_message);
        error.cause = Some(cause);
        error
    }

    /// Shorthand for a transformer rejecting well-formed content.
    pub fn validation(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::with_cause(reason.clone(), ErrorCause::Validation(reason))
    }

    /// Builds the error for a completed exchange.
    ///
    /// The user message is chosen from, in order: an explicit `message`, the
    /// transport's own description, the standard text for the HTTP status, and
    /// finally [`GENERIC_FAILURE_MESSAGE`].
    pub fn from_response(
        status: Option<u16>,
        entity: Option<Entity>,
        transport: Option<TransportError>,
        message: Option<String>,
    ) -> Self {
        let user_message = message
            .or_else(|| transport.as_ref().map(|e| e.message().to_owned()))
            .or_else(|| status.and_then(status_text).map(str::to_owned))
            .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_owned());

        let cause = match (transport, status) {
            (Some(transport), _) => Some(ErrorCause::Transport(transport)),
            (None, Some(code)) if code >= 400 => Some(ErrorCause::HttpStatus(code)),
            _ => None,
        };

        Self {
            user_message,
            http_status_code: status,
            entity,
            cause,
            timestamp: SystemTime::now(),
        }
    }

    pub fn from_status(status: u16, entity: Entity) -> Self {
        Self::from_response(Some(status), Some(entity), None, None)
    }

    pub fn from_transport(error: TransportError) -> Self {
        Self::from_response(None, None, Some(error), None)
    }

    pub fn cancelled() -> Self {
        Self::from_transport(TransportError::cancelled())
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn http_status_code(&self) -> Option<u16> {
        self.http_status_code
    }

    /// The (possibly decoded) body that accompanied an HTTP error.
    pub fn entity(&self) -> Option<&Entity> {
        self.entity.as_ref()
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        match &self.cause {
            Some(ErrorCause::Transport(error)) => Some(error),
            _ => None,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.transport_error()
            .is_some_and(|e| e.kind() == TransportErrorKind::Cancelled)
    }

    pub(crate) fn with_entity(mut self, entity: Entity) -> Self {
        self.entity = Some(entity);
        self
    }

    pub(crate) fn with_status(mut self, status: Option<u16>) -> Self {
        self.http_status_code = status;
        self
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_message)
    }
}

impl StdError for RequestError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|c| c as &(dyn StdError + 'static))
    }
}

fn status_text(code: u16) -> Option<&'static str> {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
}
