//! # Response Pipeline
//!
//! An ordered chain of [`ResponseTransformer`]s applied to every response
//! before it reaches the cache or request callbacks. Each transformer receives
//! the previous one's output, so decoders (bytes to text, bytes to JSON) run
//! first and application-specific model mapping and validation follow.
//!
//! The default chain decodes JSON and then text.

mod json;
mod text;
mod transformer;

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::entity::Entity;
use crate::error::{RequestError, TransportError};
use crate::request::Response;
use crate::transport::RawResponse;

pub use self::json::{JSON_DECODER, json_decoder};
pub use self::text::{DEFAULT_CHARSET, TEXT_DECODER, decode_text, text_decoder};
pub use self::transformer::{ContentTransformer, InputTypeMismatch};

/// A step in the response pipeline.
pub trait ResponseTransformer: Send + Sync {
    /// Name used to locate the transformer in a [`Pipeline`].
    fn name(&self) -> &str;

    fn process(&self, response: Response) -> Response;
}

/// Ordered list of transformers.
#[derive(Clone, Default)]
pub struct Pipeline {
    transformers: Vec<Arc<dyn ResponseTransformer>>,
}

impl Pipeline {
    /// An empty pipeline that leaves responses as raw bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON decoding followed by text decoding.
    pub fn standard() -> Self {
        let mut pipeline = Self::new();
        pipeline.push(json_decoder()).push(text_decoder());
        pipeline
    }

    pub fn push<T: ResponseTransformer + 'static>(&mut self, transformer: T) -> &mut Self {
        self.transformers.push(Arc::new(transformer));
        self
    }

    /// Inserts at `index`, clamped to the end of the chain.
    pub fn insert<T: ResponseTransformer + 'static>(&mut self, index: usize, transformer: T) -> &mut Self {
        let index = index.min(self.transformers.len());
        self.transformers.insert(index, Arc::new(transformer));
        self
    }

    /// Inserts immediately before the transformer called `name`, or at the end
    /// if there is none.
    pub fn insert_before<T: ResponseTransformer + 'static>(&mut self, name: &str, transformer: T) -> &mut Self {
        let index = self.position(name).unwrap_or(self.transformers.len());
        self.insert(index, transformer)
    }

    /// Removes every transformer called `name`. Returns whether any were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.transformers.len();
        self.transformers.retain(|t| t.name() != name);
        self.transformers.len() != before
    }

    pub fn clear(&mut self) -> &mut Self {
        self.transformers.clear();
        self
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.transformers.iter().position(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub fn process(&self, response: Response) -> Response {
        self.transformers.iter().fold(response, |response, transformer| {
            trace!(transformer = transformer.name(), ok = response.is_ok(), "Applying transformer");
            transformer.process(response)
        })
    }

    /// Turns a transport result into a response and runs it through the chain.
    ///
    /// Statuses of 400 and above become failures carrying the body as their
    /// entity, so error-aware transformers can decode it.
    pub fn process_raw(&self, raw: Result<RawResponse, TransportError>) -> Response {
        self.process(initial_response(raw))
    }
}

fn initial_response(raw: Result<RawResponse, TransportError>) -> Response {
    match raw {
        Ok(raw) => {
            let status = raw.status;
            let entity = Entity::from_raw(raw);
            if status >= 400 {
                Err(RequestError::from_status(status, entity))
            } else {
                Ok(entity)
            }
        }
        Err(error) => Err(RequestError::from_transport(error)),
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use reqwest::header::{CONTENT_TYPE, HeaderValue};
    use serde_json::json;

    use super::*;
    use crate::error::{ErrorCause, TransportErrorKind};

    fn raw(status: u16, content_type: &'static str, body: &'static str) -> RawResponse {
        RawResponse::new(status, Bytes::from_static(body.as_bytes()))
            .with_header(CONTENT_TYPE, HeaderValue::from_static(content_type))
    }

    fn tag(name: &'static str) -> ContentTransformer<String, String> {
        ContentTransformer::new(name, move |text: String, _: &Entity| Ok(format!("{text}{name}")))
    }

    #[test]
    fn test_standard_decodes_text_and_json() {
        let pipeline = Pipeline::standard();
        assert_eq!(pipeline.names(), vec![JSON_DECODER, TEXT_DECODER]);

        let text = pipeline.process_raw(Ok(raw(200, "text/plain", "zwobble"))).unwrap();
        assert_eq!(text.text(), Some("zwobble"));

        let json = pipeline
            .process_raw(Ok(raw(200, "application/json", r#"{"a":1}"#)))
            .unwrap();
        assert_eq!(json.json(), Some(&json!({ "a": 1 })));

        let binary = pipeline.process_raw(Ok(raw(200, "image/png", "PNG"))).unwrap();
        assert!(binary.content().as_bytes().is_some());
    }

    #[test]
    fn test_error_status_keeps_decoded_body() {
        let pipeline = Pipeline::standard();
        let error = pipeline
            .process_raw(Ok(raw(500, "application/json", r#"{"error":"kaboom"}"#)))
            .unwrap_err();
        assert_eq!(error.http_status_code(), Some(500));
        assert!(matches!(error.cause(), Some(ErrorCause::HttpStatus(500))));
        assert_eq!(
            error.entity().and_then(Entity::json),
            Some(&json!({ "error": "kaboom" }))
        );
    }

    #[test]
    fn test_transport_error_passes_through() {
        let pipeline = Pipeline::standard();
        let error = pipeline
            .process_raw(Err(TransportError::new(TransportErrorKind::Connect, "refused")))
            .unwrap_err();
        assert_eq!(error.user_message(), "refused");
        assert!(error.entity().is_none());
    }

    #[test]
    fn test_chain_editing() {
        let mut pipeline = Pipeline::new();
        pipeline.push(tag("b")).insert(0, tag("a")).insert(99, tag("d"));
        pipeline.insert_before("d", tag("c"));
        assert_eq!(pipeline.names(), vec!["a", "b", "c", "d"]);

        let entity = Entity::new(crate::entity::Content::Text(String::new()), "text/plain");
        assert_eq!(pipeline.process(Ok(entity)).unwrap().text(), Some("abcd"));

        assert!(pipeline.remove("b"));
        assert!(!pipeline.remove("b"));
        assert_eq!(pipeline.names(), vec!["a", "c", "d"]);

        pipeline.clear();
        assert!(pipeline.is_empty());
    }
}
