//! Generic content transformer.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use super::ResponseTransformer;
use crate::content_type::{self, ContentTypePattern};
use crate::entity::{ContentValue, Entity};
use crate::error::{ErrorCause, RequestError, ServiceError};
use crate::request::Response;

/// What a transformer does when the content is not of its input type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputTypeMismatch {
    /// Pass the response through untouched.
    #[default]
    Skip,
    /// Pass through only if the content already has the output type; fail
    /// otherwise.
    SkipIfOutputMatches,
    /// Fail with [`ErrorCause::WrongInputType`].
    Error,
}

type TransformFn<I, O> = dyn Fn(I, &Entity) -> Result<O, RequestError> + Send + Sync;

/// Converts entity content of type `I` into content of type `O`.
///
/// Applies only to responses whose content type matches one of its patterns,
/// or to every response when no pattern is set. Error responses are left alone unless
/// [`with_transform_errors`](Self::with_transform_errors) is enabled, in which
/// case the error's body is transformed and a failure to do so keeps the
/// original error.
pub struct ContentTransformer<I, O> {
    name: String,
    content_types: Vec<ContentTypePattern>,
    mismatch: InputTypeMismatch,
    transform_errors: bool,
    transform: Arc<TransformFn<I, O>>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> ContentTransformer<I, O>
where
    I: ContentValue + 'static,
    O: ContentValue + 'static,
{
    pub fn new<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(I, &Entity) -> Result<O, RequestError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            content_types: Vec::new(),
            mismatch: InputTypeMismatch::default(),
            transform_errors: false,
            transform: Arc::new(transform),
            _types: PhantomData,
        }
    }

    /// Restricts the transformer to content types matching any of `patterns`.
    pub fn with_content_types<S: AsRef<str>>(
        self,
        patterns: impl IntoIterator<Item = S>,
    ) -> Result<Self, ServiceError> {
        Ok(self.with_content_type_patterns(content_type::patterns(patterns)?))
    }

    pub fn with_content_type_patterns(
        mut self,
        patterns: impl IntoIterator<Item = ContentTypePattern>,
    ) -> Self {
        self.content_types = patterns.into_iter().collect();
        self
    }

    pub fn with_mismatch_action(mut self, action: InputTypeMismatch) -> Self {
        self.mismatch = action;
        self
    }

    pub fn with_transform_errors(mut self, enabled: bool) -> Self {
        self.transform_errors = enabled;
        self
    }

    fn applies_to(&self, entity: &Entity) -> bool {
        self.content_types.is_empty()
            || self
                .content_types
                .iter()
                .any(|pattern| pattern.matches(entity.content_type()))
    }

    fn transform_entity(&self, entity: Entity) -> Response {
        let Some(input) = I::from_content(entity.content()) else {
            return self.on_mismatch(entity);
        };
        let output = (self.transform)(input, &entity)?;
        Ok(entity.with_content(output.into_content()))
    }

    fn on_mismatch(&self, entity: Entity) -> Response {
        match self.mismatch {
            InputTypeMismatch::Skip => Ok(entity),
            InputTypeMismatch::SkipIfOutputMatches if O::kind().accepts(entity.content()) => {
                Ok(entity)
            }
            _ => {
                let cause = ErrorCause::WrongInputType {
                    expected: I::kind(),
                    actual: entity.content().kind(),
                };
                debug!(transformer = %self.name, cause = %cause, "Unexpected input content");
                Err(RequestError::with_cause(
                    crate::error::PARSE_FAILURE_MESSAGE,
                    cause,
                ))
            }
        }
    }
}

impl<I, O> ResponseTransformer for ContentTransformer<I, O>
where
    I: ContentValue + 'static,
    O: ContentValue + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, response: Response) -> Response {
        match response {
            Ok(entity) if self.applies_to(&entity) => self.transform_entity(entity),
            Ok(entity) => Ok(entity),
            Err(error) if self.transform_errors => {
                let Some(entity) = error.entity().filter(|e| self.applies_to(e)).cloned() else {
                    return Err(error);
                };
                match self.transform_entity(entity) {
                    Ok(transformed) => Err(error.with_entity(transformed)),
                    Err(failure) => {
                        debug!(
                            transformer = %self.name,
                            error = %failure,
                            "Could not transform error body, keeping original error"
                        );
                        Err(error)
                    }
                }
            }
            Err(error) => Err(error),
        }
    }
}

impl<I, O> fmt::Debug for ContentTransformer<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentTransformer")
            .field("name", &self.name)
            .field("content_types", &self.content_types)
            .field("mismatch", &self.mismatch)
            .field("transform_errors", &self.transform_errors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::{Value, json};

    use super::*;
    use crate::entity::Content;

    fn text_entity(text: &str, content_type: &str) -> Entity {
        Entity::new(Content::Text(text.to_owned()), content_type)
    }

    fn shout() -> ContentTransformer<String, String> {
        ContentTransformer::new("shout", |text: String, _: &Entity| Ok(text.to_uppercase()))
            .with_content_types(["text/*"])
            .unwrap()
    }

    #[test]
    fn test_transforms_matching_content() {
        let result = shout().process(Ok(text_entity("hi", "text/plain")));
        assert_eq!(result.unwrap().text(), Some("HI"));
    }

    #[test]
    fn test_ignores_other_content_types() {
        let result = shout().process(Ok(text_entity("hi", "application/json")));
        assert_eq!(result.unwrap().text(), Some("hi"));
    }

    #[test]
    fn test_mismatch_actions() {
        let bytes = Entity::new(Content::Bytes(Bytes::from_static(b"x")), "text/plain");

        let skipped = shout().process(Ok(bytes.clone())).unwrap();
        assert!(skipped.content().as_bytes().is_some());

        let strict = shout().with_mismatch_action(InputTypeMismatch::Error);
        let error = strict.process(Ok(bytes.clone())).unwrap_err();
        assert!(matches!(
            error.cause(),
            Some(ErrorCause::WrongInputType { .. })
        ));

        let to_json: ContentTransformer<String, Value> =
            ContentTransformer::new("to-json", |text: String, _: &Entity| Ok(json!({ "text": text })))
                .with_mismatch_action(InputTypeMismatch::SkipIfOutputMatches);
        let already_json = Entity::new(Content::Json(json!([1])), "application/json");
        assert!(to_json.process(Ok(already_json)).is_ok());
        assert!(to_json.process(Ok(bytes)).is_err());
    }

    #[test]
    fn test_failure_replaces_success() {
        let reject: ContentTransformer<String, String> =
            ContentTransformer::new("reject", |_: String, _: &Entity| {
                Err(RequestError::validation("Bad greeting"))
            });
        let error = reject.process(Ok(text_entity("hi", "text/plain"))).unwrap_err();
        assert_eq!(error.user_message(), "Bad greeting");
        assert!(matches!(error.cause(), Some(ErrorCause::Validation(_))));
    }

    #[test]
    fn test_error_bodies_only_when_enabled() {
        let body = text_entity("oops", "text/plain");
        let error = RequestError::from_status(500, body);

        let untouched = shout().process(Err(error.clone())).unwrap_err();
        assert_eq!(untouched.entity().and_then(Entity::text), Some("oops"));

        let transformed = shout()
            .with_transform_errors(true)
            .process(Err(error))
            .unwrap_err();
        assert_eq!(transformed.entity().and_then(Entity::text), Some("OOPS"));
        assert_eq!(transformed.http_status_code(), Some(500));
    }

    #[test]
    fn test_failed_error_body_transform_keeps_original() {
        let error = RequestError::from_status(502, text_entity("oops", "text/plain"));
        let failing: ContentTransformer<String, String> =
            ContentTransformer::new("fail", |_: String, _: &Entity| Err(RequestError::new("nope")))
                .with_transform_errors(true);

        let result = failing.process(Err(error)).unwrap_err();
        assert_eq!(result.user_message(), "Bad Gateway");
        assert_eq!(result.entity().and_then(Entity::text), Some("oops"));
    }
}
