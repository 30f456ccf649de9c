//! JSON decoding.

use std::sync::LazyLock;

use bytes::Bytes;
use serde_json::Value;

use super::ContentTransformer;
use crate::content_type::{self, ContentTypePattern};
use crate::entity::Entity;
use crate::error::{ErrorCause, PARSE_FAILURE_MESSAGE, ParseError, RequestError};

pub const JSON_DECODER: &str = "json";

static JSON_TYPES: LazyLock<Vec<ContentTypePattern>> =
    LazyLock::new(|| content_type::patterns(["*/json", "*/*+json"]).unwrap());

/// Parses a JSON document whose top level must be an object or an array.
fn parse_json(bytes: &[u8]) -> Result<Value, ParseError> {
    let value: Value = serde_json::from_slice(bytes)?;
    match value {
        Value::Object(_) | Value::Array(_) => Ok(value),
        Value::Null => Err(ParseError::UnexpectedJsonShape("null")),
        Value::Bool(_) => Err(ParseError::UnexpectedJsonShape("boolean")),
        Value::Number(_) => Err(ParseError::UnexpectedJsonShape("number")),
        Value::String(_) => Err(ParseError::UnexpectedJsonShape("string")),
    }
}

/// Transformer turning JSON bytes into a [`Value`].
///
/// Matches `*/json` and `*/*+json`, and also decodes error bodies.
pub fn json_decoder() -> ContentTransformer<Bytes, Value> {
    ContentTransformer::new(JSON_DECODER, |bytes: Bytes, _: &Entity| {
        parse_json(&bytes)
            .map_err(|e| RequestError::with_cause(PARSE_FAILURE_MESSAGE, ErrorCause::Parse(e)))
    })
    .with_content_type_patterns(JSON_TYPES.iter().cloned())
    .with_transform_errors(true)
}
