//! # Entities
//!
//! An [`Entity`] is an immutable snapshot of content fetched from the network
//! (or supplied locally), together with the response metadata that came with it.
//! Transformers never mutate an entity; they produce a new one with different
//! [`Content`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, ETAG, HeaderMap};
use serde_json::Value;

use crate::content_type;
use crate::transport::RawResponse;

/// Content type assumed when the server sends none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Application-defined content stored in an entity.
#[derive(Clone)]
pub struct CustomContent {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl CustomContent {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        if self.type_id != TypeId::of::<T>() {
            return None;
        }
        Arc::downcast::<T>(self.value.clone()).ok()
    }
}

impl fmt::Debug for CustomContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CustomContent<{}>", self.type_name)
    }
}

/// The payload of an [`Entity`], tagged by its runtime kind.
#[derive(Clone, Debug)]
pub enum Content {
    Bytes(Bytes),
    Text(String),
    Json(Value),
    Custom(CustomContent),
}

impl Content {
    pub fn custom<T: Any + Send + Sync>(value: T) -> Self {
        Content::Custom(CustomContent::new(value))
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            Content::Bytes(_) => ContentKind::Bytes,
            Content::Text(_) => ContentKind::Text,
            Content::Json(_) => ContentKind::Json,
            Content::Custom(custom) => ContentKind::Custom(custom.type_id),
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Content::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Content::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl PartialEq for Content {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Content::Bytes(a), Content::Bytes(b)) => a == b,
            (Content::Text(a), Content::Text(b)) => a == b,
            (Content::Json(a), Content::Json(b)) => a == b,
            (Content::Custom(a), Content::Custom(b)) => Arc::ptr_eq(&a.value, &b.value),
            _ => false,
        }
    }
}

/// Runtime type tag used by transformers to check their input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// Matches every kind of content.
    Any,
    Bytes,
    Text,
    Json,
    Custom(TypeId),
}

impl ContentKind {
    pub fn accepts(&self, content: &Content) -> bool {
        *self == ContentKind::Any || *self == content.kind()
    }
}

/// Conversion between [`Content`] and a concrete Rust type.
pub trait ContentValue: Sized {
    fn kind() -> ContentKind;

    fn from_content(content: &Content) -> Option<Self>;

    fn into_content(self) -> Content;
}

impl ContentValue for Content {
    fn kind() -> ContentKind {
        ContentKind::Any
    }

    fn from_content(content: &Content) -> Option<Self> {
        Some(content.clone())
    }

    fn into_content(self) -> Content {
        self
    }
}

impl ContentValue for Bytes {
    fn kind() -> ContentKind {
        ContentKind::Bytes
    }

    fn from_content(content: &Content) -> Option<Self> {
        content.as_bytes().cloned()
    }

    fn into_content(self) -> Content {
        Content::Bytes(self)
    }
}

impl ContentValue for String {
    fn kind() -> ContentKind {
        ContentKind::Text
    }

    fn from_content(content: &Content) -> Option<Self> {
        content.as_text().map(str::to_owned)
    }

    fn into_content(self) -> Content {
        Content::Text(self)
    }
}

impl ContentValue for Value {
    fn kind() -> ContentKind {
        ContentKind::Json
    }

    fn from_content(content: &Content) -> Option<Self> {
        content.as_json().cloned()
    }

    fn into_content(self) -> Content {
        Content::Json(self)
    }
}

impl<T: Any + Send + Sync> ContentValue for Arc<T> {
    fn kind() -> ContentKind {
        ContentKind::Custom(TypeId::of::<T>())
    }

    fn from_content(content: &Content) -> Option<Self> {
        match content {
            Content::Custom(custom) => custom.downcast::<T>(),
            _ => None,
        }
    }

    fn into_content(self) -> Content {
        Content::Custom(CustomContent::from_arc(self))
    }
}

/// Content plus the metadata of the response that produced it.
#[derive(Clone, Debug)]
pub struct Entity {
    content: Content,
    content_type: String,
    charset: Option<String>,
    etag: Option<String>,
    headers: HashMap<String, String>,
    timestamp: SystemTime,
}

impl Entity {
    pub fn new(content: Content, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        let charset = content_type::parameter(&content_type, "charset").map(str::to_owned);
        Self {
            content,
            content_type,
            charset,
            etag: None,
            headers: HashMap::new(),
            timestamp: SystemTime::now(),
        }
    }

    /// Builds an entity holding the raw body of a response.
    pub fn from_raw(raw: RawResponse) -> Self {
        let headers = flatten_headers(&raw.headers);
        let content_type = headers
            .get(CONTENT_TYPE.as_str())
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned());
        let charset = content_type::parameter(&content_type, "charset").map(str::to_owned);
        let etag = headers.get(ETAG.as_str()).cloned();

        Self {
            content: Content::Bytes(raw.body),
            content_type,
            charset,
            etag,
            headers,
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = content;
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Copy of this entity reflecting a not-modified revalidation.
    ///
    /// Content is kept; the timestamp moves to `at` and the etag is replaced
    /// only when the server sent a new one.
    pub fn refreshed(&self, etag: Option<String>, at: SystemTime) -> Self {
        let mut entity = self.clone();
        if let Some(etag) = etag {
            entity.headers.insert(ETAG.as_str().to_owned(), etag.clone());
            entity.etag = Some(etag);
        }
        entity.timestamp = at;
        entity
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn into_content(self) -> Content {
        self.content
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn typed_content<T: ContentValue>(&self) -> Option<T> {
        T::from_content(&self.content)
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }

    pub fn json(&self) -> Option<&Value> {
        self.content.as_json()
    }
}

fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut flat: HashMap<String, String> = HashMap::with_capacity(headers.keys_len());
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        flat.entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    flat
}
