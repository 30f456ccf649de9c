use std::fmt;

use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

/// Identity used to coalesce equivalent requests.
///
/// Two requests with the same method, URL and body share a signature. Callers
/// may replace the computed value with an explicit key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature(String);

impl RequestSignature {
    pub fn explicit(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub(crate) fn compute(method: &Method, url: &Url, body: Option<&[u8]>) -> Self {
        let mut signature = format!("{method} {url}");
        if let Some(body) = body {
            let digest = Sha256::digest(body);
            signature.push_str(&format!(" #{digest:x}"));
        }
        Self(signature)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
