//! # Content types
//!
//! Helpers for reading media type strings and the wildcard patterns that
//! transformers use to pick the responses they apply to.
//!
//! A pattern such as `text/*` or `*/*+json` matches the essence of a content
//! type (the part before any `;` parameters). Each `*` stands for one or more
//! characters other than `/` and `+`, so `*/json` matches `application/json`
//! but not `application/ld+json`. Matching is case-insensitive.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::ServiceError;

/// The media type without parameters, e.g. `text/plain` for
/// `text/plain; charset=utf-8`.
pub fn essence(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
}

/// Looks up a parameter (such as `charset`) on a content type. Names compare
/// case-insensitively and surrounding quotes are removed from the value.
pub fn parameter<'a>(content_type: &'a str, name: &str) -> Option<&'a str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(value.trim().trim_matches('"'))
        } else {
            None
        }
    })
}

/// A compiled content type wildcard.
#[derive(Clone)]
pub struct ContentTypePattern {
    pattern: String,
    matcher: Regex,
}

impl ContentTypePattern {
    pub fn new(pattern: &str) -> Result<Self, ServiceError> {
        let pattern = pattern.trim();
        let mut source = String::from("(?i)^");
        for (i, literal) in pattern.split('*').enumerate() {
            if i > 0 {
                source.push_str("[^/+]+");
            }
            source.push_str(&regex::escape(literal));
        }
        source.push('$');

        let matcher = Regex::new(&source).map_err(|source| ServiceError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })?;

        Ok(Self {
            pattern: pattern.to_owned(),
            matcher,
        })
    }

    pub fn matches(&self, content_type: &str) -> bool {
        self.matcher.is_match(essence(content_type))
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl FromStr for ContentTypePattern {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for ContentTypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentTypePattern")
            .field(&self.pattern)
            .finish()
    }
}

impl fmt::Display for ContentTypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Compiles a list of patterns.
pub fn patterns<I, S>(patterns: I) -> Result<Vec<ContentTypePattern>, ServiceError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| ContentTypePattern::new(p.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_essence_and_parameters() {
        assert_eq!(essence("text/plain; charset=utf-8"), "text/plain");
        assert_eq!(essence(" application/json "), "application/json");
        assert_eq!(
            parameter("text/plain; Charset=\"UTF-8\"", "charset"),
            Some("UTF-8")
        );
        assert_eq!(parameter("text/plain", "charset"), None);
        assert_eq!(parameter("text/plain; q=1; charset=latin1", "charset"), Some("latin1"));
    }

    #[test]
    fn test_wildcards() {
        let text = ContentTypePattern::new("text/*").unwrap();
        assert!(text.matches("text/plain"));
        assert!(text.matches("TEXT/HTML; charset=utf-8"));
        assert!(!text.matches("application/text"));
        assert!(!text.matches("text/"));

        let json = ContentTypePattern::new("*/json").unwrap();
        assert!(json.matches("application/json"));
        assert!(json.matches("application/json; charset=utf-8"));
        assert!(!json.matches("application/ld+json"));

        let suffixed = ContentTypePattern::new("*/*+json").unwrap();
        assert!(suffixed.matches("application/hal+json"));
        assert!(!suffixed.matches("application/json"));

        let any = ContentTypePattern::new("*/*").unwrap();
        assert!(any.matches("image/png"));
        assert!(!any.matches("garbage"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let pattern = ContentTypePattern::new("application/vnd.api+json").unwrap();
        assert!(pattern.matches("application/vnd.api+json"));
        assert!(!pattern.matches("application/vndXapi+json"));
    }

    #[test]
    fn test_parse_from_str() {
        let pattern: ContentTypePattern = "Application/*+XML".parse().unwrap();
        assert_eq!(pattern.as_str(), "Application/*+XML");
        assert!(pattern.matches("application/atom+xml"));

        let compiled = patterns(["text/*", " */json "]).unwrap();
        assert_eq!(compiled.len(), 2);
        assert_eq!(compiled[1].as_str(), "*/json");
    }
}
