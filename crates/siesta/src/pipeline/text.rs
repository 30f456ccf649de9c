//! Text decoding for `text/*` responses.

use std::sync::LazyLock;

use bytes::Bytes;

use super::ContentTransformer;
use crate::content_type::{self, ContentTypePattern};
use crate::entity::Entity;
use crate::error::{ErrorCause, PARSE_FAILURE_MESSAGE, ParseError, RequestError};

pub const TEXT_DECODER: &str = "text";

static TEXT_TYPES: LazyLock<Vec<ContentTypePattern>> =
    LazyLock::new(|| content_type::patterns(["text/*"]).unwrap());

/// Charset assumed when a response does not declare one.
pub const DEFAULT_CHARSET: &str = "iso-8859-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charset {
    Utf8,
    Ascii,
    Latin1,
    Utf16,
    Utf16Le,
    Utf16Be,
}

impl Charset {
    fn from_label(label: &str) -> Option<Self> {
        let charset = match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" | "unicode-1-1-utf-8" => Charset::Utf8,
            "us-ascii" | "ascii" | "iso646-us" | "ansi_x3.4-1968" => Charset::Ascii,
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "latin1" | "l1" | "cp819" | "ibm819"
            | "iso-ir-100" => Charset::Latin1,
            "utf-16" => Charset::Utf16,
            "utf-16le" => Charset::Utf16Le,
            "utf-16be" => Charset::Utf16Be,
            _ => return None,
        };
        Some(charset)
    }

    fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Ascii => "US-ASCII",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Utf16 => "UTF-16",
            Charset::Utf16Le => "UTF-16LE",
            Charset::Utf16Be => "UTF-16BE",
        }
    }
}

/// Decodes `bytes` using the named charset, or [`DEFAULT_CHARSET`] when none is given.
///
/// Decoding is strict: bytes that are invalid for the charset are an error
/// rather than being replaced.
pub fn decode_text(bytes: &[u8], charset: Option<&str>) -> Result<String, ParseError> {
    let label = charset.unwrap_or(DEFAULT_CHARSET);
    let charset =
        Charset::from_label(label).ok_or_else(|| ParseError::UnknownCharset(label.to_owned()))?;
    let invalid = || ParseError::InvalidEncoding(charset.name());

    match charset {
        Charset::Utf8 => {
            let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
            std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|_| invalid())
        }
        Charset::Ascii => {
            if bytes.is_ascii() {
                Ok(bytes.iter().map(|&b| b as char).collect())
            } else {
                Err(invalid())
            }
        }
        Charset::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        Charset::Utf16 => match bytes {
            [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes).ok_or_else(invalid),
            [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes).ok_or_else(invalid),
            _ => decode_utf16(bytes, u16::from_be_bytes).ok_or_else(invalid),
        },
        Charset::Utf16Le => decode_utf16(bytes, u16::from_le_bytes).ok_or_else(invalid),
        Charset::Utf16Be => decode_utf16(bytes, u16::from_be_bytes).ok_or_else(invalid),
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

/// Transformer turning `text/*` bytes into a string using the entity's charset.
pub fn text_decoder() -> ContentTransformer<Bytes, String> {
    ContentTransformer::new(TEXT_DECODER, |bytes: Bytes, entity: &Entity| {
        decode_text(&bytes, entity.charset())
            .map_err(|e| RequestError::with_cause(PARSE_FAILURE_MESSAGE, ErrorCause::Parse(e)))
    })
    .with_content_type_patterns(TEXT_TYPES.iter().cloned())
    .with_transform_errors(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Content;
    use crate::pipeline::ResponseTransformer;

    #[test]
    fn test_default_charset_is_latin1() {
        assert_eq!(decode_text(&[0x68, 0xE9], None).unwrap(), "hé");
    }

    #[test]
    fn test_utf8() {
        assert_eq!(
            decode_text("héllo".as_bytes(), Some("utf-8")).unwrap(),
            "héllo"
        );
        assert_eq!(
            decode_text(b"\xEF\xBB\xBFbom", Some("UTF-8")).unwrap(),
            "bom"
        );
        assert!(matches!(
            decode_text(&[0xC3, 0x28], Some("utf-8")),
            Err(ParseError::InvalidEncoding("UTF-8"))
        ));
    }

    #[test]
    fn test_ascii_rejects_high_bytes() {
        assert_eq!(decode_text(b"plain", Some("us-ascii")).unwrap(), "plain");
        assert!(decode_text(&[0x80], Some("us-ascii")).is_err());
    }

    #[test]
    fn test_utf16_variants() {
        assert_eq!(decode_text(&[0x00, 0x68, 0x00, 0x69], Some("utf-16be")).unwrap(), "hi");
        assert_eq!(decode_text(&[0x68, 0x00, 0x69, 0x00], Some("utf-16le")).unwrap(), "hi");
        assert_eq!(
            decode_text(&[0xFF, 0xFE, 0x68, 0x00], Some("utf-16")).unwrap(),
            "h"
        );
        assert!(decode_text(&[0x00], Some("utf-16be")).is_err());
    }

    #[test]
    fn test_unknown_charset_fails() {
        assert!(matches!(
            decode_text(b"x", Some("klingon")),
            Err(ParseError::UnknownCharset(label)) if label == "klingon"
        ));
    }

    #[test]
    fn test_decoder_reports_parse_failure() {
        let entity = Entity::new(
            Content::Bytes(Bytes::from_static(&[0xFF])),
            "text/plain; charset=utf-8",
        );
        let error = text_decoder().process(Ok(entity)).unwrap_err();
        assert_eq!(error.user_message(), PARSE_FAILURE_MESSAGE);
        assert!(matches!(error.cause(), Some(ErrorCause::Parse(_))));
    }
}
