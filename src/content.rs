//! Body decoding for captured payloads
//!
//! Request and response bodies arrive with a declared content type that
//! varies per endpoint: completion calls carry a single JSON document while
//! telemetry uploads are newline-delimited JSON streams. This module turns a
//! raw body into the sequence of JSON records it contains, or reports the
//! type as unsupported so callers can skip the payload entirely.

use serde_json::Value;

use crate::error::DecodeError;

/// Media type of a single JSON document body.
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// Media type of a newline-delimited JSON stream body.
pub const JSON_STREAM_MEDIA_TYPE: &str = "application/x-json-stream";

/// Result of decoding a body against its declared content type.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedContent {
    /// The JSON records contained in the body, in input order.
    Records(Vec<Value>),
    /// The declared type is unknown or absent; there is nothing to decode.
    Unsupported,
}

impl DecodedContent {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, DecodedContent::Unsupported)
    }
}

/// Decode a raw body according to its declared content type.
///
/// A JSON-stream body yields one record per non-empty line; any line that
/// fails to parse fails the whole call, so callers see a malformed stream as
/// a single [`DecodeError`] rather than a partial sequence. A plain JSON
/// body yields its top-level array elements, or the top-level value itself
/// as a one-element sequence. Unknown and missing content types return
/// [`DecodedContent::Unsupported`] and never error.
pub fn decode(body: &[u8], declared_type: Option<&str>) -> Result<DecodedContent, DecodeError> {
    let essence = match declared_type.map(media_type_essence) {
        Some(essence) => essence,
        None => return Ok(DecodedContent::Unsupported),
    };

    let text = String::from_utf8_lossy(body);

    if essence == JSON_STREAM_MEDIA_TYPE {
        let mut records = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|source| {
                DecodeError::MalformedLine {
                    line: index + 1,
                    source,
                }
            })?;
            records.push(record);
        }
        return Ok(DecodedContent::Records(records));
    }

    if essence == JSON_MEDIA_TYPE {
        let parsed: Value = serde_json::from_str(&text)?;
        let records = match parsed {
            Value::Array(elements) => elements,
            other => vec![other],
        };
        return Ok(DecodedContent::Records(records));
    }

    Ok(DecodedContent::Unsupported)
}

/// Strip any parameters (`; charset=...`) and normalize case, leaving just
/// the media type.
fn media_type_essence(declared: &str) -> String {
    declared
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_stream_yields_one_record_per_line() {
        let body = b"{\"a\":1}\n{\"a\":2}\n\n{\"a\":3}\n";
        let decoded = decode(body, Some(JSON_STREAM_MEDIA_TYPE)).unwrap();
        assert_eq!(
            decoded,
            DecodedContent::Records(vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})])
        );
    }

    #[test]
    fn json_stream_bad_line_fails_whole_body() {
        let body = b"{\"a\":1}\nnot json\n{\"a\":3}\n";
        let err = decode(body, Some(JSON_STREAM_MEDIA_TYPE)).unwrap_err();
        match err {
            crate::error::DecodeError::MalformedLine { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn json_object_yields_single_record() {
        let body = br#"{"data":{"x":1}}"#;
        let decoded = decode(body, Some(JSON_MEDIA_TYPE)).unwrap();
        assert_eq!(
            decoded,
            DecodedContent::Records(vec![json!({"data": {"x": 1}})])
        );
    }

    #[test]
    fn json_array_yields_elements_in_order() {
        let body = br#"[{"i":0},{"i":1},{"i":2}]"#;
        let decoded = decode(body, Some(JSON_MEDIA_TYPE)).unwrap();
        match decoded {
            DecodedContent::Records(records) => {
                assert_eq!(records.len(), 3);
                assert_eq!(records[1], json!({"i": 1}));
            }
            DecodedContent::Unsupported => panic!("expected records"),
        }
    }

    #[test]
    fn json_scalar_yields_one_record() {
        let decoded = decode(b"42", Some(JSON_MEDIA_TYPE)).unwrap();
        assert_eq!(decoded, DecodedContent::Records(vec![json!(42)]));
    }

    #[test]
    fn malformed_json_document_is_an_error() {
        assert!(decode(b"{not json", Some(JSON_MEDIA_TYPE)).is_err());
    }

    #[test]
    fn unknown_type_is_unsupported_not_an_error() {
        let decoded = decode(b"hello", Some("text/plain")).unwrap();
        assert!(decoded.is_unsupported());
    }

    #[test]
    fn missing_type_is_unsupported() {
        let decoded = decode(b"{}", None).unwrap();
        assert!(decoded.is_unsupported());
    }

    #[test]
    fn media_type_parameters_and_case_are_ignored() {
        let body = br#"{"a":1}"#;
        let decoded = decode(body, Some("Application/JSON; charset=utf-8")).unwrap();
        assert_eq!(decoded, DecodedContent::Records(vec![json!({"a": 1})]));
    }
}
