//! JSON parsing helpers for AI backend responses
//!
//! Models often wrap the payload in prose or code fences, so each helper
//! locates the outermost JSON value before deserializing.

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

use super::types::{RawCandidate, RawExtraction, RawSynthesis};

const MAX_RAW_IN_ERROR: usize = 200;

fn truncate_raw(raw: &str) -> String {
    if raw.len() > MAX_RAW_IN_ERROR {
        let mut end = MAX_RAW_IN_ERROR;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &raw[..end])
    } else {
        raw.to_string()
    }
}

/// Slice between the first `open` and the last `close`
fn outer_span(response: &str, open: char, close: char) -> Option<&str> {
    let start = response.find(open)?;
    let end = response.rfind(close)?;
    (start < end).then(|| &response[start..=end])
}

/// Parse the outermost JSON object in a response
pub fn parse_json_object<T: DeserializeOwned>(response: &str) -> Result<T> {
    let response = response.trim();
    let json_str = outer_span(response, '{', '}').ok_or_else(|| {
        Error::InvalidData(format!(
            "No JSON found in AI response | Raw: {}",
            truncate_raw(response)
        ))
    })?;

    serde_json::from_str(json_str).map_err(|e| {
        Error::InvalidData(format!(
            "Invalid JSON from AI: {} | Raw: {}",
            e,
            truncate_raw(json_str)
        ))
    })
}

/// Parse an extraction response
///
/// Accepts either the documented object or a bare array of transactions.
pub fn parse_extraction(response: &str) -> Result<RawExtraction> {
    let trimmed = response.trim();
    let object_start = trimmed.find('{');
    let array_start = trimmed.find('[');

    let bare_array = match (array_start, object_start) {
        (Some(a), Some(o)) => a < o,
        (Some(_), None) => true,
        _ => false,
    };

    if bare_array {
        let json_str = outer_span(trimmed, '[', ']').ok_or_else(|| {
            Error::InvalidData(format!(
                "Unterminated JSON array in AI response | Raw: {}",
                truncate_raw(trimmed)
            ))
        })?;
        let transactions: Vec<RawCandidate> = serde_json::from_str(json_str).map_err(|e| {
            Error::InvalidData(format!(
                "Invalid JSON from AI: {} | Raw: {}",
                e,
                truncate_raw(json_str)
            ))
        })?;
        return Ok(RawExtraction {
            period: None,
            transactions,
        });
    }

    parse_json_object(trimmed)
}

/// Parse a classification response into a category id
pub fn parse_classification(response: &str) -> Result<i64> {
    let value: serde_json::Value = parse_json_object(response)?;
    let id = value
        .get("category_id")
        .or_else(|| value.get("id"))
        .ok_or_else(|| Error::InvalidData("Classification response missing category_id".into()))?;

    match id {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::InvalidData(format!("Classification id is not an integer: {}", id)))
}

/// Parse a synthesis response
pub fn parse_synthesis(response: &str) -> Result<RawSynthesis> {
    parse_json_object(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extraction_object_with_prose() {
        let response = r#"Here you go:
```json
{"period": {"start": "2025-06-01", "end": "2025-06-30"},
 "transactions": [{"date": "2025-06-03", "description": "COFFEE", "amount": 4.5, "currency": "USD"}]}
```"#;
        let parsed = parse_extraction(response).unwrap();
        assert_eq!(parsed.transactions.len(), 1);
        assert_eq!(
            parsed.period.unwrap().end.as_deref(),
            Some("2025-06-30")
        );
    }

    #[test]
    fn test_parse_extraction_bare_array() {
        let response = r#"[{"date": "2025-06-03", "merchant": "Cinema", "amount": "12.00"}]"#;
        let parsed = parse_extraction(response).unwrap();
        assert!(parsed.period.is_none());
        assert_eq!(parsed.transactions[0].description.as_deref(), Some("Cinema"));
        assert_eq!(parsed.transactions[0].amount_text().as_deref(), Some("12.00"));
    }

    #[test]
    fn test_parse_extraction_garbage() {
        assert!(parse_extraction("I could not read this statement.").is_err());
    }

    #[test]
    fn test_parse_classification_variants() {
        assert_eq!(parse_classification(r#"{"category_id": 4}"#).unwrap(), 4);
        assert_eq!(parse_classification(r#"{"category_id": "12"}"#).unwrap(), 12);
        assert!(parse_classification(r#"{"category": "Food"}"#).is_err());
        assert!(parse_classification(r#"{"category_id": "Food"}"#).is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(300);
        let truncated = truncate_raw(&long);
        assert!(truncated.ends_with("..."));
    }
}
