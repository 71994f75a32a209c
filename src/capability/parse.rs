//! Strict parsing of capability replies.
//!
//! Replies are often JSON wrapped in markdown fences or surrounded by a
//! sentence of prose. We locate the JSON object, deserialize it into a typed
//! reply and then validate it. Missing or mistyped fields are errors, never
//! silently defaulted.

use super::AnalysisResponse;
use crate::error::ResponseParseError;
use serde::de::DeserializeOwned;

/// Typed replies that carry invariants serde alone can't express.
pub trait Validate {
    fn validate(&self) -> Result<(), ResponseParseError>;
}

/// Locate the JSON object in a free-text reply.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(body) = fenced_block(text, "```json").or_else(|| fenced_block(text, "```")) {
        if body.starts_with('{') {
            return Some(body);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn fenced_block<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    let start = text.find(opener)? + opener.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// Deserialize a reply into `T` and validate it.
pub fn parse_reply<T>(
    response: &AnalysisResponse,
    expected: &'static str,
) -> Result<T, ResponseParseError>
where
    T: DeserializeOwned + Validate,
{
    let reply: T = match response {
        AnalysisResponse::Structured(value) => serde_json::from_value(value.clone()),
        AnalysisResponse::Text(text) => {
            let json = extract_json(text).ok_or(ResponseParseError::NoJson)?;
            serde_json::from_str(json)
        }
    }
    .map_err(|e| ResponseParseError::Json {
        expected,
        message: e.to_string(),
    })?;

    reply.validate()?;
    Ok(reply)
}

/// Check that a score lies in [0, 1].
pub(crate) fn ensure_unit_interval(field: &str, value: f64) -> Result<(), ResponseParseError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ResponseParseError::Invalid(format!(
            "{} must be between 0 and 1 (got {})",
            field, value
        )))
    }
}
