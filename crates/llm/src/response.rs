//! Extraction of the JSON payload from a model's text reply.

use pipeline::LlmError;

/// Parses the JSON document in `text`.
///
/// Models frequently wrap structured output in a Markdown code fence or add a
/// sentence before it. The payload is taken to be the span from the first `{`
/// or `[` to the matching last `}` or `]`.
pub fn extract_json(text: &str) -> Result<serde_json::Value, LlmError> {
    let trimmed = strip_fence(text.trim());
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let start = trimmed.find(['{', '[']);
    let end = trimmed.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if s < e => serde_json::from_str(&trimmed[s..=e]).map_err(|err| {
            LlmError::InvalidResponse {
                message: format!("response is not valid JSON: {err}"),
            }
        }),
        _ => Err(LlmError::InvalidResponse {
            message: "response contains no JSON document".into(),
        }),
    }
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_json_is_parsed() {
        assert_eq!(extract_json(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let text = "```json\n{\"topic\": \"Rust\"}\n```";
        assert_eq!(extract_json(text).unwrap(), json!({"topic": "Rust"}));
    }

    #[test]
    fn leading_prose_is_skipped() {
        let text = "Here is the curriculum:\n[1, 2, 3]\nLet me know!";
        assert_eq!(extract_json(text).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn prose_without_json_is_invalid() {
        assert!(matches!(
            extract_json("I cannot help with that."),
            Err(LlmError::InvalidResponse { .. })
        ));
    }
}
