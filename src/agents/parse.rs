use serde_json::Value;

use crate::llm::CompletionError;

/// Parse a JSON value out of an LLM completion.
///
/// A single fenced block wrapping the whole reply is unwrapped first
/// (```` ```json ```` or bare ```` ``` ````; the tag line is ignored).
/// Anything that still is not JSON is a hard error carrying the raw text.
pub fn extract_structured(text: &str) -> Result<Value, CompletionError> {
    let body = strip_fence(text);
    serde_json::from_str(body).map_err(|e| CompletionError::Malformed {
        reason: e.to_string(),
        raw: text.to_string(),
    })
}

/// Like `extract_structured`, but any non-object JSON is also rejected.
pub fn extract_object(text: &str) -> Result<serde_json::Map<String, Value>, CompletionError> {
    match extract_structured(text)? {
        Value::Object(map) => Ok(map),
        other => Err(CompletionError::Malformed {
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
            raw: text.to_string(),
        }),
    }
}

fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the rest of the opening fence line (language tag)
    let body = match after_open.find('\n') {
        Some(i) => &after_open[i + 1..],
        None => return trimmed,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Read a field that may be a string or a list of strings as a list.
pub fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| match i {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Read a string field, tolerating numbers and missing values.
pub fn string_field(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
