//! Recovery of tool arguments streamed as JSON text.

use serde_json::{Map, Value};

/// Parses streamed tool arguments into a JSON object.
///
/// The vendor sometimes concatenates several argument objects without a
/// separator (`{"a":1}{"b":2}`). When the whole string does not parse, the
/// first complete object starting at the first `{` is used. Anything that
/// still fails yields an empty object.
pub fn parse_tool_arguments(raw: &str) -> Value {
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(raw) {
        return value;
    }
    first_object(raw)
        .and_then(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .filter(Value::is_object)
        .unwrap_or_else(|| {
            if !raw.trim().is_empty() {
                tracing::warn!(arguments = raw, "unparseable tool arguments, using {{}}");
            }
            Value::Object(Map::new())
        })
}

/// Returns the first brace-balanced `{...}` slice, ignoring braces inside
/// string literals.
fn first_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
