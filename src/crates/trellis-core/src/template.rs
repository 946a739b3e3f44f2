//! Prompt and payload template resolution
//!
//! Substitutes `{name}` placeholders from the execution context. String
//! values are inserted verbatim; other values use their JSON form. Unknown
//! placeholders are left intact so downstream consumers can detect them.

use serde_json::Value;

use crate::state::Context;

/// Resolve `{name}` placeholders in `template` against `context`.
pub fn resolve(template: &str, context: &Context) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if ch != '{' {
            out.push(ch);
            continue;
        }
        // Find the closing brace; a '{' with no close is literal.
        match template[idx + 1..].find('}') {
            Some(rel_end) => {
                let key = &template[idx + 1..idx + 1 + rel_end];
                if is_placeholder_key(key) {
                    match context.get(key) {
                        Some(value) => out.push_str(&render(value)),
                        None => {
                            out.push('{');
                            out.push_str(key);
                            out.push('}');
                        }
                    }
                    // Skip past the placeholder body and closing brace.
                    for _ in 0..key.len() + 1 {
                        chars.next();
                    }
                } else {
                    out.push('{');
                }
            }
            None => out.push('{'),
        }
    }

    out
}

/// Resolve placeholders in every string value of a JSON tree, in place.
pub fn resolve_value(value: &Value, context: &Context) -> Value {
    match value {
        Value::String(s) => Value::String(resolve(s, context)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_value(v, context)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_placeholder_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' || c == ':')
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
