//! Identifier and payload validation
//!
//! Every path- and query-segment identifier must match
//! `^[A-Za-z0-9][A-Za-z0-9._-]{0,254}$`. Workflow bodies are deep-walked:
//! identifier-bearing fields are validated, free-text string fields have
//! dangerous control characters stripped in place.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::api::error::ApiError;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,254}$").expect("valid regex"))
}

/// Validate one identifier segment.
pub fn validate_identifier(id: &str) -> Result<(), ApiError> {
    if id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "invalid identifier '{}'",
            sanitize_log(id)
        )))
    }
}

/// JSON object keys whose string values are identifiers.
const IDENTIFIER_FIELDS: &[&str] = &[
    "id",
    "agentId",
    "rubricId",
    "startNode",
    "workflowId",
    "target",
    "executorType",
    "handler",
    "command",
    "judgeAgent",
    "outputField",
];

/// JSON object keys whose values are identifier arrays.
const IDENTIFIER_LIST_FIELDS: &[&str] = &["targets", "awaitTargets"];

/// JSON object keys whose child object keys are identifiers.
const IDENTIFIER_MAP_FIELDS: &[&str] = &["nodes", "agents", "rubrics"];

/// Deep-walk a workflow body: validate nested identifiers, strip control
/// characters from every other string.
pub fn sanitize_workflow_body(value: &mut Value) -> Result<(), ApiError> {
    walk(value, None)
}

fn walk(value: &mut Value, key: Option<&str>) -> Result<(), ApiError> {
    match value {
        Value::Object(map) => {
            if let Some(key) = key {
                if IDENTIFIER_MAP_FIELDS.contains(&key) {
                    for id in map.keys() {
                        validate_identifier(id)?;
                    }
                }
            }
            for (child_key, child) in map.iter_mut() {
                walk(child, Some(child_key.as_str()))?;
            }
            Ok(())
        }
        Value::Array(items) => {
            let is_id_list = key.is_some_and(|k| IDENTIFIER_LIST_FIELDS.contains(&k));
            for item in items.iter_mut() {
                if is_id_list {
                    if let Value::String(id) = item {
                        validate_identifier(id)?;
                        continue;
                    }
                }
                walk(item, None)?;
            }
            Ok(())
        }
        Value::String(text) => {
            if key.is_some_and(|k| IDENTIFIER_FIELDS.contains(&k)) {
                validate_identifier(text)?;
            } else {
                let cleaned = strip_control_chars(text);
                if cleaned != *text {
                    *text = cleaned;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Remove C0 controls (except HT/LF/CR) and DEL from free text.
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

/// Strip CR/LF from a user-derived value before log emission.
pub fn sanitize_log(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}
