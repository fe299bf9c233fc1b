// crates/xgate-audit/src/redaction.rs
// ============================================================================
// Module: Redaction Policy
// Description: Recursively masks sensitive fields before an audit record is
//              written (SPEC_FULL §11).
// Purpose: Keep secrets that agents or tools echo back in payloads out of
//          the on-disk audit trail.
// Dependencies: serde_json
// ============================================================================

use serde_json::Map;
use serde_json::Value;

/// Text written in place of a redacted value.
pub const REDACTED_PLACEHOLDER: &str = "***REDACTED***";

/// Key names, matched case-insensitively, whose values are always redacted
/// regardless of type.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "token",
    "access_token",
    "refresh_token",
    "secret",
    "client_secret",
    "api_key",
    "apikey",
    "authorization",
    "access_key",
    "secret_key",
    "private_key",
    "credential",
    "credentials",
];

/// Recursively walks a JSON value and masks sensitive fields (spec §11).
///
/// A field is masked when its key matches [`SENSITIVE_KEYS`]
/// case-insensitively, or when its value is a string that looks like a
/// bearer token (`"Bearer <token>"`) even under an unflagged key.
#[derive(Debug, Clone, Default)]
pub struct RedactionPolicy {
    /// Additional sensitive key names beyond [`SENSITIVE_KEYS`], lowercased.
    extra_keys: Vec<String>,
}

impl RedactionPolicy {
    /// Builds the default policy: [`SENSITIVE_KEYS`] plus bearer-token
    /// detection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an additional sensitive key name, matched case-insensitively.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.extra_keys.push(key.into().to_ascii_lowercase());
        self
    }

    fn is_sensitive_key(&self, key: &str) -> bool {
        let lowered = key.to_ascii_lowercase();
        SENSITIVE_KEYS.iter().any(|candidate| lowered.contains(candidate))
            || self.extra_keys.iter().any(|candidate| lowered.contains(candidate.as_str()))
    }

    /// Returns a redacted copy of `value`.
    #[must_use]
    pub fn redact(&self, value: &Value) -> Value {
        self.redact_inner(value, None)
    }

    fn redact_inner(&self, value: &Value, key_hint: Option<&str>) -> Value {
        if key_hint.is_some_and(|key| self.is_sensitive_key(key)) {
            return Value::String(REDACTED_PLACEHOLDER.to_string());
        }
        match value {
            Value::Object(map) => {
                let mut redacted = Map::with_capacity(map.len());
                for (key, inner) in map {
                    redacted.insert(key.clone(), self.redact_inner(inner, Some(key)));
                }
                Value::Object(redacted)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.redact_inner(item, key_hint)).collect())
            }
            Value::String(text) if looks_like_bearer_token(text) => {
                Value::String(REDACTED_PLACEHOLDER.to_string())
            }
            other => other.clone(),
        }
    }
}

/// Returns true for strings of the shape `"Bearer <token>"`, matched
/// case-insensitively on the prefix.
fn looks_like_bearer_token(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.len() > "bearer ".len() && trimmed.get(.."bearer ".len()).is_some_and(|prefix| prefix.eq_ignore_ascii_case("bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_sensitive_keys_case_insensitively() {
        let policy = RedactionPolicy::new();
        let input = json!({"Password": "hunter2", "note": "fine"});
        let redacted = policy.redact(&input);
        assert_eq!(redacted["Password"], json!(REDACTED_PLACEHOLDER));
        assert_eq!(redacted["note"], json!("fine"));
    }

    #[test]
    fn redacts_nested_objects_and_arrays() {
        let policy = RedactionPolicy::new();
        let input = json!({"outer": [{"api_key": "abc123"}, {"value": 1}]});
        let redacted = policy.redact(&input);
        assert_eq!(redacted["outer"][0]["api_key"], json!(REDACTED_PLACEHOLDER));
        assert_eq!(redacted["outer"][1]["value"], json!(1));
    }

    #[test]
    fn redacts_bearer_shaped_strings_under_unflagged_keys() {
        let policy = RedactionPolicy::new();
        let input = json!({"header": "Bearer eyJhbGciOi.abc.def"});
        let redacted = policy.redact(&input);
        assert_eq!(redacted["header"], json!(REDACTED_PLACEHOLDER));
    }

    #[test]
    fn extra_keys_extend_the_default_set() {
        let policy = RedactionPolicy::new().with_key("ssn");
        let input = json!({"ssn": "123-45-6789"});
        let redacted = policy.redact(&input);
        assert_eq!(redacted["ssn"], json!(REDACTED_PLACEHOLDER));
    }
}
