// crates/xgate-agents/src/context.rs
// ============================================================================
// Module: Agent context
// Description: The mutable, per-exception context mapping threaded through
//              every stage (spec §4.10).
// Dependencies: serde_json
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Mutable context carried between stages of one exception's pipeline run.
///
/// Each stage reads values a prior stage left (e.g. Triage's `confidence`
/// consumed by Policy) and may add its own. Keys are stage-defined strings
/// rather than a closed enum, matching spec §4.10's "mutable context
/// mapping" framing; this is an explicit context object, not a global
/// singleton (spec §9).
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentContext {
    values: BTreeMap<String, Value>,
}

impl AgentContext {
    /// Builds an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites `key`.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Returns the value stored under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns the `f64` stored under `key`, if present and numeric.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    /// Returns the string stored under `key`, if present and a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_values() {
        let mut ctx = AgentContext::new();
        ctx.set("confidence", serde_json::json!(0.42));
        ctx.set("suggested_playbook_id", serde_json::json!("PB-1"));
        assert!((ctx.get_f64("confidence").unwrap() - 0.42).abs() < f64::EPSILON);
        assert_eq!(ctx.get_str("suggested_playbook_id"), Some("PB-1"));
        assert!(ctx.get("missing").is_none());
    }
}
