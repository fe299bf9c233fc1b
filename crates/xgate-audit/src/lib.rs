// crates/xgate-audit/src/lib.rs
// ============================================================================
// Module: Audit Logger
// Description: Per-run_id JSONL audit trail of agent events, tool calls,
//              decisions, and explanation generation (§4.3).
// Purpose: One durable, replayable record of what every agent and tool did
//          for a given pipeline invocation, with secrets redacted before
//          they ever touch disk.
// Dependencies: xgate-core, serde_json, thiserror, time, tracing
// ============================================================================

//! ## Overview
//! One append-only JSON-lines file per `run_id`
//! (`./runtime/audit/{run_id}_audit.jsonl` per spec §6) records every
//! [`AuditEventType`] the pipeline produces. Writes flush immediately —
//! mirroring `decision-gate-mcp::audit::McpFileAuditSink`'s append-and-flush
//! discipline — so a crash mid-run never loses an already-recorded line.
//! [`crate::redaction::RedactionPolicy`] runs over every payload before it
//! is serialized.

#![forbid(unsafe_code)]

pub mod redaction;

use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use xgate_core::RunId;
use xgate_core::TenantId;
use xgate_core::Timestamp;

pub use redaction::RedactionPolicy;

/// Errors returned by [`AuditSink`] implementations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The audit file could not be opened, written, or flushed.
    #[error("audit io error: {0}")]
    Io(String),
    /// The audit record could not be serialized to JSON.
    #[error("audit record could not be serialized: {0}")]
    Serialize(String),
    /// A stored line could not be parsed back into an [`AuditRecord`].
    #[error("audit record could not be parsed: {0}")]
    Deserialize(String),
}

impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// The kind of an [`AuditRecord`] (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// An agent stage ran and produced a decision.
    AgentEvent,
    /// A playbook step invoked an external tool.
    ToolCall,
    /// A policy or severity decision was made.
    Decision,
    /// An explanation was generated for an exception.
    ExplanationGenerated,
}

/// One line of the audit trail (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When this record was written.
    pub timestamp: Timestamp,
    /// The pipeline invocation this record belongs to.
    pub run_id: RunId,
    /// The owning tenant.
    pub tenant_id: TenantId,
    /// The kind of event this record describes.
    pub event_type: AuditEventType,
    /// Event-specific payload, redacted before construction.
    pub data: Value,
}

/// Destination for [`AuditRecord`] lines.
pub trait AuditSink: Send + Sync {
    /// Appends `record` to the trail.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when the record cannot be serialized or
    /// written.
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Writes one JSON line per record to a file, flushing after every write.
pub struct JsonlAuditSink {
    file: Mutex<File>,
    redaction: RedactionPolicy,
}

impl JsonlAuditSink {
    /// Opens (or creates) the audit file at `path` in append mode.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            redaction: RedactionPolicy::new(),
        })
    }

    /// Overrides the default redaction policy.
    #[must_use]
    pub fn with_redaction(mut self, redaction: RedactionPolicy) -> Self {
        self.redaction = redaction;
        self
    }

    /// Returns the canonical audit file path for one run, per spec §6.
    #[must_use]
    pub fn path_for_run(root: impl AsRef<Path>, run_id: &RunId) -> PathBuf {
        root.as_ref().join(format!("{run_id}_audit.jsonl"))
    }
}

/// Reads one JSONL audit file back into its records, in file order.
/// Returns an empty vector when `path` does not exist yet — a fresh tenant
/// or run may have no audit file on disk.
///
/// # Errors
///
/// Returns [`AuditError::Io`] when `path` exists but cannot be read, and
/// [`AuditError::Deserialize`] when a line is not a valid [`AuditRecord`].
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<AuditRecord>, AuditError> {
    let path = path.as_ref();
    let Ok(file) = File::open(path) else {
        return Ok(Vec::new());
    };
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: AuditRecord =
            serde_json::from_str(&line).map_err(|err| AuditError::Deserialize(err.to_string()))?;
        records.push(record);
    }
    Ok(records)
}

/// Reads every `*_audit.jsonl` file directly under `root`, in directory
/// listing order. Used by the Explanation Service to scan across run_ids
/// for entries mentioning one exception (spec §4.13). Returns an empty
/// vector when `root` does not exist.
///
/// # Errors
///
/// Returns [`AuditError::Io`] when `root` exists but cannot be listed, and
/// [`AuditError::Deserialize`] when a line in a discovered file is corrupt.
pub fn read_jsonl_dir(root: impl AsRef<Path>) -> Result<Vec<AuditRecord>, AuditError> {
    let root = root.as_ref();
    let Ok(entries) = std::fs::read_dir(root) else {
        return Ok(Vec::new());
    };
    let mut records = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(std::ffi::OsStr::to_str) != Some("jsonl") {
            continue;
        }
        records.extend(read_jsonl(&path)?);
    }
    Ok(records)
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let redacted_data = self.redaction.redact(&record.data);
        let line = serde_json::to_string(&AuditRecord {
            timestamp: record.timestamp,
            run_id: record.run_id.clone(),
            tenant_id: record.tenant_id.clone(),
            event_type: record.event_type,
            data: redacted_data,
        })
        .map_err(|err| AuditError::Serialize(err.to_string()))?;

        let mut file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}

/// Discards every record. Used for tests and for tenants that opt out of
/// audit logging.
#[derive(Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _record: &AuditRecord) -> Result<(), AuditError> {
        Ok(())
    }
}

impl AuditSink for Box<dyn AuditSink> {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        (**self).record(record)
    }
}

/// One pipeline invocation's audit trail: opens its sink on construction,
/// closes (by `Drop`) when the run finishes. Every method here builds one
/// [`AuditRecord`] and hands it to the underlying [`AuditSink`].
pub struct AuditTrail<S: AuditSink> {
    sink: S,
    run_id: RunId,
    tenant_id: TenantId,
}

impl<S: AuditSink> AuditTrail<S> {
    /// Opens a trail for `run_id` under `tenant_id`, backed by `sink`.
    pub fn open(run_id: RunId, tenant_id: TenantId, sink: S) -> Self {
        Self { sink, run_id, tenant_id }
    }

    /// Records an agent stage's result.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when the underlying sink fails to write.
    pub fn log_agent_event(&self, data: Value) -> Result<(), AuditError> {
        self.log(AuditEventType::AgentEvent, data)
    }

    /// Records a tool invocation's result.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when the underlying sink fails to write.
    pub fn log_tool_call(&self, data: Value) -> Result<(), AuditError> {
        self.log(AuditEventType::ToolCall, data)
    }

    /// Records a policy or severity decision.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when the underlying sink fails to write.
    pub fn log_decision(&self, data: Value) -> Result<(), AuditError> {
        self.log(AuditEventType::Decision, data)
    }

    /// Records that an explanation was generated.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when the underlying sink fails to write.
    pub fn log_explanation_generated(&self, data: Value) -> Result<(), AuditError> {
        self.log(AuditEventType::ExplanationGenerated, data)
    }

    fn log(&self, event_type: AuditEventType, data: Value) -> Result<(), AuditError> {
        let record = AuditRecord {
            timestamp: Timestamp::now_utc(),
            run_id: self.run_id.clone(),
            tenant_id: self.tenant_id.clone(),
            event_type,
            data: normalize_payload(&data),
        };
        self.sink.record(&record)
    }
}

/// Normalizes a payload before it is handed to a sink, recursing through
/// objects and arrays so every leaf value passes through the same
/// conversion point. Scalars are returned as-is: `serde_json::Value` cannot
/// represent a non-finite float or a non-UTF8 string, so there is nothing
/// left to coerce by the time a caller reaches this module — unlike a
/// dynamically typed payload, every value here already round-tripped
/// through a `Serialize` impl.
#[must_use]
pub fn normalize_payload(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            Value::Object(map.iter().map(|(key, inner)| (key.clone(), normalize_payload(inner))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_payload).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appends_and_redacts_before_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run_audit.jsonl");
        let sink = JsonlAuditSink::open(&path).expect("open sink");
        let trail = AuditTrail::open(RunId::new("RUN-1"), TenantId::new("TENANT_A"), sink);
        trail.log_agent_event(json!({"stage": "intake", "token": "secret-value"})).expect("log");

        let contents = std::fs::read_to_string(&path).expect("read");
        assert!(contents.contains("\"event_type\":\"agent_event\""));
        assert!(contents.contains(redaction::REDACTED_PLACEHOLDER));
        assert!(!contents.contains("secret-value"));
    }

    #[test]
    fn noop_sink_never_errors() {
        let trail = AuditTrail::open(RunId::new("RUN-1"), TenantId::new("TENANT_A"), NoopAuditSink);
        assert!(trail.log_decision(json!({"decision": "escalate"})).is_ok());
    }

    #[test]
    fn normalize_payload_recurses_through_nested_structures() {
        let value = normalize_payload(&json!({"steps": [{"latency_ms": 12.5}, {"latency_ms": 40.0}]}));
        assert_eq!(value["steps"][0]["latency_ms"], json!(12.5));
        assert_eq!(value["steps"][1]["latency_ms"], json!(40.0));
    }

    #[test]
    fn path_for_run_uses_run_id() {
        let path = JsonlAuditSink::path_for_run("./runtime/audit", &RunId::new("RUN-42"));
        assert_eq!(path, PathBuf::from("./runtime/audit/RUN-42_audit.jsonl"));
    }

    #[test]
    fn read_jsonl_round_trips_written_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run_audit.jsonl");
        let sink = JsonlAuditSink::open(&path).expect("open sink");
        let trail = AuditTrail::open(RunId::new("RUN-1"), TenantId::new("TENANT_A"), sink);
        trail.log_agent_event(json!({"stage": "intake"})).expect("log");
        trail.log_decision(json!({"decision": "escalate"})).expect("log");

        let records = read_jsonl(&path).expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_type, AuditEventType::AgentEvent);
        assert_eq!(records[1].event_type, AuditEventType::Decision);
    }

    #[test]
    fn read_jsonl_missing_file_returns_empty() {
        let records = read_jsonl("/nonexistent/path/does-not-exist.jsonl").expect("read");
        assert!(records.is_empty());
    }

    #[test]
    fn read_jsonl_dir_merges_every_file_in_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink_a = JsonlAuditSink::open(dir.path().join("RUN-A_audit.jsonl")).expect("open sink a");
        let trail_a = AuditTrail::open(RunId::new("RUN-A"), TenantId::new("TENANT_A"), sink_a);
        trail_a.log_agent_event(json!({"exception_id": "EX-1"})).expect("log a");

        let sink_b = JsonlAuditSink::open(dir.path().join("RUN-B_audit.jsonl")).expect("open sink b");
        let trail_b = AuditTrail::open(RunId::new("RUN-B"), TenantId::new("TENANT_A"), sink_b);
        trail_b.log_decision(json!({"exception_id": "EX-2"})).expect("log b");

        let records = read_jsonl_dir(dir.path()).expect("read dir");
        assert_eq!(records.len(), 2);
    }
}
