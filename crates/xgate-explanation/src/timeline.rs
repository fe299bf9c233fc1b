// crates/xgate-explanation/src/timeline.rs
// ============================================================================
// Module: Decision Timeline
// Description: Merges synthesized per-stage events from a pipeline result
//              with real Audit Logger events into one ordered timeline
//              (spec §4.13).
// Dependencies: xgate-core, xgate-audit, serde_json
// ============================================================================

//! ## Overview
//! A [`DecisionTimeline`] has two sources, merged and deduplicated by
//! `(timestamp_iso, stage_name)`: the stage outcomes already sitting in a
//! [`PipelineResult`], and whatever Audit Logger lines happen to mention the
//! exception id, mirroring `decision-gate-mcp::evidence::ensure_evidence_hash`'s
//! pattern of treating an append-only JSONL trail as a read-back source of
//! truth rather than a write-only sink.

use serde::Serialize;
use serde_json::Value;
use xgate_audit::AuditRecord;
use xgate_core::ExceptionId;
use xgate_core::PipelineResult;
use xgate_core::TenantId;
use xgate_core::Timestamp;

/// Seconds added per stage index to the exception's base timestamp, giving
/// synthesized events a stable monotone ordering proxy (spec §4.13, REDESIGN
/// FLAGS: real per-stage timestamps are future work).
const SECONDS_PER_STAGE: i64 = 2;

/// One entry in a [`DecisionTimeline`].
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    /// When this event is believed to have occurred.
    pub timestamp: Timestamp,
    /// Pipeline stage name (`intake`, `triage`, `policy`, `resolution`, `feedback`),
    /// or an audit-derived stage label when the event came from the audit trail.
    pub stage_name: String,
    /// The agent that produced this event, when known.
    pub agent_name: String,
    /// Human-readable one-line summary.
    pub summary: String,
    /// Evidence ids referenced by this event.
    pub evidence_ids: Vec<String>,
    /// Free-text decision label, when this event carries a decision.
    pub decision: Option<String>,
    /// Confidence in `[0, 1]`, when this event carries one.
    pub confidence: Option<f64>,
    /// Advisory next-step hint, when this event carries one.
    pub next_step: Option<String>,
    /// Event-specific extra detail, kept for renderers that want it.
    pub metadata: Value,
}

/// The full ordered, deduplicated decision history for one exception (spec §4.13).
#[derive(Debug, Clone, Serialize)]
pub struct DecisionTimeline {
    /// The exception this timeline describes.
    pub exception_id: ExceptionId,
    /// The owning tenant.
    pub tenant_id: TenantId,
    /// Events in chronological order.
    pub events: Vec<TimelineEvent>,
}

/// Builds a [`DecisionTimeline`] from a pipeline result and the matching
/// audit records (already filtered to lines that mention `exception_id`).
#[must_use]
pub fn build_timeline(
    tenant_id: &TenantId,
    exception_id: &ExceptionId,
    base_timestamp: Timestamp,
    pipeline_result: Option<&PipelineResult>,
    audit_records: &[AuditRecord],
) -> DecisionTimeline {
    let mut events = Vec::new();

    if let Some(result) = pipeline_result {
        for (stage_index, (stage_name, outcome)) in result.stages_in_order().into_iter().enumerate() {
            let estimated_timestamp = base_timestamp.plus_seconds(SECONDS_PER_STAGE * stage_index as i64);
            let agent_name =
                outcome.agent_name.as_ref().map(|name| name.as_str().to_string()).unwrap_or_else(|| "unknown".to_string());
            let (summary, decision, confidence, next_step) = match (&outcome.decision, &outcome.error, &outcome.skipped) {
                (Some(decision), _, _) => (
                    decision.decision.clone(),
                    Some(decision.decision.clone()),
                    Some(decision.confidence),
                    Some(decision.next_step.clone()),
                ),
                (None, Some(error), _) => (format!("{stage_name} failed: {error}"), None, None, None),
                (None, None, Some(reason)) => (format!("{stage_name} skipped: {reason}"), None, None, None),
                (None, None, None) => (format!("{stage_name} completed"), None, None, None),
            };
            let evidence_ids = outcome.evidence_ids.iter().map(|id| id.to_string()).collect();
            events.push(TimelineEvent {
                timestamp: estimated_timestamp,
                stage_name: stage_name.to_string(),
                agent_name,
                summary,
                evidence_ids,
                decision,
                confidence,
                next_step,
                metadata: serde_json::json!({"source": "pipeline_result"}),
            });
        }
    }

    for record in audit_records {
        events.push(timeline_event_from_audit(record));
    }

    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.stage_name.cmp(&b.stage_name)));
    deduplicate(&mut events);

    DecisionTimeline { exception_id: exception_id.clone(), tenant_id: tenant_id.clone(), events }
}

fn timeline_event_from_audit(record: &AuditRecord) -> TimelineEvent {
    let agent_name = record
        .data
        .get("agent_name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "System".to_string());
    let event_type = serde_json::to_value(record.event_type)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| "event".to_string());
    let stage_name = record.data.get("stage_name").and_then(Value::as_str).map(str::to_string).unwrap_or(event_type.clone());
    let summary = record
        .data
        .get("decision")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| record.data.get("tool_name").and_then(Value::as_str).map(|name| format!("tool {name} invoked")))
        .unwrap_or_else(|| format!("{event_type} recorded"));

    TimelineEvent {
        timestamp: record.timestamp,
        stage_name,
        agent_name,
        summary,
        evidence_ids: Vec::new(),
        decision: None,
        confidence: None,
        next_step: None,
        metadata: serde_json::json!({"source": "audit_log", "event_type": event_type}),
    }
}

/// Removes events sharing the same `(timestamp_iso, stage_name)` key,
/// keeping the first occurrence (spec §4.13 step 2).
fn deduplicate(events: &mut Vec<TimelineEvent>) {
    let mut seen = std::collections::BTreeSet::new();
    events.retain(|event| seen.insert((event.timestamp.to_rfc3339(), event.stage_name.clone())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use xgate_audit::AuditEventType;
    use xgate_core::AgentDecision;
    use xgate_core::AgentName;
    use xgate_core::ResolutionStatus;
    use xgate_core::StageOutcome;

    fn base() -> Timestamp {
        Timestamp::parse("2026-07-30T00:00:00Z").expect("parse")
    }

    #[test]
    fn merges_pipeline_and_audit_events_in_order() {
        let mut result = PipelineResult::new(ResolutionStatus::Resolved);
        result.stages.insert(
            "intake".to_string(),
            StageOutcome::completed(
                AgentName::from("intake"),
                AgentDecision {
                    decision: "Normalized".to_string(),
                    confidence: 0.9,
                    evidence: Vec::new(),
                    next_step: "ProceedToTriage".to_string(),
                },
                base(),
            ),
        );

        let audit_record = AuditRecord {
            timestamp: base().plus_seconds(100),
            run_id: xgate_core::RunId::new("RUN-1"),
            tenant_id: TenantId::new("TENANT_A"),
            event_type: AuditEventType::ToolCall,
            data: serde_json::json!({"tool_name": "settlement_retry", "exception_id": "EX-1"}),
        };

        let timeline = build_timeline(
            &TenantId::new("TENANT_A"),
            &ExceptionId::new("EX-1"),
            base(),
            Some(&result),
            &[audit_record],
        );

        assert_eq!(timeline.events.len(), 2);
        assert_eq!(timeline.events[0].stage_name, "intake");
        assert!(timeline.events[1].summary.contains("settlement_retry"));
    }

    #[test]
    fn deduplicates_events_sharing_timestamp_and_stage() {
        let mut result = PipelineResult::new(ResolutionStatus::Resolved);
        result.stages.insert(
            "intake".to_string(),
            StageOutcome::completed(
                AgentName::from("intake"),
                AgentDecision {
                    decision: "Normalized".to_string(),
                    confidence: 0.9,
                    evidence: Vec::new(),
                    next_step: "ProceedToTriage".to_string(),
                },
                base(),
            ),
        );

        let duplicate_audit = AuditRecord {
            timestamp: base(),
            run_id: xgate_core::RunId::new("RUN-1"),
            tenant_id: TenantId::new("TENANT_A"),
            event_type: AuditEventType::AgentEvent,
            data: serde_json::json!({"stage_name": "intake", "exception_id": "EX-1"}),
        };

        let timeline = build_timeline(
            &TenantId::new("TENANT_A"),
            &ExceptionId::new("EX-1"),
            base(),
            Some(&result),
            &[duplicate_audit],
        );

        assert_eq!(timeline.events.len(), 1);
    }
}
