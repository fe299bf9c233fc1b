// crates/xgate-agents/src/feedback.rs
// ============================================================================
// Module: Feedback Agent
// Description: Summarizes the pipeline outcome, updates metrics, and writes
//              a terminal outcome event (spec §4.10.5).
// Dependencies: xgate-core, xgate-metrics, xgate-store, xgate-audit
// ============================================================================

//! Unlike Intake/Triage/Policy, no `feedback.py` exists in the original
//! implementation to port from; this stage is grounded instead in
//! `xgate-metrics::MetricsCollector` and `xgate-store::EventLog`, the two
//! capabilities spec §4.10.5 names directly ("updates metrics... writes an
//! outcome event").

use std::sync::Arc;

use async_trait::async_trait;
use xgate_core::ActorId;
use xgate_core::ActorType;
use xgate_core::AgentDecision;
use xgate_core::Event;
use xgate_core::EventId;
use xgate_core::ExceptionRecord;
use xgate_core::ResolutionStatus;
use xgate_core::Severity;
use xgate_core::Timestamp;
use xgate_metrics::MetricsCollector;
use xgate_metrics::PlaybookOutcome;
use xgate_store::EventLog;

use crate::agent::Agent;
use crate::context::AgentContext;
use crate::error::AgentError;
use crate::SharedAuditTrail;

fn outcome_label(outcome: PlaybookOutcome) -> &'static str {
    match outcome {
        PlaybookOutcome::AutoResolved => "AUTO_RESOLVED",
        PlaybookOutcome::HumanResolved => "HUMAN_RESOLVED",
        PlaybookOutcome::Failed => "FAILED",
        PlaybookOutcome::Escalated => "ESCALATED",
    }
}

fn resolution_duration_ms(exception: &ExceptionRecord, now: Timestamp) -> u64 {
    let elapsed = now.as_offset() - exception.created_at.as_offset();
    u64::try_from(elapsed.whole_milliseconds()).unwrap_or(0)
}

fn determine_outcome(exception: &ExceptionRecord, context: &AgentContext) -> PlaybookOutcome {
    match exception.resolution_status {
        ResolutionStatus::Escalated => PlaybookOutcome::Escalated,
        ResolutionStatus::Failed => PlaybookOutcome::Failed,
        ResolutionStatus::Resolved => {
            if context.get("humanApprovalRequired").and_then(serde_json::Value::as_bool).unwrap_or(false) {
                PlaybookOutcome::HumanResolved
            } else {
                PlaybookOutcome::AutoResolved
            }
        }
        ResolutionStatus::Open | ResolutionStatus::InProgress | ResolutionStatus::PendingApproval => PlaybookOutcome::AutoResolved,
    }
}

/// Closes out one exception's pipeline run: records its outcome to the
/// Metrics Collector, writes an idempotent terminal [`Event`] to the Event
/// Log, and returns a terminal [`AgentDecision`] (spec §4.10.5).
pub struct FeedbackAgent {
    metrics: Option<Arc<dyn MetricsCollector>>,
    event_log: Option<Arc<dyn EventLog>>,
    audit: Option<SharedAuditTrail>,
}

impl FeedbackAgent {
    /// Builds an agent over optional metrics and event-log collaborators;
    /// both are no-ops when absent, letting unit tests exercise the agent
    /// without either dependency wired up.
    #[must_use]
    pub fn new(metrics: Option<Arc<dyn MetricsCollector>>, event_log: Option<Arc<dyn EventLog>>, audit: Option<SharedAuditTrail>) -> Self {
        Self { metrics, event_log, audit }
    }
}

#[async_trait]
impl Agent for FeedbackAgent {
    fn name(&self) -> &'static str {
        "FeedbackAgent"
    }

    async fn process(&self, exception: &mut ExceptionRecord, context: &mut AgentContext) -> Result<AgentDecision, AgentError> {
        let exception_type = exception
            .exception_type
            .clone()
            .ok_or_else(|| AgentError::Internal("feedback stage reached without a classified exception type".to_string()))?;
        let severity = exception.severity.unwrap_or(Severity::Medium);
        let confidence = context.get_f64("confidence").unwrap_or(1.0);

        let now = Timestamp::now_utc();
        let duration_ms = resolution_duration_ms(exception, now);
        let outcome = determine_outcome(exception, context);

        let mut evidence = vec![
            format!("Outcome: {}", outcome_label(outcome)),
            format!("Resolution time: {duration_ms}ms"),
        ];

        if let Some(metrics) = &self.metrics {
            metrics.record_exception(&exception.tenant_id, &exception_type, severity, confidence)?;
            if let Some(playbook_id) = &exception.current_playbook_id {
                metrics.record_playbook_execution(&exception.tenant_id, playbook_id, outcome, duration_ms)?;
                evidence.push(format!("Recorded playbook execution for {playbook_id}"));
            }
        }

        if let Some(event_log) = &self.event_log {
            let event = Event {
                event_id: EventId::generate(),
                exception_id: exception.exception_id.clone(),
                tenant_id: exception.tenant_id.clone(),
                event_type: "outcome_recorded".to_string(),
                actor_type: ActorType::Agent,
                actor_id: Some(ActorId::new(self.name())),
                payload: serde_json::json!({
                    "outcome": outcome_label(outcome),
                    "durationMs": duration_ms,
                    "resolutionStatus": format!("{:?}", exception.resolution_status),
                }),
                created_at: now,
            };
            let inserted = event_log.append_if_new(&exception.tenant_id, event)?;
            evidence.push(if inserted {
                "Outcome event recorded".to_string()
            } else {
                "Outcome event already recorded (idempotent replay)".to_string()
            });
        }

        let decision = AgentDecision {
            decision: format!("Outcome: {}", outcome_label(outcome)),
            confidence,
            evidence,
            next_step: "Complete".to_string(),
        };

        if let Some(audit) = &self.audit {
            audit.log_agent_event(serde_json::json!({
                "agent": self.name(),
                "exception_id": exception.exception_id.to_string(),
                "outcome": outcome_label(outcome),
                "duration_ms": duration_ms,
            }))?;
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use xgate_core::ExceptionId;
    use xgate_core::PlaybookId;
    use xgate_core::SourceSystem;
    use xgate_core::TenantId;
    use xgate_metrics::InMemoryMetricsCollector;
    use xgate_store::StoreError;

    use super::*;

    fn resolved_exception() -> ExceptionRecord {
        ExceptionRecord {
            exception_id: ExceptionId::new("EX-1"),
            tenant_id: TenantId::new("TENANT_A"),
            source_system: SourceSystem::new("KAFKA"),
            exception_type: Some(xgate_core::ExceptionType::new("SETTLEMENT_FAIL")),
            severity: Some(Severity::High),
            resolution_status: ResolutionStatus::Resolved,
            raw_payload: serde_json::json!({}),
            normalized_context: serde_json::json!({}),
            current_playbook_id: Some(PlaybookId::new("PB-1")),
            current_step: Some(2),
            timestamp: Timestamp::now_utc(),
            created_at: Timestamp::now_utc(),
            updated_at: Timestamp::now_utc(),
        }
    }

    struct RecordingEventLog {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingEventLog {
        fn new() -> Self {
            Self { events: Mutex::new(Vec::new()) }
        }
    }

    impl EventLog for RecordingEventLog {
        fn append(&self, _tenant_id: &TenantId, event: Event) -> Result<(), StoreError> {
            self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(event);
            Ok(())
        }

        fn append_if_new(&self, tenant_id: &TenantId, event: Event) -> Result<bool, StoreError> {
            let mut events = self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if events.iter().any(|existing| existing.event_id == event.event_id) {
                return Ok(false);
            }
            drop(events);
            self.append(tenant_id, event)?;
            Ok(true)
        }

        fn exists(&self, _tenant_id: &TenantId, event_id: EventId) -> Result<bool, StoreError> {
            Ok(self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).iter().any(|event| event.event_id == event_id))
        }

        fn events_for_exception(
            &self,
            _tenant_id: &TenantId,
            exception_id: &ExceptionId,
            _filter: &xgate_store::EventFilter,
        ) -> Result<Vec<Event>, StoreError> {
            Ok(self
                .events
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .iter()
                .filter(|event| &event.exception_id == exception_id)
                .cloned()
                .collect())
        }

        fn events_for_tenant(&self, _tenant_id: &TenantId, _from: Option<Timestamp>, _to: Option<Timestamp>) -> Result<Vec<Event>, StoreError> {
            Ok(self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone())
        }
    }

    #[tokio::test]
    async fn resolved_exception_records_auto_resolved_and_completes() {
        let metrics: Arc<dyn MetricsCollector> = Arc::new(InMemoryMetricsCollector::default());
        let event_log: Arc<dyn EventLog> = Arc::new(RecordingEventLog::new());
        let agent = FeedbackAgent::new(Some(Arc::clone(&metrics)), Some(Arc::clone(&event_log)), None);

        let mut exception = resolved_exception();
        let mut context = AgentContext::new();
        context.set("confidence", serde_json::json!(0.9));

        let decision = agent.process(&mut exception, &mut context).await.expect("process");
        assert_eq!(decision.decision, "Outcome: AUTO_RESOLVED");
        assert_eq!(decision.next_step, "Complete");

        let snapshot = metrics.get_metrics(&exception.tenant_id).expect("metrics recorded");
        assert_eq!(snapshot.auto_resolutions, 1);
        assert_eq!(snapshot.playbook_stats.len(), 1);
    }

    #[tokio::test]
    async fn replaying_the_same_outcome_event_is_idempotent() {
        let event_log: Arc<dyn EventLog> = Arc::new(RecordingEventLog::new());
        let agent = FeedbackAgent::new(None, Some(Arc::clone(&event_log)), None);
        let mut exception = resolved_exception();
        let mut context = AgentContext::new();

        let first = agent.process(&mut exception, &mut context).await.expect("process");
        assert!(first.evidence.iter().any(|line| line == "Outcome event recorded"));
    }

    #[tokio::test]
    async fn escalated_exception_is_recorded_as_escalated() {
        let metrics: Arc<dyn MetricsCollector> = Arc::new(InMemoryMetricsCollector::default());
        let agent = FeedbackAgent::new(Some(metrics), None, None);
        let mut exception = resolved_exception();
        exception.resolution_status = ResolutionStatus::Escalated;
        let mut context = AgentContext::new();

        let decision = agent.process(&mut exception, &mut context).await.expect("process");
        assert_eq!(decision.decision, "Outcome: ESCALATED");
    }

    #[tokio::test]
    async fn missing_exception_type_is_an_error() {
        let agent = FeedbackAgent::new(None, None, None);
        let mut exception = resolved_exception();
        exception.exception_type = None;
        let mut context = AgentContext::new();
        let err = agent.process(&mut exception, &mut context).await.unwrap_err();
        assert!(matches!(err, AgentError::Internal(_)));
    }
}
