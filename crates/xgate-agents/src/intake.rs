// crates/xgate-agents/src/intake.rs
// ============================================================================
// Module: Intake Agent
// Description: Normalizes a raw payload into a canonical Exception Record
//              (spec §4.10.1).
// Dependencies: xgate-core, xgate-audit, serde_json, uuid
// ============================================================================

//! Normalization rules mirror `src/agents/intake.py::IntakeAgent` from the
//! original implementation: timestamp extraction tries a fixed list of
//! field names, `exception_type` canonicalization strips leading colons and
//! upper-cases all-lowercase values, and Domain Pack validation only lowers
//! confidence rather than aborting.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;
use xgate_core::AgentDecision;
use xgate_core::DomainPack;
use xgate_core::ExceptionId;
use xgate_core::ExceptionRecord;
use xgate_core::ResolutionStatus;
use xgate_core::SourceSystem;
use xgate_core::TenantId;
use xgate_core::Timestamp;

use crate::agent::Agent;
use crate::context::AgentContext;
use crate::error::AgentError;
use crate::SharedAuditTrail;

const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "time", "createdAt", "created_at", "eventTime", "event_time"];

/// Normalizes raw payloads into canonical [`ExceptionRecord`]s (spec
/// §4.10.1).
pub struct IntakeAgent {
    domain_pack: Option<DomainPack>,
    audit: Option<SharedAuditTrail>,
}

impl IntakeAgent {
    /// Builds an agent with an optional Domain Pack (used for exception
    /// type validation) and an optional audit trail.
    #[must_use]
    pub fn new(domain_pack: Option<DomainPack>, audit: Option<SharedAuditTrail>) -> Self {
        Self { domain_pack, audit }
    }

    /// Normalizes a raw JSON payload into an [`ExceptionRecord`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ValidationFailed`] when no `tenant_id` can be
    /// determined from `tenant_id_hint` or the payload.
    pub fn normalize(
        &self,
        raw_payload: &Value,
        tenant_id_hint: Option<&TenantId>,
        pipeline_id_hint: Option<&str>,
    ) -> Result<ExceptionRecord, AgentError> {
        let exception_id = raw_payload
            .get("exceptionId")
            .or_else(|| raw_payload.get("exception_id"))
            .and_then(Value::as_str)
            .map_or_else(|| ExceptionId::new(Uuid::new_v4().to_string()), ExceptionId::new);

        let tenant_id = tenant_id_hint.cloned().or_else(|| {
            raw_payload
                .get("tenantId")
                .or_else(|| raw_payload.get("tenant_id"))
                .and_then(Value::as_str)
                .map(TenantId::new)
        });
        let Some(tenant_id) = tenant_id else {
            return Err(AgentError::ValidationFailed(
                "tenant_id is required but not provided in raw exception or parameters".to_string(),
            ));
        };

        let source_system = raw_payload
            .get("sourceSystem")
            .or_else(|| raw_payload.get("source_system"))
            .and_then(Value::as_str)
            .map_or_else(|| SourceSystem::new("UNKNOWN"), SourceSystem::new);

        let timestamp = extract_timestamp(raw_payload);

        let raw_payload_field = raw_payload
            .get("rawPayload")
            .or_else(|| raw_payload.get("raw_payload"))
            .cloned()
            .unwrap_or_else(|| raw_payload.clone());

        let exception_type = extract_exception_type(raw_payload, &raw_payload_field);

        let mut normalized_context = serde_json::json!({
            "pipelineId": pipeline_id_hint.map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string),
            "normalizedAt": Timestamp::now_utc().to_rfc3339(),
        });
        if let Some(context) = raw_payload.get("context").and_then(Value::as_object)
            && let Value::Object(map) = &mut normalized_context
        {
            for (key, value) in context {
                map.insert(key.clone(), value.clone());
            }
        }

        let now = Timestamp::now_utc();
        Ok(ExceptionRecord {
            exception_id,
            tenant_id,
            source_system,
            exception_type,
            severity: None,
            resolution_status: ResolutionStatus::Open,
            raw_payload: raw_payload_field,
            normalized_context,
            current_playbook_id: None,
            current_step: None,
            timestamp,
            created_at: now,
            updated_at: now,
        })
    }

    fn validate(&self, exception: &ExceptionRecord) -> (bool, Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let Some(domain_pack) = &self.domain_pack else {
            warnings.push("No domain pack provided for validation".to_string());
            return (true, warnings, errors);
        };

        match &exception.exception_type {
            Some(exception_type) => {
                if domain_pack.exception_types.contains_key(exception_type.as_str()) {
                    warnings.push(format!("Exception type '{exception_type}' validated against domain pack"));
                } else {
                    errors.push(format!("Exception type '{exception_type}' not found in domain pack"));
                }
            }
            None => warnings.push("No exception type provided (will be inferred in triage)".to_string()),
        }

        (errors.is_empty(), warnings, errors)
    }
}

fn extract_timestamp(raw_payload: &Value) -> Timestamp {
    TIMESTAMP_FIELDS
        .iter()
        .find_map(|field| raw_payload.get(*field).and_then(Value::as_str))
        .and_then(|text| Timestamp::parse(text).ok())
        .unwrap_or_else(Timestamp::now_utc)
}

fn extract_exception_type(raw_payload: &Value, raw_payload_field: &Value) -> Option<xgate_core::ExceptionType> {
    let raw = raw_payload
        .get("exceptionType")
        .or_else(|| raw_payload.get("exception_type"))
        .or_else(|| raw_payload_field.get("exceptionType"))
        .or_else(|| raw_payload_field.get("exception_type"))
        .and_then(Value::as_str)?;

    let mut canonical = raw.trim_start_matches(':').trim().to_string();
    if canonical.chars().all(|c| c.is_ascii_lowercase() || c == '_' || c.is_ascii_digit()) {
        canonical = canonical.to_ascii_uppercase();
    }
    if canonical.is_empty() {
        None
    } else {
        Some(xgate_core::ExceptionType::new(canonical))
    }
}

#[async_trait]
impl Agent for IntakeAgent {
    fn name(&self) -> &'static str {
        "IntakeAgent"
    }

    async fn process(&self, exception: &mut ExceptionRecord, _context: &mut AgentContext) -> Result<AgentDecision, AgentError> {
        let (valid, warnings, errors) = self.validate(exception);

        let mut evidence = vec![
            format!("Normalized exception ID: {}", exception.exception_id),
            format!("Tenant ID: {}", exception.tenant_id),
            format!("Source system: {}", exception.source_system),
        ];
        if let Some(exception_type) = &exception.exception_type {
            evidence.push(format!("Exception type: {exception_type}"));
        }
        evidence.extend(warnings.iter().map(|warning| format!("Warning: {warning}")));
        evidence.extend(errors.iter().map(|error| format!("Error: {error}")));

        let confidence = if valid {
            if exception.exception_type.is_some() { 1.0 } else { 0.8 }
        } else {
            0.5
        };

        let mut decision_text = "Normalized".to_string();
        if let Some(exception_type) = &exception.exception_type {
            decision_text.push_str(&format!(" as {exception_type}"));
        }
        if !valid {
            decision_text.push_str(" (validation errors)");
        }

        let decision = AgentDecision {
            decision: decision_text,
            confidence,
            evidence,
            next_step: "ProceedToTriage".to_string(),
        };

        if let Some(audit) = &self.audit {
            audit.log_agent_event(serde_json::json!({
                "agent": self.name(),
                "exception_id": exception.exception_id.to_string(),
                "decision": decision.decision,
                "confidence": decision.confidence,
            }))?;
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_exception_id_and_pipeline_id_when_absent() {
        let agent = IntakeAgent::new(None, None);
        let record = agent.normalize(&serde_json::json!({"tenantId": "TENANT_A"}), None, None).expect("normalize");
        assert_eq!(record.tenant_id.as_str(), "TENANT_A");
        assert_eq!(record.source_system.as_str(), "UNKNOWN");
    }

    #[test]
    fn missing_tenant_id_is_rejected() {
        let agent = IntakeAgent::new(None, None);
        let err = agent.normalize(&serde_json::json!({}), None, None).unwrap_err();
        assert!(matches!(err, AgentError::ValidationFailed(_)));
    }

    #[test]
    fn canonicalizes_exception_type_strips_colons_and_uppercases() {
        let agent = IntakeAgent::new(None, None);
        let record = agent
            .normalize(&serde_json::json!({"tenantId": "T", "exceptionType": ":: fin_settlement_fail"}), None, None)
            .expect("normalize");
        assert_eq!(record.exception_type.as_ref().unwrap().as_str(), "FIN_SETTLEMENT_FAIL");
    }

    #[test]
    fn already_uppercase_type_with_mixed_case_is_left_alone() {
        let agent = IntakeAgent::new(None, None);
        let record = agent
            .normalize(&serde_json::json!({"tenantId": "T", "exceptionType": "Fin_Settlement_Fail"}), None, None)
            .expect("normalize");
        assert_eq!(record.exception_type.as_ref().unwrap().as_str(), "Fin_Settlement_Fail");
    }

    #[tokio::test]
    async fn process_proceeds_to_triage_with_full_confidence_when_typed() {
        let agent = IntakeAgent::new(None, None);
        let mut record =
            agent.normalize(&serde_json::json!({"tenantId": "T", "exceptionType": "FAIL"}), None, None).expect("normalize");
        let mut context = AgentContext::new();
        let decision = agent.process(&mut record, &mut context).await.expect("process");
        assert!((decision.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(decision.next_step, "ProceedToTriage");
    }
}
