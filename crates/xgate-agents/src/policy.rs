// crates/xgate-agents/src/policy.rs
// ============================================================================
// Module: Policy Agent
// Description: Enforces guardrails and playbook approval (spec §4.10.3).
// Dependencies: xgate-core, xgate-policy, xgate-audit
// ============================================================================

//! Guardrail and approval logic mirrors `src/agents/policy.py::PolicyAgent`
//! from the original implementation: severity overrides apply first, then
//! playbook approval, actionability, human-approval requirement, and
//! confidence-based escalation are each evaluated independently before the
//! final decision text is assembled.

use async_trait::async_trait;
use xgate_core::AgentDecision;
use xgate_core::ExceptionRecord;
use xgate_core::PlaybookDef;
use xgate_core::Severity;
use xgate_policy::MatchInput;
use xgate_policy::ResolvedPolicy;
use xgate_policy::match_playbook;

use crate::agent::Agent;
use crate::context::AgentContext;
use crate::error::AgentError;
use crate::SharedAuditTrail;

/// Actionability classification produced by the Policy Agent (spec
/// §4.10.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actionability {
    /// An approved playbook exists.
    ActionableApprovedProcess,
    /// A playbook exists but is not approved.
    ActionableNonApprovedProcess,
    /// No playbook exists, or guardrails block auto-action.
    NonActionableInfoOnly,
}

impl Actionability {
    /// Returns the stable label used in events and the `xgate-core`
    /// pipeline result.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ActionableApprovedProcess => "ACTIONABLE_APPROVED_PROCESS",
            Self::ActionableNonApprovedProcess => "ACTIONABLE_NON_APPROVED_PROCESS",
            Self::NonActionableInfoOnly => "NON_ACTIONABLE_INFO_ONLY",
        }
    }
}

/// Evaluates guardrails, playbook approval, and escalation (spec §4.10.3).
pub struct PolicyAgent {
    policy: ResolvedPolicy,
    audit: Option<SharedAuditTrail>,
}

impl PolicyAgent {
    /// Builds an agent over an already-resolved policy.
    #[must_use]
    pub fn new(policy: ResolvedPolicy, audit: Option<SharedAuditTrail>) -> Self {
        Self { policy, audit }
    }

    fn effective_severity(&self, exception: &ExceptionRecord) -> Severity {
        let Some(exception_type) = &exception.exception_type else {
            return exception.severity.unwrap_or(Severity::Medium);
        };
        self.policy
            .tenant_policy_pack
            .custom_severity_overrides
            .iter()
            .find(|rule| rule.exception_type == exception_type.as_str())
            .map_or_else(|| exception.severity.unwrap_or(Severity::Medium), |rule| rule.severity)
    }

    fn applicable_playbooks(&self, exception_type: &str) -> Vec<&PlaybookDef> {
        self.policy.candidate_playbooks.iter().filter(|playbook| playbook.exception_type == exception_type).collect()
    }

    fn approved_playbook<'a>(&'a self, exception_type: &str, candidates: &[&'a PlaybookDef]) -> Option<&'a PlaybookDef> {
        let approved: std::collections::HashSet<&str> =
            self.policy.candidate_playbooks.iter().map(|playbook| playbook.exception_type.as_str()).collect();
        if approved.contains(exception_type) {
            return candidates.first().copied();
        }
        candidates.iter().find(|playbook| approved.contains(playbook.exception_type.as_str())).copied()
    }

    fn determine_actionability(&self, severity: Severity, has_playbooks: bool, approved: Option<&PlaybookDef>) -> Actionability {
        if severity == Severity::Critical {
            let requires_approval = self
                .policy
                .tenant_policy_pack
                .human_approval_rules
                .iter()
                .any(|rule| rule.severity == Severity::Critical && rule.require_approval);
            if requires_approval {
                return if approved.is_some() { Actionability::ActionableApprovedProcess } else { Actionability::NonActionableInfoOnly };
            }
        }
        if approved.is_some() {
            Actionability::ActionableApprovedProcess
        } else if has_playbooks {
            Actionability::ActionableNonApprovedProcess
        } else {
            Actionability::NonActionableInfoOnly
        }
    }

    fn human_approval_required(&self, severity: Severity, confidence: Option<f64>) -> bool {
        let rule_requires = self
            .policy
            .tenant_policy_pack
            .human_approval_rules
            .iter()
            .any(|rule| rule.severity == severity && rule.require_approval);
        if rule_requires {
            return true;
        }
        if let Some(confidence) = confidence
            && confidence < self.policy.effective_guardrails.human_approval_threshold
        {
            return true;
        }
        severity == Severity::Critical
    }

    fn should_escalate(&self, confidence: Option<f64>) -> bool {
        let Some(confidence) = confidence else {
            return false;
        };
        confidence < self.policy.effective_guardrails.human_approval_threshold - 0.1
    }
}

#[async_trait]
impl Agent for PolicyAgent {
    fn name(&self) -> &'static str {
        "PolicyAgent"
    }

    async fn process(&self, exception: &mut ExceptionRecord, context: &mut AgentContext) -> Result<AgentDecision, AgentError> {
        let exception_type = exception
            .exception_type
            .clone()
            .ok_or_else(|| AgentError::Internal("policy stage reached without a classified exception type".to_string()))?;
        let original_severity = exception.severity.unwrap_or(Severity::Medium);
        let effective_severity = self.effective_severity(exception);

        let candidates = self.applicable_playbooks(exception_type.as_str());
        let approved = self.approved_playbook(exception_type.as_str(), &candidates);
        let actionability = self.determine_actionability(effective_severity, !candidates.is_empty(), approved);

        let confidence = context.get_f64("confidence");
        let human_approval_required = self.human_approval_required(effective_severity, confidence);
        let should_escalate = self.should_escalate(confidence);
        context.set("humanApprovalRequired", serde_json::json!(human_approval_required));
        context.set("actionability", serde_json::json!(actionability.as_str()));

        let mut evidence = vec![
            format!("Exception type: {exception_type}"),
            format!("Severity: {}", effective_severity.as_str()),
            format!("Actionability: {}", actionability.as_str()),
        ];
        if let Some(playbook) = approved {
            evidence.push(format!("Approved playbook found for: {}", playbook.exception_type));
        } else {
            evidence.push("No approved playbook found".to_string());
        }
        if human_approval_required {
            evidence.push("Human approval required".to_string());
        }
        if should_escalate {
            evidence.push("Escalation recommended (low confidence)".to_string());
        }
        if original_severity != effective_severity {
            evidence.push(format!("Severity overridden: {} -> {}", original_severity.as_str(), effective_severity.as_str()));
        }

        let decision_text = if should_escalate {
            "Escalate".to_string()
        } else if actionability == Actionability::NonActionableInfoOnly {
            "Blocked - Non-actionable".to_string()
        } else if human_approval_required {
            "Approved - Human approval required".to_string()
        } else if actionability == Actionability::ActionableApprovedProcess {
            "Approved".to_string()
        } else {
            "Blocked - Playbook not approved".to_string()
        };

        let confidence_out = if actionability == Actionability::ActionableApprovedProcess && !human_approval_required {
            0.9
        } else if actionability == Actionability::ActionableApprovedProcess {
            0.8
        } else if actionability == Actionability::ActionableNonApprovedProcess {
            0.6
        } else {
            0.5
        };

        let next_step = if should_escalate || actionability == Actionability::NonActionableInfoOnly {
            "Escalate".to_string()
        } else {
            "ProceedToResolution".to_string()
        };

        if next_step == "ProceedToResolution" && !should_escalate {
            let match_input = MatchInput {
                domain: Some(self.policy.domain_pack.domain_name.as_str().to_string()),
                exception_type: exception_type.as_str().to_string(),
                severity: effective_severity,
                sla_minutes_remaining: context.get_f64("sla_minutes_remaining"),
                policy_tags: Vec::new(),
            };
            let matched = context
                .get_str("suggested_playbook_id")
                .map(|id| (id.to_string(), "suggested by an upstream matcher".to_string()))
                .or_else(|| {
                    match_playbook(&self.policy.candidate_playbooks, &match_input)
                        .map(|result| (result.playbook.playbook_id.to_string(), result.reasoning))
                });
            if let Some((playbook_id, reasoning)) = matched {
                exception.current_playbook_id = Some(xgate_core::PlaybookId::new(playbook_id));
                exception.current_step = Some(1);
                evidence.push(format!("Playbook assignment: {reasoning}"));
            }
        }

        evidence.push(format!("selectedPlaybookId: {}", approved.map_or("None".to_string(), |playbook| playbook.exception_type.clone())));
        evidence.push(format!("humanApprovalRequired: {human_approval_required}"));

        if human_approval_required && !should_escalate {
            exception.resolution_status = xgate_core::ResolutionStatus::PendingApproval;
        }

        let decision = AgentDecision {
            decision: decision_text,
            confidence: confidence_out,
            evidence,
            next_step,
        };

        if let Some(audit) = &self.audit {
            audit.log_decision(serde_json::json!({
                "agent": self.name(),
                "exception_id": exception.exception_id.to_string(),
                "playbook_id": exception.current_playbook_id.as_ref().map(ToString::to_string),
                "decision": decision.decision,
            }))?;
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use xgate_core::DomainName;
    use xgate_core::DomainPack;
    use xgate_core::Guardrails;
    use xgate_core::HumanApprovalRuleDef;
    use xgate_core::PlaybookConditions;
    use xgate_core::PlaybookId;
    use xgate_core::TenantId;
    use xgate_core::TenantPolicyPack;
    use xgate_core::Timestamp;

    fn base_exception() -> ExceptionRecord {
        ExceptionRecord {
            exception_id: xgate_core::ExceptionId::new("EX-1"),
            tenant_id: TenantId::new("TENANT_A"),
            source_system: xgate_core::SourceSystem::new("KAFKA"),
            exception_type: Some(xgate_core::ExceptionType::new("SETTLEMENT_FAIL")),
            severity: Some(Severity::High),
            resolution_status: xgate_core::ResolutionStatus::Open,
            raw_payload: serde_json::json!({}),
            normalized_context: serde_json::json!({}),
            current_playbook_id: None,
            current_step: None,
            timestamp: Timestamp::now_utc(),
            created_at: Timestamp::now_utc(),
            updated_at: Timestamp::now_utc(),
        }
    }

    fn resolved_policy(playbooks: Vec<PlaybookDef>) -> ResolvedPolicy {
        ResolvedPolicy {
            domain_pack: DomainPack {
                domain_name: DomainName::from("finance"),
                exception_types: BTreeMap::new(),
                severity_rules: Vec::new(),
                playbooks: playbooks.clone(),
                guardrails: Guardrails::default(),
            },
            tenant_policy_pack: TenantPolicyPack {
                tenant_id: TenantId::new("TENANT_A"),
                domain_name: DomainName::from("finance"),
                custom_severity_overrides: Vec::new(),
                custom_playbooks: Vec::new(),
                human_approval_rules: Vec::new(),
                custom_guardrails: None,
                approved_business_processes: Vec::new(),
            },
            effective_guardrails: Guardrails::default(),
            candidate_playbooks: playbooks,
        }
    }

    fn playbook() -> PlaybookDef {
        PlaybookDef {
            playbook_id: PlaybookId::new("PB-1"),
            exception_type: "SETTLEMENT_FAIL".to_string(),
            steps: Vec::new(),
            conditions: PlaybookConditions::default(),
            created_at: Timestamp::now_utc(),
        }
    }

    #[tokio::test]
    async fn approved_playbook_assigns_current_playbook() {
        let agent = PolicyAgent::new(resolved_policy(vec![playbook()]), None);
        let mut exception = base_exception();
        let mut context = AgentContext::new();
        context.set("confidence", serde_json::json!(0.95));
        let decision = agent.process(&mut exception, &mut context).await.expect("process");
        assert_eq!(decision.decision, "Approved");
        assert!(exception.current_playbook_id.is_some());
        assert_eq!(exception.current_step, Some(1));
    }

    #[tokio::test]
    async fn critical_severity_requires_approval_by_default() {
        let mut policy = resolved_policy(vec![playbook()]);
        policy.tenant_policy_pack.human_approval_rules.push(HumanApprovalRuleDef {
            severity: Severity::Critical,
            require_approval: true,
        });
        let agent = PolicyAgent::new(policy, None);
        let mut exception = base_exception();
        exception.severity = Some(Severity::Critical);
        let mut context = AgentContext::new();
        context.set("confidence", serde_json::json!(0.95));
        let decision = agent.process(&mut exception, &mut context).await.expect("process");
        assert_eq!(decision.decision, "Approved - Human approval required");
        assert_eq!(exception.resolution_status, xgate_core::ResolutionStatus::PendingApproval);
    }

    #[tokio::test]
    async fn no_playbook_is_non_actionable_and_escalates() {
        let agent = PolicyAgent::new(resolved_policy(Vec::new()), None);
        let mut exception = base_exception();
        let mut context = AgentContext::new();
        context.set("confidence", serde_json::json!(0.95));
        let decision = agent.process(&mut exception, &mut context).await.expect("process");
        assert_eq!(decision.decision, "Blocked - Non-actionable");
        assert_eq!(decision.next_step, "Escalate");
    }

    #[tokio::test]
    async fn low_confidence_escalates() {
        let agent = PolicyAgent::new(resolved_policy(vec![playbook()]), None);
        let mut exception = base_exception();
        let mut context = AgentContext::new();
        context.set("confidence", serde_json::json!(0.3));
        let decision = agent.process(&mut exception, &mut context).await.expect("process");
        assert_eq!(decision.decision, "Escalate");
        assert_eq!(decision.next_step, "Escalate");
    }
}
