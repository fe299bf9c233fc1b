// crates/xgate-agents/src/resolution.rs
// ============================================================================
// Module: Resolution Agent (collaborator interface only)
// Description: Executes the next playbook step through a tool-execution
//              collaborator (spec §4.10.4).
// Dependencies: xgate-core, xgate-policy, xgate-audit, reqwest (blocking)
// ============================================================================

//! The Resolution Agent is a collaborator interface: the pipeline-facing
//! logic (step lookup, retry bookkeeping, audit entries) lives here; the
//! actual side effect of "do the thing an external system needs done"
//! lives behind [`ToolExecutor`], mirroring
//! `decision-gate-providers::HttpProvider`'s separation of dispatch
//! mechanics from the blocking HTTP client that performs it.

use async_trait::async_trait;
use serde_json::Value;
use xgate_core::AgentDecision;
use xgate_core::ExceptionRecord;
use xgate_core::PlaybookDef;
use xgate_core::PlaybookStepDef;
use xgate_policy::ordered_steps;

use crate::agent::Agent;
use crate::context::AgentContext;
use crate::error::AgentError;
use crate::SharedAuditTrail;

/// Executes one playbook step's action against an external system.
pub trait ToolExecutor: Send + Sync {
    /// Invokes `action` with `parameters`, returning the tool's response or
    /// an error message.
    fn execute(&self, action: &str, parameters: &Value) -> Result<Value, String>;
}

/// Invokes playbook step actions as blocking HTTP POSTs to
/// `{base_url}/{action}`, carrying `parameters` as the JSON body. Blocking
/// reqwest with rustls is carried over from the teacher's HTTP provider
/// choice (`decision-gate-providers::HttpProvider`).
pub struct HttpToolExecutor {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpToolExecutor {
    /// Builds an executor posting to `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error message when the underlying HTTP client cannot be
    /// constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::blocking::Client::builder().build().map_err(|err| err.to_string())?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

impl ToolExecutor for HttpToolExecutor {
    fn execute(&self, action: &str, parameters: &Value) -> Result<Value, String> {
        let url = format!("{}/{action}", self.base_url.trim_end_matches('/'));
        let response = self.client.post(&url).json(parameters).send().map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("tool '{action}' returned status {}", response.status()));
        }
        response.json::<Value>().map_err(|err| err.to_string())
    }
}

/// Always succeeds with an empty response. Used in tests and for
/// dry-run/no-op playbooks.
#[derive(Debug, Default)]
pub struct NoopToolExecutor;

impl ToolExecutor for NoopToolExecutor {
    fn execute(&self, _action: &str, _parameters: &Value) -> Result<Value, String> {
        Ok(Value::Null)
    }
}

/// Executes the next step of an exception's assigned playbook (spec
/// §4.10.4).
pub struct ResolutionAgent {
    candidate_playbooks: Vec<PlaybookDef>,
    tool_executor: Box<dyn ToolExecutor>,
    max_retries: u32,
    audit: Option<SharedAuditTrail>,
}

impl ResolutionAgent {
    /// Builds an agent over the tenant's candidate playbooks (used to look
    /// up the assigned playbook's steps), a tool-execution collaborator,
    /// and a bounded per-step retry count.
    #[must_use]
    pub fn new(candidate_playbooks: Vec<PlaybookDef>, tool_executor: Box<dyn ToolExecutor>, max_retries: u32, audit: Option<SharedAuditTrail>) -> Self {
        Self { candidate_playbooks, tool_executor, max_retries, audit }
    }

    fn find_playbook(&self, playbook_id: &xgate_core::PlaybookId) -> Option<&PlaybookDef> {
        self.candidate_playbooks.iter().find(|playbook| &playbook.playbook_id == playbook_id)
    }

    fn step_at<'a>(&self, steps: &[&'a PlaybookStepDef], current_step: u32) -> Option<&'a PlaybookStepDef> {
        steps.iter().find(|step| step.step_order == current_step).copied()
    }
}

#[async_trait]
impl Agent for ResolutionAgent {
    fn name(&self) -> &'static str {
        "ResolutionAgent"
    }

    async fn process(&self, exception: &mut ExceptionRecord, context: &mut AgentContext) -> Result<AgentDecision, AgentError> {
        let playbook_id = exception
            .current_playbook_id
            .clone()
            .ok_or_else(|| AgentError::Internal("resolution stage reached without an assigned playbook".to_string()))?;
        let current_step = exception
            .current_step
            .ok_or_else(|| AgentError::Internal("resolution stage reached without a current step".to_string()))?;

        let playbook = self
            .find_playbook(&playbook_id)
            .ok_or_else(|| AgentError::PlaybookNotApproved(format!("playbook {playbook_id} is not among the tenant's candidates")))?;
        let steps = ordered_steps(playbook);

        let Some(step) = self.step_at(&steps, current_step) else {
            exception.resolution_status = xgate_core::ResolutionStatus::Resolved;
            let decision = AgentDecision {
                decision: "Executed".to_string(),
                confidence: 1.0,
                evidence: vec![format!("Playbook {playbook_id} has no remaining steps at step {current_step}")],
                next_step: "ProceedToFeedback".to_string(),
            };
            if let Some(audit) = &self.audit {
                audit.log_agent_event(serde_json::json!({"agent": self.name(), "exception_id": exception.exception_id.to_string(), "decision": decision.decision}))?;
            }
            return Ok(decision);
        };

        let retry_key = format!("resolution_retry_count_step_{current_step}");
        let attempt = context.get_f64(&retry_key).unwrap_or(0.0) as u32;

        match self.tool_executor.execute(&step.action, &step.parameters) {
            Ok(result) => {
                exception.current_step = Some(current_step + 1);
                exception.resolution_status = xgate_core::ResolutionStatus::InProgress;
                let decision = AgentDecision {
                    decision: "Executed".to_string(),
                    confidence: 1.0,
                    evidence: vec![format!("Executed step {current_step} action '{}'", step.action)],
                    next_step: "ProceedToFeedback".to_string(),
                };
                if let Some(audit) = &self.audit {
                    audit.log_tool_call(serde_json::json!({
                        "agent": self.name(),
                        "exception_id": exception.exception_id.to_string(),
                        "action": step.action,
                        "result": result,
                    }))?;
                }
                Ok(decision)
            }
            Err(error) => {
                if let Some(audit) = &self.audit {
                    audit.log_tool_call(serde_json::json!({
                        "agent": self.name(),
                        "exception_id": exception.exception_id.to_string(),
                        "action": step.action,
                        "error": error,
                    }))?;
                }
                if attempt < self.max_retries {
                    context.set(retry_key.as_str(), serde_json::json!(f64::from(attempt + 1)));
                    Ok(AgentDecision {
                        decision: "Retrying".to_string(),
                        confidence: 0.4,
                        evidence: vec![format!("Step {current_step} action '{}' failed: {error} (attempt {})", step.action, attempt + 1)],
                        next_step: "ProceedToResolution".to_string(),
                    })
                } else {
                    exception.resolution_status = xgate_core::ResolutionStatus::Failed;
                    Ok(AgentDecision {
                        decision: "Failed".to_string(),
                        confidence: 0.0,
                        evidence: vec![format!("Step {current_step} action '{}' failed after {} retries: {error}", step.action, self.max_retries)],
                        next_step: "ProceedToFeedback".to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xgate_core::PlaybookConditions;
    use xgate_core::PlaybookId;
    use xgate_core::Timestamp;

    fn playbook_with_one_step() -> PlaybookDef {
        PlaybookDef {
            playbook_id: PlaybookId::new("PB-1"),
            exception_type: "SETTLEMENT_FAIL".to_string(),
            steps: vec![PlaybookStepDef {
                step_order: 1,
                action: "retry_settlement".to_string(),
                parameters: serde_json::json!({}),
            }],
            conditions: PlaybookConditions::default(),
            created_at: Timestamp::now_utc(),
        }
    }

    fn exception_with_playbook() -> ExceptionRecord {
        ExceptionRecord {
            exception_id: xgate_core::ExceptionId::new("EX-1"),
            tenant_id: xgate_core::TenantId::new("TENANT_A"),
            source_system: xgate_core::SourceSystem::new("KAFKA"),
            exception_type: Some(xgate_core::ExceptionType::new("SETTLEMENT_FAIL")),
            severity: Some(xgate_core::Severity::High),
            resolution_status: xgate_core::ResolutionStatus::Open,
            raw_payload: serde_json::json!({}),
            normalized_context: serde_json::json!({}),
            current_playbook_id: Some(PlaybookId::new("PB-1")),
            current_step: Some(1),
            timestamp: Timestamp::now_utc(),
            created_at: Timestamp::now_utc(),
            updated_at: Timestamp::now_utc(),
        }
    }

    struct AlwaysFails;
    impl ToolExecutor for AlwaysFails {
        fn execute(&self, _action: &str, _parameters: &Value) -> Result<Value, String> {
            Err("tool unavailable".to_string())
        }
    }

    #[tokio::test]
    async fn successful_step_advances_current_step() {
        let agent = ResolutionAgent::new(vec![playbook_with_one_step()], Box::new(NoopToolExecutor), 2, None);
        let mut exception = exception_with_playbook();
        let mut context = AgentContext::new();
        let decision = agent.process(&mut exception, &mut context).await.expect("process");
        assert_eq!(decision.decision, "Executed");
        assert_eq!(exception.current_step, Some(2));
    }

    #[tokio::test]
    async fn failure_retries_up_to_bound_then_fails() {
        let agent = ResolutionAgent::new(vec![playbook_with_one_step()], Box::new(AlwaysFails), 1, None);
        let mut exception = exception_with_playbook();
        let mut context = AgentContext::new();

        let first = agent.process(&mut exception, &mut context).await.expect("process");
        assert_eq!(first.decision, "Retrying");

        let second = agent.process(&mut exception, &mut context).await.expect("process");
        assert_eq!(second.decision, "Failed");
        assert_eq!(exception.resolution_status, xgate_core::ResolutionStatus::Failed);
    }

    #[tokio::test]
    async fn unassigned_playbook_is_an_error() {
        let agent = ResolutionAgent::new(Vec::new(), Box::new(NoopToolExecutor), 2, None);
        let mut exception = exception_with_playbook();
        exception.current_playbook_id = Some(PlaybookId::new("PB-UNKNOWN"));
        let mut context = AgentContext::new();
        let err = agent.process(&mut exception, &mut context).await.unwrap_err();
        assert!(matches!(err, AgentError::PlaybookNotApproved(_)));
    }
}
