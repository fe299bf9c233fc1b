// crates/xgate-orchestrator/src/orchestrator.rs
// ============================================================================
// Module: Orchestrator
// Description: Drives one Exception Record through intake -> triage ->
//              policy -> (resolution) -> feedback (spec §4.11).
// Dependencies: xgate-agents, xgate-core, xgate-store, xgate-backpressure
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use xgate_agents::Agent;
use xgate_agents::AgentContext;
use xgate_agents::AgentError;
use xgate_agents::FeedbackAgent;
use xgate_agents::IntakeAgent;
use xgate_agents::PolicyAgent;
use xgate_agents::ResolutionAgent;
use xgate_agents::TriageAgent;
use xgate_backpressure::BackpressureController;
use xgate_core::Actionability;
use xgate_core::AgentDecision;
use xgate_core::AgentName;
use xgate_core::ExceptionKind;
use xgate_core::ExceptionRecord;
use xgate_core::OrchestratorError;
use xgate_core::PipelineResult;
use xgate_core::ResolutionStatus;
use xgate_core::StageOutcome;
use xgate_core::TenantId;
use xgate_core::Timestamp;
use xgate_store::ExceptionStore;

use crate::bus::EventBus;
use crate::bus::StageCompletedEvent;
use crate::hooks::NoopHooks;
use crate::hooks::OrchestratorHooks;
use crate::hooks::run_hook;
use crate::snapshot::NoopSnapshotWriter;
use crate::snapshot::SnapshotWriter;

/// Retry bound on the resolution loop itself, independent of
/// [`ResolutionAgent`]'s own per-step retry count: a defensive cap against
/// an agent that never reports a terminal `next_step`.
const RESOLUTION_LOOP_GUARD: usize = 64;

/// One raw exception to drive through the pipeline, as accepted by
/// [`Orchestrator::run_batch`].
pub struct BatchItem {
    /// The raw payload, as received from the source system.
    pub raw_payload: Value,
    /// Overrides any `tenantId`/`tenant_id` field in the payload.
    pub tenant_id_hint: Option<TenantId>,
    /// Overrides the generated pipeline id used in `normalized_context`.
    pub pipeline_id_hint: Option<String>,
}

/// Drives Exception Records through the fixed agent pipeline (spec §4.11).
///
/// One `Orchestrator` is built over one tenant's already-resolved policy and
/// agent instances; running many tenants means building many orchestrators,
/// matching how [`PolicyAgent`] and [`ResolutionAgent`] are themselves
/// constructed over one tenant's [`xgate_policy::ResolvedPolicy`].
pub struct Orchestrator {
    intake: IntakeAgent,
    triage: TriageAgent,
    policy: PolicyAgent,
    resolution: Option<ResolutionAgent>,
    feedback: FeedbackAgent,
    exception_store: Option<Arc<dyn ExceptionStore>>,
    backpressure: Option<Arc<BackpressureController>>,
    hooks: Arc<dyn OrchestratorHooks>,
    snapshot_writer: Arc<dyn SnapshotWriter>,
    event_bus: Arc<EventBus>,
    stage_timeouts: BTreeMap<String, Duration>,
    max_concurrency: usize,
}

impl Orchestrator {
    /// Builds an orchestrator over one tenant's agent pipeline. Resolution
    /// is optional: tenants whose policy never approves a playbook can be
    /// run without a [`ResolutionAgent`] at all.
    #[must_use]
    pub fn new(intake: IntakeAgent, triage: TriageAgent, policy: PolicyAgent, resolution: Option<ResolutionAgent>, feedback: FeedbackAgent) -> Self {
        Self {
            intake,
            triage,
            policy,
            resolution,
            feedback,
            exception_store: None,
            backpressure: None,
            hooks: Arc::new(NoopHooks),
            snapshot_writer: Arc::new(NoopSnapshotWriter),
            event_bus: Arc::new(EventBus::new()),
            stage_timeouts: BTreeMap::new(),
            max_concurrency: 1,
        }
    }

    /// Persists each run's final state via `store`.
    #[must_use]
    pub fn with_exception_store(mut self, store: Arc<dyn ExceptionStore>) -> Self {
        self.exception_store = Some(store);
        self
    }

    /// Wires in-flight accounting into `controller` for [`Self::run_batch`].
    #[must_use]
    pub fn with_backpressure(mut self, controller: Arc<BackpressureController>) -> Self {
        self.backpressure = Some(controller);
        self
    }

    /// Installs advisory stage hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn OrchestratorHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Installs a snapshot writer, enabling per-stage informational dumps.
    #[must_use]
    pub fn with_snapshot_writer(mut self, writer: Arc<dyn SnapshotWriter>) -> Self {
        self.snapshot_writer = writer;
        self
    }

    /// Exposes the pub/sub bus so callers can subscribe before running a
    /// batch.
    #[must_use]
    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// Sets a per-stage timeout, in seconds (spec §4.11).
    #[must_use]
    pub fn with_stage_timeout(mut self, stage_name: impl Into<String>, seconds: u64) -> Self {
        self.stage_timeouts.insert(stage_name.into(), Duration::from_secs(seconds));
        self
    }

    /// Sets the bounded concurrency used by [`Self::run_batch`].
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Drives one raw payload through the full pipeline, returning the
    /// final [`ExceptionRecord`] and [`PipelineResult`].
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] only for failures that happen before
    /// an exception is enrolled (intake normalization) or when persisting
    /// the final state fails; every other stage failure is captured inside
    /// the returned [`PipelineResult`] instead.
    pub async fn run_one(&self, item: BatchItem) -> Result<(ExceptionRecord, PipelineResult), OrchestratorError> {
        let mut exception = self
            .intake
            .normalize(&item.raw_payload, item.tenant_id_hint.as_ref(), item.pipeline_id_hint.as_deref())
            .map_err(|error| OrchestratorError::new(error.kind(), error.to_string()))?;

        let mut context = AgentContext::new();
        let mut result = PipelineResult::new(ResolutionStatus::Open);
        let mut stage_sequence = 0usize;

        let Some(_) = self.run_stage("intake", &self.intake, &mut exception, &mut context, &mut result, &mut stage_sequence).await else {
            result.status = exception.resolution_status;
            return self.finish(exception, result).await;
        };

        let Some(_) = self.run_stage("triage", &self.triage, &mut exception, &mut context, &mut result, &mut stage_sequence).await else {
            result.status = exception.resolution_status;
            return self.finish(exception, result).await;
        };

        let Some(policy_decision) = self.run_stage("policy", &self.policy, &mut exception, &mut context, &mut result, &mut stage_sequence).await else {
            result.status = exception.resolution_status;
            return self.finish(exception, result).await;
        };

        result.actionability = context.get_str("actionability").and_then(parse_actionability);

        if exception.resolution_status == ResolutionStatus::PendingApproval {
            result.status = exception.resolution_status;
            return self.finish(exception, result).await;
        }

        let proceed_to_feedback = if result.actionability == Some(Actionability::NonActionableInfoOnly) {
            self.record_skip("resolution", "Non-actionable exception", &exception, &context, &mut result, &mut stage_sequence);
            true
        } else if policy_decision.next_step == "Escalate" {
            exception.resolution_status = ResolutionStatus::Escalated;
            self.record_skip("resolution", "Escalated", &exception, &context, &mut result, &mut stage_sequence);
            true
        } else {
            self.run_resolution_loop(&mut exception, &mut context, &mut result, &mut stage_sequence).await
        };

        if !proceed_to_feedback {
            result.status = exception.resolution_status;
            return self.finish(exception, result).await;
        }

        let _ = self.run_stage("feedback", &self.feedback, &mut exception, &mut context, &mut result, &mut stage_sequence).await;
        result.status = exception.resolution_status;

        self.finish(exception, result).await
    }

    /// Drives a batch of raw payloads with bounded concurrency, preserving
    /// input order in the returned `Vec` (spec §4.11).
    pub async fn run_batch(self: &Arc<Self>, items: Vec<BatchItem>) -> Vec<Result<(ExceptionRecord, PipelineResult), OrchestratorError>> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_concurrency));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let orchestrator = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                if let Some(controller) = &orchestrator.backpressure {
                    controller.increment_in_flight();
                }
                let outcome = orchestrator.run_one(item).await;
                if let Some(controller) = &orchestrator.backpressure {
                    controller.decrement_in_flight();
                }
                outcome
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or_else(|error| Err(OrchestratorError::new(ExceptionKind::InternalError, error.to_string()))));
        }
        results
    }

    /// Drives the resolution retry loop. Returns `true` when the pipeline
    /// should proceed to feedback (a terminal decision was reached, by
    /// success, exhausted retries, or the loop guard), and `false` when a
    /// genuine stage error occurred, matching intake/triage/policy's "record
    /// stage error, mark FAILED, stop" transition (spec §4.11).
    async fn run_resolution_loop(&self, exception: &mut ExceptionRecord, context: &mut AgentContext, result: &mut PipelineResult, stage_sequence: &mut usize) -> bool {
        let Some(resolution) = &self.resolution else {
            result.stages.insert(
                "resolution".to_string(),
                StageOutcome::failed(ExceptionKind::ConfigUnavailable.as_str(), Timestamp::now_utc()),
            );
            result.errors.push("resolution: no ResolutionAgent configured for an assigned playbook".to_string());
            exception.resolution_status = ResolutionStatus::Failed;
            self.publish_and_snapshot("resolution", exception, context, result, *stage_sequence);
            *stage_sequence += 1;
            return false;
        };

        for _ in 0..RESOLUTION_LOOP_GUARD {
            let Some(decision) = self.run_stage("resolution", resolution, exception, context, result, stage_sequence).await else {
                return false;
            };
            if decision.next_step != "ProceedToResolution" {
                return true;
            }
        }
        tracing::warn!(exception_id = %exception.exception_id, "resolution loop guard exhausted without a terminal decision");
        true
    }

    fn record_skip(&self, stage_name: &str, reason: &str, exception: &ExceptionRecord, context: &AgentContext, result: &mut PipelineResult, stage_sequence: &mut usize) {
        result.stages.insert(stage_name.to_string(), StageOutcome::skipped(reason.to_string(), Timestamp::now_utc()));
        self.publish_and_snapshot(stage_name, exception, context, result, *stage_sequence);
        *stage_sequence += 1;
    }

    async fn run_stage(
        &self,
        stage_name: &str,
        agent: &dyn Agent,
        exception: &mut ExceptionRecord,
        context: &mut AgentContext,
        result: &mut PipelineResult,
        stage_sequence: &mut usize,
    ) -> Option<AgentDecision> {
        {
            let context_ref = &*context;
            run_hook(stage_name, "before_stage", || self.hooks.before_stage(stage_name, context_ref));
        }

        let outcome: Result<AgentDecision, AgentError> = match self.stage_timeouts.get(stage_name).copied() {
            Some(duration) => match tokio::time::timeout(duration, agent.process(exception, context)).await {
                Ok(inner) => inner,
                Err(_) => Err(AgentError::Timeout(format!("stage '{stage_name}' exceeded {}s", duration.as_secs()))),
            },
            None => agent.process(exception, context).await,
        };

        let completed_at = Timestamp::now_utc();
        let decision = match outcome {
            Ok(decision) => {
                run_hook(stage_name, "after_stage", || self.hooks.after_stage(stage_name, &decision));
                result.stages.insert(stage_name.to_string(), StageOutcome::completed(AgentName::new(agent.name()), decision.clone(), completed_at));
                Some(decision)
            }
            Err(error) => {
                let message = error.to_string();
                run_hook(stage_name, "on_failure", || self.hooks.on_failure(stage_name, &message));
                result.stages.insert(stage_name.to_string(), StageOutcome::failed(error.kind().as_str(), completed_at));
                result.errors.push(format!("{stage_name}: {message}"));
                exception.resolution_status = ResolutionStatus::Failed;
                None
            }
        };

        self.publish_and_snapshot(stage_name, exception, context, result, *stage_sequence);
        *stage_sequence += 1;
        decision
    }

    fn publish_and_snapshot(&self, stage_name: &str, exception: &ExceptionRecord, context: &AgentContext, result: &PipelineResult, stage_sequence: usize) {
        if let Some(outcome) = result.stages.get(stage_name) {
            self.event_bus.publish(&StageCompletedEvent {
                tenant_id: exception.tenant_id.clone(),
                exception_id: exception.exception_id.clone(),
                stage: stage_name.to_string(),
                outcome: outcome.clone(),
            });
        }

        let snapshot = serde_json::json!({
            "exception": exception,
            "context": context,
            "stagesSoFar": result.stages,
            "timestamp": Timestamp::now_utc().to_rfc3339(),
        });
        if let Err(error) = self.snapshot_writer.write(&exception.exception_id, stage_sequence, &snapshot) {
            tracing::warn!(stage = stage_name, error, "snapshot write failed");
        }
    }

    async fn finish(&self, exception: ExceptionRecord, result: PipelineResult) -> Result<(ExceptionRecord, PipelineResult), OrchestratorError> {
        if let Some(store) = &self.exception_store {
            store
                .put(&exception.tenant_id, exception.clone(), Some(result.clone()))
                .map_err(|error| OrchestratorError::new(ExceptionKind::InternalError, error.to_string()))?;
        }
        Ok((exception, result))
    }
}

fn parse_actionability(label: &str) -> Option<Actionability> {
    match label {
        "ACTIONABLE_APPROVED_PROCESS" => Some(Actionability::ActionableApprovedProcess),
        "ACTIONABLE_NON_APPROVED_PROCESS" => Some(Actionability::ActionableNonApprovedProcess),
        "NON_ACTIONABLE_INFO_ONLY" => Some(Actionability::NonActionableInfoOnly),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use xgate_agents::NoopToolExecutor;
    use xgate_agents::ResolutionAgent;
    use xgate_core::DomainName;
    use xgate_core::DomainPack;
    use xgate_core::ExceptionType;
    use xgate_core::Guardrails;
    use xgate_core::HumanApprovalRuleDef;
    use xgate_core::PlaybookConditions;
    use xgate_core::PlaybookDef;
    use xgate_core::PlaybookId;
    use xgate_core::PlaybookStepDef;
    use xgate_core::Severity;
    use xgate_core::TenantPolicyPack;
    use xgate_policy::ResolvedPolicy;
    use xgate_store::ExceptionListFilter;
    use xgate_store::ExceptionPage;
    use xgate_store::StoreError;

    use super::*;

    struct InMemoryExceptionStore {
        rows: Mutex<HashMap<(String, String), (ExceptionRecord, Option<PipelineResult>)>>,
    }

    impl InMemoryExceptionStore {
        fn new() -> Self {
            Self { rows: Mutex::new(HashMap::new()) }
        }

        fn get_direct(&self, tenant_id: &str, exception_id: &str) -> Option<(ExceptionRecord, Option<PipelineResult>)> {
            self.rows.lock().unwrap().get(&(tenant_id.to_string(), exception_id.to_string())).cloned()
        }
    }

    impl ExceptionStore for InMemoryExceptionStore {
        fn put(&self, tenant_id: &TenantId, record: ExceptionRecord, pipeline_result: Option<PipelineResult>) -> Result<(), StoreError> {
            self.rows.lock().unwrap().insert((tenant_id.to_string(), record.exception_id.to_string()), (record, pipeline_result));
            Ok(())
        }

        fn get(&self, tenant_id: &TenantId, exception_id: &ExceptionId) -> Result<Option<(ExceptionRecord, Option<PipelineResult>)>, StoreError> {
            Ok(self.get_direct(tenant_id.as_str(), exception_id.as_str()))
        }

        fn list(&self, _tenant_id: &TenantId, _filter: &ExceptionListFilter, _page: u32, _page_size: u32) -> Result<ExceptionPage, StoreError> {
            Ok(ExceptionPage { items: Vec::new(), total: 0 })
        }
    }

    fn domain_pack(playbooks: Vec<PlaybookDef>) -> DomainPack {
        let mut exception_types = std::collections::BTreeMap::new();
        exception_types.insert(
            "SETTLEMENT_FAIL".to_string(),
            xgate_core::ExceptionTypeDef { description: "settlement failure".to_string(), detection_rules: Vec::new() },
        );
        DomainPack {
            domain_name: DomainName::from("finance"),
            exception_types,
            severity_rules: Vec::new(),
            playbooks: playbooks.clone(),
            guardrails: Guardrails::default(),
        }
    }

    fn resolved_policy(playbooks: Vec<PlaybookDef>, human_approval_rules: Vec<HumanApprovalRuleDef>) -> ResolvedPolicy {
        ResolvedPolicy {
            domain_pack: domain_pack(playbooks.clone()),
            tenant_policy_pack: TenantPolicyPack {
                tenant_id: TenantId::new("TENANT_A"),
                domain_name: DomainName::from("finance"),
                custom_severity_overrides: Vec::new(),
                custom_playbooks: Vec::new(),
                human_approval_rules,
                custom_guardrails: None,
                approved_business_processes: Vec::new(),
            },
            effective_guardrails: Guardrails::default(),
            candidate_playbooks: playbooks,
        }
    }

    fn one_step_playbook() -> PlaybookDef {
        PlaybookDef {
            playbook_id: PlaybookId::new("PB-1"),
            exception_type: "SETTLEMENT_FAIL".to_string(),
            steps: vec![PlaybookStepDef { step_order: 1, action: "retry_settlement".to_string(), parameters: serde_json::json!({}) }],
            conditions: PlaybookConditions::default(),
            created_at: Timestamp::now_utc(),
        }
    }

    fn build_orchestrator(policy: ResolvedPolicy, with_resolution: bool) -> Orchestrator {
        let playbooks = policy.candidate_playbooks.clone();
        let resolution = if with_resolution { Some(ResolutionAgent::new(playbooks, Box::new(NoopToolExecutor), 2, None)) } else { None };
        Orchestrator::new(
            IntakeAgent::new(None, None),
            TriageAgent::new(policy.domain_pack.clone(), None, None),
            PolicyAgent::new(policy, None),
            resolution,
            FeedbackAgent::new(None, None, None),
        )
    }

    fn payload() -> Value {
        serde_json::json!({"tenantId": "TENANT_A", "exceptionType": "SETTLEMENT_FAIL"})
    }

    #[tokio::test]
    async fn approved_playbook_runs_resolution_and_feedback() {
        let store = Arc::new(InMemoryExceptionStore::new());
        let orchestrator = build_orchestrator(resolved_policy(vec![one_step_playbook()], Vec::new()), true).with_exception_store(store.clone());

        let (exception, result) = orchestrator
            .run_one(BatchItem { raw_payload: payload(), tenant_id_hint: None, pipeline_id_hint: None })
            .await
            .expect("run_one");

        assert_eq!(result.stages_in_order().len(), 5);
        assert!(result.stages.contains_key("resolution"));
        assert!(result.stages.contains_key("feedback"));
        assert_eq!(result.status, exception.resolution_status);
        assert!(store.get_direct("TENANT_A", exception.exception_id.as_str()).is_some());
    }

    #[tokio::test]
    async fn pending_approval_halts_before_resolution_and_feedback() {
        // Triage's type-name fallback heuristic assigns HIGH severity to any
        // *_FAIL type with no matching severity rule; a human-approval rule on
        // HIGH reliably drives the exception into PENDING_APPROVAL.
        let policy = resolved_policy(vec![one_step_playbook()], vec![HumanApprovalRuleDef { severity: Severity::High, require_approval: true }]);
        let orchestrator = build_orchestrator(policy, true);
        let (exception, result) =
            orchestrator.run_one(BatchItem { raw_payload: payload(), tenant_id_hint: None, pipeline_id_hint: None }).await.expect("run_one");

        assert_eq!(exception.resolution_status, ResolutionStatus::PendingApproval);
        assert!(!result.stages.contains_key("resolution"));
        assert!(!result.stages.contains_key("feedback"));
    }

    #[tokio::test]
    async fn no_candidate_playbooks_is_non_actionable_and_skips_resolution() {
        let orchestrator = build_orchestrator(resolved_policy(Vec::new(), Vec::new()), false);
        let (exception, result) = orchestrator
            .run_one(BatchItem { raw_payload: payload(), tenant_id_hint: None, pipeline_id_hint: None })
            .await
            .expect("run_one");

        let resolution_outcome = result.stages.get("resolution").expect("resolution stage present");
        assert_eq!(resolution_outcome.skipped.as_deref(), Some("Non-actionable exception"));
        assert!(result.stages.contains_key("feedback"));
        assert_eq!(exception.exception_type, Some(ExceptionType::new("SETTLEMENT_FAIL")));
    }

    #[tokio::test]
    async fn missing_tenant_id_fails_before_enrollment() {
        let orchestrator = build_orchestrator(resolved_policy(Vec::new(), Vec::new()), false);
        let err = orchestrator
            .run_one(BatchItem { raw_payload: serde_json::json!({}), tenant_id_hint: None, pipeline_id_hint: None })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExceptionKind::ValidationFailed);
    }

    #[tokio::test]
    async fn run_batch_preserves_input_order() {
        let orchestrator = Arc::new(build_orchestrator(resolved_policy(vec![one_step_playbook()], Vec::new()), true).with_max_concurrency(4));
        let items = (0..5)
            .map(|index| BatchItem {
                raw_payload: serde_json::json!({"tenantId": "TENANT_A", "exceptionId": format!("EX-{index}"), "exceptionType": "SETTLEMENT_FAIL"}),
                tenant_id_hint: None,
                pipeline_id_hint: None,
            })
            .collect();

        let results = orchestrator.run_batch(items).await;
        assert_eq!(results.len(), 5);
        for (index, result) in results.into_iter().enumerate() {
            let (exception, _) = result.expect("run_one");
            assert_eq!(exception.exception_id.as_str(), format!("EX-{index}"));
        }
    }
}
