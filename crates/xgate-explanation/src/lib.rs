// crates/xgate-explanation/src/lib.rs
// ============================================================================
// Module: Explanation Service
// Description: Renders a quality-scored, content-hashed explanation of why
//              an exception reached its current state (spec §4.13).
// Purpose: One place that merges the Exception Store, Audit Logger,
//          Evidence Tracker, and Metrics Collector into a single answer to
//          "what happened, and why."
// Dependencies: xgate-core, xgate-store, xgate-evidence, xgate-audit,
//               xgate-metrics, serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! [`ExplanationService::generate`] is the only entry point. It fetches the
//! exception's current state from the [`xgate_store::ExceptionStore`],
//! scans the audit root for every `*_audit.jsonl` line mentioning the
//! exception id, merges that with the stored [`xgate_core::PipelineResult`]
//! via [`timeline::build_timeline`], pulls the evidence graph from the
//! [`xgate_evidence::EvidenceTracker`], and renders one of three formats.
//! Every rendering is scored ([`quality::score_text`] /
//! [`quality::score_structured`]) and hashed ([`quality::explanation_hash`])
//! before the call returns, mirroring `decision-gate-mcp`'s practice of
//! shipping a response's integrity proof alongside the response itself.

#![forbid(unsafe_code)]

pub mod quality;
pub mod timeline;

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use xgate_audit::AuditError;
use xgate_audit::AuditRecord;
use xgate_audit::AuditTrail;
use xgate_audit::read_jsonl_dir;
use xgate_core::ExceptionId;
use xgate_core::TenantId;
use xgate_core::Timestamp;
use xgate_core::hashing::CanonicalizeError;
use xgate_core::hashing::ContentHash;
use xgate_evidence::EvidenceError;
use xgate_evidence::EvidenceTracker;
use xgate_metrics::MetricsCollector;
use xgate_metrics::MetricsError;
use xgate_store::ExceptionStore;
use xgate_store::StoreError;

pub use timeline::DecisionTimeline;
pub use timeline::TimelineEvent;

/// Rendering formats an explanation can be requested in (spec §4.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplanationFormat {
    /// Full structured JSON: timeline, evidence items, evidence links,
    /// agent decisions, and a version marker.
    Json,
    /// Human-readable prose, one paragraph per timeline event.
    Text,
    /// JSON with evidence additionally grouped by kind and by linking agent.
    Structured,
}

/// Errors returned by [`ExplanationService::generate`].
#[derive(Debug, Error)]
pub enum ExplanationError {
    /// No exception exists under `(tenant_id, exception_id)`.
    #[error("exception {exception_id} not found for tenant {tenant_id}")]
    NotFound {
        /// The tenant that was queried.
        tenant_id: TenantId,
        /// The exception id that was queried.
        exception_id: ExceptionId,
    },
    /// The Exception Store could not be read.
    #[error("exception store error: {0}")]
    Store(#[from] StoreError),
    /// The Evidence Tracker could not be read.
    #[error("evidence tracker error: {0}")]
    Evidence(#[from] EvidenceError),
    /// The audit trail could not be read or written.
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),
    /// The Metrics Collector could not record the generation.
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),
    /// The rendered explanation could not be canonicalized for hashing.
    #[error("explanation could not be hashed: {0}")]
    Hash(#[from] CanonicalizeError),
}

/// The result of [`ExplanationService::generate`] (spec §4.13a).
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    /// The exception this explanation concerns.
    pub exception_id: ExceptionId,
    /// The owning tenant.
    pub tenant_id: TenantId,
    /// The format this explanation was rendered in.
    #[serde(skip)]
    pub format: ExplanationFormat,
    /// The rendered body: a JSON value for [`ExplanationFormat::Json`] and
    /// [`ExplanationFormat::Structured`], or a single string wrapped in
    /// [`Value::String`] for [`ExplanationFormat::Text`].
    pub rendered: Value,
    /// Deterministic `[0, 1]` quality score (spec §4.13a).
    pub quality_score: f64,
    /// Content hash of `rendered`, for integrity verification (spec §4.13a).
    pub content_hash: ContentHash,
}

/// Explanation format version embedded in JSON/STRUCTURED renderings, bumped
/// whenever the rendered shape changes in a way a consumer would notice.
const EXPLANATION_VERSION: u32 = 1;

/// Builds [`Explanation`]s from the stores every other component already
/// writes to (spec §4.13).
pub struct ExplanationService<St, Ev, Mc> {
    store: St,
    evidence: Ev,
    metrics: Mc,
    audit_root: std::path::PathBuf,
}

impl<St, Ev, Mc> ExplanationService<St, Ev, Mc>
where
    St: ExceptionStore,
    Ev: EvidenceTracker,
    Mc: MetricsCollector,
{
    /// Builds a service reading exception state from `store`, evidence from
    /// `evidence`, audit records from every `*_audit.jsonl` file directly
    /// under `audit_root`, and recording generation metrics to `metrics`.
    pub fn new(store: St, evidence: Ev, metrics: Mc, audit_root: impl Into<std::path::PathBuf>) -> Self {
        Self { store, evidence, metrics, audit_root: audit_root.into() }
    }

    /// Renders an explanation for `(tenant_id, exception_id)` in `format`,
    /// scores it, hashes it, and records the generation in metrics. When
    /// `audit` is supplied, also writes an `ExplanationGenerated` audit line.
    ///
    /// # Errors
    ///
    /// Returns [`ExplanationError::NotFound`] when the exception does not
    /// exist for this tenant, and propagates any underlying store, evidence,
    /// audit, metrics, or hashing failure.
    pub fn generate<S: xgate_audit::AuditSink>(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
        format: ExplanationFormat,
        audit: Option<&AuditTrail<S>>,
    ) -> Result<Explanation, ExplanationError> {
        let started_at = Instant::now();

        let (record, pipeline_result) = self
            .store
            .get(tenant_id, exception_id)?
            .ok_or_else(|| ExplanationError::NotFound { tenant_id: tenant_id.clone(), exception_id: exception_id.clone() })?;

        let audit_records = self.audit_records_for(exception_id)?;
        let base_timestamp = record.created_at;
        let decision_timeline =
            timeline::build_timeline(tenant_id, exception_id, base_timestamp, pipeline_result.as_ref(), &audit_records);

        let evidence_items = self.evidence.evidence_for(tenant_id, exception_id)?;
        let evidence_links = self.evidence.links_for(tenant_id, exception_id, None)?;
        let agent_decisions = agent_decisions_by_stage(pipeline_result.as_ref());

        let rendered = match format {
            ExplanationFormat::Json => render_json(
                exception_id,
                tenant_id,
                &decision_timeline,
                &evidence_items,
                &evidence_links,
                &agent_decisions,
            ),
            ExplanationFormat::Structured => render_structured(
                exception_id,
                tenant_id,
                &decision_timeline,
                &evidence_items,
                &evidence_links,
                &agent_decisions,
            ),
            ExplanationFormat::Text => {
                Value::String(render_text(&record.exception_id, &decision_timeline, &evidence_items))
            }
        };

        let quality_score = match format {
            ExplanationFormat::Text => rendered.as_str().map(quality::score_text).unwrap_or(0.0),
            ExplanationFormat::Json | ExplanationFormat::Structured => quality::score_structured(&rendered),
        };
        let content_hash = quality::explanation_hash(&rendered)?;

        let latency_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.metrics.record_explanation_generated(tenant_id, exception_id, latency_ms, quality_score)?;

        if let Some(trail) = audit {
            trail.log_explanation_generated(serde_json::json!({
                "exception_id": exception_id.to_string(),
                "format": format_label(format),
                "quality_score": quality_score,
                "content_hash": content_hash.to_string(),
                "latency_ms": latency_ms,
            }))?;
        }

        tracing::info!(
            exception_id = %exception_id,
            tenant_id = %tenant_id,
            format = format_label(format),
            quality_score,
            latency_ms,
            "explanation generated"
        );

        Ok(Explanation { exception_id: exception_id.clone(), tenant_id: tenant_id.clone(), format, rendered, quality_score, content_hash })
    }

    fn audit_records_for(&self, exception_id: &ExceptionId) -> Result<Vec<AuditRecord>, AuditError> {
        let needle = exception_id.to_string();
        let records = read_jsonl_dir(&self.audit_root)?;
        Ok(records.into_iter().filter(|record| mentions_exception(record, &needle)).collect())
    }
}

fn mentions_exception(record: &AuditRecord, exception_id: &str) -> bool {
    value_contains_string(&record.data, exception_id)
}

fn value_contains_string(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(text) => text == needle,
        Value::Object(map) => map.values().any(|inner| value_contains_string(inner, needle)),
        Value::Array(items) => items.iter().any(|inner| value_contains_string(inner, needle)),
        _ => false,
    }
}

fn format_label(format: ExplanationFormat) -> &'static str {
    match format {
        ExplanationFormat::Json => "json",
        ExplanationFormat::Text => "text",
        ExplanationFormat::Structured => "structured",
    }
}

fn agent_decisions_by_stage(pipeline_result: Option<&xgate_core::PipelineResult>) -> BTreeMap<String, Value> {
    let Some(result) = pipeline_result else {
        return BTreeMap::new();
    };
    result
        .stages_in_order()
        .into_iter()
        .filter_map(|(stage_name, outcome)| {
            let decision = outcome.decision.as_ref()?;
            Some((
                stage_name.to_string(),
                serde_json::json!({
                    "decision": decision.decision,
                    "confidence": decision.confidence,
                    "evidence": decision.evidence,
                    "next_step": decision.next_step,
                }),
            ))
        })
        .collect()
}

fn render_json(
    exception_id: &ExceptionId,
    tenant_id: &TenantId,
    decision_timeline: &DecisionTimeline,
    evidence_items: &[xgate_core::EvidenceItem],
    evidence_links: &[xgate_core::EvidenceLink],
    agent_decisions: &BTreeMap<String, Value>,
) -> Value {
    serde_json::json!({
        "version": EXPLANATION_VERSION,
        "exception_id": exception_id.to_string(),
        "tenant_id": tenant_id.to_string(),
        "timeline": {
            "events": decision_timeline.events,
            "events_count": decision_timeline.events.len(),
        },
        "evidence_items": evidence_items,
        "evidence_links": evidence_links,
        "agent_decisions": agent_decisions,
    })
}

fn render_structured(
    exception_id: &ExceptionId,
    tenant_id: &TenantId,
    decision_timeline: &DecisionTimeline,
    evidence_items: &[xgate_core::EvidenceItem],
    evidence_links: &[xgate_core::EvidenceLink],
    agent_decisions: &BTreeMap<String, Value>,
) -> Value {
    let mut by_type: BTreeMap<String, Vec<&xgate_core::EvidenceItem>> = BTreeMap::new();
    for item in evidence_items {
        by_type.entry(format!("{:?}", item.kind).to_lowercase()).or_default().push(item);
    }

    let mut links_by_agent: BTreeMap<String, Vec<&xgate_core::EvidenceLink>> = BTreeMap::new();
    for link in evidence_links {
        links_by_agent.entry(link.agent_name.as_str().to_string()).or_default().push(link);
    }

    serde_json::json!({
        "version": EXPLANATION_VERSION,
        "exception_id": exception_id.to_string(),
        "tenant_id": tenant_id.to_string(),
        "timeline": {
            "events": decision_timeline.events,
            "events_count": decision_timeline.events.len(),
        },
        "agent_decisions": agent_decisions,
        "evidence_links": evidence_links,
        "evidence": {
            "total_items": evidence_items.len(),
            "by_type": by_type,
            "links_by_agent": links_by_agent,
        },
    })
}

fn render_text(exception_id: &ExceptionId, decision_timeline: &DecisionTimeline, evidence_items: &[xgate_core::EvidenceItem]) -> String {
    let mut paragraphs = Vec::new();
    paragraphs.push(format!("Exception {exception_id} was processed through {} recorded step(s).", decision_timeline.events.len()));

    for event in &decision_timeline.events {
        let mut sentence = format!("At stage \"{}\", {} recorded: {}.", event.stage_name, event.agent_name, event.summary);
        if let Some(decision) = &event.decision {
            sentence.push_str(&format!(" The decision was \"{decision}\""));
            if let Some(confidence) = event.confidence {
                sentence.push_str(&format!(", reported with confidence {confidence:.2}"));
            }
            sentence.push_str(", because the evidence gathered at that stage supported it.");
        }
        if let Some(next_step) = &event.next_step {
            sentence.push_str(&format!(" Based on this, the next step was \"{next_step}\"."));
        }
        paragraphs.push(sentence);
    }

    if evidence_items.is_empty() {
        paragraphs.push("No rag, tool, policy, or manual evidence was attached to this exception.".to_string());
    } else {
        let summaries: Vec<String> = evidence_items
            .iter()
            .map(|item| match item.similarity_score {
                Some(score) => format!("{} ({}, similarity {score:.2})", item.description, item.source_id),
                None => format!("{} ({})", item.description, item.source_id),
            })
            .collect();
        paragraphs.push(format!("Evidence considered: {}. Therefore this reasoning is grounded in recorded evidence, not inference alone.", summaries.join("; ")));
    }

    paragraphs.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use xgate_audit::NoopAuditSink;
    use xgate_core::AgentDecision;
    use xgate_core::AgentName;
    use xgate_core::EvidenceId;
    use xgate_core::EvidenceInfluence;
    use xgate_core::EvidenceKind;
    use xgate_core::EvidenceLinkId;
    use xgate_core::ExceptionRecord;
    use xgate_core::PipelineResult;
    use xgate_core::ResolutionStatus;
    use xgate_core::RunId;
    use xgate_core::SourceSystem;
    use xgate_core::StageOutcome;
    use xgate_core::identifiers::StageName;
    use xgate_evidence::JsonlEvidenceTracker;
    use xgate_metrics::InMemoryMetricsCollector;
    use xgate_store::StoreError;

    struct InMemoryStore(std::sync::Mutex<BTreeMap<(TenantId, ExceptionId), (ExceptionRecord, Option<PipelineResult>)>>);

    impl InMemoryStore {
        fn new() -> Self {
            Self(std::sync::Mutex::new(BTreeMap::new()))
        }
    }

    impl ExceptionStore for InMemoryStore {
        fn put(&self, tenant_id: &TenantId, record: ExceptionRecord, pipeline_result: Option<PipelineResult>) -> Result<(), StoreError> {
            self.0.lock().unwrap().insert((tenant_id.clone(), record.exception_id.clone()), (record, pipeline_result));
            Ok(())
        }

        fn get(
            &self,
            tenant_id: &TenantId,
            exception_id: &ExceptionId,
        ) -> Result<Option<(ExceptionRecord, Option<PipelineResult>)>, StoreError> {
            Ok(self.0.lock().unwrap().get(&(tenant_id.clone(), exception_id.clone())).cloned())
        }

        fn list(
            &self,
            _tenant_id: &TenantId,
            _filter: &xgate_store::ExceptionListFilter,
            _page: u32,
            _page_size: u32,
        ) -> Result<xgate_store::ExceptionPage, StoreError> {
            Ok(xgate_store::ExceptionPage { items: Vec::new(), total: 0 })
        }
    }

    fn sample_record(tenant_id: &TenantId, exception_id: &ExceptionId) -> ExceptionRecord {
        let now = Timestamp::parse("2026-07-30T00:00:00Z").expect("parse");
        ExceptionRecord {
            exception_id: exception_id.clone(),
            tenant_id: tenant_id.clone(),
            source_system: SourceSystem::new("settlement-engine"),
            exception_type: None,
            severity: None,
            resolution_status: ResolutionStatus::Resolved,
            raw_payload: serde_json::json!({}),
            normalized_context: serde_json::json!({"pipelineId": "PIPE-1", "normalizedAt": "2026-07-30T00:00:00Z"}),
            current_playbook_id: None,
            current_step: None,
            timestamp: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_pipeline_result() -> PipelineResult {
        let mut result = PipelineResult::new(ResolutionStatus::Resolved);
        result.stages.insert(
            "intake".to_string(),
            StageOutcome::completed(
                AgentName::from("intake"),
                AgentDecision {
                    decision: "Normalized as SETTLEMENT_FAIL".to_string(),
                    confidence: 0.95,
                    evidence: vec!["normalized from raw payload".to_string()],
                    next_step: "ProceedToTriage".to_string(),
                },
                Timestamp::parse("2026-07-30T00:00:00Z").expect("parse"),
            ),
        );
        result
    }

    fn service(
        store: InMemoryStore,
        evidence_root: &std::path::Path,
        audit_root: &std::path::Path,
    ) -> ExplanationService<InMemoryStore, JsonlEvidenceTracker, InMemoryMetricsCollector> {
        let evidence = JsonlEvidenceTracker::new(evidence_root).expect("evidence tracker");
        let metrics = InMemoryMetricsCollector::new();
        ExplanationService::new(store, evidence, metrics, audit_root)
    }

    #[test]
    fn not_found_when_exception_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(InMemoryStore::new(), dir.path(), dir.path());
        let tenant = TenantId::new("TENANT_A");
        let err = svc
            .generate(&tenant, &ExceptionId::new("EX-MISSING"), ExplanationFormat::Json, None::<&AuditTrail<NoopAuditSink>>)
            .expect_err("expected not found");
        assert!(matches!(err, ExplanationError::NotFound { .. }));
    }

    #[test]
    fn json_format_includes_timeline_and_agent_decisions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = InMemoryStore::new();
        let tenant = TenantId::new("TENANT_A");
        let exception_id = ExceptionId::new("EX-1");
        store.put(&tenant, sample_record(&tenant, &exception_id), Some(sample_pipeline_result())).expect("put");

        let svc = service(store, dir.path(), dir.path());
        svc.evidence
            .record(xgate_core::EvidenceItem {
                id: EvidenceId::generate(),
                kind: EvidenceKind::Rag,
                source_id: "similarity-index".to_string(),
                description: "similar settlement failure resolved last week".to_string(),
                similarity_score: Some(0.88),
                payload_ref: None,
                tenant_id: tenant.clone(),
                exception_id: exception_id.clone(),
                metadata: serde_json::json!({}),
            })
            .expect("record evidence");

        let explanation = svc
            .generate(&tenant, &exception_id, ExplanationFormat::Json, None::<&AuditTrail<NoopAuditSink>>)
            .expect("generate");

        assert_eq!(explanation.rendered["exception_id"], serde_json::json!("EX-1"));
        assert_eq!(explanation.rendered["timeline"]["events_count"], serde_json::json!(1));
        assert!(explanation.rendered["agent_decisions"]["intake"].is_object());
        assert_eq!(explanation.rendered["evidence_items"].as_array().expect("array").len(), 1);
        assert!((0.0..=1.0).contains(&explanation.quality_score));
    }

    #[test]
    fn structured_format_groups_evidence_by_type_and_agent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = InMemoryStore::new();
        let tenant = TenantId::new("TENANT_A");
        let exception_id = ExceptionId::new("EX-1");
        store.put(&tenant, sample_record(&tenant, &exception_id), Some(sample_pipeline_result())).expect("put");

        let svc = service(store, dir.path(), dir.path());
        let item = xgate_core::EvidenceItem {
            id: EvidenceId::generate(),
            kind: EvidenceKind::Policy,
            source_id: "guardrail-7".to_string(),
            description: "blast radius guardrail evaluated".to_string(),
            similarity_score: None,
            payload_ref: None,
            tenant_id: tenant.clone(),
            exception_id: exception_id.clone(),
            metadata: serde_json::json!({}),
        };
        svc.evidence.record(item.clone()).expect("record evidence");
        svc.evidence
            .link(
                &tenant,
                &exception_id,
                AgentName::from("policy"),
                StageName::from("policy"),
                item.id,
                EvidenceInfluence::Support,
            )
            .expect("link evidence");

        let explanation = svc
            .generate(&tenant, &exception_id, ExplanationFormat::Structured, None::<&AuditTrail<NoopAuditSink>>)
            .expect("generate");

        assert!(explanation.rendered["evidence"]["by_type"]["policy"].is_array());
        assert!(explanation.rendered["evidence"]["links_by_agent"]["policy"].is_array());
        assert_eq!(explanation.rendered["evidence"]["total_items"], serde_json::json!(1));
    }

    #[test]
    fn text_format_renders_prose_and_mentions_evidence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = InMemoryStore::new();
        let tenant = TenantId::new("TENANT_A");
        let exception_id = ExceptionId::new("EX-1");
        store.put(&tenant, sample_record(&tenant, &exception_id), Some(sample_pipeline_result())).expect("put");

        let svc = service(store, dir.path(), dir.path());
        let explanation = svc
            .generate(&tenant, &exception_id, ExplanationFormat::Text, None::<&AuditTrail<NoopAuditSink>>)
            .expect("generate");

        let text = explanation.rendered.as_str().expect("text");
        assert!(text.contains("EX-1"));
        assert!(text.contains("intake"));
    }

    #[test]
    fn audit_scan_merges_records_mentioning_exception_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let audit_dir = dir.path().join("audit");
        std::fs::create_dir_all(&audit_dir).expect("mkdir");
        let sink = xgate_audit::JsonlAuditSink::open(audit_dir.join("RUN-9_audit.jsonl")).expect("sink");
        let trail = AuditTrail::open(RunId::new("RUN-9"), TenantId::new("TENANT_A"), sink);
        trail.log_tool_call(serde_json::json!({"tool_name": "settlement_retry", "exception_id": "EX-1"})).expect("log");

        let store = InMemoryStore::new();
        let tenant = TenantId::new("TENANT_A");
        let exception_id = ExceptionId::new("EX-1");
        store.put(&tenant, sample_record(&tenant, &exception_id), None).expect("put");

        let svc = service(store, dir.path(), &audit_dir);
        let explanation = svc
            .generate(&tenant, &exception_id, ExplanationFormat::Json, None::<&AuditTrail<NoopAuditSink>>)
            .expect("generate");

        assert_eq!(explanation.rendered["timeline"]["events_count"], serde_json::json!(1));
    }

    #[test]
    fn records_metrics_sample_on_generate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = InMemoryStore::new();
        let tenant = TenantId::new("TENANT_A");
        let exception_id = ExceptionId::new("EX-1");
        store.put(&tenant, sample_record(&tenant, &exception_id), None).expect("put");

        let svc = service(store, dir.path(), dir.path());
        svc.generate(&tenant, &exception_id, ExplanationFormat::Json, None::<&AuditTrail<NoopAuditSink>>).expect("generate");

        let snapshot = svc.metrics.get_metrics(&tenant).expect("snapshot");
        assert_eq!(snapshot.explanations_generated, 1);
        assert_eq!(*snapshot.explanations_per_exception.get(&exception_id).unwrap_or(&0), 1);
    }

    #[test]
    fn same_inputs_hash_identically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = InMemoryStore::new();
        let tenant = TenantId::new("TENANT_A");
        let exception_id = ExceptionId::new("EX-1");
        store.put(&tenant, sample_record(&tenant, &exception_id), Some(sample_pipeline_result())).expect("put");

        let svc = service(store, dir.path(), dir.path());
        let first =
            svc.generate(&tenant, &exception_id, ExplanationFormat::Json, None::<&AuditTrail<NoopAuditSink>>).expect("first");
        let second =
            svc.generate(&tenant, &exception_id, ExplanationFormat::Json, None::<&AuditTrail<NoopAuditSink>>).expect("second");

        assert_eq!(first.content_hash, second.content_hash);
        assert!((first.quality_score - second.quality_score).abs() < f64::EPSILON);
    }
}
