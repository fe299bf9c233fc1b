// crates/xgate-core/src/pipeline.rs
// ============================================================================
// Module: Pipeline Result
// Description: The per-exception result shape the Orchestrator produces and
//              the Exception Store persists alongside each Exception Record.
// Purpose: Give the Exception Store, Orchestrator, and Explanation Service
//          one shared result shape instead of each re-deriving it.
// Dependencies: serde, serde_json, crate::model, crate::time
// ============================================================================

//! ## Overview
//! Spec §4.2 stores "the current state of each exception + last pipeline
//! result"; §6's HTTP reference surface returns
//! `pipelineResult.{status, stages, evidence, errors?}`. This module gives
//! that shape a fixed-form record so `xgate-store`, `xgate-orchestrator`, and
//! `xgate-explanation` share one definition rather than three ad hoc ones.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::AgentName;
use crate::identifiers::EvidenceId;
use crate::model::AgentDecision;
use crate::model::ResolutionStatus;
use crate::time::Timestamp;

/// Actionability classification produced by the Policy Agent (spec §4.10.3,
/// glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actionability {
    /// An approved playbook exists for this exception.
    ActionableApprovedProcess,
    /// A playbook exists but is not in the tenant's approved set.
    ActionableNonApprovedProcess,
    /// No playbook applies, or guardrails block automatic action.
    NonActionableInfoOnly,
}

/// The outcome of one completed, skipped, or failed pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    /// The agent that ran this stage, when it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<AgentName>,
    /// The agent's decision, when the stage ran to completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<AgentDecision>,
    /// Stable error kind string (spec §7), when the stage failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the stage was intentionally skipped (e.g.
    /// `"Non-actionable exception"`), distinct from a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    /// Evidence ids recorded during this stage.
    #[serde(default)]
    pub evidence_ids: Vec<EvidenceId>,
    /// Time the stage completed, used by the Explanation Service's timeline.
    pub completed_at: Timestamp,
}

impl StageOutcome {
    /// Builds a successful stage outcome.
    #[must_use]
    pub fn completed(agent_name: AgentName, decision: AgentDecision, completed_at: Timestamp) -> Self {
        Self {
            agent_name: Some(agent_name),
            decision: Some(decision),
            error: None,
            skipped: None,
            evidence_ids: Vec::new(),
            completed_at,
        }
    }

    /// Builds a failed stage outcome carrying a stable error kind string.
    #[must_use]
    pub fn failed(error: impl Into<String>, completed_at: Timestamp) -> Self {
        Self {
            agent_name: None,
            decision: None,
            error: Some(error.into()),
            skipped: None,
            evidence_ids: Vec::new(),
            completed_at,
        }
    }

    /// Builds a skipped stage outcome carrying the skip reason.
    #[must_use]
    pub fn skipped(reason: impl Into<String>, completed_at: Timestamp) -> Self {
        Self {
            agent_name: None,
            decision: None,
            error: None,
            skipped: Some(reason.into()),
            evidence_ids: Vec::new(),
            completed_at,
        }
    }
}

/// The result of driving one exception through the pipeline (spec §4.11,
/// §6). Persisted by the Exception Store alongside the current
/// [`crate::model::ExceptionRecord`]; read back by the Explanation Service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Final lifecycle status after the run (mirrors the exception record's
    /// `resolution_status` at the time this result was produced).
    pub status: ResolutionStatus,
    /// Per-stage outcomes, keyed by stage name (`intake`, `triage`,
    /// `policy`, `resolution`, `feedback`). Iteration order of a
    /// `BTreeMap<String, _>` is alphabetic, not pipeline order; callers that
    /// need pipeline order use [`crate::model::PIPELINE_STAGE_ORDER`].
    pub stages: BTreeMap<String, StageOutcome>,
    /// Actionability classification, set once Policy has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actionability: Option<Actionability>,
    /// Evidence ids accumulated across all stages, in recording order.
    #[serde(default)]
    pub evidence: Vec<EvidenceId>,
    /// Non-fatal errors accumulated during the run (e.g. degraded audit or
    /// evidence writes per spec §7's "degrade to warnings" policy).
    #[serde(default)]
    pub errors: Vec<String>,
}

/// The canonical pipeline stage order (spec §4.11): `resolution` may be
/// absent when skipped, but when present it always falls between `policy`
/// and `feedback`.
pub const PIPELINE_STAGE_ORDER: [&str; 5] = ["intake", "triage", "policy", "resolution", "feedback"];

impl PipelineResult {
    /// Builds an empty result with no stages yet run.
    #[must_use]
    pub fn new(status: ResolutionStatus) -> Self {
        Self {
            status,
            stages: BTreeMap::new(),
            actionability: None,
            evidence: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Returns the stage outcomes in pipeline order, skipping stages that
    /// never ran (spec invariant 4: order equals
    /// `intake, triage, policy, [resolution|skipped], feedback`).
    #[must_use]
    pub fn stages_in_order(&self) -> Vec<(&str, &StageOutcome)> {
        PIPELINE_STAGE_ORDER
            .iter()
            .filter_map(|name| self.stages.get(*name).map(|outcome| (*name, outcome)))
            .collect()
    }
}
