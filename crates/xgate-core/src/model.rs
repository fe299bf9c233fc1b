// crates/xgate-core/src/model.rs
// ============================================================================
// Module: Data Model
// Description: Exception Record, Event, Evidence Item/Link, Agent Decision,
//              Domain Pack, Tenant Policy Pack, SLO Target (spec §3).
// Purpose: One canonical set of record shapes shared by every component.
// Dependencies: serde, serde_json, crate::identifiers, crate::time
// ============================================================================

//! ## Overview
//! These types are plain data: no component-specific behavior lives here.
//! `raw_payload`, `normalized_context`, `Event::payload`, and
//! `EvidenceItem::metadata` stay schema-flexible `serde_json::Value` maps
//! per spec §9 ("dynamic payloads → tagged variants... stay as
//! schema-flexible maps"); everything else is a fixed-shape record with
//! enumerated stage names and status values.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::identifiers::ActorId;
use crate::identifiers::AgentName;
use crate::identifiers::DomainName;
use crate::identifiers::EventId;
use crate::identifiers::EvidenceId;
use crate::identifiers::EvidenceLinkId;
use crate::identifiers::ExceptionId;
use crate::identifiers::ExceptionType;
use crate::identifiers::PlaybookId;
use crate::identifiers::SourceSystem;
use crate::identifiers::StageName;
use crate::identifiers::TenantId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Exception Record
// ============================================================================

/// Severity of an exception. Ordered LOW < MEDIUM < HIGH < CRITICAL — the
/// fixed priority Triage uses to pick among matching severity rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Lowest severity.
    Low,
    /// Default severity when no rule or heuristic matches.
    Medium,
    /// High severity.
    High,
    /// Highest severity; subject to approval guardrails.
    Critical,
}

impl Severity {
    /// Returns the canonical uppercase name, as used in rule text and audit data.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(()),
        }
    }
}

/// Lifecycle status of an exception. OPEN is initial; RESOLVED, ESCALATED,
/// and FAILED are terminal. PENDING_APPROVAL halts the pipeline until an
/// external approval event arrives (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStatus {
    /// Initial status.
    Open,
    /// A playbook is actively executing.
    InProgress,
    /// Halted pending an external approval event.
    PendingApproval,
    /// Terminal: resolved successfully.
    Resolved,
    /// Terminal: escalated to a human.
    Escalated,
    /// Terminal: failed.
    Failed,
}

impl ResolutionStatus {
    /// Returns true for the three terminal statuses.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Escalated | Self::Failed)
    }
}

/// The canonical normalized exception (spec §3).
///
/// # Invariants
/// - `tenant_id` never changes after creation.
/// - `exception_type`, once set, must exist in the tenant's resolved domain
///   pack (validated by Intake/Triage, not enforced by this type).
/// - `severity`, once set by Triage, may only be modified by Policy via an
///   explicit override rule.
/// - `current_step` is `None` iff `current_playbook_id` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionRecord {
    /// Stable identifier; generated if absent on intake.
    pub exception_id: ExceptionId,
    /// Owning tenant; required, non-empty, immutable after creation.
    pub tenant_id: TenantId,
    /// Upstream system the exception originated from.
    pub source_system: SourceSystem,
    /// Classification; `None` until Triage runs.
    pub exception_type: Option<ExceptionType>,
    /// Severity; `None` until Triage runs.
    pub severity: Option<Severity>,
    /// Lifecycle status.
    pub resolution_status: ResolutionStatus,
    /// Opaque mapping from source fields to values.
    pub raw_payload: Value,
    /// Mapping with at least `pipelineId` and `normalizedAt`.
    pub normalized_context: Value,
    /// Currently assigned playbook, if any.
    pub current_playbook_id: Option<PlaybookId>,
    /// 1-indexed current step within the assigned playbook.
    pub current_step: Option<u32>,
    /// Event-time timestamp (UTC), as reported or defaulted by Intake.
    pub timestamp: Timestamp,
    /// Repository-managed creation time.
    pub created_at: Timestamp,
    /// Repository-managed last-update time.
    pub updated_at: Timestamp,
}

impl ExceptionRecord {
    /// Returns true when `current_playbook_id` and `current_step` are both
    /// set or both unset, the invariant spec §3 requires.
    #[must_use]
    pub const fn playbook_assignment_is_consistent(&self) -> bool {
        self.current_playbook_id.is_some() == self.current_step.is_some()
    }
}

// ============================================================================
// SECTION: Event
// ============================================================================

/// Who performed an action that produced an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActorType {
    /// The system itself (e.g. the orchestrator).
    System,
    /// An agent stage (intake, triage, policy, resolution, feedback).
    Agent,
    /// A human user (e.g. an approval decision).
    User,
}

/// Append-only, immutable event (spec §3).
///
/// # Invariants
/// - No update or delete is exposed anywhere in this workspace.
/// - Insertion is idempotent on `(tenant_id, event_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier, unique across the owning tenant.
    pub event_id: EventId,
    /// The exception this event concerns.
    pub exception_id: ExceptionId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Event type (e.g. `PolicyEvaluated`, `agent_event`).
    pub event_type: String,
    /// Who performed the action.
    pub actor_type: ActorType,
    /// Identifier of the specific actor, when known.
    pub actor_id: Option<ActorId>,
    /// Event-specific payload.
    pub payload: Value,
    /// Creation time; events are read back in this order.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Evidence
// ============================================================================

/// The kind of an [`EvidenceItem`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvidenceKind {
    /// Retrieval-augmented-generation similarity evidence.
    Rag,
    /// Evidence produced by a tool invocation.
    Tool,
    /// Evidence derived from policy evaluation.
    Policy,
    /// Evidence entered manually (e.g. by a human approver).
    Manual,
}

/// A typed reason used in a decision (spec §3).
///
/// # Invariants
/// - `similarity_score`, when present, is only meaningful for
///   [`EvidenceKind::Rag`] and lies in `[0, 1]`.
/// - Created once during an agent stage; never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Unique identifier.
    pub id: EvidenceId,
    /// The kind of evidence.
    pub kind: EvidenceKind,
    /// Identifier of the evidence's source (a tool name, rule id, etc.).
    pub source_id: String,
    /// Human-readable description.
    pub description: String,
    /// Similarity score in `[0, 1]`; only meaningful for [`EvidenceKind::Rag`].
    pub similarity_score: Option<f64>,
    /// Optional pointer to a larger payload stored elsewhere.
    pub payload_ref: Option<String>,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The exception this evidence concerns.
    pub exception_id: ExceptionId,
    /// Free-form metadata.
    pub metadata: Value,
}

/// How an [`EvidenceItem`] relates to the decision it is linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvidenceInfluence {
    /// The evidence supports the decision.
    Support,
    /// The evidence contradicts the decision.
    Contradict,
    /// The evidence is contextual background, neither support nor contradiction.
    Contextual,
}

/// An edge from an [`EvidenceItem`] to the decision it informed (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceLink {
    /// Unique identifier.
    pub id: EvidenceLinkId,
    /// The exception this link concerns.
    pub exception_id: ExceptionId,
    /// The agent that recorded this link.
    pub agent_name: AgentName,
    /// The stage at which this link was recorded.
    pub stage_name: StageName,
    /// The linked evidence item.
    pub evidence_id: EvidenceId,
    /// How the evidence relates to the decision.
    pub influence: EvidenceInfluence,
}

// ============================================================================
// SECTION: Agent Decision
// ============================================================================

/// The structured result of one agent stage (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDecision {
    /// A short label (e.g. `"Normalized as SETTLEMENT_FAIL"`).
    pub decision: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Ordered evidence, as free text and/or evidence ids.
    pub evidence: Vec<String>,
    /// Advisory hint for the next stage (e.g. `"ProceedToTriage"`).
    pub next_step: String,
}

// ============================================================================
// SECTION: Domain Pack / Tenant Policy Pack
// ============================================================================

/// One named exception-type entry in a [`DomainPack`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionTypeDef {
    /// Human-readable description.
    pub description: String,
    /// Detection rules used by Triage when inferring a type from payload fields.
    #[serde(default)]
    pub detection_rules: Vec<String>,
}

/// One ordered severity rule: an unparsed condition plus the severity it
/// assigns when the condition holds. Parsed once at pack-load time into an
/// AST by `xgate-condlang` (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityRuleDef {
    /// The mini-DSL condition text.
    pub condition: String,
    /// The severity to assign when `condition` matches.
    pub severity: Severity,
}

/// One playbook step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookStepDef {
    /// 1-based, contiguous ordering within the playbook.
    pub step_order: u32,
    /// The tool or action name this step invokes.
    pub action: String,
    /// Arguments passed to the tool, opaque to the core.
    #[serde(default)]
    pub parameters: Value,
}

/// Condition predicates the Playbook Matcher evaluates against a candidate
/// exception (spec §4.9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybookConditions {
    /// Case-insensitive equality against the domain name.
    #[serde(default)]
    pub domain: Option<String>,
    /// Case-insensitive substring match against the exception type.
    #[serde(default)]
    pub exception_type: Option<String>,
    /// Exact severity match.
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Match against any of these severities.
    #[serde(default)]
    pub severity_in: Vec<Severity>,
    /// Filter-only: caller's remaining SLA minutes must be less than this.
    #[serde(default)]
    pub sla_minutes_remaining_lt: Option<f64>,
    /// Subset match against provided policy tags.
    #[serde(default)]
    pub policy_tags: Vec<String>,
    /// Selection priority; higher wins among passing candidates. Default 0.
    #[serde(default)]
    pub priority: i64,
}

/// One playbook definition within a [`DomainPack`] or
/// [`TenantPolicyPack::custom_playbooks`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookDef {
    /// Stable identifier.
    pub playbook_id: PlaybookId,
    /// The exception type this playbook remediates.
    pub exception_type: String,
    /// Ordered steps (ASC by `step_order`, contiguous 1-based).
    pub steps: Vec<PlaybookStepDef>,
    /// Predicates the Playbook Matcher evaluates before selecting this playbook.
    #[serde(default)]
    pub conditions: PlaybookConditions,
    /// Creation time, used as the matcher's tiebreaker sort key.
    pub created_at: Timestamp,
}

/// Guardrail configuration governing approval and blocking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Guardrails {
    /// Exception types / sources explicitly allowed.
    #[serde(default)]
    pub allow_lists: Vec<String>,
    /// Exception types / sources explicitly blocked.
    #[serde(default)]
    pub block_lists: Vec<String>,
    /// Confidence threshold below which human approval is required.
    #[serde(default = "default_approval_threshold")]
    pub human_approval_threshold: f64,
}

fn default_approval_threshold() -> f64 {
    0.7
}

/// Per-tenant-and-domain configuration, loaded and read-only at runtime
/// (spec §3). Owned by the Domain/Policy Resolver's cache, shared read-only
/// across concurrent pipelines for that tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainPack {
    /// The domain this pack configures (e.g. `"finance"`).
    pub domain_name: DomainName,
    /// Exception type catalog.
    pub exception_types: BTreeMap<String, ExceptionTypeDef>,
    /// Ordered severity rules, evaluated in order; highest matching severity wins.
    pub severity_rules: Vec<SeverityRuleDef>,
    /// Candidate playbooks for this domain.
    pub playbooks: Vec<PlaybookDef>,
    /// Domain-level guardrails, overridable per tenant.
    pub guardrails: Guardrails,
}

/// One severity override rule for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityOverrideDef {
    /// The exception type this override applies to.
    pub exception_type: String,
    /// The severity to assign, overriding the domain pack's rules.
    pub severity: Severity,
}

/// One human-approval rule for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanApprovalRuleDef {
    /// The severity this rule matches.
    pub severity: Severity,
    /// Whether approval is required when this rule matches.
    pub require_approval: bool,
}

/// Per-tenant overlay on top of a [`DomainPack`] (spec §3). Precedence:
/// tenant overrides domain for severity rules and guardrails; unions apply
/// for custom playbooks and severity overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPolicyPack {
    /// The owning tenant.
    pub tenant_id: TenantId,
    /// The domain this overlay applies to.
    pub domain_name: DomainName,
    /// Severity overrides, unioned with the domain pack's rules.
    #[serde(default)]
    pub custom_severity_overrides: Vec<SeverityOverrideDef>,
    /// Additional playbooks, unioned with the domain pack's playbooks.
    #[serde(default)]
    pub custom_playbooks: Vec<PlaybookDef>,
    /// Human-approval rules, keyed by severity.
    #[serde(default)]
    pub human_approval_rules: Vec<HumanApprovalRuleDef>,
    /// Guardrail overrides, replacing the domain pack's guardrails when present.
    #[serde(default)]
    pub custom_guardrails: Option<Guardrails>,
    /// Playbook identifiers approved for automatic execution.
    #[serde(default)]
    pub approved_business_processes: Vec<PlaybookId>,
}

// ============================================================================
// SECTION: SLO Target
// ============================================================================

/// Per-tenant-and-domain service-level objective targets (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloTarget {
    /// Target p95 tool-call latency, in milliseconds.
    pub target_latency_ms_p95: f64,
    /// Target error rate, in `[0, 1]`.
    pub target_error_rate: f64,
    /// Target mean time to resolution, in minutes.
    pub target_mttr_minutes: f64,
    /// Target fraction of exceptions auto-resolved without human intervention.
    pub target_auto_resolution_rate: f64,
    /// Optional target throughput, in exceptions per second.
    #[serde(default)]
    pub target_throughput_eps: Option<f64>,
    /// The rolling window, in minutes, these targets are measured over.
    pub window_minutes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_matches_fixed_priority() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_round_trips_from_str() {
        assert_eq!("critical".parse::<Severity>(), Ok(Severity::Critical));
        assert_eq!("CRITICAL".parse::<Severity>(), Ok(Severity::Critical));
    }

    #[test]
    fn terminal_statuses_are_exactly_three() {
        assert!(ResolutionStatus::Resolved.is_terminal());
        assert!(ResolutionStatus::Escalated.is_terminal());
        assert!(ResolutionStatus::Failed.is_terminal());
        assert!(!ResolutionStatus::Open.is_terminal());
        assert!(!ResolutionStatus::PendingApproval.is_terminal());
        assert!(!ResolutionStatus::InProgress.is_terminal());
    }
}
