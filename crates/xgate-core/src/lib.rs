// crates/xgate-core/src/lib.rs
// ============================================================================
// Module: Exception Orchestrator Core
// Description: Shared identifiers, data model, and error taxonomy for the
//              exception orchestration control plane.
// Purpose: Give every other crate in the workspace one canonical vocabulary.
// Dependencies: serde, serde_json, serde_jcs, sha2, thiserror, time, uuid
// ============================================================================

//! ## Overview
//! `xgate-core` is the leaf crate of the workspace: identifiers, the
//! canonical data model (Exception Record, Event, Evidence Item/Link, Agent
//! Decision, Domain Pack, Tenant Policy Pack, SLO Target), and the shared
//! error taxonomy that every other crate's trait errors map into. Nothing
//! here performs I/O.

#![forbid(unsafe_code)]

pub mod error;
pub mod hashing;
pub mod identifiers;
pub mod model;
pub mod pipeline;
pub mod time;

pub use error::ExceptionKind;
pub use error::OrchestratorError;
pub use identifiers::ActorId;
pub use identifiers::AgentName;
pub use identifiers::DomainName;
pub use identifiers::EventId;
pub use identifiers::EvidenceId;
pub use identifiers::EvidenceLinkId;
pub use identifiers::ExceptionId;
pub use identifiers::ExceptionType;
pub use identifiers::PlaybookId;
pub use identifiers::RunId;
pub use identifiers::SourceSystem;
pub use identifiers::StageName;
pub use identifiers::TenantId;
pub use model::ActorType;
pub use model::AgentDecision;
pub use model::DomainPack;
pub use model::EvidenceInfluence;
pub use model::EvidenceItem;
pub use model::EvidenceKind;
pub use model::EvidenceLink;
pub use model::Event;
pub use model::ExceptionRecord;
pub use model::ExceptionTypeDef;
pub use model::Guardrails;
pub use model::HumanApprovalRuleDef;
pub use model::PlaybookConditions;
pub use model::PlaybookDef;
pub use model::PlaybookStepDef;
pub use model::ResolutionStatus;
pub use model::Severity;
pub use model::SeverityOverrideDef;
pub use model::SeverityRuleDef;
pub use model::SloTarget;
pub use model::TenantPolicyPack;
pub use pipeline::Actionability;
pub use pipeline::PIPELINE_STAGE_ORDER;
pub use pipeline::PipelineResult;
pub use pipeline::StageOutcome;
