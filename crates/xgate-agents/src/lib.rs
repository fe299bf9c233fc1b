// crates/xgate-agents/src/lib.rs
// ============================================================================
// Crate: xgate-agents
// Description: The Intake, Triage, Policy, Resolution, and Feedback agents
//              that make up one exception's pipeline run (spec §4.10).
// ============================================================================

//! Each agent implements the [`Agent`] capability trait rather than
//! inheriting from a shared base class: stage-specific state lives on the
//! concrete agent struct, and the mutable [`AgentContext`] carried between
//! stages is an explicit parameter, not a global singleton (spec §9).

#![forbid(unsafe_code)]

pub mod agent;
pub mod context;
pub mod error;
pub mod feedback;
pub mod intake;
pub mod policy;
pub mod resolution;
pub mod triage;

pub use agent::Agent;
pub use context::AgentContext;
pub use error::AgentError;
pub use feedback::FeedbackAgent;
pub use intake::IntakeAgent;
pub use policy::Actionability;
pub use policy::PolicyAgent;
pub use resolution::HttpToolExecutor;
pub use resolution::NoopToolExecutor;
pub use resolution::ResolutionAgent;
pub use resolution::ToolExecutor;
pub use triage::NoSimilaritySearch;
pub use triage::SimilarCase;
pub use triage::SimilaritySearch;
pub use triage::TriageAgent;

/// One shared audit-trail handle type, used by every agent so stage structs
/// don't each carry their own `AuditSink` type parameter.
pub type SharedAuditTrail = xgate_audit::AuditTrail<Box<dyn xgate_audit::AuditSink>>;
