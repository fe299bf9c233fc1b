// crates/xgate-agents/src/error.rs
// ============================================================================
// Module: Agent errors
// Description: Error taxonomy for the Intake/Triage/Policy/Resolution/
//              Feedback agents.
// Dependencies: thiserror, xgate-core
// ============================================================================

use thiserror::Error;
use xgate_core::ExceptionKind;

/// Errors raised by an agent while processing an exception.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Intake could not normalize a raw payload (spec §4.10.1: missing
    /// `tenant_id`).
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    /// Triage could not classify an exception type from the Domain Pack or
    /// the raw payload (spec §4.10.2).
    #[error("classification failed: {0}")]
    ClassificationFailed(String),
    /// Resolution attempted to execute a playbook step that is not
    /// approved for the tenant.
    #[error("playbook not approved: {0}")]
    PlaybookNotApproved(String),
    /// A stage-scoped tool invocation exceeded its allotted time.
    #[error("timeout: {0}")]
    Timeout(String),
    /// A tool-execution collaborator reported a failure.
    #[error("tool failure: {0}")]
    ToolFailure(String),
    /// Policy or resolution configuration could not be resolved.
    #[error("config unavailable: {0}")]
    ConfigUnavailable(String),
    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Maps this error onto the shared exception taxonomy.
    #[must_use]
    pub fn kind(&self) -> ExceptionKind {
        match self {
            Self::ValidationFailed(_) => ExceptionKind::ValidationFailed,
            Self::ClassificationFailed(_) => ExceptionKind::ClassificationFailed,
            Self::PlaybookNotApproved(_) => ExceptionKind::PlaybookNotApproved,
            Self::Timeout(_) => ExceptionKind::Timeout,
            Self::ToolFailure(_) => ExceptionKind::ToolFailure,
            Self::ConfigUnavailable(_) => ExceptionKind::ConfigUnavailable,
            Self::Internal(_) => ExceptionKind::InternalError,
        }
    }
}

impl From<xgate_policy::PolicyError> for AgentError {
    fn from(err: xgate_policy::PolicyError) -> Self {
        Self::ConfigUnavailable(err.to_string())
    }
}

impl From<xgate_evidence::EvidenceError> for AgentError {
    fn from(err: xgate_evidence::EvidenceError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<xgate_audit::AuditError> for AgentError {
    fn from(err: xgate_audit::AuditError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<xgate_metrics::MetricsError> for AgentError {
    fn from(err: xgate_metrics::MetricsError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<xgate_store::StoreError> for AgentError {
    fn from(err: xgate_store::StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}
