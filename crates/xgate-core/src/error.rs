// crates/xgate-core/src/error.rs
// ============================================================================
// Module: Error Taxonomy
// Description: The stable error kinds shared by every component (spec §7).
// Purpose: Give every component error type one common kind to map into, so
//          the orchestrator can build stage-error records uniformly.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Components define their own `thiserror` error enums for their own
//! operations (e.g. `xgate_store::StoreError`), but every one of those
//! enums exposes an `ExceptionKind` via `From`/`kind()` so the orchestrator
//! can build a stage-error record without matching on every concrete error
//! type in the workspace.

use thiserror::Error;

/// Stable error kinds from spec §7. Kinds, not type names: many concrete
/// error types across the workspace map down to the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// Malformed input or missing required tenant; exception is not enrolled.
    ValidationFailed,
    /// Triage could not determine the exception type.
    ClassificationFailed,
    /// Policy decision: playbook exists but is not in the tenant's approved set.
    PlaybookNotApproved,
    /// A stage exceeded its configured time budget.
    Timeout,
    /// An external tool call returned a non-success result.
    ToolFailure,
    /// Duplicate event with the same id was rejected (non-idempotent path).
    IdempotencyViolation,
    /// A cross-tenant access attempt was rejected or returned as absent.
    TenantIsolationViolation,
    /// A domain or tenant policy pack was unavailable.
    ConfigUnavailable,
    /// Any unhandled condition; always logged, exception marked FAILED.
    InternalError,
}

impl ExceptionKind {
    /// Returns the stable, machine-readable name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::ClassificationFailed => "CLASSIFICATION_FAILED",
            Self::PlaybookNotApproved => "PLAYBOOK_NOT_APPROVED",
            Self::Timeout => "TIMEOUT",
            Self::ToolFailure => "TOOL_FAILURE",
            Self::IdempotencyViolation => "IDEMPOTENCY_VIOLATION",
            Self::TenantIsolationViolation => "TENANT_ISOLATION_VIOLATION",
            Self::ConfigUnavailable => "CONFIG_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Maps this kind to the HTTP status the out-of-scope HTTP surface
    /// would use (spec §6), for collaborators that need the mapping
    /// without depending on an HTTP crate here.
    #[must_use]
    pub const fn http_status_hint(self) -> u16 {
        match self {
            Self::ValidationFailed => 400,
            Self::TenantIsolationViolation => 403,
            Self::ClassificationFailed
            | Self::PlaybookNotApproved
            | Self::ToolFailure
            | Self::ConfigUnavailable
            | Self::InternalError => 500,
            Self::IdempotencyViolation => 409,
            Self::Timeout => 504,
        }
    }
}

impl std::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error produced by orchestrator-adjacent code that needs to
/// carry an [`ExceptionKind`] plus a human-readable message without owning
/// a dedicated error enum.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct OrchestratorError {
    /// The stable kind this error maps to.
    pub kind: ExceptionKind,
    /// A human-readable message for logs and audit entries.
    pub message: String,
}

impl OrchestratorError {
    /// Builds an error of the given kind with a message.
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(ExceptionKind::ValidationFailed.as_str(), "VALIDATION_FAILED");
        assert_eq!(ExceptionKind::Timeout.http_status_hint(), 504);
        assert_eq!(ExceptionKind::TenantIsolationViolation.http_status_hint(), 403);
    }
}
