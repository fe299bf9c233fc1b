// crates/xgate-store/src/error.rs
// ============================================================================
// Module: Store Errors
// Description: The error enum shared by the Event Log and Exception Store.
// Purpose: Map storage-layer failures onto the shared ExceptionKind taxonomy
//          (spec §7) without leaking rusqlite types into callers.
// Dependencies: thiserror, xgate-core
// ============================================================================

use thiserror::Error;
use xgate_core::ExceptionKind;

/// Errors returned by [`crate::event_log::EventLog`] and
/// [`crate::exception_store::ExceptionStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `append` was called with an `(tenant_id, event_id)` pair that already
    /// exists (spec §4.1, §7 `IDEMPOTENCY_VIOLATION`). `append_if_new`
    /// never returns this; it returns `Ok(false)` instead.
    #[error("event already exists for this tenant: {0}")]
    AlreadyExists(String),
    /// The event's embedded `tenant_id` did not match the `tenant_id` the
    /// caller scoped the call to.
    #[error("event tenant_id does not match the scoping tenant_id")]
    TenantMismatch,
    /// No record exists at the requested key.
    #[error("not found: {0}")]
    NotFound(String),
    /// The underlying `SQLite` connection or disk I/O failed.
    #[error("store io error: {0}")]
    Io(String),
    /// A stored row failed to deserialize; the database is corrupt or was
    /// written by an incompatible schema version.
    #[error("store data corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Maps this error onto the shared error taxonomy (spec §7), used by the
    /// Orchestrator to build stage-error records without matching on every
    /// concrete error type in the workspace.
    #[must_use]
    pub const fn kind(&self) -> ExceptionKind {
        match self {
            Self::AlreadyExists(_) => ExceptionKind::IdempotencyViolation,
            Self::TenantMismatch => ExceptionKind::TenantIsolationViolation,
            Self::NotFound(_) => ExceptionKind::InternalError,
            Self::Io(_) | Self::Corrupt(_) => ExceptionKind::InternalError,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Io(err.to_string())
    }
}
