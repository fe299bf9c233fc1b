// crates/xgate-store/src/exception_store.rs
// ============================================================================
// Module: Exception Store
// Description: Current-state store mapping (tenant_id, exception_id) to
//              (Exception Record, last pipeline result) (§4.2).
// Purpose: One atomic put/get/list surface, tenant-isolated by construction.
// Dependencies: xgate-core, crate::error
// ============================================================================

use xgate_core::ExceptionId;
use xgate_core::ExceptionRecord;
use xgate_core::ExceptionType;
use xgate_core::PipelineResult;
use xgate_core::ResolutionStatus;
use xgate_core::Severity;
use xgate_core::TenantId;
use xgate_core::Timestamp;

use crate::error::StoreError;

/// Filters applied by [`ExceptionStore::list`] (spec §4.2).
#[derive(Debug, Clone, Default)]
pub struct ExceptionListFilter {
    /// Restrict to this exception type, when set.
    pub exception_type: Option<ExceptionType>,
    /// Restrict to this resolution status, when set.
    pub status: Option<ResolutionStatus>,
    /// Restrict to this severity, when set.
    pub severity: Option<Severity>,
    /// Restrict to records created at or after this time, when set.
    pub from: Option<Timestamp>,
    /// Restrict to records created at or before this time, when set.
    pub to: Option<Timestamp>,
}

impl ExceptionListFilter {
    /// Returns true when `record` satisfies every set predicate.
    #[must_use]
    pub fn matches(&self, record: &ExceptionRecord) -> bool {
        if let Some(exception_type) = &self.exception_type
            && record.exception_type.as_ref() != Some(exception_type)
        {
            return false;
        }
        if let Some(status) = self.status
            && record.resolution_status != status
        {
            return false;
        }
        if let Some(severity) = self.severity
            && record.severity != Some(severity)
        {
            return false;
        }
        if let Some(from) = self.from
            && record.created_at < from
        {
            return false;
        }
        if let Some(to) = self.to
            && record.created_at > to
        {
            return false;
        }
        true
    }
}

/// One page of [`ExceptionStore::list`] results, ordered by `created_at`
/// descending (spec §4.2).
#[derive(Debug, Clone)]
pub struct ExceptionPage {
    /// The exception records plus their last pipeline result, this page.
    pub items: Vec<(ExceptionRecord, Option<PipelineResult>)>,
    /// Total number of records matching the filter, across all pages.
    pub total: u64,
}

/// Maps `(tenant_id, exception_id)` to `(Exception Record, last pipeline
/// result)` (spec §4.2). Every operation is scoped by `tenant_id`; a record
/// created under tenant A is invisible to tenant B even if the id is known
/// (spec §4.2, §8 invariant 2).
pub trait ExceptionStore: Send + Sync {
    /// Overwrites the current state for `(tenant_id, record.exception_id)`,
    /// atomically replacing both the record and the last pipeline result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TenantMismatch`] when
    /// `record.tenant_id != tenant_id`, and [`StoreError::Io`] on a storage
    /// failure.
    fn put(
        &self,
        tenant_id: &TenantId,
        record: ExceptionRecord,
        pipeline_result: Option<PipelineResult>,
    ) -> Result<(), StoreError>;

    /// Returns the current state for `(tenant_id, exception_id)`, or `None`
    /// when absent — including when the exception exists under a different
    /// tenant (spec §8 invariant 2).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on a storage failure.
    fn get(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
    ) -> Result<Option<(ExceptionRecord, Option<PipelineResult>)>, StoreError>;

    /// Returns a page of this tenant's exceptions matching `filter`, ordered
    /// by `created_at` descending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on a storage failure.
    fn list(
        &self,
        tenant_id: &TenantId,
        filter: &ExceptionListFilter,
        page: u32,
        page_size: u32,
    ) -> Result<ExceptionPage, StoreError>;
}
