// crates/xgate-store/src/event_log.rs
// ============================================================================
// Module: Event Log
// Description: The append-only, idempotent-by-id event log trait (§4.1).
// Purpose: Let the Orchestrator and Explanation Service depend on a
//          capability, not a concrete storage backend, per spec §9's
//          "explicit context" mandate.
// Dependencies: xgate-core, crate::error
// ============================================================================

use xgate_core::ActorType;
use xgate_core::Event;
use xgate_core::EventId;
use xgate_core::ExceptionId;
use xgate_core::TenantId;
use xgate_core::Timestamp;

use crate::error::StoreError;

/// Restricts [`EventLog::events_for_exception`] and
/// [`EventLog::events_for_tenant`] reads (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restrict to these event types, when non-empty.
    pub event_types: Vec<String>,
    /// Restrict to this actor type, when set.
    pub actor_type: Option<ActorType>,
    /// Restrict to events created at or after this time, when set.
    pub from: Option<Timestamp>,
    /// Restrict to events created at or before this time, when set.
    pub to: Option<Timestamp>,
}

impl EventFilter {
    /// Returns true when `event` satisfies every set predicate.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if !self.event_types.is_empty() && !self.event_types.iter().any(|t| t == &event.event_type) {
            return false;
        }
        if let Some(actor_type) = self.actor_type
            && actor_type != event.actor_type
        {
            return false;
        }
        if let Some(from) = self.from
            && event.created_at < from
        {
            return false;
        }
        if let Some(to) = self.to
            && event.created_at > to
        {
            return false;
        }
        true
    }
}

/// Append-only per-tenant event store; idempotent by `(tenant_id, event_id)`
/// (spec §4.1). No update or delete is ever exposed.
pub trait EventLog: Send + Sync {
    /// Inserts `event` under `tenant_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when `(tenant_id, event.event_id)`
    /// already exists, and [`StoreError::TenantMismatch`] when
    /// `event.tenant_id != tenant_id`.
    fn append(&self, tenant_id: &TenantId, event: Event) -> Result<(), StoreError>;

    /// Inserts `event` under `tenant_id` unless it already exists.
    ///
    /// Idempotent and safe for replay (spec §5): a re-executed stage that
    /// emits the same event id is a no-op for event-log state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TenantMismatch`] when
    /// `event.tenant_id != tenant_id`. Never returns
    /// [`StoreError::AlreadyExists`].
    fn append_if_new(&self, tenant_id: &TenantId, event: Event) -> Result<bool, StoreError>;

    /// Returns true when `(tenant_id, event_id)` has already been recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on a storage failure.
    fn exists(&self, tenant_id: &TenantId, event_id: EventId) -> Result<bool, StoreError>;

    /// Returns events for one exception, chronological ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on a storage failure.
    fn events_for_exception(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
        filter: &EventFilter,
    ) -> Result<Vec<Event>, StoreError>;

    /// Returns events for one tenant in `[from, to]`, chronological
    /// descending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on a storage failure.
    fn events_for_tenant(
        &self,
        tenant_id: &TenantId,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<Vec<Event>, StoreError>;
}
