// crates/xgate-store/src/lib.rs
// ============================================================================
// Module: Exception Orchestrator Store
// Description: Event Log (§4.1) and Exception Store (§4.2).
// Purpose: Give the rest of the workspace one durable, tenant-isolated
//          substrate for append-only events and current exception state.
// Dependencies: xgate-core, rusqlite, serde, serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! Two append-and-read-mostly stores share one `SQLite` database file and one
//! writer thread (spec §5: "mutating operations take a short critical
//! section and release before any I/O that could block"):
//!
//! - [`event_log::EventLog`]: append-only, idempotent-by-id event rows
//!   (spec §4.1).
//! - [`exception_store::ExceptionStore`]: current Exception Record + last
//!   [`xgate_core::PipelineResult`] per `(tenant_id, exception_id)`
//!   (spec §4.2).
//!
//! [`sqlite::SqliteBackend`] implements both traits on top of a dedicated
//! writer thread (serialized mutations via `mpsc::sync_channel`, generalizing
//! the teacher's single-writer-thread architecture) plus a small round-robin
//! pool of read-only connections so concurrent reads are never blocked behind
//! a writer's critical section.

#![forbid(unsafe_code)]

pub mod error;
pub mod event_log;
pub mod exception_store;
pub mod sqlite;

pub use error::StoreError;
pub use event_log::EventFilter;
pub use event_log::EventLog;
pub use exception_store::ExceptionListFilter;
pub use exception_store::ExceptionPage;
pub use exception_store::ExceptionStore;
pub use sqlite::SqliteBackend;
pub use sqlite::SqliteStoreConfig;
