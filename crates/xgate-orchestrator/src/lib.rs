// crates/xgate-orchestrator/src/lib.rs
// ============================================================================
// Module: Exception Orchestrator
// Description: Drives Exception Records through the fixed agent pipeline,
//              publishes stage-completed events, and writes best-effort
//              snapshots (spec §4.11).
// Purpose: The one place that sequences Intake/Triage/Policy/Resolution/
//          Feedback and decides when a run halts, skips, or retries.
// Dependencies: xgate-agents, xgate-core, xgate-store, xgate-backpressure,
//               tokio
// ============================================================================

//! ## Overview
//! Everything here is orchestration, not agent logic: the agents in
//! `xgate-agents` decide what to do with one exception; this crate decides
//! which agent runs next and what happens when one fails, times out, or
//! reports a non-terminal `next_step`.

#![forbid(unsafe_code)]

pub mod bus;
pub mod hooks;
pub mod orchestrator;
pub mod snapshot;

pub use bus::EventBus;
pub use bus::StageCompletedEvent;
pub use hooks::NoopHooks;
pub use hooks::OrchestratorHooks;
pub use orchestrator::BatchItem;
pub use orchestrator::Orchestrator;
pub use snapshot::FileSnapshotWriter;
pub use snapshot::NoopSnapshotWriter;
pub use snapshot::SnapshotWriter;
