// crates/xgate-metrics/src/lib.rs
// ============================================================================
// Module: Metrics Collector / SLO Engine
// Description: Per-tenant counters and histograms (§4.5), and the SLO
//              computation engine plus runbook advisor built on top of them
//              (§4.12, SPEC_FULL §11).
// Purpose: Give every agent stage, the Orchestrator, and the Audit Logger
//          one place to record outcomes, and give operators one place to
//          ask "are we meeting our targets, and what do we do about it."
// Dependencies: xgate-core, serde_json, thiserror, time, tracing
// ============================================================================

//! ## Overview
//! [`metrics::MetricsCollector`] is the write side: bounded, in-memory
//! per-tenant counters and latency samples, mirroring
//! `decision-gate-mcp::telemetry::McpMetrics`'s counter/latency split but
//! generalized from one MCP request shape to the handful of outcomes this
//! control plane cares about (exceptions, playbook runs, tool calls,
//! approvals, explanations). [`slo::SloEngine`] is the read side: it turns
//! a tenant's accumulated metrics into a [`slo::SloReport`] against a
//! [`xgate_core::SloTarget`], and a [`slo::RunbookAdvisor`] turns a report's
//! breaches into deterministic operator guidance.

#![forbid(unsafe_code)]

pub mod metrics;
pub mod slo;

pub use metrics::ApprovalOutcome;
pub use metrics::ApprovalOutcomeCounters;
pub use metrics::InMemoryMetricsCollector;
pub use metrics::MetricsCollector;
pub use metrics::MetricsError;
pub use metrics::PlaybookOutcome;
pub use metrics::PlaybookStats;
pub use metrics::TenantMetricsSnapshot;
pub use metrics::ToolStats;
pub use slo::DefaultRunbookAdvisor;
pub use slo::RunbookAdvisor;
pub use slo::SloBreach;
pub use slo::SloComputation;
pub use slo::SloEngine;
pub use slo::SloReport;
