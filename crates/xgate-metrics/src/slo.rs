// crates/xgate-metrics/src/slo.rs
// ============================================================================
// Module: SLO Engine
// Description: Computes service-level metrics against a tenant's SLO
//              targets and advises on breaches (§4.12, SPEC_FULL §11).
// Purpose: Turn accumulated Metrics Collector state into a periodic,
//          auditable report an operator (or a runbook) can act on.
// Dependencies: xgate-core, crate::metrics, serde_json, time, tracing
// ============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use xgate_core::SloTarget;
use xgate_core::TenantId;
use xgate_core::Timestamp;

use crate::metrics::MetricsCollector;
use crate::metrics::MetricsError;
use crate::metrics::TenantMetricsSnapshot;

/// Errors returned by [`SloEngine::run`].
#[derive(Debug, Error)]
pub enum SloError {
    /// The underlying metrics collector failed.
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    /// The run log could not be written.
    #[error("slo run log io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SloError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// The computed service-level values for one tenant at one point in time
/// (spec §4.12).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SloComputation {
    /// p95 tool-call latency, in milliseconds.
    pub p95_latency_ms: f64,
    /// Aggregate tool-call error rate, in `[0, 1]`.
    pub error_rate: f64,
    /// Mean time to resolution, in minutes.
    pub mttr_minutes: f64,
    /// Fraction of resolutions completed without human approval.
    pub auto_resolution_rate: f64,
    /// Exceptions processed per second over the target's window.
    pub throughput_eps: f64,
}

impl SloComputation {
    fn from_snapshot(snapshot: &TenantMetricsSnapshot, window_seconds: f64) -> Self {
        let total_exceptions: u64 = snapshot.exception_type_recurrence.values().sum();
        let throughput_eps = if window_seconds > 0.0 { total_exceptions as f64 / window_seconds } else { 0.0 };
        Self {
            p95_latency_ms: snapshot.aggregate_latency_percentile_ms(0.95),
            error_rate: snapshot.aggregate_tool_error_rate(),
            mttr_minutes: snapshot.mttr_minutes(),
            auto_resolution_rate: snapshot.auto_resolution_rate(),
            throughput_eps,
        }
    }
}

/// One target missed, naming the metric, its observed value, and the
/// configured target (spec §4.12).
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum SloBreach {
    /// p95 latency exceeded `target_latency_ms_p95`.
    Latency { observed_ms: f64, target_ms: f64 },
    /// Error rate exceeded `target_error_rate`.
    ErrorRate { observed: f64, target: f64 },
    /// MTTR exceeded `target_mttr_minutes`.
    Mttr { observed_minutes: f64, target_minutes: f64 },
    /// Auto-resolution rate fell below `target_auto_resolution_rate`.
    AutoResolutionRate { observed: f64, target: f64 },
    /// Throughput fell below `target_throughput_eps`, when one is configured.
    Throughput { observed_eps: f64, target_eps: f64 },
}

/// Evaluates `computed` against `target`, returning every breached target
/// in a stable order.
#[must_use]
pub fn evaluate_breaches(computed: &SloComputation, target: &SloTarget) -> Vec<SloBreach> {
    let mut breaches = Vec::new();
    if computed.p95_latency_ms > target.target_latency_ms_p95 {
        breaches.push(SloBreach::Latency {
            observed_ms: computed.p95_latency_ms,
            target_ms: target.target_latency_ms_p95,
        });
    }
    if computed.error_rate > target.target_error_rate {
        breaches.push(SloBreach::ErrorRate { observed: computed.error_rate, target: target.target_error_rate });
    }
    if computed.mttr_minutes > target.target_mttr_minutes {
        breaches.push(SloBreach::Mttr {
            observed_minutes: computed.mttr_minutes,
            target_minutes: target.target_mttr_minutes,
        });
    }
    if computed.auto_resolution_rate < target.target_auto_resolution_rate {
        breaches.push(SloBreach::AutoResolutionRate {
            observed: computed.auto_resolution_rate,
            target: target.target_auto_resolution_rate,
        });
    }
    if let Some(target_eps) = target.target_throughput_eps
        && computed.throughput_eps < target_eps
    {
        breaches.push(SloBreach::Throughput { observed_eps: computed.throughput_eps, target_eps });
    }
    breaches
}

/// One SLO evaluation for one tenant (spec §4.12), including any advice a
/// [`RunbookAdvisor`] produced from its breaches.
#[derive(Debug, Clone, Serialize)]
pub struct SloReport {
    /// The tenant this report concerns.
    pub tenant_id: TenantId,
    /// When this report was computed.
    pub computed_at: Timestamp,
    /// The computed values.
    pub values: SloComputation,
    /// Every target this tenant is currently missing.
    pub breaches: Vec<SloBreach>,
    /// Deterministic operator guidance, one entry per breach.
    pub advisories: Vec<String>,
}

impl SloReport {
    /// Returns true when no target was breached.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.breaches.is_empty()
    }
}

/// Turns a report's breaches into deterministic, human-readable guidance
/// (SPEC_FULL §11). Implementations must be pure functions of the report:
/// same breaches in, same advice out, so a replayed run produces identical
/// audit output.
pub trait RunbookAdvisor: Send + Sync {
    /// Returns one advisory string per breach in `breaches`, in order.
    fn advise(&self, breaches: &[SloBreach]) -> Vec<String>;
}

/// Built-in advisor with one fixed template per [`SloBreach`] variant.
#[derive(Debug, Default)]
pub struct DefaultRunbookAdvisor;

impl RunbookAdvisor for DefaultRunbookAdvisor {
    fn advise(&self, breaches: &[SloBreach]) -> Vec<String> {
        breaches
            .iter()
            .map(|breach| match breach {
                SloBreach::Latency { observed_ms, target_ms } => format!(
                    "p95 tool latency {observed_ms:.0}ms exceeds target {target_ms:.0}ms: inspect the slowest tool's recent invocations and consider raising its per-step timeout or moving it off the hot path."
                ),
                SloBreach::ErrorRate { observed, target } => format!(
                    "tool error rate {observed:.2} exceeds target {target:.2}: check the failing tool's recent error payloads for a common root cause before retrying traffic."
                ),
                SloBreach::Mttr { observed_minutes, target_minutes } => format!(
                    "MTTR {observed_minutes:.1}m exceeds target {target_minutes:.1}m: check for playbooks stuck in PENDING_APPROVAL and confirm the approval queue is being drained."
                ),
                SloBreach::AutoResolutionRate { observed, target } => format!(
                    "auto-resolution rate {observed:.2} is below target {target:.2}: review recent escalations for a playbook or guardrail that is over-triggering human approval."
                ),
                SloBreach::Throughput { observed_eps, target_eps } => format!(
                    "throughput {observed_eps:.2} eps is below target {target_eps:.2} eps: check upstream ingestion for backpressure or a stalled source."
                ),
            })
            .collect()
    }
}

/// Computes [`SloReport`]s from a [`MetricsCollector`] and a
/// [`RunbookAdvisor`], optionally appending every run to a JSONL log (spec
/// §4.12).
pub struct SloEngine {
    metrics: Arc<dyn MetricsCollector>,
    advisor: Arc<dyn RunbookAdvisor>,
    run_log_path: Option<PathBuf>,
}

impl SloEngine {
    /// Builds an engine over `metrics`, advised by `advisor`, with no run
    /// logging.
    #[must_use]
    pub fn new(metrics: Arc<dyn MetricsCollector>, advisor: Arc<dyn RunbookAdvisor>) -> Self {
        Self { metrics, advisor, run_log_path: None }
    }

    /// Appends every [`SloEngine::run`] result to `path` as JSONL.
    #[must_use]
    pub fn with_run_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.run_log_path = Some(path.into());
        self
    }

    /// Computes one report for `tenant_id` against `target`, scored over a
    /// `target.window_minutes`-wide window, and appends it to the run log
    /// when configured.
    ///
    /// # Errors
    ///
    /// Returns [`SloError::Metrics`] when the tenant has no recorded
    /// metrics, and [`SloError::Io`] when the run log cannot be written.
    pub fn run(&self, tenant_id: &TenantId, target: &SloTarget) -> Result<SloReport, SloError> {
        let snapshot = self.metrics.get_metrics(tenant_id)?;
        let window_seconds = f64::from(target.window_minutes) * 60.0;
        let values = SloComputation::from_snapshot(&snapshot, window_seconds);
        let breaches = evaluate_breaches(&values, target);
        let advisories = self.advisor.advise(&breaches);
        let report = SloReport { tenant_id: tenant_id.clone(), computed_at: Timestamp::now_utc(), values, breaches, advisories };

        if !report.is_healthy() {
            tracing::warn!(tenant_id = %tenant_id, breach_count = report.breaches.len(), "slo target breached");
        }
        if let Some(path) = &self.run_log_path {
            append_run_log(path, &report)?;
        }
        Ok(report)
    }
}

fn append_run_log(path: &Path, report: &SloReport) -> Result<(), SloError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(report).map_err(|err| SloError::Io(err.to_string()))?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryMetricsCollector;
    use crate::metrics::PlaybookOutcome;

    fn target() -> SloTarget {
        SloTarget {
            target_latency_ms_p95: 500.0,
            target_error_rate: 0.05,
            target_mttr_minutes: 30.0,
            target_auto_resolution_rate: 0.8,
            target_throughput_eps: Some(1.0),
            window_minutes: 60,
        }
    }

    #[test]
    fn healthy_tenant_reports_no_breaches() {
        let metrics: Arc<dyn MetricsCollector> = Arc::new(InMemoryMetricsCollector::new());
        let tenant_id = TenantId::new("TENANT_A");
        let playbook_id = xgate_core::PlaybookId::new("PB-1");
        for _ in 0..10 {
            metrics
                .record_tool_invocation(&tenant_id, "settlement-retry", true, 20)
                .expect("record tool");
            metrics
                .record_playbook_execution(&tenant_id, &playbook_id, PlaybookOutcome::AutoResolved, 60_000)
                .expect("record playbook");
        }
        for minute in 0..120 {
            let exception_type = xgate_core::ExceptionType::from(format!("TYPE_{minute}").as_str());
            metrics.record_exception(&tenant_id, &exception_type, xgate_core::Severity::Low, 0.9).expect("record");
        }

        let engine = SloEngine::new(Arc::clone(&metrics), Arc::new(DefaultRunbookAdvisor));
        let report = engine.run(&tenant_id, &target()).expect("run");
        assert!(report.is_healthy());
        assert!(report.advisories.is_empty());
    }

    #[test]
    fn breached_tenant_gets_one_advisory_per_breach() {
        let metrics: Arc<dyn MetricsCollector> = Arc::new(InMemoryMetricsCollector::new());
        let tenant_id = TenantId::new("TENANT_B");
        metrics.record_tool_invocation(&tenant_id, "flaky-tool", false, 9_000).expect("record tool");

        let engine = SloEngine::new(Arc::clone(&metrics), Arc::new(DefaultRunbookAdvisor));
        let report = engine.run(&tenant_id, &target()).expect("run");
        assert!(!report.is_healthy());
        assert_eq!(report.breaches.len(), report.advisories.len());
    }

    #[test]
    fn run_log_appends_jsonl() {
        let metrics: Arc<dyn MetricsCollector> = Arc::new(InMemoryMetricsCollector::new());
        let tenant_id = TenantId::new("TENANT_C");
        metrics.update_approval_queue(&tenant_id, 0).expect("seed tenant");

        let dir = tempfile::tempdir().expect("tempdir");
        let log_path = dir.path().join("slo_runs.jsonl");
        let engine = SloEngine::new(Arc::clone(&metrics), Arc::new(DefaultRunbookAdvisor)).with_run_log(&log_path);
        engine.run(&tenant_id, &target()).expect("run");
        engine.run(&tenant_id, &target()).expect("run");

        let contents = std::fs::read_to_string(&log_path).expect("read log");
        assert_eq!(contents.lines().count(), 2);
    }
}
