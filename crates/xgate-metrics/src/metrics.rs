// crates/xgate-metrics/src/metrics.rs
// ============================================================================
// Module: Metrics Collector
// Description: Per-tenant counters and bounded-sample histograms for
//              exceptions, playbook executions, tool calls, and approvals
//              (§4.5).
// Purpose: A single write side every agent stage and the Orchestrator can
//          call into without knowing how metrics are persisted or queried.
// Dependencies: xgate-core, serde_json, thiserror, tracing
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use xgate_core::ExceptionId;
use xgate_core::ExceptionType;
use xgate_core::PlaybookId;
use xgate_core::Severity;
use xgate_core::TenantId;

/// Upper bound on how many raw samples a latency/duration buffer retains.
/// Older samples are evicted first-in, first-out once this is reached.
const SAMPLE_BUFFER_CAPACITY: usize = 10_000;

/// Upper bounds (exclusive on the low end, inclusive on the high end) of
/// the four confidence buckets: `[0, 0.25)`, `[0.25, 0.5)`, `[0.5, 0.75)`,
/// `[0.75, 1.0]`.
const CONFIDENCE_BUCKET_BOUNDS: [f64; 3] = [0.25, 0.5, 0.75];

/// Errors returned by [`MetricsCollector`] implementations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The metrics snapshot could not be persisted or loaded.
    #[error("metrics io error: {0}")]
    Io(String),
    /// The metrics snapshot file was not valid JSON.
    #[error("metrics snapshot corrupt: {0}")]
    Corrupt(String),
    /// No metrics have been recorded for the requested tenant.
    #[error("no metrics recorded for tenant")]
    TenantNotFound,
}

impl From<std::io::Error> for MetricsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// The outcome of one playbook execution, as recorded by
/// [`MetricsCollector::record_playbook_execution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaybookOutcome {
    /// The playbook completed and the exception resolved without a human.
    AutoResolved,
    /// The playbook completed after a human approval step.
    HumanResolved,
    /// The playbook failed partway through.
    Failed,
    /// The exception was escalated instead of completing the playbook.
    Escalated,
}

impl PlaybookOutcome {
    /// Returns true for the two outcomes that count as a resolution for
    /// the purposes of MTTR.
    #[must_use]
    pub const fn is_resolution(self) -> bool {
        matches!(self, Self::AutoResolved | Self::HumanResolved)
    }
}

/// The outcome of one human approval decision, as recorded by
/// [`MetricsCollector::record_approval_outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalOutcome {
    /// The human approved the pending action.
    Approved,
    /// The human rejected the pending action.
    Rejected,
    /// No decision arrived before the approval window elapsed.
    TimedOut,
}

/// Approval queue outcome counters (SPEC_FULL §11).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ApprovalOutcomeCounters {
    /// Approvals granted.
    pub approved: u64,
    /// Approvals rejected.
    pub rejected: u64,
    /// Approvals that timed out with no decision.
    pub timed_out: u64,
}

impl ApprovalOutcomeCounters {
    fn record(&mut self, outcome: ApprovalOutcome) {
        match outcome {
            ApprovalOutcome::Approved => self.approved += 1,
            ApprovalOutcome::Rejected => self.rejected += 1,
            ApprovalOutcome::TimedOut => self.timed_out += 1,
        }
    }
}

/// Execution statistics for one playbook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybookStats {
    /// Total executions observed.
    pub executions: u64,
    /// Executions that resolved the exception (auto or human).
    pub resolutions: u64,
    /// Executions that failed.
    pub failures: u64,
    /// Executions that ended in escalation.
    pub escalations: u64,
    /// Bounded sample of execution durations, in milliseconds.
    pub duration_samples_ms: VecDeque<u64>,
}

impl PlaybookStats {
    fn record(&mut self, outcome: PlaybookOutcome, duration_ms: u64) {
        self.executions += 1;
        match outcome {
            PlaybookOutcome::AutoResolved | PlaybookOutcome::HumanResolved => self.resolutions += 1,
            PlaybookOutcome::Failed => self.failures += 1,
            PlaybookOutcome::Escalated => self.escalations += 1,
        }
        push_bounded(&mut self.duration_samples_ms, duration_ms);
    }
}

/// Invocation statistics for one tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolStats {
    /// Total invocations observed.
    pub invocations: u64,
    /// Invocations that succeeded.
    pub successes: u64,
    /// Invocations that failed.
    pub failures: u64,
    /// Bounded sample of invocation latencies, in milliseconds.
    pub latency_samples_ms: VecDeque<u64>,
}

impl ToolStats {
    fn record(&mut self, success: bool, latency_ms: u64) {
        self.invocations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        push_bounded(&mut self.latency_samples_ms, latency_ms);
    }

    /// Fraction of invocations that failed, or `0.0` with no observations.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.failures as f64 / self.invocations as f64
        }
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, value: T) {
    if buffer.len() >= SAMPLE_BUFFER_CAPACITY {
        buffer.pop_front();
    }
    buffer.push_back(value);
}

/// Returns the confidence-bucket index (0-3) for a confidence in `[0, 1]`,
/// clamping out-of-range inputs to the nearest bucket (SPEC_FULL §11).
#[must_use]
pub fn confidence_bucket(confidence: f64) -> usize {
    let clamped = confidence.clamp(0.0, 1.0);
    CONFIDENCE_BUCKET_BOUNDS.iter().position(|&bound| clamped < bound).unwrap_or(CONFIDENCE_BUCKET_BOUNDS.len())
}

/// One tenant's accumulated metrics, as returned by
/// [`MetricsCollector::get_metrics`] and persisted by
/// [`MetricsCollector::persist`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantMetricsSnapshot {
    /// Exception counts, keyed by exception type then severity.
    pub exception_counts: BTreeMap<ExceptionType, BTreeMap<Severity, u64>>,
    /// Recurrence count per exception type, across all severities.
    pub exception_type_recurrence: BTreeMap<ExceptionType, u64>,
    /// Four-bucket confidence distribution histogram (SPEC_FULL §11).
    pub confidence_histogram: [u64; 4],
    /// Per-playbook execution statistics.
    pub playbook_stats: BTreeMap<PlaybookId, PlaybookStats>,
    /// Per-tool invocation statistics.
    pub tool_stats: BTreeMap<String, ToolStats>,
    /// Bounded sample of end-to-end resolution durations, in milliseconds,
    /// across every resolving playbook execution. Feeds MTTR.
    pub resolution_duration_samples_ms: VecDeque<u64>,
    /// Total resolutions that required no human approval.
    pub auto_resolutions: u64,
    /// Total resolutions that required a human approval.
    pub human_resolutions: u64,
    /// Current approval queue depth, as of the last
    /// [`MetricsCollector::update_approval_queue`] call.
    pub approval_queue_depth: u64,
    /// Approval/rejection/timeout counters (SPEC_FULL §11).
    pub approval_outcomes: ApprovalOutcomeCounters,
    /// Total explanations generated.
    pub explanations_generated: u64,
    /// Explanations generated per exception id (spec §4.5: "per-exception count").
    pub explanations_per_exception: BTreeMap<ExceptionId, u64>,
    /// Bounded sample of explanation-generation latencies, in milliseconds.
    pub explanation_latency_samples_ms: VecDeque<u64>,
    /// Bounded sample of explanation quality scores, in `[0, 1]` (spec §4.13a).
    pub explanation_quality_samples: VecDeque<f64>,
}

impl TenantMetricsSnapshot {
    /// Returns the fraction of resolutions that completed without a human
    /// approval step, or `0.0` with no observations.
    #[must_use]
    pub fn auto_resolution_rate(&self) -> f64 {
        let total = self.auto_resolutions + self.human_resolutions;
        if total == 0 {
            0.0
        } else {
            self.auto_resolutions as f64 / total as f64
        }
    }

    /// Returns the mean resolution duration, in minutes, or `0.0` with no
    /// observations.
    #[must_use]
    pub fn mttr_minutes(&self) -> f64 {
        if self.resolution_duration_samples_ms.is_empty() {
            return 0.0;
        }
        let total_ms: u64 = self.resolution_duration_samples_ms.iter().sum();
        let mean_ms = total_ms as f64 / self.resolution_duration_samples_ms.len() as f64;
        mean_ms / 60_000.0
    }

    /// Returns the aggregate tool error rate across every tool, or `0.0`
    /// with no observations.
    #[must_use]
    pub fn aggregate_tool_error_rate(&self) -> f64 {
        let (invocations, failures) = self
            .tool_stats
            .values()
            .fold((0u64, 0u64), |(inv, fail), stats| (inv + stats.invocations, fail + stats.failures));
        if invocations == 0 {
            0.0
        } else {
            failures as f64 / invocations as f64
        }
    }

    /// Returns the p-th percentile (`0.0..=1.0`) of every tool's latency
    /// samples combined, in milliseconds, or `0.0` with no observations.
    #[must_use]
    pub fn aggregate_latency_percentile_ms(&self, percentile: f64) -> f64 {
        let mut samples: Vec<u64> =
            self.tool_stats.values().flat_map(|stats| stats.latency_samples_ms.iter().copied()).collect();
        percentile_of(&mut samples, percentile)
    }
}

/// Returns the `percentile` (`0.0..=1.0`) of `samples`, sorting them in
/// place. Returns `0.0` for an empty slice.
#[must_use]
pub fn percentile_of(samples: &mut [u64], percentile: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.sort_unstable();
    let rank = (percentile.clamp(0.0, 1.0) * (samples.len() - 1) as f64).round();
    let index = rank as usize;
    samples.get(index.min(samples.len() - 1)).copied().unwrap_or(0) as f64
}

/// Per-tenant counters and histograms for exceptions, playbook executions,
/// tool calls, and approvals (spec §4.5).
pub trait MetricsCollector: Send + Sync {
    /// Records a newly classified exception: its type, severity, and the
    /// confidence the classifying agent reported.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] only for persistence-backed implementations.
    fn record_exception(
        &self,
        tenant_id: &TenantId,
        exception_type: &ExceptionType,
        severity: Severity,
        confidence: f64,
    ) -> Result<(), MetricsError>;

    /// Records one playbook execution's outcome and duration.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] only for persistence-backed implementations.
    fn record_playbook_execution(
        &self,
        tenant_id: &TenantId,
        playbook_id: &PlaybookId,
        outcome: PlaybookOutcome,
        duration_ms: u64,
    ) -> Result<(), MetricsError>;

    /// Records one tool invocation's success/failure and latency.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] only for persistence-backed implementations.
    fn record_tool_invocation(
        &self,
        tenant_id: &TenantId,
        tool_name: &str,
        success: bool,
        latency_ms: u64,
    ) -> Result<(), MetricsError>;

    /// Records the current approval queue depth for a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] only for persistence-backed implementations.
    fn update_approval_queue(&self, tenant_id: &TenantId, depth: u64) -> Result<(), MetricsError>;

    /// Records one human approval decision's outcome.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] only for persistence-backed implementations.
    fn record_approval_outcome(&self, tenant_id: &TenantId, outcome: ApprovalOutcome) -> Result<(), MetricsError>;

    /// Records that an explanation was generated for `exception_id`, with
    /// the generation latency and the rendered explanation's quality score
    /// (spec §4.5: "generated count, per-exception count, latency samples,
    /// quality samples").
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] only for persistence-backed implementations.
    fn record_explanation_generated(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
        latency_ms: u64,
        quality_score: f64,
    ) -> Result<(), MetricsError>;

    /// Returns a snapshot of one tenant's accumulated metrics.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::TenantNotFound`] when nothing has been
    /// recorded for `tenant_id` yet.
    fn get_metrics(&self, tenant_id: &TenantId) -> Result<TenantMetricsSnapshot, MetricsError>;

    /// Returns a snapshot of every tenant's accumulated metrics.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] only for persistence-backed implementations.
    fn get_all_metrics(&self) -> Result<BTreeMap<TenantId, TenantMetricsSnapshot>, MetricsError>;

    /// Writes every tenant's current metrics to `path` as one JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Io`] when `path` cannot be written.
    fn persist(&self, path: &Path) -> Result<(), MetricsError>;

    /// Replaces in-memory state with the metrics stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Io`] when `path` cannot be read, and
    /// [`MetricsError::Corrupt`] when its contents are not a valid
    /// snapshot document.
    fn load(&self, path: &Path) -> Result<(), MetricsError>;

    /// Clears all accumulated metrics for one tenant.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] only for persistence-backed implementations.
    fn reset(&self, tenant_id: &TenantId) -> Result<(), MetricsError>;
}

/// In-process [`MetricsCollector`], guarded by a single mutex. Adequate for
/// one orchestrator process; a multi-process deployment would persist
/// through [`MetricsCollector::persist`] on a schedule and aggregate
/// out-of-process.
#[derive(Default)]
pub struct InMemoryMetricsCollector {
    tenants: Mutex<BTreeMap<TenantId, TenantMetricsSnapshot>>,
}

impl InMemoryMetricsCollector {
    /// Builds an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tenant<F, T>(&self, tenant_id: &TenantId, f: F) -> T
    where
        F: FnOnce(&mut TenantMetricsSnapshot) -> T,
    {
        let mut tenants = self.tenants.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = tenants.entry(tenant_id.clone()).or_default();
        f(entry)
    }
}

impl MetricsCollector for InMemoryMetricsCollector {
    fn record_exception(
        &self,
        tenant_id: &TenantId,
        exception_type: &ExceptionType,
        severity: Severity,
        confidence: f64,
    ) -> Result<(), MetricsError> {
        self.with_tenant(tenant_id, |metrics| {
            *metrics.exception_counts.entry(exception_type.clone()).or_default().entry(severity).or_insert(0) += 1;
            *metrics.exception_type_recurrence.entry(exception_type.clone()).or_insert(0) += 1;
            metrics.confidence_histogram[confidence_bucket(confidence)] += 1;
        });
        Ok(())
    }

    fn record_playbook_execution(
        &self,
        tenant_id: &TenantId,
        playbook_id: &PlaybookId,
        outcome: PlaybookOutcome,
        duration_ms: u64,
    ) -> Result<(), MetricsError> {
        self.with_tenant(tenant_id, |metrics| {
            metrics.playbook_stats.entry(playbook_id.clone()).or_default().record(outcome, duration_ms);
            if outcome.is_resolution() {
                push_bounded(&mut metrics.resolution_duration_samples_ms, duration_ms);
                match outcome {
                    PlaybookOutcome::AutoResolved => metrics.auto_resolutions += 1,
                    PlaybookOutcome::HumanResolved => metrics.human_resolutions += 1,
                    PlaybookOutcome::Failed | PlaybookOutcome::Escalated => {}
                }
            }
        });
        Ok(())
    }

    fn record_tool_invocation(
        &self,
        tenant_id: &TenantId,
        tool_name: &str,
        success: bool,
        latency_ms: u64,
    ) -> Result<(), MetricsError> {
        self.with_tenant(tenant_id, |metrics| {
            metrics.tool_stats.entry(tool_name.to_string()).or_default().record(success, latency_ms);
        });
        Ok(())
    }

    fn update_approval_queue(&self, tenant_id: &TenantId, depth: u64) -> Result<(), MetricsError> {
        self.with_tenant(tenant_id, |metrics| metrics.approval_queue_depth = depth);
        Ok(())
    }

    fn record_approval_outcome(&self, tenant_id: &TenantId, outcome: ApprovalOutcome) -> Result<(), MetricsError> {
        self.with_tenant(tenant_id, |metrics| metrics.approval_outcomes.record(outcome));
        Ok(())
    }

    fn record_explanation_generated(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
        latency_ms: u64,
        quality_score: f64,
    ) -> Result<(), MetricsError> {
        self.with_tenant(tenant_id, |metrics| {
            metrics.explanations_generated += 1;
            *metrics.explanations_per_exception.entry(exception_id.clone()).or_insert(0) += 1;
            push_bounded(&mut metrics.explanation_latency_samples_ms, latency_ms);
            push_bounded(&mut metrics.explanation_quality_samples, quality_score);
        });
        Ok(())
    }

    fn get_metrics(&self, tenant_id: &TenantId) -> Result<TenantMetricsSnapshot, MetricsError> {
        let tenants = self.tenants.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        tenants.get(tenant_id).cloned().ok_or(MetricsError::TenantNotFound)
    }

    fn get_all_metrics(&self) -> Result<BTreeMap<TenantId, TenantMetricsSnapshot>, MetricsError> {
        let tenants = self.tenants.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(tenants.clone())
    }

    fn persist(&self, path: &Path) -> Result<(), MetricsError> {
        let tenants = self.tenants.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let json = serde_json::to_string_pretty(&*tenants).map_err(|err| MetricsError::Corrupt(err.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<(), MetricsError> {
        let contents = std::fs::read_to_string(path)?;
        let loaded: BTreeMap<TenantId, TenantMetricsSnapshot> =
            serde_json::from_str(&contents).map_err(|err| MetricsError::Corrupt(err.to_string()))?;
        let mut tenants = self.tenants.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *tenants = loaded;
        Ok(())
    }

    fn reset(&self, tenant_id: &TenantId) -> Result<(), MetricsError> {
        let mut tenants = self.tenants.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        tenants.remove(tenant_id);
        Ok(())
    }
}
