// crates/xgate-ingest/src/lib.rs
// ============================================================================
// Module: Streaming Ingestor
// Description: Pulls raw messages from one or more sources, gates them
//              through backpressure, normalizes them via the Intake Agent,
//              and delivers the resulting Exception Records (spec §4.7).
// Purpose: The one component standing between "a message exists somewhere"
//          and "an Exception Record exists in the pipeline."
// Dependencies: xgate-core, xgate-agents, xgate-backpressure, tokio
// ============================================================================

//! ## Overview
//! [`StreamingIngestionService`] registers named [`source::StreamSource`]s in
//! a `BTreeMap<String, Arc<dyn StreamSource>>`, the same registry-and-builder
//! shape `decision-gate-broker::broker::CompositeBroker` uses for its own
//! scheme-keyed sources, generalized from one-shot content resolution to
//! repeated polling. Each polled [`source::Message`] passes through the
//! Backpressure Controller (spec §4.6) before normalization: low-priority
//! messages are dropped outright under sustained pressure, and accepted
//! messages are paced by [`xgate_backpressure::BackpressureController::adaptive_delay`].
//! Normalization always produces an [`xgate_core::ExceptionRecord`] — when
//! the Intake Agent rejects a message (most commonly: no resolvable
//! `tenant_id`), the raw payload is still delivered as a best-effort record
//! rather than silently dropped, so a malformed upstream message is visible
//! downstream instead of vanishing.

#![forbid(unsafe_code)]

pub mod sink;
pub mod source;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use xgate_agents::IntakeAgent;
use xgate_backpressure::BackpressureController;
use xgate_core::ExceptionId;
use xgate_core::ExceptionRecord;
use xgate_core::ResolutionStatus;
use xgate_core::TenantId;
use xgate_core::Timestamp;

pub use sink::CallbackSink;
pub use sink::ChannelSink;
pub use sink::IngestSink;
pub use sink::SinkError;
pub use source::InMemoryStreamSource;
pub use source::KafkaStreamSource;
pub use source::Message;
pub use source::SourceError;
pub use source::StreamSource;

/// How long [`StreamingIngestionService::run_once`] sleeps between checks of
/// [`BackpressureController::should_consume`] while paused.
const OVERLOAD_PAUSE_INTERVAL: Duration = Duration::from_millis(50);
/// Fallback tenant id used only when a message carries no tenant hint and
/// Intake normalization could not recover one either.
const UNKNOWN_TENANT: &str = "UNKNOWN";

/// Errors returned while building or running a [`StreamingIngestionService`].
#[derive(Debug, Error)]
pub enum IngestError {
    /// [`StreamingIngestionServiceBuilder::build`] was called with no sink
    /// configured.
    #[error("ingestion service has no configured delivery sink")]
    MissingSink,
}

/// Outcome counters for one [`StreamingIngestionService::run_once`] cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Messages successfully normalized and delivered.
    pub delivered: u64,
    /// Messages where Intake normalization failed and a raw fallback record
    /// was delivered instead.
    pub normalization_fallbacks: u64,
    /// Messages dropped for exceeding the per-tenant rate limit.
    pub dropped_rate_limited: u64,
    /// Low-priority messages dropped under sustained backpressure.
    pub dropped_low_priority: u64,
    /// Messages that normalized and passed backpressure but the sink
    /// refused to accept.
    pub delivery_failures: u64,
    /// Source polls that returned an error this cycle.
    pub source_errors: u64,
}

/// Builder for [`StreamingIngestionService`], mirroring
/// `decision-gate-broker::broker::CompositeBrokerBuilder`'s registry-and-sink
/// assembly.
#[derive(Default)]
pub struct StreamingIngestionServiceBuilder {
    sources: BTreeMap<String, Arc<dyn StreamSource>>,
    intake: Option<IntakeAgent>,
    sink: Option<Arc<dyn IngestSink>>,
    backpressure: Option<Arc<BackpressureController>>,
}

impl StreamingIngestionServiceBuilder {
    /// Registers `source` under `name`, polled every cycle.
    #[must_use]
    pub fn source(mut self, name: impl Into<String>, source: impl StreamSource + 'static) -> Self {
        self.sources.insert(name.into(), Arc::new(source));
        self
    }

    /// Installs the Intake Agent used to normalize polled messages.
    #[must_use]
    pub fn intake(mut self, intake: IntakeAgent) -> Self {
        self.intake = Some(intake);
        self
    }

    /// Installs the sink normalized records are delivered to.
    #[must_use]
    pub fn sink(mut self, sink: impl IngestSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Installs the Backpressure Controller gating consumption.
    #[must_use]
    pub fn backpressure(mut self, backpressure: Arc<BackpressureController>) -> Self {
        self.backpressure = Some(backpressure);
        self
    }

    /// Builds the service.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MissingSink`] when no sink was configured. A
    /// missing Intake Agent is not an error: every message then falls back
    /// to a raw-payload record.
    pub fn build(self) -> Result<StreamingIngestionService, IngestError> {
        Ok(StreamingIngestionService {
            sources: self.sources,
            intake: self.intake,
            sink: self.sink.ok_or(IngestError::MissingSink)?,
            backpressure: self.backpressure.unwrap_or_else(|| Arc::new(BackpressureController::new(1000, 1000))),
            running: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Pulls messages from every registered source, gates them through
/// backpressure, normalizes them, and delivers them (spec §4.7).
pub struct StreamingIngestionService {
    sources: BTreeMap<String, Arc<dyn StreamSource>>,
    intake: Option<IntakeAgent>,
    sink: Arc<dyn IngestSink>,
    backpressure: Arc<BackpressureController>,
    running: Arc<AtomicBool>,
}

impl StreamingIngestionService {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> StreamingIngestionServiceBuilder {
        StreamingIngestionServiceBuilder::default()
    }

    /// Runs cycles in a loop until [`Self::stop`] is called, sleeping
    /// `poll_interval` between cycles that delivered nothing.
    pub async fn start(self: Arc<Self>, poll_interval: Duration) {
        self.running.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            let report = self.run_once().await;
            if report.delivered == 0 && report.normalization_fallbacks == 0 {
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    /// Stops the loop started by [`Self::start`] after its current cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Runs one poll-normalize-deliver cycle across every registered source.
    ///
    /// Pauses (looped sleep) while
    /// [`BackpressureController::should_consume`] is false, i.e. while the
    /// controller is [`xgate_backpressure::PressureState::Critical`] or
    /// [`xgate_backpressure::PressureState::Overloaded`].
    pub async fn run_once(&self) -> CycleReport {
        while !self.backpressure.should_consume() {
            tokio::time::sleep(OVERLOAD_PAUSE_INTERVAL).await;
        }

        let mut report = CycleReport::default();
        let mut polled_this_cycle = 0usize;

        for (source_name, source) in &self.sources {
            match source.poll() {
                Ok(messages) => {
                    polled_this_cycle += messages.len();
                    for message in messages {
                        self.process_message(message, &mut report).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(source = %source_name, error = %err, "stream source poll failed");
                    report.source_errors += 1;
                }
            }
        }

        self.backpressure.set_queue_depth(polled_this_cycle);
        report
    }

    async fn process_message(&self, message: Message, report: &mut CycleReport) {
        if message.low_priority && self.backpressure.should_drop_low_priority() {
            tracing::warn!(source_system = %message.source_system, "dropping low-priority message under backpressure");
            report.dropped_low_priority += 1;
            return;
        }

        let (record, used_fallback) = self.normalize(&message);
        if used_fallback {
            report.normalization_fallbacks += 1;
        }

        if !self.backpressure.check_rate_limit(&record.tenant_id, 1) {
            tracing::warn!(tenant_id = %record.tenant_id, "dropping message: per-tenant rate limit exceeded");
            report.dropped_rate_limited += 1;
            return;
        }

        let delay = self.backpressure.adaptive_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.sink.deliver(record) {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                tracing::error!(error = %err, "ingestion sink refused delivery");
                report.delivery_failures += 1;
            }
        }
    }

    fn normalize(&self, message: &Message) -> (ExceptionRecord, bool) {
        let Some(intake) = &self.intake else {
            return (fallback_record(message), true);
        };
        match intake.normalize(&message.raw_payload, message.tenant_id.as_ref(), None) {
            Ok(record) => (record, false),
            Err(err) => {
                tracing::warn!(error = %err, "intake normalization failed, delivering raw fallback record");
                (fallback_record(message), true)
            }
        }
    }
}

fn fallback_record(message: &Message) -> ExceptionRecord {
    let now = Timestamp::now_utc();
    let tenant_id = message.tenant_id.clone().unwrap_or_else(|| TenantId::new(UNKNOWN_TENANT));
    ExceptionRecord {
        exception_id: ExceptionId::new(Uuid::new_v4().to_string()),
        tenant_id,
        source_system: message.source_system.clone(),
        exception_type: None,
        severity: None,
        resolution_status: ResolutionStatus::Open,
        raw_payload: message.raw_payload.clone(),
        normalized_context: serde_json::json!({
            "pipelineId": Uuid::new_v4().to_string(),
            "normalizedAt": now.to_rfc3339(),
            "normalizationFallback": true,
        }),
        current_playbook_id: None,
        current_step: None,
        timestamp: now,
        created_at: now,
        updated_at: now,
    }
}
