// crates/xgate-ingest/src/sink.rs
// ============================================================================
// Module: Ingestion Delivery Sinks
// Description: Delivers normalized Exception Records out of the Streaming
//              Ingestor (§4.7).
// Purpose: Let the ingestion service hand off a normalized record either
//          directly (callback) or onto an internal work queue, without
//          knowing which.
// Dependencies: xgate-core, tokio
// ============================================================================

//! ## Overview
//! Mirrors `decision-gate-broker::sink`'s `Sink` trait split into
//! [`CallbackSink`] (synchronous, in-process delivery) and [`ChannelSink`]
//! (asynchronous, queue-backed delivery), generalized from dispatch receipts
//! to normalized [`xgate_core::ExceptionRecord`]s.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::Sender;
use xgate_core::ExceptionRecord;

/// Errors returned by an [`IngestSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink's destination rejected or could not accept the record.
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Delivers one normalized [`ExceptionRecord`] out of the ingestion service.
pub trait IngestSink: Send + Sync {
    /// Delivers `record`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the record could not be delivered.
    fn deliver(&self, record: ExceptionRecord) -> Result<(), SinkError>;
}

/// Synchronous, in-process delivery: invokes a caller-supplied handler.
#[derive(Clone)]
pub struct CallbackSink {
    handler: Arc<dyn Fn(ExceptionRecord) -> Result<(), SinkError> + Send + Sync>,
}

impl CallbackSink {
    /// Builds a sink that invokes `handler` for every delivered record.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(ExceptionRecord) -> Result<(), SinkError> + Send + Sync + 'static,
    {
        Self { handler: Arc::new(handler) }
    }
}

impl IngestSink for CallbackSink {
    fn deliver(&self, record: ExceptionRecord) -> Result<(), SinkError> {
        (self.handler)(record)
    }
}

/// Asynchronous, queue-backed delivery: hands records to a
/// `tokio::sync::mpsc` channel a separate consumer drains (e.g. the
/// Orchestrator's own batch runner).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<ExceptionRecord>,
}

impl ChannelSink {
    /// Builds a sink that forwards every delivered record to `sender`.
    #[must_use]
    pub fn new(sender: Sender<ExceptionRecord>) -> Self {
        Self { sender }
    }
}

impl IngestSink for ChannelSink {
    fn deliver(&self, record: ExceptionRecord) -> Result<(), SinkError> {
        self.sender.try_send(record).map_err(|err| SinkError::DeliveryFailed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use xgate_core::ResolutionStatus;
    use xgate_core::SourceSystem;
    use xgate_core::TenantId;
    use xgate_core::Timestamp;

    fn sample_record() -> ExceptionRecord {
        let now = Timestamp::now_utc();
        ExceptionRecord {
            exception_id: xgate_core::ExceptionId::new("EX-1"),
            tenant_id: TenantId::new("TENANT_A"),
            source_system: SourceSystem::new("settlement-engine"),
            exception_type: None,
            severity: None,
            resolution_status: ResolutionStatus::Open,
            raw_payload: serde_json::json!({}),
            normalized_context: serde_json::json!({"pipelineId": "PIPE-1", "normalizedAt": now.to_rfc3339()}),
            current_playbook_id: None,
            current_step: None,
            timestamp: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn callback_sink_invokes_handler() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&received);
        let sink = CallbackSink::new(move |record: ExceptionRecord| {
            recorded.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(record.exception_id);
            Ok(())
        });

        sink.deliver(sample_record()).expect("deliver");
        assert_eq!(received.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len(), 1);
    }

    #[tokio::test]
    async fn channel_sink_forwards_to_receiver() {
        let (sender, mut receiver) = tokio::sync::mpsc::channel(4);
        let sink = ChannelSink::new(sender);
        sink.deliver(sample_record()).expect("deliver");

        let received = receiver.recv().await.expect("receive");
        assert_eq!(received.exception_id, xgate_core::ExceptionId::new("EX-1"));
    }

    #[test]
    fn channel_sink_reports_delivery_failure_when_receiver_dropped() {
        let (sender, receiver) = tokio::sync::mpsc::channel(4);
        drop(receiver);
        let sink = ChannelSink::new(sender);

        let err = sink.deliver(sample_record()).expect_err("receiver dropped");
        assert!(matches!(err, SinkError::DeliveryFailed(_)));
    }
}
