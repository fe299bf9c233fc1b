// crates/xgate-ingest/src/source.rs
// ============================================================================
// Module: Streaming Sources
// Description: Pluggable message sources for the Streaming Ingestor (§4.7).
// Purpose: Give the ingestion service one trait it can poll regardless of
//          where messages actually come from.
// Dependencies: xgate-core, std
// ============================================================================

//! ## Overview
//! [`StreamSource`] generalizes `decision-gate-broker::source::Source`'s
//! "resolve content, regardless of backend" shape from one-shot content
//! resolution to repeated polling: a source hands back whatever messages are
//! currently available and the caller decides what to do with them.
//! [`InMemoryStreamSource`] is the in-process reference implementation used
//! by tests and single-process deployments; [`KafkaStreamSource`] sketches
//! the shape a real broker-backed source would take without implementing
//! wire-level consumer group membership or offset commits, which are out of
//! scope here.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;
use xgate_core::SourceSystem;
use xgate_core::TenantId;

/// One unit of work handed from a [`StreamSource`] to the ingestion service.
#[derive(Debug, Clone)]
pub struct Message {
    /// Owning tenant, when already known to the source.
    pub tenant_id: Option<TenantId>,
    /// Upstream system this message originated from.
    pub source_system: SourceSystem,
    /// The raw payload, exactly as received.
    pub raw_payload: Value,
    /// When true, this message may be dropped under
    /// [`xgate_backpressure::PressureState::Critical`] or worse.
    pub low_priority: bool,
}

impl Message {
    /// Builds a normal-priority message from `source_system` and `raw_payload`.
    #[must_use]
    pub fn new(source_system: SourceSystem, raw_payload: Value) -> Self {
        Self { tenant_id: None, source_system, raw_payload, low_priority: false }
    }

    /// Overrides the tenant id the Intake Agent would otherwise infer from
    /// `raw_payload`.
    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    /// Marks this message as droppable under sustained backpressure.
    #[must_use]
    pub fn low_priority(mut self) -> Self {
        self.low_priority = true;
        self
    }
}

/// Errors returned by a [`StreamSource`].
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source's backing connection or queue is unavailable.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// The source is not configured with enough information to poll
    /// (e.g. a Kafka source with no bootstrap servers).
    #[error("source not configured: {0}")]
    NotConfigured(String),
}

/// Polled for newly available [`Message`]s (spec §4.7).
pub trait StreamSource: Send + Sync {
    /// Returns every message currently available without blocking. An empty
    /// vector means "nothing new right now", not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the source's backing connection fails.
    fn poll(&self) -> Result<Vec<Message>, SourceError>;
}

/// In-process reference source: messages are pushed onto an internal queue
/// (by a producer, or by a test) and drained on [`StreamSource::poll`].
#[derive(Default)]
pub struct InMemoryStreamSource {
    queue: Mutex<VecDeque<Message>>,
}

impl InMemoryStreamSource {
    /// Builds an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a message for the next [`StreamSource::poll`].
    pub fn push(&self, message: Message) {
        self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push_back(message);
    }

    /// Returns the number of messages currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Returns true when no messages are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StreamSource for InMemoryStreamSource {
    fn poll(&self) -> Result<Vec<Message>, SourceError> {
        let mut queue = self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(queue.drain(..).collect())
    }
}

/// Sketches a Kafka-backed source's configuration surface. Connection
/// management, consumer group membership, and offset commits are explicitly
/// out of scope (spec §1 Non-goals); this type exists so a real consumer can
/// be dropped in behind the same [`StreamSource`] trait without touching the
/// ingestion service.
pub struct KafkaStreamSource {
    /// Comma-separated bootstrap server list.
    pub bootstrap_servers: String,
    /// Topic this source would consume from.
    pub topic: String,
    /// Consumer group id this source would join.
    pub consumer_group: String,
}

impl KafkaStreamSource {
    /// Builds a source description for `topic` on `bootstrap_servers`.
    #[must_use]
    pub fn new(bootstrap_servers: impl Into<String>, topic: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self { bootstrap_servers: bootstrap_servers.into(), topic: topic.into(), consumer_group: consumer_group.into() }
    }
}

impl StreamSource for KafkaStreamSource {
    fn poll(&self) -> Result<Vec<Message>, SourceError> {
        Err(SourceError::NotConfigured(format!(
            "kafka consumer wiring for topic '{}' is out of scope; register a StreamSource that actually consumes it",
            self.topic
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_source_drains_in_push_order() {
        let source = InMemoryStreamSource::new();
        source.push(Message::new(SourceSystem::new("settlement-engine"), serde_json::json!({"a": 1})));
        source.push(Message::new(SourceSystem::new("settlement-engine"), serde_json::json!({"a": 2})));

        let first_poll = source.poll().expect("poll");
        assert_eq!(first_poll.len(), 2);
        assert_eq!(first_poll[0].raw_payload["a"], serde_json::json!(1));
        assert!(source.is_empty());

        let second_poll = source.poll().expect("poll");
        assert!(second_poll.is_empty());
    }

    #[test]
    fn kafka_source_reports_not_configured_rather_than_faking_consumption() {
        let source = KafkaStreamSource::new("broker:9092", "exceptions", "xgate-ingest");
        let err = source.poll().expect_err("kafka source has no real transport");
        assert!(matches!(err, SourceError::NotConfigured(_)));
    }
}
