// crates/xgate-orchestrator/src/bus.rs
// ============================================================================
// Module: stage_completed pub/sub bus
// Description: Publishes one event per completed stage, keyed by
//              (tenant_id, exception_id) and (tenant_id, *) (spec §4.11).
// Dependencies: tokio::sync::mpsc
// ============================================================================

use std::sync::Mutex;

use tokio::sync::mpsc;
use xgate_core::ExceptionId;
use xgate_core::StageOutcome;
use xgate_core::TenantId;

/// One stage's completion, published after every stage regardless of
/// outcome (completed, skipped, or failed).
#[derive(Debug, Clone)]
pub struct StageCompletedEvent {
    /// The owning tenant.
    pub tenant_id: TenantId,
    /// The exception this stage ran for.
    pub exception_id: ExceptionId,
    /// The stage name (`intake`, `triage`, `policy`, `resolution`, `feedback`).
    pub stage: String,
    /// The stage's outcome.
    pub outcome: StageOutcome,
}

enum SubscriptionKey {
    Exception(TenantId, ExceptionId),
    Tenant(TenantId),
}

impl SubscriptionKey {
    fn matches(&self, event: &StageCompletedEvent) -> bool {
        match self {
            Self::Exception(tenant_id, exception_id) => *tenant_id == event.tenant_id && *exception_id == event.exception_id,
            Self::Tenant(tenant_id) => *tenant_id == event.tenant_id,
        }
    }
}

struct Subscription {
    key: SubscriptionKey,
    sender: mpsc::Sender<StageCompletedEvent>,
}

/// Bounded-queue pub/sub bus for `stage_completed` events. A slow subscriber
/// only risks dropping its own backlog, per spec §4.11 ("slow subscribers
/// do not block the orchestrator beyond their own queue capacity") — no
/// blocking `send` is ever used on the publish path.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventBus {
    /// Builds an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every stage completion for one exception.
    #[must_use]
    pub fn subscribe_to_exception(&self, tenant_id: TenantId, exception_id: ExceptionId, capacity: usize) -> mpsc::Receiver<StageCompletedEvent> {
        self.add_subscription(SubscriptionKey::Exception(tenant_id, exception_id), capacity)
    }

    /// Subscribes to every stage completion across an entire tenant.
    #[must_use]
    pub fn subscribe_to_tenant(&self, tenant_id: TenantId, capacity: usize) -> mpsc::Receiver<StageCompletedEvent> {
        self.add_subscription(SubscriptionKey::Tenant(tenant_id), capacity)
    }

    fn add_subscription(&self, key: SubscriptionKey, capacity: usize) -> mpsc::Receiver<StageCompletedEvent> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        subscriptions.push(Subscription { key, sender });
        receiver
    }

    /// Publishes `event` to every matching, still-open subscriber.
    pub fn publish(&self, event: &StageCompletedEvent) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        subscriptions.retain(|subscription| {
            if !subscription.key.matches(event) {
                return true;
            }
            match subscription.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(stage = %event.stage, "stage_completed subscriber lagging, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use xgate_core::Timestamp;

    use super::*;

    #[tokio::test]
    async fn exception_scoped_subscriber_receives_only_its_own_events() {
        let bus = EventBus::new();
        let tenant_id = TenantId::new("TENANT_A");
        let exception_id = ExceptionId::new("EX-1");
        let mut receiver = bus.subscribe_to_exception(tenant_id.clone(), exception_id.clone(), 4);

        bus.publish(&StageCompletedEvent {
            tenant_id: tenant_id.clone(),
            exception_id: ExceptionId::new("EX-OTHER"),
            stage: "intake".to_string(),
            outcome: StageOutcome::skipped("n/a", Timestamp::now_utc()),
        });
        bus.publish(&StageCompletedEvent {
            tenant_id,
            exception_id: exception_id.clone(),
            stage: "intake".to_string(),
            outcome: StageOutcome::skipped("n/a", Timestamp::now_utc()),
        });

        let received = receiver.recv().await.expect("event");
        assert_eq!(received.exception_id, exception_id);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_subscriber_is_pruned_on_next_publish() {
        let bus = EventBus::new();
        let tenant_id = TenantId::new("TENANT_A");
        {
            let _receiver = bus.subscribe_to_tenant(tenant_id.clone(), 1);
        }
        bus.publish(&StageCompletedEvent {
            tenant_id,
            exception_id: ExceptionId::new("EX-1"),
            stage: "intake".to_string(),
            outcome: StageOutcome::skipped("n/a", Timestamp::now_utc()),
        });
        assert_eq!(bus.subscriptions.lock().unwrap().len(), 0);
    }
}
