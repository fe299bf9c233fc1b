// crates/xgate-backpressure/src/lib.rs
// ============================================================================
// Module: Backpressure Controller
// Description: Queue depth / in-flight tracking, per-tenant rate limiting,
//              and the four-state pressure state machine that gates
//              ingestion (§4.6).
// Purpose: Keep the pipeline responsive under load by shedding or delaying
//          work before the Event Log or agent stages fall over.
// Dependencies: xgate-core, thiserror, tracing
// ============================================================================

//! ## Overview
//! `in_flight` and `queue_depth` are tracked with `AtomicUsize` — one
//! counter per concern, never a single struct behind one lock — mirroring
//! the fine-grained locking `decision-gate-store-sqlite::store`'s writer
//! stats use for its own queue-depth histogram. Per-tenant rate limiting
//! uses an independent `Mutex` per tenant's sliding window so one busy
//! tenant never contends with another's rate check.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use xgate_core::TenantId;

/// Fraction of capacity at which the controller enters [`PressureState::Critical`].
const WARNING_RATIO: f64 = 0.7;
/// Fraction of capacity at which the controller enters [`PressureState::Overloaded`].
const CRITICAL_RATIO: f64 = 0.9;
/// Recovery hysteresis: the controller only returns to
/// [`PressureState::Normal`] once pressure falls below
/// `NORMAL_RECOVERY_FACTOR * WARNING_RATIO`, and only enters
/// [`PressureState::Warning`] once it reaches that same floor, so it does
/// not flap at the boundary.
const NORMAL_RECOVERY_FACTOR: f64 = 0.35;
/// Default minimum interval between repeated state-change alerts for the
/// same transition.
const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(60);
/// Sliding window width used by the per-tenant rate limiter.
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

/// The four-state pressure ladder (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureState {
    /// Below the warning threshold; no mitigation applied.
    Normal,
    /// Above the warning threshold; low-priority work may be delayed.
    Warning,
    /// At or above the warning threshold's critical boundary; new work is
    /// refused, though low-priority work already admitted is not dropped.
    Critical,
    /// At or above capacity; new work is refused and low-priority work may
    /// be dropped.
    Overloaded,
}

impl PressureState {
    fn from_ratio(ratio: f64, previous: Self) -> Self {
        if ratio >= CRITICAL_RATIO {
            Self::Overloaded
        } else if ratio >= WARNING_RATIO {
            Self::Critical
        } else if ratio >= WARNING_RATIO * NORMAL_RECOVERY_FACTOR {
            Self::Warning
        } else if previous == Self::Normal || ratio < WARNING_RATIO * NORMAL_RECOVERY_FACTOR {
            Self::Normal
        } else {
            previous
        }
    }

    /// The adaptive delay applied to ingestion while in this state (spec
    /// §4.6): `0s` / `0.1s` / `0.5s` / `1.0s`.
    #[must_use]
    pub const fn adaptive_delay(self) -> Duration {
        match self {
            Self::Normal => Duration::from_millis(0),
            Self::Warning => Duration::from_millis(100),
            Self::Critical => Duration::from_millis(500),
            Self::Overloaded => Duration::from_millis(1_000),
        }
    }
}

/// A per-tenant sliding-window counter admitting at most `limit_per_second`
/// events in any trailing one-second window.
struct SlidingWindowLimiter {
    /// Timestamps of admitted events still inside the trailing window.
    events: VecDeque<Instant>,
}

impl SlidingWindowLimiter {
    fn new() -> Self {
        Self { events: VecDeque::new() }
    }

    fn try_admit(&mut self, now: Instant, count: u32, limit_per_second: u32) -> bool {
        while let Some(&front) = self.events.front() {
            if now.duration_since(front) > RATE_LIMIT_WINDOW {
                self.events.pop_front();
            } else {
                break;
            }
        }
        if self.events.len() as u64 + u64::from(count) > u64::from(limit_per_second) {
            return false;
        }
        for _ in 0..count {
            self.events.push_back(now);
        }
        true
    }

    /// Fraction of `limit_per_second` currently occupied by admitted events
    /// still inside the trailing window, without mutating `self`.
    fn utilization(&self, now: Instant, limit_per_second: u32) -> f64 {
        let admitted = self.events.iter().rev().take_while(|&&at| now.duration_since(at) <= RATE_LIMIT_WINDOW).count();
        admitted as f64 / f64::from(limit_per_second.max(1))
    }
}

/// Queue depth / in-flight tracking, per-tenant rate limiting, and the
/// pressure state machine that gates ingestion (spec §4.6).
pub struct BackpressureController {
    capacity: usize,
    in_flight: AtomicUsize,
    queue_depth: AtomicUsize,
    rate_limit_per_tenant_per_second: u32,
    state: Mutex<PressureState>,
    limiters: Mutex<BTreeMap<TenantId, SlidingWindowLimiter>>,
    alert_cooldown: Duration,
    last_alert_at: Mutex<Option<Instant>>,
    on_state_change: Option<Arc<dyn Fn(PressureState, PressureState) + Send + Sync>>,
    drop_low_priority_enabled: bool,
}

impl BackpressureController {
    /// Builds a controller with the given total capacity (in-flight plus
    /// queued work) and per-tenant rate limit.
    #[must_use]
    pub fn new(capacity: usize, rate_limit_per_tenant_per_second: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            in_flight: AtomicUsize::new(0),
            queue_depth: AtomicUsize::new(0),
            rate_limit_per_tenant_per_second,
            state: Mutex::new(PressureState::Normal),
            limiters: Mutex::new(BTreeMap::new()),
            alert_cooldown: DEFAULT_ALERT_COOLDOWN,
            last_alert_at: Mutex::new(None),
            on_state_change: None,
            drop_low_priority_enabled: false,
        }
    }

    /// Overrides the default one-minute alert cooldown.
    #[must_use]
    pub fn with_alert_cooldown(mut self, cooldown: Duration) -> Self {
        self.alert_cooldown = cooldown;
        self
    }

    /// Enables dropping low-priority work while [`PressureState::Overloaded`]
    /// (disabled by default, matching the conservative MVP default).
    #[must_use]
    pub fn with_drop_low_priority_enabled(mut self, enabled: bool) -> Self {
        self.drop_low_priority_enabled = enabled;
        self
    }

    /// Registers a callback invoked (subject to the alert cooldown) on
    /// every pressure-state transition.
    #[must_use]
    pub fn with_state_change_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(PressureState, PressureState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(callback));
        self
    }

    /// Worst-case fraction of capacity in use: the larger of occupancy
    /// (in-flight plus queued work) and the highest per-tenant rate-limit
    /// utilization, so a tenant hammering its rate limit can push the
    /// controller into a degraded state even with queues otherwise empty.
    fn pressure_ratio(&self) -> f64 {
        let occupied = self.in_flight.load(Ordering::Relaxed) + self.queue_depth.load(Ordering::Relaxed);
        let occupancy_ratio = occupied as f64 / self.capacity as f64;

        let now = Instant::now();
        let limiters = self.limiters.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let rate_ratio = limiters
            .values()
            .map(|limiter| limiter.utilization(now, self.rate_limit_per_tenant_per_second))
            .fold(0.0_f64, f64::max);

        occupancy_ratio.max(rate_ratio)
    }

    fn recompute_state(&self) {
        let ratio = self.pressure_ratio();
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let next = PressureState::from_ratio(ratio, *state);
        if next != *state {
            let previous = *state;
            *state = next;
            drop(state);
            self.emit_alert(previous, next);
        }
    }

    fn emit_alert(&self, previous: PressureState, next: PressureState) {
        let now = Instant::now();
        let mut last_alert = self.last_alert_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let should_emit = last_alert.is_none_or(|at| now.duration_since(at) >= self.alert_cooldown);
        if !should_emit {
            return;
        }
        *last_alert = Some(now);
        drop(last_alert);

        tracing::warn!(?previous, ?next, "backpressure state transition");
        if let Some(callback) = &self.on_state_change {
            callback(previous, next);
        }
    }

    /// Returns the current pressure state.
    #[must_use]
    pub fn state(&self) -> PressureState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Marks one unit of work as started, updating the pressure state.
    pub fn increment_in_flight(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.recompute_state();
    }

    /// Marks one unit of work as finished, updating the pressure state.
    pub fn decrement_in_flight(&self) {
        self.in_flight.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| Some(value.saturating_sub(1))).ok();
        self.recompute_state();
    }

    /// Sets the current queue depth directly (for ingestion sources that
    /// track their own backlog), updating the pressure state.
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
        self.recompute_state();
    }

    /// Returns true when new work should be accepted at all: false in
    /// [`PressureState::Critical`] or [`PressureState::Overloaded`].
    #[must_use]
    pub fn should_consume(&self) -> bool {
        matches!(self.state(), PressureState::Normal | PressureState::Warning)
    }

    /// Returns true when low-priority work should be dropped rather than
    /// queued: only in [`PressureState::Overloaded`], and only when dropping
    /// has been enabled via [`Self::with_drop_low_priority_enabled`].
    #[must_use]
    pub fn should_drop_low_priority(&self) -> bool {
        self.drop_low_priority_enabled && self.state() == PressureState::Overloaded
    }

    /// Returns the delay ingestion should apply before accepting the next
    /// unit of work, per the current pressure state.
    #[must_use]
    pub fn adaptive_delay(&self) -> Duration {
        self.state().adaptive_delay()
    }

    /// Returns true when `count` more events for `tenant_id` fit within the
    /// trailing one-second window, recording them as admitted if so and
    /// refreshing the pressure state to account for the new rate
    /// utilization. A rejected request leaves the state untouched, mirroring
    /// the original policy's placement of its state check on the admit path
    /// only.
    #[must_use]
    pub fn check_rate_limit(&self, tenant_id: &TenantId, count: u32) -> bool {
        let now = Instant::now();
        let admitted = {
            let mut limiters = self.limiters.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let limiter = limiters.entry(tenant_id.clone()).or_insert_with(SlidingWindowLimiter::new);
            limiter.try_admit(now, count, self.rate_limit_per_tenant_per_second)
        };
        if admitted {
            self.recompute_state();
        }
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_state_escalates_with_load() {
        let controller = BackpressureController::new(10, 100);
        for _ in 0..7 {
            controller.increment_in_flight();
        }
        // 7/10 = 0.7 meets the warning threshold: Critical.
        assert_eq!(controller.state(), PressureState::Critical);
        assert!(!controller.should_consume());
        for _ in 0..2 {
            controller.increment_in_flight();
        }
        // 9/10 = 0.9 meets the critical threshold: Overloaded.
        assert_eq!(controller.state(), PressureState::Overloaded);
        assert!(!controller.should_consume());
    }

    #[test]
    fn pressure_state_recovers_with_hysteresis() {
        let controller = BackpressureController::new(10, 100);
        for _ in 0..7 {
            controller.increment_in_flight();
        }
        assert_eq!(controller.state(), PressureState::Critical);
        for _ in 0..4 {
            controller.decrement_in_flight();
        }
        // 3/10 = 0.3, above the 0.7*0.35=0.245 recovery floor: Warning.
        assert_eq!(controller.state(), PressureState::Warning);
        for _ in 0..2 {
            controller.decrement_in_flight();
        }
        // 1/10 = 0.1, below the recovery floor: Normal.
        assert_eq!(controller.state(), PressureState::Normal);
    }

    #[test]
    fn should_drop_low_priority_disabled_by_default() {
        let controller = BackpressureController::new(10, 100);
        for _ in 0..9 {
            controller.increment_in_flight();
        }
        assert_eq!(controller.state(), PressureState::Overloaded);
        assert!(!controller.should_drop_low_priority());
    }

    #[test]
    fn should_drop_low_priority_requires_overloaded_even_when_enabled() {
        let controller = BackpressureController::new(10, 100).with_drop_low_priority_enabled(true);
        for _ in 0..7 {
            controller.increment_in_flight();
        }
        assert_eq!(controller.state(), PressureState::Critical);
        assert!(!controller.should_drop_low_priority());
        for _ in 0..2 {
            controller.increment_in_flight();
        }
        assert_eq!(controller.state(), PressureState::Overloaded);
        assert!(controller.should_drop_low_priority());
    }

    #[test]
    fn rate_limit_pressure_alone_drives_overloaded_state() {
        let controller = BackpressureController::new(1_000, 2);
        let tenant_id = TenantId::new("TENANT_A");
        let mut admitted = 0;
        for _ in 0..20 {
            if controller.check_rate_limit(&tenant_id, 1) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 2, "only the configured per-second limit should be admitted");
        assert_eq!(controller.state(), PressureState::Overloaded);
        assert!(!controller.should_consume());
    }

    #[test]
    fn adaptive_delay_matches_state() {
        let controller = BackpressureController::new(10, 100);
        assert_eq!(controller.adaptive_delay(), Duration::from_millis(0));
        for _ in 0..10 {
            controller.increment_in_flight();
        }
        assert_eq!(controller.adaptive_delay(), Duration::from_millis(1_000));
    }

    #[test]
    fn rate_limiter_admits_up_to_the_configured_limit() {
        let controller = BackpressureController::new(100, 3);
        let tenant_id = TenantId::new("TENANT_A");
        assert!(controller.check_rate_limit(&tenant_id, 3));
        assert!(!controller.check_rate_limit(&tenant_id, 1));
    }

    #[test]
    fn rate_limiter_tracks_tenants_independently() {
        let controller = BackpressureController::new(100, 1);
        let a = TenantId::new("TENANT_A");
        let b = TenantId::new("TENANT_B");
        assert!(controller.check_rate_limit(&a, 1));
        assert!(controller.check_rate_limit(&b, 1));
        assert!(!controller.check_rate_limit(&a, 1));
    }

    #[test]
    fn state_change_callback_respects_cooldown() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&transitions);
        let controller = BackpressureController::new(10, 100)
            .with_alert_cooldown(Duration::from_secs(3600))
            .with_state_change_callback(move |previous, next| {
                recorded.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push((previous, next));
            });

        for _ in 0..7 {
            controller.increment_in_flight();
        }
        for _ in 0..7 {
            controller.decrement_in_flight();
            controller.increment_in_flight();
        }
        let seen = transitions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(seen.len(), 1, "cooldown should suppress repeated identical transitions");
    }
}
