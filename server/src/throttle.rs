//! Login throttle coordinator
//!
//! [`LoginThrottle`] is the single authority deciding whether a client may
//! finish logging in. All mutable state sits in one [`ThrottleState`] behind
//! one mutex, so login attempts, telemetry updates, ticks and cancellations
//! are applied strictly one after another.
//!
//! ## Admission
//! - `Bot` users are always admitted and still consume a unit of capacity,
//!   which can push the remaining capacity below zero.
//! - Everyone else is admitted immediately while capacity is positive and
//!   queued in their tier otherwise.
//!
//! ## Reconciliation
//! Each [`LoginThrottle::tick`] drains the queues in priority order while
//! capacity lasts, then offers the toxic queue to the [`ToxicGate`]. Accepted
//! events are published after the lock is released.

use crate::capacity::CapacityTracker;
use crate::config::{LimitSource, ServerConfig};
use crate::notify::{notify_accepted, NotificationHandle, WaiterRegistry};
use crate::policy::{ToxicGate, ToxicPolicy};
use crate::queues::TieredQueues;
use crate::roles::{resolve_tier, RoleResolver};
use log::{debug, info, warn};
use shared::{DrainRule, TelemetryReport, TelemetrySample, ThrottleSnapshot, Tier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSettings {
    pub toxic_policy: ToxicPolicy,
    pub toxic_score_below: i32,
}

impl From<&ServerConfig> for ThrottleSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            toxic_policy: config.toxic_policy,
            toxic_score_below: config.toxic_score_below,
        }
    }
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        ThrottleSettings::from(&ServerConfig::default())
    }
}

/// Result of a single login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { tier: Tier },
    Queued { tier: Tier },
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }

    pub fn tier(self) -> Tier {
        match self {
            Admission::Admitted { tier } | Admission::Queued { tier } => tier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed { admitted: usize },
    /// Another pass was still running; this one was skipped.
    Coalesced,
}

struct Dequeued {
    user_id: String,
    tier: Tier,
    handle: Option<NotificationHandle>,
}

struct ThrottleState {
    capacity: CapacityTracker,
    queues: TieredQueues,
    waiters: WaiterRegistry,
    toxic_gate: ToxicGate,
    /// Dequeued users not yet confirmed as connected. Reserved, always empty.
    awaiting_release: Vec<String>,
}

impl ThrottleState {
    fn drain_tier(&mut self, tier: Tier, gated: bool, now: Instant, out: &mut Vec<Dequeued>) {
        while self.capacity.has_capacity() {
            let eligible = match self.queues.front(tier) {
                Some(entry) => !gated || self.toxic_gate.admits(entry, now),
                None => false,
            };
            if !eligible {
                break;
            }
            let Some(entry) = self.queues.dequeue_front(tier) else {
                break;
            };

            self.capacity.consume();
            let handle = self.waiters.take(&entry.user_id);
            out.push(Dequeued {
                user_id: entry.user_id,
                tier,
                handle,
            });
        }
    }

    fn reconcile(&mut self, now: Instant) -> Vec<Dequeued> {
        let mut dequeued = Vec::new();

        for tier in Tier::QUEUE_PRIORITY {
            match tier.drain_rule() {
                DrainRule::Bypass => {}
                DrainRule::Capacity => self.drain_tier(tier, false, now, &mut dequeued),
                DrainRule::Gated => {
                    let waiting = !self.queues.is_empty(tier);
                    self.toxic_gate.observe(self.capacity.remaining(), waiting);
                    self.drain_tier(tier, true, now, &mut dequeued);
                }
            }
        }

        dequeued
    }
}

/// Resets the tick-in-progress flag even if the pass panics.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct LoginThrottle {
    state: Mutex<ThrottleState>,
    limit_source: Arc<dyn LimitSource>,
    resolver: Arc<dyn RoleResolver>,
    toxic_score_below: i32,
    tick_running: AtomicBool,
}

impl LoginThrottle {
    pub fn new(
        limit_source: Arc<dyn LimitSource>,
        resolver: Arc<dyn RoleResolver>,
        settings: ThrottleSettings,
    ) -> Self {
        let state = ThrottleState {
            capacity: CapacityTracker::new(),
            queues: TieredQueues::new(),
            waiters: WaiterRegistry::new(),
            toxic_gate: ToxicGate::new(settings.toxic_policy),
            awaiting_release: Vec::new(),
        };

        Self {
            state: Mutex::new(state),
            limit_source,
            resolver,
            toxic_score_below: settings.toxic_score_below,
            tick_running: AtomicBool::new(false),
        }
    }

    // Every mutation leaves the state consistent before it can panic, so a
    // poisoned lock is still safe to use.
    fn lock_state(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn resolve_tier(&self, user_id: &str) -> Tier {
        resolve_tier(self.resolver.as_ref(), user_id, self.toxic_score_below)
    }

    /// Decides a login attempt. Returns true when the user may connect now;
    /// otherwise the user waits in its tier and `handle` receives an
    /// accepted event once a tick lets it in.
    pub fn attempt_login(&self, handle: NotificationHandle, user_id: &str) -> bool {
        self.admit(handle, user_id).is_admitted()
    }

    /// Like [`attempt_login`](Self::attempt_login) but also reports the tier.
    pub fn admit(&self, handle: NotificationHandle, user_id: &str) -> Admission {
        let tier = self.resolve_tier(user_id);
        let mut state = self.lock_state();

        // A queued user stays queued in its original tier, even if the
        // resolver now answers differently.
        if let Some(queued_tier) = state.queues.tier_of(user_id) {
            state.waiters.register(user_id, handle);
            debug!("{} already queued in {}", user_id, queued_tier);
            return Admission::Queued { tier: queued_tier };
        }

        if tier.is_bypass() {
            state.capacity.consume();
            debug!(
                "Bypass login for {} (remaining={})",
                user_id,
                state.capacity.remaining()
            );
            return Admission::Admitted { tier };
        }

        if state.capacity.has_capacity() {
            state.capacity.consume();
            debug!(
                "Admitted {} ({}), remaining={}",
                user_id,
                tier,
                state.capacity.remaining()
            );
            return Admission::Admitted { tier };
        }

        state.queues.enqueue(tier, user_id);
        state.waiters.register(user_id, handle);
        debug!("Queued {} in {}", user_id, tier);
        Admission::Queued { tier }
    }

    /// Applies a metrics report. Returns false if the report was malformed
    /// and ignored.
    ///
    /// The limit is read from the source before the lock is taken, so a slow
    /// source never holds up concurrent login attempts.
    pub fn telemetry_update(&self, report: &TelemetryReport) -> bool {
        let Some(sample) = Self::validate_report(report) else {
            return false;
        };
        let limit = self.limit_source.current_limit();
        self.apply_sample(sample, limit);
        true
    }

    /// Extracts the sample from `report`, logging and returning `None` if it
    /// carries no usable total.
    pub fn validate_report(report: &TelemetryReport) -> Option<TelemetrySample> {
        let sample = report.sample();
        if sample.is_none() {
            warn!(
                "Ignoring malformed telemetry report ({} counters)",
                report.counters.len()
            );
        }
        sample
    }

    /// Source of the client limit, for callers that read it off the
    /// coordinator's thread before calling [`apply_sample`](Self::apply_sample).
    pub fn limit_source(&self) -> Arc<dyn LimitSource> {
        Arc::clone(&self.limit_source)
    }

    /// Sets remaining capacity to `limit - sample.total`.
    pub fn apply_sample(&self, sample: TelemetrySample, limit: i64) -> i64 {
        self.lock_state().capacity.update(sample, limit)
    }

    pub fn tick(&self) -> TickOutcome {
        self.tick_at(Instant::now())
    }

    /// Runs one reconciliation pass as if the clock read `now`.
    pub fn tick_at(&self, now: Instant) -> TickOutcome {
        if self
            .tick_running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("Tick already in progress, skipping");
            return TickOutcome::Coalesced;
        }
        let _guard = TickGuard(&self.tick_running);

        let dequeued = self.lock_state().reconcile(now);

        for admitted in &dequeued {
            info!("Dequeued {} from {} queue", admitted.user_id, admitted.tier);
            match &admitted.handle {
                Some(handle) => {
                    notify_accepted(handle, &admitted.user_id);
                }
                None => warn!("No waiter registered for {}", admitted.user_id),
            }
        }

        TickOutcome::Completed {
            admitted: dequeued.len(),
        }
    }

    /// Withdraws a queued user. Idempotent; returns whether it was queued.
    pub fn cancel(&self, user_id: &str) -> bool {
        let mut state = self.lock_state();
        state.waiters.take(user_id);
        match state.queues.remove(user_id) {
            Some(tier) => {
                info!("Cancelled {} from {} queue", user_id, tier);
                true
            }
            None => false,
        }
    }

    pub fn remaining_capacity(&self) -> i64 {
        self.lock_state().capacity.remaining()
    }

    pub fn queued_tier(&self, user_id: &str) -> Option<Tier> {
        self.lock_state().queues.tier_of(user_id)
    }

    pub fn snapshot(&self) -> ThrottleSnapshot {
        let state = self.lock_state();
        ThrottleSnapshot {
            remaining_capacity: state.capacity.remaining(),
            queues: Tier::QUEUE_PRIORITY
                .iter()
                .map(|tier| (*tier, state.queues.user_ids(*tier)))
                .collect(),
            awaiting_release: state.awaiting_release.clone(),
            truncated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedLimit;
    use crate::notify::AcceptedEvent;
    use crate::roles::{Role, StaticDirectory, UserProfile};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn directory() -> StaticDirectory {
        StaticDirectory::new()
            .with_user("bot", UserProfile::new(Role::Bot, 10_000))
            .with_user("moderator", UserProfile::new(Role::Moderator, 10_000))
            .with_user("contributor", UserProfile::new(Role::Contributor, 10_000))
            .with_user("vip", UserProfile::new(Role::Vip, 10_000))
            .with_user("standard", UserProfile::new(Role::Member, 10_000))
            .with_user("toxic", UserProfile::new(Role::Member, 100))
    }

    fn throttle_with(limit: i64, policy: ToxicPolicy) -> (LoginThrottle, SharedLimit) {
        let source = SharedLimit::new(limit);
        let settings = ThrottleSettings {
            toxic_policy: policy,
            toxic_score_below: 5_000,
        };
        let throttle = LoginThrottle::new(Arc::new(source.clone()), Arc::new(directory()), settings);
        (throttle, source)
    }

    fn throttle(limit: i64) -> LoginThrottle {
        throttle_with(limit, ToxicPolicy::default()).0
    }

    fn login(throttle: &LoginThrottle, user_id: &str) -> (bool, UnboundedReceiver<AcceptedEvent>) {
        let (handle, rx) = NotificationHandle::channel();
        (throttle.attempt_login(handle, user_id), rx)
    }

    fn report(throttle: &LoginThrottle, total: i64) {
        assert!(throttle.telemetry_update(&TelemetryReport::with_total(total)));
    }

    #[test]
    fn test_resolves_tiers() {
        let throttle = throttle(10);
        assert_eq!(throttle.resolve_tier("bot"), Tier::Bot);
        assert_eq!(throttle.resolve_tier("toxic"), Tier::Toxic);
        assert_eq!(throttle.resolve_tier("nobody"), Tier::Standard);
    }

    #[test]
    fn test_telemetry_sets_remaining() {
        let throttle = throttle(10);
        report(&throttle, 3);
        assert_eq!(throttle.remaining_capacity(), 7);

        assert!(!throttle.telemetry_update(&TelemetryReport::default()));
        assert_eq!(throttle.remaining_capacity(), 7);
    }

    #[test]
    fn test_immediate_admission_consumes_capacity() {
        let throttle = throttle(10);
        report(&throttle, 8);

        assert!(login(&throttle, "standard").0);
        assert!(login(&throttle, "vip").0);
        assert_eq!(throttle.remaining_capacity(), 0);

        let (admitted, _rx) = login(&throttle, "nobody");
        assert!(!admitted);
        assert_eq!(throttle.snapshot().queued(Tier::Standard), ["nobody"]);
    }

    #[test]
    fn test_bot_always_admitted() {
        let throttle = throttle(10);
        report(&throttle, 12);
        assert_eq!(throttle.remaining_capacity(), -2);

        let (admitted, mut rx) = login(&throttle, "bot");
        assert!(admitted);
        assert_eq!(throttle.remaining_capacity(), -3);
        assert_eq!(throttle.snapshot().total_queued(), 0);

        throttle.tick();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_repeat_attempt_is_idempotent() {
        let throttle = throttle(10);
        report(&throttle, 10);

        let (first, _first_rx) = login(&throttle, "standard");
        let (second, mut second_rx) = login(&throttle, "standard");
        assert!(!first);
        assert!(!second);
        assert_eq!(throttle.snapshot().queued(Tier::Standard), ["standard"]);

        report(&throttle, 9);
        throttle.tick();
        assert_eq!(second_rx.try_recv().unwrap().user_id, "standard");
    }

    #[test]
    fn test_telemetry_alone_never_drains() {
        let throttle = throttle(10);
        report(&throttle, 10);
        let (_, mut rx) = login(&throttle, "moderator");

        report(&throttle, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(throttle.snapshot().queued(Tier::Moderator), ["moderator"]);
    }

    #[test]
    fn test_priority_scenario() {
        let throttle = throttle(10);
        report(&throttle, 10);
        assert_eq!(throttle.remaining_capacity(), 0);

        assert!(login(&throttle, "bot").0);
        assert_eq!(throttle.remaining_capacity(), -1);

        let (m, mut m_rx) = login(&throttle, "moderator");
        let (c, mut c_rx) = login(&throttle, "contributor");
        let (v, mut v_rx) = login(&throttle, "vip");
        let (s, mut s_rx) = login(&throttle, "standard");
        let (t, mut t_rx) = login(&throttle, "toxic");
        assert!(!m && !c && !v && !s && !t);

        let snapshot = throttle.snapshot();
        assert_eq!(snapshot.queued(Tier::Moderator), ["moderator"]);
        assert_eq!(snapshot.queued(Tier::Contributor), ["contributor"]);
        assert_eq!(snapshot.queued(Tier::Vip), ["vip"]);
        assert_eq!(snapshot.queued(Tier::Standard), ["standard"]);
        assert_eq!(snapshot.queued(Tier::Toxic), ["toxic"]);
        assert!(snapshot.awaiting_release.is_empty());

        report(&throttle, 9);
        assert_eq!(throttle.remaining_capacity(), 1);
        assert_eq!(throttle.tick(), TickOutcome::Completed { admitted: 1 });
        assert_eq!(m_rx.try_recv().unwrap().user_id, "moderator");
        assert!(c_rx.try_recv().is_err());
        assert_eq!(throttle.snapshot().total_queued(), 4);

        report(&throttle, 4);
        assert_eq!(throttle.remaining_capacity(), 6);
        assert_eq!(throttle.tick(), TickOutcome::Completed { admitted: 3 });
        assert_eq!(c_rx.try_recv().unwrap().user_id, "contributor");
        assert_eq!(v_rx.try_recv().unwrap().user_id, "vip");
        assert_eq!(s_rx.try_recv().unwrap().user_id, "standard");
        assert!(t_rx.try_recv().is_err());

        let snapshot = throttle.snapshot();
        assert_eq!(snapshot.remaining_capacity, 3);
        assert_eq!(snapshot.queued(Tier::Toxic), ["toxic"]);
        assert_eq!(snapshot.total_queued(), 1);
    }

    #[test]
    fn test_higher_tier_drains_first() {
        let throttle = throttle(10);
        report(&throttle, 10);

        let (_, mut s_rx) = login(&throttle, "standard");
        let (_, mut v_rx) = login(&throttle, "vip");

        report(&throttle, 9);
        throttle.tick();
        assert_eq!(v_rx.try_recv().unwrap().user_id, "vip");
        assert!(s_rx.try_recv().is_err());
    }

    #[test]
    fn test_toxic_released_after_spare_ticks() {
        let (throttle, _) = throttle_with(10, ToxicPolicy::SpareTicks { required: 2 });
        report(&throttle, 10);
        let (_, mut rx) = login(&throttle, "toxic");

        report(&throttle, 5);
        assert_eq!(throttle.tick(), TickOutcome::Completed { admitted: 0 });
        assert!(rx.try_recv().is_err());

        assert_eq!(throttle.tick(), TickOutcome::Completed { admitted: 1 });
        assert_eq!(rx.try_recv().unwrap().user_id, "toxic");
        assert_eq!(throttle.remaining_capacity(), 4);
    }

    #[test]
    fn test_toxic_released_after_wait() {
        let (throttle, _) = throttle_with(10, ToxicPolicy::QueuedFor { min_wait_ms: 1_000 });
        report(&throttle, 10);
        let start = Instant::now();
        let (_, mut rx) = login(&throttle, "toxic");

        report(&throttle, 5);
        throttle.tick_at(start);
        assert!(rx.try_recv().is_err());

        throttle.tick_at(start + Duration::from_secs(2));
        assert_eq!(rx.try_recv().unwrap().user_id, "toxic");
    }

    #[test]
    fn test_cancel_removes_waiter() {
        let throttle = throttle(10);
        report(&throttle, 10);
        let (_, mut rx) = login(&throttle, "standard");

        assert!(throttle.cancel("standard"));
        assert!(!throttle.cancel("standard"));
        assert_eq!(throttle.queued_tier("standard"), None);

        report(&throttle, 0);
        assert_eq!(throttle.tick(), TickOutcome::Completed { admitted: 0 });
        assert!(rx.try_recv().is_err());
        assert_eq!(throttle.remaining_capacity(), 10);
    }

    #[test]
    fn test_dead_subscriber_still_dequeued() {
        let throttle = throttle(10);
        report(&throttle, 10);
        let (_, rx) = login(&throttle, "vip");
        drop(rx);

        report(&throttle, 8);
        assert_eq!(throttle.tick(), TickOutcome::Completed { admitted: 1 });
        assert_eq!(throttle.remaining_capacity(), 1);
        assert_eq!(throttle.snapshot().total_queued(), 0);
    }

    #[test]
    fn test_concurrent_attempts_never_overshoot() {
        let throttle = Arc::new(throttle(100));
        report(&throttle, 50);

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let throttle = Arc::clone(&throttle);
                std::thread::spawn(move || {
                    let mut admitted = 0;
                    for i in 0..25 {
                        let (handle, _rx) = NotificationHandle::channel();
                        if throttle.attempt_login(handle, &format!("user-{}-{}", worker, i)) {
                            admitted += 1;
                        }
                    }
                    admitted
                })
            })
            .collect();

        let admitted: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(admitted, 50);
        assert_eq!(throttle.remaining_capacity(), 0);
        assert_eq!(throttle.snapshot().total_queued(), 150);
    }

    #[test]
    fn test_overlapping_tick_is_coalesced() {
        let throttle = throttle(10);
        throttle.tick_running.store(true, Ordering::SeqCst);
        assert_eq!(throttle.tick(), TickOutcome::Coalesced);

        throttle.tick_running.store(false, Ordering::SeqCst);
        assert_eq!(throttle.tick(), TickOutcome::Completed { admitted: 0 });
    }

    /// Resolves `promoted` as a member until `promote` is called, then as a bot.
    struct PromotingResolver {
        promoted: AtomicBool,
    }

    impl RoleResolver for PromotingResolver {
        fn resolve(&self, user_id: &str) -> Option<UserProfile> {
            if user_id != "promoted" {
                return None;
            }
            let role = if self.promoted.load(Ordering::SeqCst) {
                Role::Bot
            } else {
                Role::Member
            };
            Some(UserProfile::new(role, 10_000))
        }
    }

    #[test]
    fn test_queued_user_stays_queued_when_tier_changes() {
        let resolver = Arc::new(PromotingResolver {
            promoted: AtomicBool::new(false),
        });
        let throttle = LoginThrottle::new(
            Arc::new(SharedLimit::new(10)),
            Arc::clone(&resolver) as Arc<dyn RoleResolver>,
            ThrottleSettings::default(),
        );
        report(&throttle, 10);

        let (first, _first_rx) = login(&throttle, "promoted");
        assert!(!first);

        resolver.promoted.store(true, Ordering::SeqCst);
        let (handle, mut rx) = NotificationHandle::channel();
        assert_eq!(
            throttle.admit(handle, "promoted"),
            Admission::Queued {
                tier: Tier::Standard
            }
        );
        assert_eq!(throttle.queued_tier("promoted"), Some(Tier::Standard));
        assert_eq!(throttle.remaining_capacity(), 0);

        report(&throttle, 5);
        assert_eq!(throttle.tick(), TickOutcome::Completed { admitted: 1 });
        assert_eq!(rx.try_recv().unwrap().user_id, "promoted");
        assert_eq!(throttle.remaining_capacity(), 4);

        assert_eq!(throttle.tick(), TickOutcome::Completed { admitted: 0 });
        assert_eq!(throttle.remaining_capacity(), 4);
    }

    /// Limit source that takes a while to answer, like a slow disk.
    struct SlowLimit {
        delay: Duration,
        limit: i64,
    }

    impl LimitSource for SlowLimit {
        fn current_limit(&self) -> i64 {
            std::thread::sleep(self.delay);
            self.limit
        }
    }

    #[test]
    fn test_slow_limit_source_does_not_block_logins() {
        let throttle = Arc::new(LoginThrottle::new(
            Arc::new(SlowLimit {
                delay: Duration::from_millis(300),
                limit: 10,
            }),
            Arc::new(directory()),
            ThrottleSettings::default(),
        ));

        let reporter = {
            let throttle = Arc::clone(&throttle);
            std::thread::spawn(move || throttle.telemetry_update(&TelemetryReport::with_total(4)))
        };
        std::thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        let (admitted, _rx) = login(&throttle, "bot");
        let blocked = start.elapsed();
        assert!(admitted);
        assert!(blocked < Duration::from_millis(150), "login blocked {:?}", blocked);

        assert!(reporter.join().unwrap());
        assert_eq!(throttle.remaining_capacity(), 6);
    }

    #[test]
    fn test_malformed_report_skips_limit_source() {
        let throttle = LoginThrottle::new(
            Arc::new(SlowLimit {
                delay: Duration::from_secs(5),
                limit: 10,
            }),
            Arc::new(directory()),
            ThrottleSettings::default(),
        );

        let start = Instant::now();
        assert!(!throttle.telemetry_update(&TelemetryReport::with_total(-1)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(throttle.remaining_capacity(), 0);
    }
}
