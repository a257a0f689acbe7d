//! Extra admission gate for the toxic tier
//!
//! Low-reputation users wait behind everybody else, and even when the
//! higher tiers are empty they are held back a little longer. How much longer
//! is a deployment decision, so the rule is a named policy read from config
//! rather than a constant.

use crate::queues::QueueEntry;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Consecutive spare-capacity ticks required by the default policy.
pub const DEFAULT_SPARE_TICKS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToxicPolicy {
    /// Drain only after `required` consecutive ticks that ended the
    /// higher-tier pass with capacity still spare.
    SpareTicks { required: u32 },
    /// Drain an entry only once it has been queued for `min_wait_ms`.
    QueuedFor { min_wait_ms: u64 },
}

impl Default for ToxicPolicy {
    fn default() -> Self {
        ToxicPolicy::SpareTicks {
            required: DEFAULT_SPARE_TICKS,
        }
    }
}

impl ToxicPolicy {
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            ToxicPolicy::SpareTicks { required: 0 } => {
                Err("toxic_policy.required must be at least 1".to_string())
            }
            ToxicPolicy::QueuedFor { min_wait_ms: 0 } => {
                Err("toxic_policy.min_wait_ms must be at least 1".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Running state of the toxic-tier gate, owned by the coordinator.
#[derive(Debug)]
pub struct ToxicGate {
    policy: ToxicPolicy,
    spare_streak: u32,
}

impl ToxicGate {
    pub fn new(policy: ToxicPolicy) -> Self {
        Self {
            policy,
            spare_streak: 0,
        }
    }

    pub fn spare_streak(&self) -> u32 {
        self.spare_streak
    }

    /// Records the outcome of one higher-tier pass.
    ///
    /// Must be called exactly once per tick, after the four capacity-drained
    /// tiers have been serviced and before any toxic entry is considered.
    pub fn observe(&mut self, remaining_capacity: i64, toxic_waiting: bool) {
        if remaining_capacity > 0 && toxic_waiting {
            self.spare_streak = self.spare_streak.saturating_add(1);
        } else {
            self.spare_streak = 0;
        }
    }

    /// Whether `entry`, at the head of the toxic queue, may be admitted now.
    pub fn admits(&self, entry: &QueueEntry, now: Instant) -> bool {
        match self.policy {
            ToxicPolicy::SpareTicks { required } => self.spare_streak >= required,
            ToxicPolicy::QueuedFor { min_wait_ms } => {
                now.saturating_duration_since(entry.enqueued_at)
                    >= Duration::from_millis(min_wait_ms)
            }
        }
    }
}
