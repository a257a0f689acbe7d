//! Remaining-capacity bookkeeping
//!
//! The metrics feed periodically reports how many clients are connected.
//! Each report resets the remaining capacity to `limit - total`; every
//! admission between two reports takes one unit off. Bypass admissions may
//! push the value below zero.
//!
//! The tracker never fetches the limit itself. Callers read it from their
//! [`LimitSource`](crate::config::LimitSource) before taking the coordinator
//! lock and hand it in with the sample.

use log::debug;
use shared::TelemetrySample;

#[derive(Debug, Default)]
pub struct CapacityTracker {
    remaining: i64,
}

impl CapacityTracker {
    /// Starts with no capacity: nothing but bypass traffic is admitted until
    /// the first telemetry report arrives.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes remaining capacity from a validated sample and the limit
    /// in force when the sample was taken.
    pub fn update(&mut self, sample: TelemetrySample, limit: i64) -> i64 {
        self.remaining = limit.saturating_sub(sample.total);
        debug!(
            "Telemetry: total={} limit={} remaining={}",
            sample.total, limit, self.remaining
        );
        self.remaining
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn has_capacity(&self) -> bool {
        self.remaining > 0
    }

    /// Takes one unit for an admission, regardless of the current value.
    pub fn consume(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }
}
