//! Background reconciliation loop
//!
//! Sleeps, runs one full pass, then sleeps again. The next sleep only starts
//! after the pass returns, so a slow pass stretches the period instead of
//! letting passes pile up.

use crate::throttle::{LoginThrottle, TickOutcome};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub fn spawn_reconciliation(throttle: Arc<LoginThrottle>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(run_reconciliation(throttle, interval))
}

pub async fn run_reconciliation(throttle: Arc<LoginThrottle>, interval: Duration) {
    loop {
        sleep(interval).await;

        match throttle.tick() {
            TickOutcome::Completed { admitted } if admitted > 0 => {
                debug!(
                    "Reconciliation admitted {} (remaining={})",
                    admitted,
                    throttle.remaining_capacity()
                );
            }
            TickOutcome::Completed { .. } => {}
            TickOutcome::Coalesced => debug!("Reconciliation pass skipped, previous still running"),
        }
    }
}
