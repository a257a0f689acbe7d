//! Out-of-band delivery of "accepted" events to queued callers
//!
//! A caller that ends up queued hands the coordinator a [`NotificationHandle`].
//! When the caller is later dequeued the coordinator publishes one
//! [`AcceptedEvent`] on that handle. Delivery is at most once: if the
//! receiving side is gone the event is dropped.

use log::debug;
use std::collections::HashMap;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedEvent {
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct NotificationHandle {
    tx: mpsc::UnboundedSender<AcceptedEvent>,
}

impl NotificationHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AcceptedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Publishes an accepted event without waiting. Returns whether a live
/// subscriber was there to take it.
pub fn notify_accepted(handle: &NotificationHandle, user_id: &str) -> bool {
    let event = AcceptedEvent {
        user_id: user_id.to_string(),
    };
    match handle.tx.send(event) {
        Ok(()) => true,
        Err(_) => {
            debug!("No subscriber for {}, dropping accepted event", user_id);
            false
        }
    }
}

/// Handles of queued callers, keyed by user id.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    waiters: HashMap<String, NotificationHandle>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the handle for `user_id`, returning the one it replaces.
    pub fn register(&mut self, user_id: &str, handle: NotificationHandle) -> Option<NotificationHandle> {
        self.waiters.insert(user_id.to_string(), handle)
    }

    /// Removes and returns the handle; a second call returns `None`.
    pub fn take(&mut self, user_id: &str) -> Option<NotificationHandle> {
        self.waiters.remove(user_id)
    }
}
