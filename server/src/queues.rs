//! Per-tier FIFO wait queues
//!
//! One queue per queued tier plus an index from user id to the tier that
//! holds it, so a user can never wait in two places at once.

use log::debug;
use shared::Tier;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// A user waiting for capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub user_id: String,
    pub enqueued_at: Instant,
}

#[derive(Debug, Default)]
pub struct TieredQueues {
    queues: [VecDeque<QueueEntry>; Tier::QUEUE_PRIORITY.len()],
    index: HashMap<String, Tier>,
}

impl TieredQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `user_id` to the tail of `tier`'s queue.
    ///
    /// Returns false, leaving the queues untouched, when the user is already
    /// waiting in any tier or `tier` is the bypass tier.
    pub fn enqueue(&mut self, tier: Tier, user_id: &str) -> bool {
        self.enqueue_at(tier, user_id, Instant::now())
    }

    pub fn enqueue_at(&mut self, tier: Tier, user_id: &str, now: Instant) -> bool {
        if self.index.contains_key(user_id) {
            return false;
        }
        let Some(slot) = tier.queue_slot() else {
            return false;
        };

        self.queues[slot].push_back(QueueEntry {
            user_id: user_id.to_string(),
            enqueued_at: now,
        });
        self.index.insert(user_id.to_string(), tier);
        debug!(
            "Queued {} in {} (depth {})",
            user_id,
            tier,
            self.queues[slot].len()
        );
        true
    }

    pub fn dequeue_front(&mut self, tier: Tier) -> Option<QueueEntry> {
        let entry = self.queue_mut(tier)?.pop_front()?;
        self.index.remove(&entry.user_id);
        Some(entry)
    }

    pub fn front(&self, tier: Tier) -> Option<&QueueEntry> {
        self.queue(tier)?.front()
    }

    /// Removes `user_id` from whichever queue holds it. Idempotent.
    pub fn remove(&mut self, user_id: &str) -> Option<Tier> {
        let tier = self.index.remove(user_id)?;
        if let Some(queue) = self.queue_mut(tier) {
            queue.retain(|entry| entry.user_id != user_id);
        }
        Some(tier)
    }

    pub fn is_empty(&self, tier: Tier) -> bool {
        self.len(tier) == 0
    }

    pub fn len(&self, tier: Tier) -> usize {
        self.queue(tier).map_or(0, VecDeque::len)
    }

    pub fn total_len(&self) -> usize {
        self.index.len()
    }

    pub fn tier_of(&self, user_id: &str) -> Option<Tier> {
        self.index.get(user_id).copied()
    }

    /// Waiting user ids of `tier`, head first.
    pub fn user_ids(&self, tier: Tier) -> Vec<String> {
        self.queue(tier)
            .map(|queue| queue.iter().map(|entry| entry.user_id.clone()).collect())
            .unwrap_or_default()
    }

    fn queue(&self, tier: Tier) -> Option<&VecDeque<QueueEntry>> {
        tier.queue_slot().map(|slot| &self.queues[slot])
    }

    fn queue_mut(&mut self, tier: Tier) -> Option<&mut VecDeque<QueueEntry>> {
        tier.queue_slot().map(|slot| &mut self.queues[slot])
    }
}
