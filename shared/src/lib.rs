use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Protocol revision carried in every `Login` packet.
pub const PROTOCOL_VERSION: u32 = 1;

/// Counter name under which the metrics feed reports connected clients.
pub const TOTAL_CLIENTS_COUNTER: &str = "total";

/// Largest UDP payload over IPv4; receive buffers on both ends use it.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Priority class derived from a user's role and reputation.
///
/// Declaration order doubles as queue priority: a lower variant drains first.
/// `Bot` never queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Bot,
    Moderator,
    Contributor,
    Vip,
    Standard,
    Toxic,
}

/// How the reconciliation pass treats a tier's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainRule {
    /// Admitted immediately, never queued.
    Bypass,
    /// Drained whenever capacity is positive.
    Capacity,
    /// Drained only when the extra toxic-tier gate allows it.
    Gated,
}

impl Tier {
    /// Queued tiers, highest priority first.
    pub const QUEUE_PRIORITY: [Tier; 5] = [
        Tier::Moderator,
        Tier::Contributor,
        Tier::Vip,
        Tier::Standard,
        Tier::Toxic,
    ];

    pub fn drain_rule(self) -> DrainRule {
        match self {
            Tier::Bot => DrainRule::Bypass,
            Tier::Moderator | Tier::Contributor | Tier::Vip | Tier::Standard => {
                DrainRule::Capacity
            }
            Tier::Toxic => DrainRule::Gated,
        }
    }

    /// Index of this tier's queue, or `None` for the bypass tier.
    pub fn queue_slot(self) -> Option<usize> {
        match self {
            Tier::Bot => None,
            Tier::Moderator => Some(0),
            Tier::Contributor => Some(1),
            Tier::Vip => Some(2),
            Tier::Standard => Some(3),
            Tier::Toxic => Some(4),
        }
    }

    pub fn is_bypass(self) -> bool {
        self.drain_rule() == DrainRule::Bypass
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Bot => "bot",
            Tier::Moderator => "moderator",
            Tier::Contributor => "contributor",
            Tier::Vip => "vip",
            Tier::Standard => "standard",
            Tier::Toxic => "toxic",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated point-in-time connected-client count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySample {
    pub total: i64,
}

/// Raw counter map as published by the metrics feed.
///
/// The feed is not trusted: a report without a usable `total` counter
/// yields no sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub counters: HashMap<String, i64>,
}

impl TelemetryReport {
    pub fn with_total(total: i64) -> Self {
        let mut counters = HashMap::new();
        counters.insert(TOTAL_CLIENTS_COUNTER.to_string(), total);
        Self { counters }
    }

    pub fn sample(&self) -> Option<TelemetrySample> {
        self.counters
            .get(TOTAL_CLIENTS_COUNTER)
            .copied()
            .filter(|total| *total >= 0)
            .map(|total| TelemetrySample { total })
    }
}

/// Point-in-time view of the coordinator for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleSnapshot {
    pub remaining_capacity: i64,
    /// Waiting user ids per queued tier, head first.
    pub queues: BTreeMap<Tier, Vec<String>>,
    pub awaiting_release: Vec<String>,
    /// Set when lists were cut short to fit one datagram.
    pub truncated: bool,
}

impl ThrottleSnapshot {
    pub fn queued(&self, tier: Tier) -> &[String] {
        self.queues.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of user ids listed; a truncated snapshot lists fewer than
    /// are actually queued.
    pub fn total_queued(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }

    /// Keeps at most `per_list` ids of every list, head first.
    pub fn truncate(&mut self, per_list: usize) {
        for ids in self
            .queues
            .values_mut()
            .chain(std::iter::once(&mut self.awaiting_release))
        {
            if ids.len() > per_list {
                ids.truncate(per_list);
                self.truncated = true;
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Login {
        client_version: u32,
        user_id: String,
    },
    Cancel {
        user_id: String,
    },
    Telemetry {
        report: TelemetryReport,
    },
    SnapshotRequest,

    LoginAccepted {
        user_id: String,
    },
    Queued {
        user_id: String,
        tier: Tier,
    },
    Rejected {
        user_id: String,
        reason: String,
    },
    Snapshot {
        snapshot: ThrottleSnapshot,
    },
}
