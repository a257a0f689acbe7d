//! User role and reputation lookup
//!
//! Roles and behaviour scores live in an external user service. The gate only
//! needs to map a user id to a [`Tier`], so the lookup sits behind the
//! [`RoleResolver`] trait. [`StaticDirectory`] is the resolver the server binary
//! uses, populated from the `users` table of the config file.

use crate::config::ServerConfig;
use serde::{Deserialize, Serialize};
use shared::Tier;
use std::collections::HashMap;

/// Behaviour score given to users without an explicit one.
pub const NEUTRAL_BEHAVIOUR_SCORE: i32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Bot,
    Moderator,
    Contributor,
    Vip,
    #[default]
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub role: Role,

    #[serde(default = "default_behaviour_score")]
    pub behaviour_score: i32,
}

fn default_behaviour_score() -> i32 {
    NEUTRAL_BEHAVIOUR_SCORE
}

impl UserProfile {
    pub fn new(role: Role, behaviour_score: i32) -> Self {
        Self {
            role,
            behaviour_score,
        }
    }

    /// Privileged roles win over reputation; only plain members can be
    /// demoted to the toxic tier.
    pub fn tier(&self, toxic_score_below: i32) -> Tier {
        match self.role {
            Role::Bot => Tier::Bot,
            Role::Moderator => Tier::Moderator,
            Role::Contributor => Tier::Contributor,
            Role::Vip => Tier::Vip,
            Role::Member if self.behaviour_score < toxic_score_below => Tier::Toxic,
            Role::Member => Tier::Standard,
        }
    }
}

pub trait RoleResolver: Send + Sync {
    /// Returns `None` when the user is unknown to the resolver.
    fn resolve(&self, user_id: &str) -> Option<UserProfile>;
}

/// Maps a user to a tier, defaulting to `Standard` when the resolver has
/// nothing to say.
pub fn resolve_tier(resolver: &dyn RoleResolver, user_id: &str, toxic_score_below: i32) -> Tier {
    resolver
        .resolve(user_id)
        .map(|profile| profile.tier(toxic_score_below))
        .unwrap_or(Tier::Standard)
}

#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: HashMap<String, UserProfile>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            users: config.users.clone(),
        }
    }

    pub fn with_user(mut self, user_id: &str, profile: UserProfile) -> Self {
        self.users.insert(user_id.to_string(), profile);
        self
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl RoleResolver for StaticDirectory {
    fn resolve(&self, user_id: &str) -> Option<UserProfile> {
        self.users.get(user_id).copied()
    }
}
