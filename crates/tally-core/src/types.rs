//! Shared identifier types used across every component.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chat-platform guild (server) identifier.
pub type GuildId = u64;

/// Poll instance identifier, allocated by the store at creation.
pub type PollId = u64;

/// Opaque platform user identifier.
///
/// Kept as a string because upstream platforms hand these out in several
/// formats and the core never interprets them.
pub type VoterId = String;

/// Identifies an independent poll namespace: a (guild, poll-type) pair.
///
/// Every tenant has its own configuration, at most one active poll, and its
/// own leaderboard. Nothing is shared across tenant keys.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantKey {
    pub guild_id: GuildId,
    pub poll_type: String,
}

impl TenantKey {
    #[must_use]
    pub fn new(guild_id: GuildId, poll_type: impl Into<String>) -> Self {
        Self { guild_id, poll_type: poll_type.into() }
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild_id, self.poll_type)
    }
}
