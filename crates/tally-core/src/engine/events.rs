//! Commands consumed from, and events produced toward, the command layer.
//!
//! These types are the engine's wire-facing surface: the chat gateway (or any
//! other front end) builds commands from user interactions and renders events
//! back. The core never talks to the platform directly.

use crate::errors::PollError;
use crate::leaderboard::RankedEntry;
use crate::poll::PollOption;
use crate::scoring::ScoreLine;
use crate::storage::VoteOutcome;
use crate::types::{GuildId, PollId, TenantKey, VoterId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Request to create a poll for a tenant.
#[derive(Debug, Clone)]
pub struct CreatePoll {
    pub guild_id: GuildId,
    pub poll_type: String,
    pub question: String,
    pub options: Vec<String>,
    pub max_selections: u32,
    pub duration_seconds: u64,
    pub show_votes_while_active: bool,
    /// Answer key ordinals, if already known at creation. May instead be
    /// configured later, any time before reveal.
    pub correct_answers: Option<Vec<u32>>,
    pub created_by: VoterId,
}

/// Request to record (or replace) a voter's ballot.
#[derive(Debug, Clone)]
pub struct SubmitVote {
    pub poll_id: PollId,
    pub voter_id: VoterId,
    pub selections: Vec<u32>,
}

/// A poll was created and is accepting votes.
#[derive(Debug, Clone)]
pub struct PollCreated {
    pub poll_id: PollId,
    pub options: Vec<PollOption>,
    pub deadline: DateTime<Utc>,
}

/// A ballot was recorded.
#[derive(Debug, Clone)]
pub struct VoteAccepted {
    pub poll_id: PollId,
    pub voter_id: VoterId,
    pub outcome: VoteOutcome,
}

/// A ballot was refused; `reason` is ready for user-facing rendering.
#[derive(Debug, Clone)]
pub struct VoteRejected {
    pub poll_id: PollId,
    pub reason: String,
}

impl VoteRejected {
    /// Builds the rejection event from the error `submit_vote` returned.
    #[must_use]
    pub fn from_error(poll_id: PollId, error: &PollError) -> Self {
        Self { poll_id, reason: error.to_string() }
    }
}

/// A poll stopped accepting votes; `tally` is the frozen per-option count.
#[derive(Debug, Clone)]
pub struct PollClosed {
    pub poll_id: PollId,
    pub tally: BTreeMap<u32, u64>,
}

/// A poll's answers were disclosed and its ballots scored.
#[derive(Debug, Clone)]
pub struct PollRevealed {
    pub poll_id: PollId,
    pub correct_options: BTreeSet<u32>,
    pub results: Vec<ScoreLine>,
}

/// Ranked leaderboard view for a tenant.
#[derive(Debug, Clone)]
pub struct LeaderboardSnapshot {
    pub tenant: TenantKey,
    pub entries: Vec<RankedEntry>,
    /// The requesting voter's own entry, when they asked and appear on the
    /// board.
    pub requester: Option<RankedEntry>,
}
