//! Storage abstraction providing the atomic primitives every component
//! shares.
//!
//! The hot-path guarantees of the crate - one transition winner per state
//! edge, one vote record per (poll, voter), exactly-once scoring - are all
//! enforced here as *conditional* operations rather than coarse locking:
//!
//! - [`PollStore::create_poll`] is a transactional create-and-bind that
//!   rejects a second Active poll for the same tenant,
//! - [`PollStore::transition`] is a compare-and-swap on the lifecycle state,
//! - [`PollStore::record_vote`] checks poll state and writes the ballot in
//!   one atomic step,
//! - [`PollStore::claim_scored`] is a first-caller-wins marker that makes
//!   reveal scoring idempotent across retries and process restarts,
//! - [`PollStore::apply_score_deltas`] increments leaderboard entries at the
//!   store, never read-modify-write at the caller.
//!
//! Two implementations ship: [`MemoryStore`] for embedding and tests, and
//! [`SqliteStore`] for durability.

mod memory;
mod retry;
mod sqlite;

pub use memory::MemoryStore;
pub use retry::RetryPolicy;
pub use sqlite::SqliteStore;

use crate::errors::PollError;
use crate::poll::{NewPoll, PollInstance, PollState};
use crate::types::{PollId, TenantKey, VoterId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of a compare-and-swap state transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// This caller observed the expected state and performed the transition.
    /// It alone may run the edge's side effects.
    Applied,
    /// Another caller transitioned first; the observed state is returned so
    /// the caller can decide between a no-op success and an error.
    Superseded(PollState),
}

/// Outcome of a vote write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    /// First ballot from this voter for this poll.
    Accepted,
    /// The voter had already voted; the previous ballot was replaced.
    Replaced,
}

impl VoteOutcome {
    /// Static string form for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Replaced => "replaced",
        }
    }
}

/// A voter's single ballot for a poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteRecord {
    pub poll_id: PollId,
    pub voter_id: VoterId,
    pub selections: Vec<u32>,
    pub submitted_at: DateTime<Utc>,
}

/// One scoring result to fold into a voter's cumulative entry.
#[derive(Clone, Debug)]
pub struct ScoreDelta {
    pub voter_id: VoterId,
    pub points: u64,
    pub was_correct: bool,
}

/// Cumulative per-(tenant, voter) score entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserScoreEntry {
    pub voter_id: VoterId,
    pub points: u64,
    pub correct_count: u64,
    pub polls_participated: u64,
    /// Monotonic per-tenant sequence assigned when the entry is first
    /// created. Realizes the "earliest cumulative participation" leaderboard
    /// tie break deterministically.
    pub first_scored_seq: u64,
}

/// Persistence contract for polls, votes, and scores.
///
/// Implementations must make each method atomic with respect to concurrent
/// calls; callers never wrap store operations in external locks.
#[async_trait]
pub trait PollStore: Send + Sync {
    /// Creates a poll in `Active` state and binds it as its tenant's active
    /// instance, in one transactional step.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::ConflictingActivePoll`] if the tenant already has
    /// an Active instance. A stale binding - one pointing at a poll that has
    /// since left `Active` - does not conflict.
    async fn create_poll(&self, new_poll: NewPoll) -> Result<PollInstance, PollError>;

    /// Fetches a poll by id.
    async fn poll(&self, id: PollId) -> Result<Option<PollInstance>, PollError>;

    /// Returns the tenant's currently Active poll, if any.
    async fn active_poll(&self, tenant: &TenantKey) -> Result<Option<PollInstance>, PollError>;

    /// Compare-and-swap on the poll's lifecycle state.
    ///
    /// Exactly one concurrent caller per edge observes [`Transition::Applied`];
    /// the rest observe [`Transition::Superseded`] with the current state.
    /// Transitions that leave `Active` also release the tenant's
    /// active-instance binding.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::PollNotActive`] with `NotFound` if the poll does
    /// not exist. Illegal edges are the caller's concern: the store applies
    /// whatever edge it is asked for, the engine only requests legal ones.
    async fn transition(
        &self,
        id: PollId,
        from: PollState,
        to: PollState,
    ) -> Result<Transition, PollError>;

    /// Configures the poll's correct-option set.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::IllegalTransition`] if the poll has already been
    /// revealed (the key would no longer be secret) or is terminal.
    async fn set_answer_key(&self, id: PollId, key: BTreeSet<u32>) -> Result<(), PollError>;

    /// Inserts or replaces the voter's ballot, conditional on the poll being
    /// `Active` at the moment of the write. The state check and the write
    /// are one atomic operation: a vote racing a close either lands before
    /// the transition or is rejected, never silently recorded afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::PollNotActive`] if the poll does not exist or has
    /// left `Active`, and [`PollError::InvalidOptionSelection`] if the
    /// selection count exceeds the poll's bound.
    async fn record_vote(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
        selections: Vec<u32>,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome, PollError>;

    /// Returns all ballots for a poll.
    async fn votes(&self, poll_id: PollId) -> Result<Vec<VoteRecord>, PollError>;

    /// Point-in-time vote counts per option ordinal, including zero rows for
    /// options nobody chose. Safe to call concurrently with writers; the
    /// snapshot is never torn.
    async fn tally(&self, poll_id: PollId) -> Result<BTreeMap<u32, u64>, PollError>;

    /// All Active polls whose deadline is at or before `now`. Computed from
    /// persisted deadlines so a restarted process rediscovers overdue polls
    /// without in-memory timers.
    async fn overdue_polls(&self, now: DateTime<Utc>) -> Result<Vec<PollInstance>, PollError>;

    /// Claims the per-poll "scored" marker. Returns `true` for exactly one
    /// caller across all retries and restarts; scoring side effects must only
    /// be applied by that caller.
    async fn claim_scored(&self, poll_id: PollId) -> Result<bool, PollError>;

    /// Folds scoring results into the tenant's cumulative entries. Each
    /// increment is atomic per entry, so concurrent scoring passes for
    /// different polls of the same tenant never lose updates.
    async fn apply_score_deltas(
        &self,
        tenant: &TenantKey,
        deltas: &[ScoreDelta],
    ) -> Result<(), PollError>;

    /// All cumulative score entries for a tenant, in unspecified order.
    async fn score_entries(&self, tenant: &TenantKey) -> Result<Vec<UserScoreEntry>, PollError>;
}
