//! Vote ledger: the append-only, one-record-per-voter ballot store.
//!
//! The ledger enforces the "one vote per voter per poll" invariant through
//! the store's conditional write: a resubmission replaces the voter's record
//! rather than duplicating it, and the poll-state check happens inside the
//! same atomic operation as the write, so a ballot racing a close either
//! lands before the transition or is rejected - never silently recorded into
//! a closed poll.

use crate::errors::PollError;
use crate::metrics;
use crate::storage::{PollStore, VoteOutcome, VoteRecord};
use crate::types::{PollId, VoterId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Ballot recording and aggregation over a [`PollStore`].
pub struct VoteLedger {
    store: Arc<dyn PollStore>,
}

impl VoteLedger {
    #[must_use]
    pub fn new(store: Arc<dyn PollStore>) -> Self {
        Self { store }
    }

    /// Atomically inserts or replaces the voter's single record for the poll.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::PollNotActive`] if the poll has left `Active`
    /// (even when the call races the transition), and
    /// [`PollError::InvalidOptionSelection`] if the ballot exceeds the poll's
    /// max-selections bound.
    pub async fn record_vote(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
        selections: Vec<u32>,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome, PollError> {
        let outcome = self.store.record_vote(poll_id, voter_id.clone(), selections, now).await?;
        metrics::record_vote(outcome);
        debug!(poll_id, voter_id = %voter_id, outcome = outcome.as_str(), "ballot recorded");
        Ok(outcome)
    }

    /// Point-in-time vote counts per option ordinal.
    ///
    /// Safe to call concurrently with further [`Self::record_vote`] calls:
    /// the snapshot is consistent, never torn, and does not block writers of
    /// other polls.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::PollNotActive`] (`NotFound`) for an unknown poll.
    pub async fn tally(&self, poll_id: PollId) -> Result<BTreeMap<u32, u64>, PollError> {
        self.store.tally(poll_id).await
    }

    /// Every ballot recorded for the poll. Called on the reveal path after
    /// the poll has closed, when the set is frozen.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::PollNotActive`] (`NotFound`) for an unknown poll.
    pub async fn votes(&self, poll_id: PollId) -> Result<Vec<VoteRecord>, PollError> {
        self.store.votes(poll_id).await
    }
}
