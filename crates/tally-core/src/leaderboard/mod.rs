//! Leaderboard aggregator: cumulative per-tenant scores and ranked snapshots.
//!
//! Score application is additive and delegated to the store, whose per-entry
//! increments are atomic - two polls of the same tenant finishing their
//! scoring passes concurrently never lose updates. Ranking is a pure read:
//! points descending, ties broken by earliest cumulative participation, so
//! repeated snapshots with no intervening scoring are identical.

use crate::errors::PollError;
use crate::scoring::ScoreLine;
use crate::storage::{PollStore, ScoreDelta, UserScoreEntry};
use crate::types::{TenantKey, VoterId};
use std::sync::Arc;
use tracing::info;

/// One row of a ranked leaderboard snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntry {
    pub voter_id: VoterId,
    pub points: u64,
    pub correct_count: u64,
    pub polls_participated: u64,
    /// 1-based position in the snapshot's total order.
    pub rank: u32,
}

/// Cumulative score maintenance and ranked reads for a tenant.
pub struct LeaderboardAggregator {
    store: Arc<dyn PollStore>,
}

impl LeaderboardAggregator {
    #[must_use]
    pub fn new(store: Arc<dyn PollStore>) -> Self {
        Self { store }
    }

    /// Folds one poll's scoring results into the tenant's cumulative entries.
    ///
    /// Must be called at most once per poll - the reveal path guarantees that
    /// with its scored marker. Increments are atomic per entry at the store.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::StorageUnavailable`] on persistent backend
    /// failure.
    pub async fn apply_scoring(
        &self,
        tenant: &TenantKey,
        results: &[ScoreLine],
    ) -> Result<(), PollError> {
        if results.is_empty() {
            return Ok(());
        }
        let deltas: Vec<ScoreDelta> = results
            .iter()
            .map(|line| ScoreDelta {
                voter_id: line.voter_id.clone(),
                points: line.points_awarded,
                was_correct: line.was_correct,
            })
            .collect();
        self.store.apply_score_deltas(tenant, &deltas).await?;
        info!(tenant = %tenant, voters = deltas.len(), "leaderboard updated");
        Ok(())
    }

    /// Ranked snapshot of the tenant's leaderboard.
    ///
    /// Sorted by points descending; ties are broken by earliest cumulative
    /// participation (the order in which voters first appeared on the
    /// board), making the order total and deterministic. Rank positions are
    /// assigned 1..n over that order. Pure read, no side effects.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::StorageUnavailable`] on persistent backend
    /// failure.
    pub async fn rank(&self, tenant: &TenantKey) -> Result<Vec<RankedEntry>, PollError> {
        let mut entries = self.store.score_entries(tenant).await?;
        entries.sort_by(rank_order);
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| RankedEntry {
                voter_id: entry.voter_id,
                points: entry.points,
                correct_count: entry.correct_count,
                polls_participated: entry.polls_participated,
                rank: i as u32 + 1,
            })
            .collect())
    }

    /// A single voter's ranked entry, if they appear on the board.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::StorageUnavailable`] on persistent backend
    /// failure.
    pub async fn rank_of(
        &self,
        tenant: &TenantKey,
        voter_id: &str,
    ) -> Result<Option<RankedEntry>, PollError> {
        Ok(self.rank(tenant).await?.into_iter().find(|e| e.voter_id == voter_id))
    }
}

fn rank_order(a: &UserScoreEntry, b: &UserScoreEntry) -> std::cmp::Ordering {
    b.points
        .cmp(&a.points)
        .then_with(|| a.first_scored_seq.cmp(&b.first_scored_seq))
}
