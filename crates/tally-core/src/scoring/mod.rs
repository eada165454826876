//! Scoring engine: turns a frozen vote set and an answer key into point
//! awards.
//!
//! Scoring is pure - it reads the ballots recorded before the poll closed and
//! produces a deterministic result sequence. Exactly-once *application* of
//! the results is the reveal path's job (state compare-and-swap plus the
//! per-poll scored marker); the engine itself can safely be re-run, which is
//! what lets a reveal loser reconstruct the result payload without touching
//! the leaderboard.

use crate::errors::PollError;
use crate::poll::PollInstance;
use crate::storage::VoteRecord;
use crate::types::VoterId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// How a multi-select ballot is matched against the answer key.
///
/// Single-answer polls reduce to an exact-set match under either policy:
/// with one selection allowed, "any overlap" and "exact equality" coincide
/// for a single-element key, and a wrong single pick scores zero both ways.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiSelectPolicy {
    /// One point per correct option chosen; the ballot counts as correct if
    /// it contains at least one correct option.
    #[default]
    AnyOverlap,
    /// Full answer-key value if the chosen set equals the key exactly, zero
    /// otherwise.
    ExactMatch,
}

/// Scoring configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Matching policy for multi-select polls.
    #[serde(default)]
    pub multi_select_policy: MultiSelectPolicy,
}

/// One voter's award from a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreLine {
    pub voter_id: VoterId,
    pub points_awarded: u64,
    pub was_correct: bool,
}

/// Computes point awards for revealed polls.
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    #[must_use]
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Scores every ballot of `poll` against its configured answer key.
    ///
    /// The result is ordered by voter id so repeated invocations over the
    /// same frozen vote set produce identical sequences.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::NoAnswerKeyConfigured`] if the poll has no
    /// correct-option set.
    pub fn score(
        &self,
        poll: &PollInstance,
        votes: &[VoteRecord],
    ) -> Result<Vec<ScoreLine>, PollError> {
        let correct = poll
            .correct_options
            .as_ref()
            .ok_or(PollError::NoAnswerKeyConfigured(poll.id))?;

        let mut lines: Vec<ScoreLine> = votes
            .iter()
            .map(|vote| self.score_ballot(&vote.voter_id, &vote.selections, correct))
            .collect();
        lines.sort_by(|a, b| a.voter_id.cmp(&b.voter_id));

        debug!(
            poll_id = poll.id,
            ballots = lines.len(),
            correct = lines.iter().filter(|l| l.was_correct).count(),
            "scored poll"
        );
        Ok(lines)
    }

    fn score_ballot(&self, voter_id: &str, selections: &[u32], correct: &BTreeSet<u32>) -> ScoreLine {
        let chosen: BTreeSet<u32> = selections.iter().copied().collect();
        let overlap = chosen.intersection(correct).count() as u64;

        let (points_awarded, was_correct) = match self.config.multi_select_policy {
            MultiSelectPolicy::AnyOverlap => (overlap, overlap > 0),
            MultiSelectPolicy::ExactMatch => {
                if chosen == *correct {
                    (correct.len() as u64, true)
                } else {
                    (0, false)
                }
            }
        };

        ScoreLine { voter_id: voter_id.to_string(), points_awarded, was_correct }
    }
}
