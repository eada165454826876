//! Command dispatch engine.
//!
//! `PollEngine` is the single entry point the command layer talks to. Every
//! inbound action is validated against the tenant registry, routed through
//! the poll state machine, and answered with a typed event. The admin close
//! command and the expiration scheduler converge on the same
//! [`PollEngine::close_poll`] path, so the idempotence of the
//! Active -> Closed edge is proven once.
//!
//! # Transition discipline
//!
//! All lifecycle edges run through the store's compare-and-swap: exactly one
//! caller wins each edge and runs its side effects; concurrent losers observe
//! the post-transition state and return success with no side effects. Reveal
//! side effects (leaderboard increments) are additionally guarded by the
//! per-poll scored marker so they survive retries and process restarts
//! without double application.

pub mod events;

pub use events::{
    CreatePoll, LeaderboardSnapshot, PollClosed, PollCreated, PollRevealed, SubmitVote,
    VoteAccepted, VoteRejected,
};

use crate::errors::{NotActiveReason, PollError};
use crate::leaderboard::LeaderboardAggregator;
use crate::ledger::VoteLedger;
use crate::metrics::{self, CloseTrigger};
use crate::poll::{validate_answer_key, NewPoll, PollInstance, PollOption, PollState};
use crate::scoring::{ScoringConfig, ScoringEngine};
use crate::storage::{PollStore, Transition};
use crate::tenant::TenantRegistry;
use crate::types::{GuildId, PollId, TenantKey};
use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bounds applied to poll definitions at creation.
const MIN_OPTIONS: usize = 2;
const MAX_OPTIONS: usize = 25;

/// Validated command dispatch over the poll lifecycle core.
pub struct PollEngine {
    registry: Arc<TenantRegistry>,
    store: Arc<dyn PollStore>,
    ledger: VoteLedger,
    scoring: ScoringEngine,
    leaderboard: LeaderboardAggregator,
}

impl PollEngine {
    #[must_use]
    pub fn new(
        registry: Arc<TenantRegistry>,
        store: Arc<dyn PollStore>,
        scoring_config: ScoringConfig,
    ) -> Self {
        Self {
            registry,
            ledger: VoteLedger::new(Arc::clone(&store)),
            scoring: ScoringEngine::new(scoring_config),
            leaderboard: LeaderboardAggregator::new(Arc::clone(&store)),
            store,
        }
    }

    /// The tenant registry this engine dispatches through.
    #[must_use]
    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    /// Fetches a poll instance for rendering.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::StorageUnavailable`] on persistent backend
    /// failure.
    pub async fn poll(&self, poll_id: PollId) -> Result<Option<PollInstance>, PollError> {
        self.store.poll(poll_id).await
    }

    /// Point-in-time vote counts, e.g. for live updates of a poll that shows
    /// its votes while active.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::PollNotActive`] (`NotFound`) for an unknown poll.
    pub async fn tally(&self, poll_id: PollId) -> Result<std::collections::BTreeMap<u32, u64>, PollError> {
        self.ledger.tally(poll_id).await
    }

    /// Creates a poll and promotes it straight to `Active`, bound as its
    /// tenant's single active instance in one transactional step.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::UnknownTenant`] for an unconfigured tenant,
    /// [`PollError::InvalidPollDefinition`] for a malformed definition, and
    /// [`PollError::ConflictingActivePoll`] if the tenant already has an
    /// active poll (which is left untouched).
    pub async fn create_poll(&self, command: CreatePoll) -> Result<PollCreated, PollError> {
        self.registry.resolve(command.guild_id, &command.poll_type)?;
        validate_definition(&command)?;

        let options: Vec<PollOption> = command
            .options
            .iter()
            .enumerate()
            .map(|(i, label)| PollOption { ordinal: i as u32, label: label.clone() })
            .collect();

        let correct_options = match &command.correct_answers {
            Some(answers) => {
                let key: BTreeSet<u32> = answers.iter().copied().collect();
                validate_answer_key(&key, options.len())?;
                Some(key)
            }
            None => None,
        };

        let created_at = Utc::now();
        let tenant = TenantKey::new(command.guild_id, command.poll_type.clone());
        let poll = self
            .registry
            .bind_active(NewPoll {
                tenant: tenant.clone(),
                question: command.question,
                created_by: command.created_by,
                options,
                max_selections: command.max_selections,
                show_votes_while_active: command.show_votes_while_active,
                created_at,
                deadline: created_at + Duration::seconds(command.duration_seconds as i64),
                correct_options,
            })
            .await?;

        metrics::record_poll_created();
        info!(
            poll_id = poll.id,
            tenant = %tenant,
            deadline = %poll.deadline,
            "poll created and active"
        );
        Ok(PollCreated { poll_id: poll.id, options: poll.options, deadline: poll.deadline })
    }

    /// Records (or replaces) a voter's ballot.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::PollNotActive`] when the poll is missing or no
    /// longer accepting votes, and [`PollError::InvalidOptionSelection`] for
    /// a malformed ballot.
    pub async fn submit_vote(&self, command: SubmitVote) -> Result<VoteAccepted, PollError> {
        let poll = self
            .store
            .poll(command.poll_id)
            .await?
            .ok_or(PollError::PollNotActive(NotActiveReason::NotFound(command.poll_id)))?;
        poll.validate_selections(&command.selections)?;

        // Ballot shape is validated against the immutable option set; the
        // authoritative state check happens inside the ledger write itself,
        // so a close racing this call cannot admit a late ballot.
        let outcome = self
            .ledger
            .record_vote(command.poll_id, command.voter_id.clone(), command.selections, Utc::now())
            .await?;
        Ok(VoteAccepted { poll_id: command.poll_id, voter_id: command.voter_id, outcome })
    }

    /// Transitions a poll out of `Active`, freezing its ledger.
    ///
    /// Idempotent: exactly one caller wins the Active -> Closed edge and runs
    /// the close side effects; every later or concurrent call (duplicate
    /// admin clicks, the scheduler racing an admin, a close after cancel)
    /// returns success without side effects.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::PollNotActive`] (`NotFound`) for an unknown poll.
    pub async fn close_poll(
        &self,
        poll_id: PollId,
        trigger: CloseTrigger,
    ) -> Result<PollClosed, PollError> {
        match self.store.transition(poll_id, PollState::Active, PollState::Closed).await? {
            Transition::Applied => {
                metrics::record_poll_closed(trigger);
                info!(poll_id, trigger = trigger.as_str(), "poll closed");
            }
            Transition::Superseded(observed) => {
                debug!(
                    poll_id,
                    observed = observed.as_str(),
                    trigger = trigger.as_str(),
                    "close was a no-op"
                );
            }
        }
        let tally = self.ledger.tally(poll_id).await?;
        Ok(PollClosed { poll_id, tally })
    }

    /// Supplies or replaces the poll's correct-option set.
    ///
    /// Legal until the poll is revealed.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::PollNotActive`] (`NotFound`) for an unknown poll
    /// and [`PollError::InvalidPollDefinition`] for an invalid key or a poll
    /// already past reveal.
    pub async fn configure_answer_key(
        &self,
        poll_id: PollId,
        ordinals: Vec<u32>,
    ) -> Result<(), PollError> {
        let key: BTreeSet<u32> = ordinals.iter().copied().collect();
        self.store.set_answer_key(poll_id, key).await?;
        info!(poll_id, "answer key configured");
        Ok(())
    }

    /// Discloses the poll's correct answers and applies scoring exactly once.
    ///
    /// An Active poll is closed first through the same idempotent close the
    /// admin and scheduler use. The Closed -> Revealed edge has one
    /// compare-and-swap winner; leaderboard application is further guarded by
    /// the scored marker, so concurrent reveals, retried reveals, and reveals
    /// resumed after a crash all apply each voter's increment at most once.
    /// Losers still receive the full result payload, recomputed from the
    /// frozen ledger.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::PollNotActive`] (`NotFound`) for an unknown poll,
    /// [`PollError::NoAnswerKeyConfigured`] when no correct-option set was
    /// supplied, and [`PollError::IllegalTransition`] when the poll was
    /// cancelled.
    pub async fn reveal_poll(&self, poll_id: PollId) -> Result<PollRevealed, PollError> {
        let poll = self
            .store
            .poll(poll_id)
            .await?
            .ok_or(PollError::PollNotActive(NotActiveReason::NotFound(poll_id)))?;
        let correct_options = poll
            .correct_options
            .clone()
            .ok_or(PollError::NoAnswerKeyConfigured(poll_id))?;

        if poll.state == PollState::Active {
            self.close_poll(poll_id, CloseTrigger::Admin).await?;
        }

        match self.store.transition(poll_id, PollState::Closed, PollState::Revealed).await? {
            Transition::Applied => info!(poll_id, "poll revealed"),
            // Already revealed (or archived after reveal): continue so a
            // retried reveal can still complete an interrupted scoring pass.
            Transition::Superseded(PollState::Revealed | PollState::Archived) => {
                debug!(poll_id, "reveal was a no-op");
            }
            Transition::Superseded(observed) => {
                return Err(PollError::IllegalTransition {
                    from: observed,
                    to: PollState::Revealed,
                });
            }
        }

        // The ledger is frozen from the moment Closed won; scoring is pure
        // and deterministic over it.
        let votes = self.ledger.votes(poll_id).await?;
        let results = self.score_with_key(&poll, &correct_options, &votes)?;

        if self.store.claim_scored(poll_id).await? {
            self.leaderboard.apply_scoring(&poll.tenant, &results).await?;
            metrics::record_poll_revealed(results.len());
            info!(poll_id, voters = results.len(), "scoring applied to leaderboard");
        } else {
            debug!(poll_id, "scoring already applied, skipping leaderboard update");
        }

        Ok(PollRevealed { poll_id, correct_options, results })
    }

    /// Abandons a poll without scoring. Terminal; releases the tenant's
    /// active slot. Cancelling an already-cancelled poll is a no-op success.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::PollNotActive`] (`NotFound`) for an unknown poll
    /// and [`PollError::IllegalTransition`] once the poll has closed.
    pub async fn cancel_poll(&self, poll_id: PollId) -> Result<(), PollError> {
        match self.store.transition(poll_id, PollState::Active, PollState::Cancelled).await? {
            Transition::Applied => {
                info!(poll_id, "poll cancelled");
                Ok(())
            }
            Transition::Superseded(PollState::Cancelled) => Ok(()),
            Transition::Superseded(observed) => {
                Err(PollError::IllegalTransition { from: observed, to: PollState::Cancelled })
            }
        }
    }

    /// Retires a revealed poll after its retention window. The window policy
    /// lives outside the core; this merely accepts the transition request.
    /// Archiving an already-archived poll is a no-op success.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::PollNotActive`] (`NotFound`) for an unknown poll
    /// and [`PollError::IllegalTransition`] for a poll not yet revealed.
    pub async fn archive_poll(&self, poll_id: PollId) -> Result<(), PollError> {
        match self.store.transition(poll_id, PollState::Revealed, PollState::Archived).await? {
            Transition::Applied => {
                info!(poll_id, "poll archived");
                Ok(())
            }
            Transition::Superseded(PollState::Archived) => Ok(()),
            Transition::Superseded(observed) => {
                Err(PollError::IllegalTransition { from: observed, to: PollState::Archived })
            }
        }
    }

    /// Ranked leaderboard snapshot for a tenant's dashboard.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::UnknownTenant`] for an unconfigured tenant.
    pub async fn dashboard(
        &self,
        guild_id: GuildId,
        poll_type: &str,
        voter: Option<&str>,
    ) -> Result<LeaderboardSnapshot, PollError> {
        self.registry.resolve(guild_id, poll_type)?;
        let tenant = TenantKey::new(guild_id, poll_type);

        let entries = self.leaderboard.rank(&tenant).await?;
        let requester = voter.and_then(|v| entries.iter().find(|e| e.voter_id == v).cloned());
        Ok(LeaderboardSnapshot { tenant, entries, requester })
    }

    /// Closes every overdue Active poll. Called by the expiration scheduler;
    /// per-poll failures are logged and skipped so one bad poll cannot stall
    /// the sweep. Returns how many polls this sweep actually closed.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::StorageUnavailable`] only if the overdue query
    /// itself fails.
    pub async fn close_overdue(&self, now: chrono::DateTime<Utc>) -> Result<usize, PollError> {
        let overdue = self.store.overdue_polls(now).await?;
        let mut closed = 0usize;
        for poll in overdue {
            match self.close_poll(poll.id, CloseTrigger::Scheduler).await {
                Ok(_) => closed += 1,
                Err(err) => {
                    warn!(poll_id = poll.id, error = %err, "failed to close overdue poll");
                }
            }
        }
        Ok(closed)
    }

    fn score_with_key(
        &self,
        poll: &PollInstance,
        key: &BTreeSet<u32>,
        votes: &[crate::storage::VoteRecord],
    ) -> Result<Vec<crate::scoring::ScoreLine>, PollError> {
        // The key may have been configured after this instance snapshot was
        // taken; score against the copy we resolved at the top of reveal.
        let mut scored = poll.clone();
        scored.correct_options = Some(key.clone());
        self.scoring.score(&scored, votes)
    }
}

fn validate_definition(command: &CreatePoll) -> Result<(), PollError> {
    if command.question.trim().is_empty() {
        return Err(PollError::InvalidPollDefinition("question cannot be empty".into()));
    }
    if command.options.len() < MIN_OPTIONS || command.options.len() > MAX_OPTIONS {
        return Err(PollError::InvalidPollDefinition(format!(
            "poll must have between {MIN_OPTIONS} and {MAX_OPTIONS} options, got {}",
            command.options.len()
        )));
    }
    if command.options.iter().any(|label| label.trim().is_empty()) {
        return Err(PollError::InvalidPollDefinition("option labels cannot be empty".into()));
    }
    if command.max_selections == 0 || command.max_selections as usize > command.options.len() {
        return Err(PollError::InvalidPollDefinition(format!(
            "max_selections must be between 1 and {}, got {}",
            command.options.len(),
            command.max_selections
        )));
    }
    if command.duration_seconds == 0 {
        return Err(PollError::InvalidPollDefinition("duration must be greater than 0".into()));
    }
    Ok(())
}
