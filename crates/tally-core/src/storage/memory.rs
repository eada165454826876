//! In-memory store backed by sharded concurrent maps.
//!
//! Each poll record keeps its lifecycle state and its ballots under a single
//! short-lived `parking_lot::RwLock`, which makes the "state check and vote
//! write are one atomic operation" requirement trivial while leaving
//! unrelated polls fully concurrent. The tenant active-instance binding uses
//! the `DashMap` entry API so the at-most-one-active check and the bind are
//! one atomic step.
//!
//! Lock ordering: poll record locks are never held while touching the
//! `active` binding map. Transitions update the record, release its lock,
//! and only then release the binding.

use super::{
    PollStore, ScoreDelta, Transition, UserScoreEntry, VoteOutcome, VoteRecord,
};
use crate::errors::{NotActiveReason, PollError};
use crate::poll::{NewPoll, PollInstance, PollState};
use crate::types::{PollId, TenantKey, VoterId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use std::collections::{hash_map::Entry as HashMapEntry, BTreeMap, BTreeSet, HashMap};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// A poll instance together with its ballots, guarded by one lock.
struct PollRecord {
    instance: PollInstance,
    votes: HashMap<VoterId, VoteRecord>,
}

/// Per-tenant cumulative scores plus the participation-order counter.
#[derive(Default)]
struct Board {
    entries: HashMap<VoterId, UserScoreEntry>,
    next_seq: u64,
}

/// Non-durable [`PollStore`] for embedding and tests.
#[derive(Default)]
pub struct MemoryStore {
    next_poll_id: AtomicU64,
    polls: DashMap<PollId, Arc<RwLock<PollRecord>>>,
    active: DashMap<TenantKey, PollId>,
    scored: DashMap<PollId, ()>,
    boards: DashMap<TenantKey, Arc<RwLock<Board>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self { next_poll_id: AtomicU64::new(1), ..Self::default() }
    }

    fn record(&self, id: PollId) -> Option<Arc<RwLock<PollRecord>>> {
        self.polls.get(&id).map(|r| Arc::clone(&r))
    }

    fn board(&self, tenant: &TenantKey) -> Arc<RwLock<Board>> {
        Arc::clone(&self.boards.entry(tenant.clone()).or_default())
    }
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn create_poll(&self, new_poll: NewPoll) -> Result<PollInstance, PollError> {
        let id = self.next_poll_id.fetch_add(1, Ordering::Relaxed);
        let instance = PollInstance {
            id,
            tenant: new_poll.tenant.clone(),
            question: new_poll.question,
            created_by: new_poll.created_by,
            options: new_poll.options,
            max_selections: new_poll.max_selections,
            show_votes_while_active: new_poll.show_votes_while_active,
            created_at: new_poll.created_at,
            deadline: new_poll.deadline,
            state: PollState::Active,
            correct_options: new_poll.correct_options,
        };

        // The entry guard serializes concurrent creates for the same tenant:
        // the conflict check and the bind are one atomic step.
        match self.active.entry(new_poll.tenant.clone()) {
            Entry::Occupied(mut occupied) => {
                let existing = *occupied.get();
                let still_active = self
                    .record(existing)
                    .is_some_and(|rec| rec.read().instance.state == PollState::Active);
                if still_active {
                    return Err(PollError::ConflictingActivePoll {
                        tenant: new_poll.tenant,
                        existing,
                    });
                }
                let snapshot = instance.clone();
                self.polls
                    .insert(id, Arc::new(RwLock::new(PollRecord { instance, votes: HashMap::new() })));
                occupied.insert(id);
                Ok(snapshot)
            }
            Entry::Vacant(vacant) => {
                let snapshot = instance.clone();
                self.polls
                    .insert(id, Arc::new(RwLock::new(PollRecord { instance, votes: HashMap::new() })));
                vacant.insert(id);
                Ok(snapshot)
            }
        }
    }

    async fn poll(&self, id: PollId) -> Result<Option<PollInstance>, PollError> {
        Ok(self.record(id).map(|rec| rec.read().instance.clone()))
    }

    async fn active_poll(&self, tenant: &TenantKey) -> Result<Option<PollInstance>, PollError> {
        let Some(id) = self.active.get(tenant).map(|id| *id) else {
            return Ok(None);
        };
        let instance = self.record(id).map(|rec| rec.read().instance.clone());
        Ok(instance.filter(|i| i.state == PollState::Active))
    }

    async fn transition(
        &self,
        id: PollId,
        from: PollState,
        to: PollState,
    ) -> Result<Transition, PollError> {
        let rec = self
            .record(id)
            .ok_or(PollError::PollNotActive(NotActiveReason::NotFound(id)))?;

        let (outcome, tenant) = {
            let mut guard = rec.write();
            let tenant = guard.instance.tenant.clone();
            if guard.instance.state == from {
                guard.instance.state = to;
                (Transition::Applied, tenant)
            } else {
                (Transition::Superseded(guard.instance.state), tenant)
            }
        };

        // Release the binding only after the record lock is dropped; the
        // binding map and record locks are never held together.
        if outcome == Transition::Applied && from == PollState::Active {
            self.active.remove_if(&tenant, |_, bound| *bound == id);
        }
        Ok(outcome)
    }

    async fn set_answer_key(&self, id: PollId, key: BTreeSet<u32>) -> Result<(), PollError> {
        let rec = self
            .record(id)
            .ok_or(PollError::PollNotActive(NotActiveReason::NotFound(id)))?;
        let mut guard = rec.write();
        match guard.instance.state {
            PollState::Draft | PollState::Active | PollState::Closed => {
                guard.instance.validate_answer_key(&key)?;
                guard.instance.correct_options = Some(key);
                Ok(())
            }
            state => Err(PollError::InvalidPollDefinition(format!(
                "answer key cannot be configured once the poll is {state}"
            ))),
        }
    }

    async fn record_vote(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
        selections: Vec<u32>,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome, PollError> {
        let rec = self
            .record(poll_id)
            .ok_or(PollError::PollNotActive(NotActiveReason::NotFound(poll_id)))?;
        let mut guard = rec.write();

        if guard.instance.state != PollState::Active {
            return Err(PollError::PollNotActive(NotActiveReason::from_state(
                poll_id,
                guard.instance.state,
            )));
        }
        if selections.len() > guard.instance.max_selections as usize {
            return Err(PollError::InvalidOptionSelection(format!(
                "{} options chosen, at most {} allowed",
                selections.len(),
                guard.instance.max_selections
            )));
        }

        let record = VoteRecord { poll_id, voter_id: voter_id.clone(), selections, submitted_at: now };
        let outcome = match guard.votes.insert(voter_id, record) {
            Some(_) => VoteOutcome::Replaced,
            None => VoteOutcome::Accepted,
        };
        Ok(outcome)
    }

    async fn votes(&self, poll_id: PollId) -> Result<Vec<VoteRecord>, PollError> {
        let rec = self
            .record(poll_id)
            .ok_or(PollError::PollNotActive(NotActiveReason::NotFound(poll_id)))?;
        let guard = rec.read();
        Ok(guard.votes.values().cloned().collect())
    }

    async fn tally(&self, poll_id: PollId) -> Result<BTreeMap<u32, u64>, PollError> {
        let rec = self
            .record(poll_id)
            .ok_or(PollError::PollNotActive(NotActiveReason::NotFound(poll_id)))?;
        let guard = rec.read();

        let mut counts: BTreeMap<u32, u64> =
            guard.instance.options.iter().map(|o| (o.ordinal, 0)).collect();
        for vote in guard.votes.values() {
            for &ordinal in &vote.selections {
                *counts.entry(ordinal).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn overdue_polls(&self, now: DateTime<Utc>) -> Result<Vec<PollInstance>, PollError> {
        let mut overdue = Vec::new();
        for entry in self.polls.iter() {
            let guard = entry.value().read();
            if guard.instance.state == PollState::Active && guard.instance.deadline <= now {
                overdue.push(guard.instance.clone());
            }
        }
        Ok(overdue)
    }

    async fn claim_scored(&self, poll_id: PollId) -> Result<bool, PollError> {
        Ok(self.scored.insert(poll_id, ()).is_none())
    }

    async fn apply_score_deltas(
        &self,
        tenant: &TenantKey,
        deltas: &[ScoreDelta],
    ) -> Result<(), PollError> {
        let board = self.board(tenant);
        let mut guard = board.write();
        let Board { entries, next_seq } = &mut *guard;
        for delta in deltas {
            let entry = match entries.entry(delta.voter_id.clone()) {
                HashMapEntry::Occupied(o) => o.into_mut(),
                HashMapEntry::Vacant(v) => {
                    let seq = *next_seq;
                    *next_seq += 1;
                    v.insert(UserScoreEntry {
                        voter_id: delta.voter_id.clone(),
                        points: 0,
                        correct_count: 0,
                        polls_participated: 0,
                        first_scored_seq: seq,
                    })
                }
            };
            entry.points += delta.points;
            entry.polls_participated += 1;
            if delta.was_correct {
                entry.correct_count += 1;
            }
        }
        Ok(())
    }

    async fn score_entries(&self, tenant: &TenantKey) -> Result<Vec<UserScoreEntry>, PollError> {
        let Some(board) = self.boards.get(tenant).map(|b| Arc::clone(&b)) else {
            return Ok(Vec::new());
        };
        let guard = board.read();
        Ok(guard.entries.values().cloned().collect())
    }
}
