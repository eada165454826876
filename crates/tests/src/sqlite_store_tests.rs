//! The durable store against a temp-file database: conditional writes,
//! the partial-index active binding, scored-marker idempotence, and
//! restart survival.

use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tally_core::poll::{NewPoll, PollOption, PollState};
use tally_core::scoring::ScoringConfig;
use tally_core::storage::{
    PollStore, RetryPolicy, ScoreDelta, SqliteStore, Transition, VoteOutcome,
};
use tally_core::{NotActiveReason, PollError, TenantKey};
use tempfile::TempDir;

struct TestDb {
    // Held so the database file outlives the store.
    _dir: TempDir,
    url: String,
}

impl TestDb {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let url = format!("sqlite://{}", dir.path().join("tally.db").display());
        Self { _dir: dir, url }
    }

    async fn store(&self) -> SqliteStore {
        SqliteStore::new(&self.url, RetryPolicy::default()).await.expect("sqlite store")
    }
}

fn new_poll(tenant: &TenantKey) -> NewPoll {
    NewPoll {
        tenant: tenant.clone(),
        question: "which?".into(),
        created_by: "admin".into(),
        options: vec![
            PollOption { ordinal: 0, label: "Red".into() },
            PollOption { ordinal: 1, label: "Blue".into() },
            PollOption { ordinal: 2, label: "Green".into() },
        ],
        max_selections: 2,
        show_votes_while_active: false,
        created_at: Utc::now(),
        deadline: Utc::now() + Duration::minutes(5),
        correct_options: Some(BTreeSet::from([0])),
    }
}

#[tokio::test]
async fn test_create_and_fetch_round_trip() {
    let db = TestDb::new();
    let store = db.store().await;
    let tenant = TenantKey::new(1, "trivia");

    let created = store.create_poll(new_poll(&tenant)).await.unwrap();
    assert_eq!(created.state, PollState::Active);

    let fetched = store.poll(created.id).await.unwrap().expect("poll exists");
    assert_eq!(fetched.question, "which?");
    assert_eq!(fetched.options.len(), 3);
    assert_eq!(fetched.options[2].label, "Green");
    assert_eq!(fetched.max_selections, 2);
    assert_eq!(fetched.correct_options, Some(BTreeSet::from([0])));
    assert_eq!(fetched.tenant, tenant);
}

#[tokio::test]
async fn test_partial_index_rejects_second_active_poll() {
    let db = TestDb::new();
    let store = db.store().await;
    let tenant = TenantKey::new(1, "trivia");

    let first = store.create_poll(new_poll(&tenant)).await.unwrap();
    let err = store.create_poll(new_poll(&tenant)).await.unwrap_err();
    match err {
        PollError::ConflictingActivePoll { existing, .. } => assert_eq!(existing, first.id),
        other => panic!("expected ConflictingActivePoll, got {other:?}"),
    }

    // Closing releases the binding; the next create succeeds.
    store.transition(first.id, PollState::Active, PollState::Closed).await.unwrap();
    store.create_poll(new_poll(&tenant)).await.unwrap();
}

#[tokio::test]
async fn test_transition_cas_and_observed_state() {
    let db = TestDb::new();
    let store = db.store().await;
    let tenant = TenantKey::new(1, "trivia");
    let poll = store.create_poll(new_poll(&tenant)).await.unwrap();

    assert_eq!(
        store.transition(poll.id, PollState::Active, PollState::Closed).await.unwrap(),
        Transition::Applied
    );
    assert_eq!(
        store.transition(poll.id, PollState::Active, PollState::Closed).await.unwrap(),
        Transition::Superseded(PollState::Closed)
    );
    assert_eq!(
        store.transition(poll.id, PollState::Closed, PollState::Revealed).await.unwrap(),
        Transition::Applied
    );

    let err = store.transition(999, PollState::Active, PollState::Closed).await.unwrap_err();
    assert!(matches!(err, PollError::PollNotActive(NotActiveReason::NotFound(999))));
}

#[tokio::test]
async fn test_vote_upsert_and_state_gate() {
    let db = TestDb::new();
    let store = db.store().await;
    let tenant = TenantKey::new(1, "trivia");
    let poll = store.create_poll(new_poll(&tenant)).await.unwrap();

    let first = store.record_vote(poll.id, "alice".into(), vec![0, 1], Utc::now()).await.unwrap();
    assert_eq!(first, VoteOutcome::Accepted);
    let second = store.record_vote(poll.id, "alice".into(), vec![2], Utc::now()).await.unwrap();
    assert_eq!(second, VoteOutcome::Replaced);

    let votes = store.votes(poll.id).await.unwrap();
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].selections, vec![2]);

    let tally = store.tally(poll.id).await.unwrap();
    assert_eq!(tally.get(&0), Some(&0));
    assert_eq!(tally.get(&2), Some(&1));

    store.transition(poll.id, PollState::Active, PollState::Closed).await.unwrap();
    let err = store.record_vote(poll.id, "bob".into(), vec![0], Utc::now()).await.unwrap_err();
    assert!(matches!(err, PollError::PollNotActive(NotActiveReason::AlreadyClosed(_))));
}

#[tokio::test]
async fn test_scored_marker_survives_reopen() {
    let db = TestDb::new();
    let tenant = TenantKey::new(1, "trivia");
    let poll_id = {
        let store = db.store().await;
        let poll = store.create_poll(new_poll(&tenant)).await.unwrap();
        assert!(store.claim_scored(poll.id).await.unwrap());
        assert!(!store.claim_scored(poll.id).await.unwrap());
        poll.id
    };

    // A restarted process must still see the marker.
    let reopened = db.store().await;
    assert!(!reopened.claim_scored(poll_id).await.unwrap(), "marker must survive restart");
}

#[tokio::test]
async fn test_overdue_polls_recomputed_after_reopen() {
    let db = TestDb::new();
    let tenant = TenantKey::new(1, "trivia");
    {
        let store = db.store().await;
        let mut poll = new_poll(&tenant);
        poll.deadline = Utc::now() - Duration::minutes(1);
        store.create_poll(poll).await.unwrap();
    }

    // No in-memory timers: a fresh store finds the overdue poll from its
    // persisted deadline.
    let reopened = db.store().await;
    let overdue = reopened.overdue_polls(Utc::now()).await.unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].state, PollState::Active);
}

#[tokio::test]
async fn test_score_deltas_increment_in_sql() {
    let db = TestDb::new();
    let store = db.store().await;
    let tenant = TenantKey::new(1, "trivia");

    store
        .apply_score_deltas(
            &tenant,
            &[
                ScoreDelta { voter_id: "alice".into(), points: 2, was_correct: true },
                ScoreDelta { voter_id: "bob".into(), points: 0, was_correct: false },
            ],
        )
        .await
        .unwrap();
    store
        .apply_score_deltas(
            &tenant,
            &[ScoreDelta { voter_id: "alice".into(), points: 3, was_correct: true }],
        )
        .await
        .unwrap();

    let mut entries = store.score_entries(&tenant).await.unwrap();
    entries.sort_by(|a, b| a.voter_id.cmp(&b.voter_id));

    assert_eq!(entries[0].voter_id, "alice");
    assert_eq!(entries[0].points, 5);
    assert_eq!(entries[0].correct_count, 2);
    assert_eq!(entries[0].polls_participated, 2);
    assert_eq!(entries[1].voter_id, "bob");
    assert_eq!(entries[1].points, 0);
    assert_eq!(entries[1].polls_participated, 1);
    assert!(
        entries[0].first_scored_seq < entries[1].first_scored_seq,
        "insertion order is the participation order"
    );
}

#[tokio::test]
async fn test_set_answer_key_state_gate() {
    let db = TestDb::new();
    let store = db.store().await;
    let tenant = TenantKey::new(1, "trivia");
    let mut poll = new_poll(&tenant);
    poll.correct_options = None;
    let poll = store.create_poll(poll).await.unwrap();

    store.set_answer_key(poll.id, BTreeSet::from([1])).await.unwrap();
    let fetched = store.poll(poll.id).await.unwrap().unwrap();
    assert_eq!(fetched.correct_options, Some(BTreeSet::from([1])));

    // Out-of-range ordinals are rejected.
    let err = store.set_answer_key(poll.id, BTreeSet::from([9])).await.unwrap_err();
    assert!(matches!(err, PollError::InvalidPollDefinition(_)));

    // Once revealed, the key is frozen.
    store.transition(poll.id, PollState::Active, PollState::Closed).await.unwrap();
    store.transition(poll.id, PollState::Closed, PollState::Revealed).await.unwrap();
    let err = store.set_answer_key(poll.id, BTreeSet::from([2])).await.unwrap_err();
    assert!(matches!(err, PollError::InvalidPollDefinition(_)));
}

#[tokio::test]
async fn test_engine_runs_end_to_end_on_sqlite() {
    let db = TestDb::new();
    let store: Arc<dyn PollStore> = Arc::new(db.store().await);
    let engine = crate::harness::engine_with_store(store, ScoringConfig::default());

    let created = engine.create_poll(crate::harness::red_blue_green()).await.unwrap();
    engine
        .submit_vote(tally_core::engine::SubmitVote {
            poll_id: created.poll_id,
            voter_id: "voter-a".into(),
            selections: vec![0],
        })
        .await
        .unwrap();

    let revealed = engine.reveal_poll(created.poll_id).await.unwrap();
    assert_eq!(revealed.results.len(), 1);
    assert!(revealed.results[0].was_correct);

    let snapshot = engine
        .dashboard(crate::harness::GUILD, crate::harness::POLL_TYPE, Some("voter-a"))
        .await
        .unwrap();
    assert_eq!(snapshot.requester.unwrap().points, 1);
}
