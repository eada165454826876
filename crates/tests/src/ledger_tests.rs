//! Ballot semantics through the engine: one record per voter, bound checks,
//! and point-in-time tallies.

use crate::harness::{engine, multi_select, red_blue_green};
use tally_core::engine::SubmitVote;
use tally_core::{CloseTrigger, PollError};

#[tokio::test]
async fn test_max_selections_bound_enforced() {
    let engine = engine();
    let created = engine.create_poll(multi_select()).await.unwrap();

    // Three selections allowed, four submitted.
    let err = engine
        .submit_vote(SubmitVote {
            poll_id: created.poll_id,
            voter_id: "greedy".into(),
            selections: vec![0, 1, 2, 3],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::InvalidOptionSelection(_)));

    // At the bound is fine.
    engine
        .submit_vote(SubmitVote {
            poll_id: created.poll_id,
            voter_id: "greedy".into(),
            selections: vec![0, 1, 2],
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_out_of_range_and_duplicate_ordinals_rejected() {
    let engine = engine();
    let created = engine.create_poll(red_blue_green()).await.unwrap();

    let err = engine
        .submit_vote(SubmitVote {
            poll_id: created.poll_id,
            voter_id: "voter-a".into(),
            selections: vec![3],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::InvalidOptionSelection(_)));

    let multi = engine
        .create_poll(tally_core::engine::CreatePoll { guild_id: 200, ..multi_select() })
        .await
        .unwrap();
    let err = engine
        .submit_vote(SubmitVote {
            poll_id: multi.poll_id,
            voter_id: "voter-a".into(),
            selections: vec![1, 1],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::InvalidOptionSelection(_)));
}

#[tokio::test]
async fn test_empty_ballot_rejected() {
    let engine = engine();
    let created = engine.create_poll(red_blue_green()).await.unwrap();

    let err = engine
        .submit_vote(SubmitVote {
            poll_id: created.poll_id,
            voter_id: "voter-a".into(),
            selections: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::InvalidOptionSelection(_)));
}

#[tokio::test]
async fn test_tally_counts_multi_select_ballots_per_option() {
    let engine = engine();
    let created = engine.create_poll(multi_select()).await.unwrap();

    engine
        .submit_vote(SubmitVote {
            poll_id: created.poll_id,
            voter_id: "a".into(),
            selections: vec![0, 2],
        })
        .await
        .unwrap();
    engine
        .submit_vote(SubmitVote {
            poll_id: created.poll_id,
            voter_id: "b".into(),
            selections: vec![2, 3],
        })
        .await
        .unwrap();

    let closed = engine.close_poll(created.poll_id, CloseTrigger::Admin).await.unwrap();
    assert_eq!(closed.tally.get(&0), Some(&1));
    assert_eq!(closed.tally.get(&1), Some(&0));
    assert_eq!(closed.tally.get(&2), Some(&2));
    assert_eq!(closed.tally.get(&3), Some(&1));
}

#[tokio::test]
async fn test_distinct_voters_distinct_records() {
    let engine = engine();
    let created = engine.create_poll(red_blue_green()).await.unwrap();

    for (voter, pick) in [("a", 0u32), ("b", 0), ("c", 1)] {
        engine
            .submit_vote(SubmitVote {
                poll_id: created.poll_id,
                voter_id: voter.into(),
                selections: vec![pick],
            })
            .await
            .unwrap();
    }

    let closed = engine.close_poll(created.poll_id, CloseTrigger::Admin).await.unwrap();
    let total: u64 = closed.tally.values().sum();
    assert_eq!(total, 3);
    assert_eq!(closed.tally.get(&0), Some(&2));
    assert_eq!(closed.tally.get(&1), Some(&1));
}
