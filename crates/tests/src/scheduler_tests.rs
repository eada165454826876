//! Deadline sweeps driving the shared idempotent close path.

use crate::harness::{engine, red_blue_green};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tally_core::engine::{CreatePoll, SubmitVote};
use tally_core::scheduler::ExpirationScheduler;
use tally_core::{CloseTrigger, PollError};

fn scheduler_for(engine: &Arc<tally_core::engine::PollEngine>) -> ExpirationScheduler {
    ExpirationScheduler::new(Arc::clone(engine), std::time::Duration::from_secs(3600))
}

#[tokio::test]
async fn test_overdue_poll_closes_exactly_once_across_ticks() {
    let engine = engine();
    let scheduler = scheduler_for(&engine);
    let created = engine.create_poll(red_blue_green()).await.unwrap();

    let after_deadline = Utc::now() + Duration::seconds(301);
    assert_eq!(scheduler.tick(after_deadline).await.unwrap(), 1);
    assert_eq!(scheduler.tick(after_deadline).await.unwrap(), 0);
    assert_eq!(scheduler.tick(after_deadline).await.unwrap(), 0);

    let err = engine
        .submit_vote(SubmitVote {
            poll_id: created.poll_id,
            voter_id: "late".into(),
            selections: vec![0],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::PollNotActive(_)));
}

#[tokio::test]
async fn test_late_vote_before_tick_is_still_accepted() {
    let engine = engine();
    let scheduler = scheduler_for(&engine);
    let created = engine
        .create_poll(CreatePoll { duration_seconds: 1, ..red_blue_green() })
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

    // Past the deadline in wall-clock terms, but the scheduler has not
    // ticked: rejection is driven by state, so the ballot still lands.
    engine
        .submit_vote(SubmitVote {
            poll_id: created.poll_id,
            voter_id: "under-the-wire".into(),
            selections: vec![0],
        })
        .await
        .unwrap();

    assert_eq!(scheduler.tick(Utc::now()).await.unwrap(), 1);

    // Once Closed has won, the same voter is rejected.
    let err = engine
        .submit_vote(SubmitVote {
            poll_id: created.poll_id,
            voter_id: "under-the-wire".into(),
            selections: vec![1],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::PollNotActive(_)));
}

#[tokio::test]
async fn test_sweep_covers_multiple_tenants() {
    let engine = engine();
    let scheduler = scheduler_for(&engine);

    engine.create_poll(red_blue_green()).await.unwrap();
    engine.create_poll(CreatePoll { guild_id: 200, ..red_blue_green() }).await.unwrap();

    let after_deadline = Utc::now() + Duration::seconds(301);
    assert_eq!(scheduler.tick(after_deadline).await.unwrap(), 2);
}

#[tokio::test]
async fn test_admin_close_races_scheduler_tick() {
    let engine = engine();
    let scheduler = scheduler_for(&engine);
    let created = engine.create_poll(red_blue_green()).await.unwrap();

    let after_deadline = Utc::now() + Duration::seconds(301);
    let admin = {
        let engine = Arc::clone(&engine);
        let poll_id = created.poll_id;
        tokio::spawn(async move { engine.close_poll(poll_id, CloseTrigger::Admin).await })
    };
    let sweep = scheduler.tick(after_deadline);

    // Both paths converge on the same CAS; whichever loses is a silent
    // no-op, and neither reports an error.
    let closed = sweep.await.unwrap();
    assert!(closed <= 1);
    admin.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_scheduler_closed_poll_proceeds_through_reveal() {
    let engine = engine();
    let scheduler = scheduler_for(&engine);
    let created = engine.create_poll(red_blue_green()).await.unwrap();

    engine
        .submit_vote(SubmitVote {
            poll_id: created.poll_id,
            voter_id: "voter-a".into(),
            selections: vec![0],
        })
        .await
        .unwrap();

    let after_deadline = Utc::now() + Duration::seconds(301);
    scheduler.tick(after_deadline).await.unwrap();

    // A scheduler-closed poll reveals exactly like an admin-closed one.
    let revealed = engine.reveal_poll(created.poll_id).await.unwrap();
    assert_eq!(revealed.results.len(), 1);
    assert!(revealed.results[0].was_correct);
}
