//! State machine edges and idempotence through the engine's public surface.

use crate::harness::{engine, red_blue_green};
use tally_core::poll::PollState;
use tally_core::{CloseTrigger, NotActiveReason, PollError};

#[tokio::test]
async fn test_created_poll_is_immediately_active() {
    let engine = engine();
    let created = engine.create_poll(red_blue_green()).await.unwrap();

    // No observable Draft: the active instance exists as soon as create
    // returns.
    let active = engine
        .registry()
        .active_instance(&tally_core::TenantKey::new(crate::harness::GUILD, crate::harness::POLL_TYPE))
        .await
        .unwrap()
        .expect("created poll must be active");
    assert_eq!(active.id, created.poll_id);
    assert_eq!(active.state, PollState::Active);
}

#[tokio::test]
async fn test_full_lifecycle_edges() {
    let engine = engine();
    let created = engine.create_poll(red_blue_green()).await.unwrap();

    engine.close_poll(created.poll_id, CloseTrigger::Admin).await.unwrap();
    engine.reveal_poll(created.poll_id).await.unwrap();
    engine.archive_poll(created.poll_id).await.unwrap();

    // Terminal: voting is rejected with the already-closed reason.
    let err = engine
        .submit_vote(tally_core::engine::SubmitVote {
            poll_id: created.poll_id,
            voter_id: "late".into(),
            selections: vec![0],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::PollNotActive(NotActiveReason::AlreadyClosed(_))));
}

#[tokio::test]
async fn test_close_after_reveal_is_noop_success() {
    let engine = engine();
    let created = engine.create_poll(red_blue_green()).await.unwrap();
    engine.reveal_poll(created.poll_id).await.unwrap();

    // A duplicate admin close arriving after reveal resolves silently.
    engine.close_poll(created.poll_id, CloseTrigger::Admin).await.unwrap();
}

#[tokio::test]
async fn test_close_after_cancel_is_noop_success() {
    let engine = engine();
    let created = engine.create_poll(red_blue_green()).await.unwrap();
    engine.cancel_poll(created.poll_id).await.unwrap();

    // The scheduler may still tick a cancelled poll's id; that must not
    // surface an error.
    engine.close_poll(created.poll_id, CloseTrigger::Scheduler).await.unwrap();
}

#[tokio::test]
async fn test_reveal_on_cancelled_poll_is_illegal() {
    let engine = engine();
    let created = engine.create_poll(red_blue_green()).await.unwrap();
    engine.cancel_poll(created.poll_id).await.unwrap();

    let err = engine.reveal_poll(created.poll_id).await.unwrap_err();
    assert!(matches!(
        err,
        PollError::IllegalTransition { from: PollState::Cancelled, to: PollState::Revealed }
    ));
}

#[tokio::test]
async fn test_archive_before_reveal_is_illegal() {
    let engine = engine();
    let created = engine.create_poll(red_blue_green()).await.unwrap();

    let err = engine.archive_poll(created.poll_id).await.unwrap_err();
    assert!(matches!(
        err,
        PollError::IllegalTransition { from: PollState::Active, to: PollState::Archived }
    ));
}

#[tokio::test]
async fn test_cancelled_poll_never_scores() {
    let engine = engine();
    let created = engine.create_poll(red_blue_green()).await.unwrap();
    engine
        .submit_vote(tally_core::engine::SubmitVote {
            poll_id: created.poll_id,
            voter_id: "voter-a".into(),
            selections: vec![0],
        })
        .await
        .unwrap();
    engine.cancel_poll(created.poll_id).await.unwrap();

    let snapshot = engine
        .dashboard(crate::harness::GUILD, crate::harness::POLL_TYPE, None)
        .await
        .unwrap();
    assert!(snapshot.entries.is_empty(), "cancelled polls award no points");
}

#[tokio::test]
async fn test_operations_on_missing_poll() {
    let engine = engine();

    assert!(matches!(
        engine.close_poll(7777, CloseTrigger::Admin).await.unwrap_err(),
        PollError::PollNotActive(NotActiveReason::NotFound(7777))
    ));
    assert!(matches!(
        engine.reveal_poll(7777).await.unwrap_err(),
        PollError::PollNotActive(NotActiveReason::NotFound(7777))
    ));
    assert!(matches!(
        engine.cancel_poll(7777).await.unwrap_err(),
        PollError::PollNotActive(NotActiveReason::NotFound(7777))
    ));
    assert!(matches!(
        engine.archive_poll(7777).await.unwrap_err(),
        PollError::PollNotActive(NotActiveReason::NotFound(7777))
    ));
}

#[tokio::test]
async fn test_new_poll_allowed_after_previous_closes() {
    let engine = engine();
    let first = engine.create_poll(red_blue_green()).await.unwrap();
    engine.close_poll(first.poll_id, CloseTrigger::Admin).await.unwrap();

    // The active slot frees up the moment the close wins, without waiting
    // for reveal or archive.
    let second = engine.create_poll(red_blue_green()).await.unwrap();
    assert_ne!(first.poll_id, second.poll_id);
}
