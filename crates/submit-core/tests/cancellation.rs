//! Cancellation by supersession
//!
//! A cancelled transaction keeps racing its no-op replacement for the same
//! sequence; whichever the ledger validates decides both outcomes.

mod common;

use pretty_assertions::assert_eq;
use rtxn_ledger_core::{codes, Drops};
use rtxn_submit_core::{SubmitConfig, SubmitError, TransactionId, TransactionState};

use common::{bob, settle, Harness, FUNDING};

#[tokio::test(start_paused = true)]
async fn test_cancel_before_send_finishes_immediately() {
    let h = Harness::start(SubmitConfig::default()).await;
    h.ledger.disconnect();
    settle().await;

    let mut handle = h.submit(h.payment(5_000)).await;
    settle().await;
    h.manager.cancel(handle.id()).await.unwrap();
    settle().await;

    let snapshot = h.manager.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.slots[0].is_filler);
    assert!(snapshot.slots[0].superseded.is_empty());

    h.ledger.reconnect();
    let mut handles = vec![handle];
    let outcomes = h.drive(&mut handles, 0).await;
    assert!(outcomes[0].result.is(codes::TEJ_SUPERSEDED));
    assert_eq!(outcomes[0].sequence, Some(1));
    handle = handles.remove(0);
    common::assert_stream_ended(&mut handle).await;

    h.close().await;
    assert_eq!(h.validated_sequences(), vec![1]);
    assert_eq!(h.ledger.balance(&bob()), Some(Drops::new(FUNDING)));
    assert!(h.manager.snapshot().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_lost_submission_lets_filler_win() {
    let h = Harness::start(SubmitConfig::default()).await;
    h.ledger.drop_next_submissions(1);

    let handle = h.submit(h.payment(5_000)).await;
    settle().await;
    h.manager.cancel(handle.id()).await.unwrap();
    settle().await;

    let snapshot = h.manager.snapshot().await.unwrap();
    assert_eq!(snapshot.slots[0].superseded, vec![handle.id()]);

    let mut handles = vec![handle];
    let outcomes = h.drive(&mut handles, 3).await;
    let cancelled = &outcomes[0];
    assert!(cancelled.result.is(codes::TEJ_SUPERSEDED));
    assert!(!cancelled.validated);
    assert_eq!(h.ledger.times_received(&cancelled.hash.unwrap()), 0);
    assert_eq!(h.validated_sequences(), vec![1]);
    assert_eq!(h.ledger.balance(&bob()), Some(Drops::new(FUNDING)));
}

/// Already applied: the original wins and the filler is discarded.
#[tokio::test(start_paused = true)]
async fn test_cancel_too_late_keeps_original() {
    let h = Harness::start(SubmitConfig::default()).await;

    let handle = h.submit(h.payment(5_000)).await;
    settle().await;
    assert_eq!(
        h.manager.snapshot().await.unwrap().slots[0].state,
        TransactionState::Proposed
    );
    h.manager.cancel(handle.id()).await.unwrap();

    let mut handles = vec![handle];
    let outcomes = h.drive(&mut handles, 3).await;
    assert!(outcomes[0].is_success());
    assert_eq!(h.ledger.balance(&bob()), Some(Drops::new(FUNDING + 5_000)));

    settle().await;
    let snapshot = h.manager.snapshot().await.unwrap();
    assert!(snapshot.is_empty());
    assert_eq!(snapshot.next_sequence, 2);

    let mut handles = vec![h.submit(h.payment(1)).await];
    let outcomes = h.drive(&mut handles, 3).await;
    assert_eq!(outcomes[0].sequence, Some(2));
    assert!(outcomes[0].is_success());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_unknown_transaction() {
    let h = Harness::start(SubmitConfig::default()).await;
    let result = h.manager.cancel(TransactionId::new()).await;
    assert!(matches!(result, Err(SubmitError::UnknownTransaction(_))));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_twice_is_refused() {
    let h = Harness::start(SubmitConfig::default()).await;
    h.ledger.drop_next_submissions(1);

    let handle = h.submit(h.payment(5_000)).await;
    settle().await;
    h.manager.cancel(handle.id()).await.unwrap();
    let again = h.manager.cancel(handle.id()).await;
    assert!(matches!(again, Err(SubmitError::UnknownTransaction(_))));
}
