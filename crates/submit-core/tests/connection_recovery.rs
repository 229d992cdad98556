//! Connection loss and history reconciliation tests
//!
//! Whatever the connection does, each transaction is submitted at most as
//! often as the protocol requires and still reaches exactly one final event.

mod common;

use pretty_assertions::assert_eq;
use rtxn_ledger_core::codes;
use rtxn_submit_core::{SubmitConfig, TransactionEvent, TransactionState};

use common::{settle, Harness};

#[tokio::test(start_paused = true)]
async fn test_disconnect_before_send_resumes_after_reconnect() {
    let h = Harness::start(SubmitConfig::default()).await;

    let handle = h.submit(h.payment(5_000)).await;
    h.ledger.disconnect();
    settle().await;

    let snapshot = h.manager.snapshot().await.unwrap();
    assert!(!snapshot.connected);
    assert_eq!(h.ledger.received_count(), 0);

    h.ledger.reconnect();
    settle().await;
    assert!(h.manager.snapshot().await.unwrap().connected);

    let mut handles = vec![handle];
    let outcomes = h.drive(&mut handles, 3).await;
    assert!(outcomes[0].is_success());
    assert_eq!(h.ledger.times_received(&outcomes[0].hash.unwrap()), 1);
}

/// The validation is only visible in history after the reconnect.
#[tokio::test(start_paused = true)]
async fn test_validated_while_disconnected_is_found_in_history() {
    let h = Harness::start(SubmitConfig::default()).await;

    let mut handle = h.submit(h.payment(5_000)).await;
    settle().await;
    assert_eq!(h.ledger.open_count(), 1);

    h.ledger.disconnect();
    settle().await;
    h.ledger.close_ledger();
    h.ledger.close_ledger();
    assert_eq!(handle.try_next_event().map(|e| e.is_final()), Some(false));
    while let Some(event) = handle.try_next_event() {
        assert!(!event.is_final());
    }

    h.ledger.reconnect();
    settle().await;

    let mut handles = vec![handle];
    let outcomes = h.drive(&mut handles, 0).await;
    assert!(outcomes[0].is_success());
    assert!(outcomes[0].validated);
    assert_eq!(h.ledger.times_received(&outcomes[0].hash.unwrap()), 1);
    assert!(h.manager.snapshot().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_history_failure_keeps_transaction_pending() {
    let h = Harness::start(SubmitConfig::default()).await;

    let handle = h.submit(h.payment(5_000)).await;
    settle().await;
    h.ledger.disconnect();
    settle().await;
    h.ledger.close_ledger();
    h.ledger.fail_next_history(1);
    h.ledger.reconnect();
    settle().await;

    // Still outstanding and not sent again.
    let snapshot = h.manager.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.slots[0].state, TransactionState::Proposed);
    assert_eq!(snapshot.slots[0].submit_count, 1);

    let mut handles = vec![handle];
    let outcomes = h.drive(&mut handles, 2).await;
    assert!(outcomes[0].is_success());
    assert_eq!(h.ledger.times_received(&outcomes[0].hash.unwrap()), 1);
}

/// Submissions that never reach the server are retried each ledger until
/// the last ledger passes; the slot is then filled with a no-op.
#[tokio::test(start_paused = true)]
async fn test_expired_transaction_is_gap_filled() {
    let h = Harness::start(SubmitConfig::default()).await;
    h.ledger.drop_next_submissions(3);

    let mut handles = vec![h.submit(h.payment(5_000)).await];
    let outcomes = h.drive(&mut handles, 6).await;

    let expired = &outcomes[0];
    assert!(expired.result.is(codes::TEJ_MAX_LEDGER));
    assert!(!expired.validated);
    assert_eq!(expired.sequence, Some(1));
    assert!(expired.history.contains(&TransactionEvent::Timeout { sequence: 1 }));
    assert!(expired
        .history
        .contains(&TransactionEvent::Resubmitted { sequence: 1, attempt: 3 }));
    assert_eq!(h.ledger.times_received(&expired.hash.unwrap()), 0);

    // The filler consumes sequence 1 and the next payment follows it.
    let mut handles = vec![h.submit(h.payment(6_000)).await];
    let outcomes = h.drive(&mut handles, 4).await;
    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[0].sequence, Some(2));
    assert_eq!(h.validated_sequences(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_filler_regeneration_is_bounded() {
    let config = SubmitConfig::default()
        .with_last_ledger_offset(2)
        .with_max_fill_attempts(1)
        .with_max_fee(rtxn_ledger_core::Drops::new(15));
    let h = Harness::start(config).await;
    h.ledger.drop_next_submissions(2);

    let mut handles = vec![h.submit(h.payment(5_000)).await];
    settle().await;
    // Fillers are capped at 15 drops; the server now wants 40.
    h.ledger.set_fee(rtxn_submit_core::FeeSettings {
        base_fee: rtxn_ledger_core::Drops::new(10),
        load_factor: 1_024,
    });

    let outcomes = h.drive(&mut handles, 4).await;
    assert!(outcomes[0].result.is(codes::TEJ_MAX_LEDGER));

    for _ in 0..5 {
        h.close().await;
    }
    let snapshot = h.manager.snapshot().await.unwrap();
    assert!(snapshot.is_empty());
    assert_eq!(h.ledger.account_sequence(&common::alice()), Some(1));
    // The abandoned sequence is handed out again.
    assert_eq!(snapshot.next_sequence, 1);

    h.ledger.set_fee(rtxn_submit_core::FeeSettings::default());
    h.close().await;
    let mut handles = vec![h.submit(h.payment(6_000)).await];
    let outcomes = h.drive(&mut handles, 3).await;
    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[0].sequence, Some(1));
    assert_eq!(h.validated_sequences(), vec![1]);
}

/// Without history the validated account sequence still proves that an
/// expired transaction never made it in.
#[tokio::test(start_paused = true)]
async fn test_expiry_without_history() {
    let h = Harness::start(SubmitConfig::default()).await;
    h.ledger.drop_next_submissions(3);
    h.ledger.fail_next_history(u32::MAX);

    let mut handles = vec![h.submit(h.payment(5_000)).await];
    let outcomes = h.drive(&mut handles, 6).await;
    let expired = &outcomes[0];
    assert!(expired.result.is(codes::TEJ_MAX_LEDGER));
    assert!(!expired.validated);
    assert_eq!(expired.sequence, Some(1));

    let mut handles = vec![h.submit(h.payment(6_000)).await];
    let outcomes = h.drive(&mut handles, 4).await;
    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[0].sequence, Some(2));
    assert_eq!(h.validated_sequences(), vec![1, 2]);
}
