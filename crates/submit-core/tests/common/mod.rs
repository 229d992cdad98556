//! Shared fixtures for manager integration tests
//!
//! Tests run on a paused clock: [`settle`] returns only once every spawned
//! task has gone idle, which makes the manager's progress deterministic
//! between ledger closes.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rtxn_ledger_core::{AccountId, Amount, HmacSigner, TransactionTemplate};
use rtxn_submit_core::{
    FinalOutcome, SimulatedLedger, SubmitConfig, TransactionEvent, TransactionHandle, TransactionManager,
};
use tracing_subscriber::EnvFilter;

pub const FUNDING: u64 = 1_000_000_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn alice() -> AccountId {
    AccountId::parse("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh").unwrap()
}

pub fn bob() -> AccountId {
    AccountId::parse("rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe").unwrap()
}

pub fn carol() -> AccountId {
    AccountId::parse("rf1BiGeXwwQoi8Z2ueFYTEXSwuJYfV2Jpn").unwrap()
}

pub fn signer_for(account: &AccountId) -> Arc<HmacSigner> {
    Arc::new(HmacSigner::new(account.clone(), format!("secret-{}", account).into_bytes()))
}

/// Let spawned tasks run until nothing can make progress
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// A funded ledger with a running manager for alice
pub struct Harness {
    pub ledger: Arc<SimulatedLedger>,
    pub manager: TransactionManager,
}

impl Harness {
    pub async fn start(config: SubmitConfig) -> Self {
        init_tracing();
        let ledger = Arc::new(SimulatedLedger::new());
        ledger.fund(&alice(), FUNDING);
        ledger.fund(&bob(), FUNDING);
        Self::start_on(ledger, config).await
    }

    pub async fn start_on(ledger: Arc<SimulatedLedger>, config: SubmitConfig) -> Self {
        let manager = TransactionManager::start(ledger.clone(), signer_for(&alice()), config)
            .await
            .expect("manager starts");
        Self { ledger, manager }
    }

    pub fn payment(&self, drops: u64) -> TransactionTemplate {
        TransactionTemplate::payment(alice(), bob(), Amount::native(drops))
    }

    pub async fn submit(&self, template: TransactionTemplate) -> TransactionHandle {
        self.manager.submit(template).await.expect("manager accepts submissions")
    }

    /// Close a ledger and let the manager react to it
    pub async fn close(&self) -> u32 {
        let index = self.ledger.close_ledger();
        settle().await;
        index
    }

    pub async fn drive(&self, handles: &mut [TransactionHandle], max_ledgers: u32) -> Vec<FinalOutcome> {
        drive(&self.ledger, handles, max_ledgers).await
    }

    /// Sequences of alice's validated transactions, in ledger order
    pub fn validated_sequences(&self) -> Vec<u32> {
        self.ledger
            .validated_transactions(&alice())
            .iter()
            .map(|record| record.sequence)
            .collect()
    }
}

/// Close ledgers until every handle has seen its final event
pub async fn drive(ledger: &SimulatedLedger, handles: &mut [TransactionHandle], max_ledgers: u32) -> Vec<FinalOutcome> {
    let mut histories: Vec<Vec<TransactionEvent>> = vec![Vec::new(); handles.len()];
    let mut outcomes: Vec<Option<FinalOutcome>> = vec![None; handles.len()];

    for _ in 0..=max_ledgers {
        settle().await;
        for (i, handle) in handles.iter_mut().enumerate() {
            while outcomes[i].is_none() {
                match handle.try_next_event() {
                    Some(TransactionEvent::Final {
                        sequence,
                        hash,
                        result,
                        validated,
                    }) => {
                        outcomes[i] = Some(FinalOutcome {
                            result,
                            validated,
                            sequence,
                            hash,
                            history: std::mem::take(&mut histories[i]),
                        });
                    }
                    Some(event) => histories[i].push(event),
                    None => break,
                }
            }
        }
        if outcomes.iter().all(Option::is_some) {
            return outcomes.into_iter().flatten().collect();
        }
        ledger.close_ledger();
    }
    panic!("transactions still outstanding after {} ledgers", max_ledgers);
}

/// The handle produced its final event and nothing after it
pub async fn assert_stream_ended(handle: &mut TransactionHandle) {
    settle().await;
    assert_eq!(handle.next_event().await, None);
}
