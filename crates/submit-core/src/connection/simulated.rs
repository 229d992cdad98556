//! In-memory ledger server
//!
//! [`SimulatedLedger`] implements [`Connection`] against a tiny model of an
//! account/sequence ledger: native balances, per-account sequences, an open
//! ledger that is validated wholesale by [`SimulatedLedger::close_ledger`],
//! and the engine results a real server gives for the cases the manager has
//! to handle. Ledgers only close when told to, so tests are deterministic.
//!
//! Faults can be injected: dropping the connection, losing submissions on the
//! way in, losing responses on the way out, failing history queries.
//!
//! Transactions with a future sequence are rejected with `terPRE_SEQ` and
//! not held; the client has to resubmit them.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rtxn_ledger_core::{
    codes, decode_blob, AccountId, Amount, Drops, EngineResult, PreparedTransaction, TransactionKind,
    TxHash,
};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::{
    AccountInfo, Connection, ConnectionEvent, FeeSettings, LedgerRequest, LedgerResponse,
    TransactionHistory, TransactionRecord,
};
use crate::error::ConnectionError;

const EVENT_CAPACITY: usize = 1024;
const GENESIS_LEDGER: u32 = 100;

#[derive(Debug, Clone)]
struct SimAccount {
    /// Next sequence in the open ledger
    sequence: u32,
    /// Next sequence as of the last closed ledger
    validated_sequence: u32,
    balance: Drops,
    require_dest_tag: bool,
}

impl SimAccount {
    fn new(balance: Drops) -> Self {
        Self {
            sequence: 1,
            validated_sequence: 1,
            balance,
            require_dest_tag: false,
        }
    }
}

#[derive(Debug)]
struct SimState {
    connected: bool,
    closed_ledger: u32,
    fee: FeeSettings,
    accounts: HashMap<AccountId, SimAccount>,
    open: Vec<TransactionRecord>,
    validated: Vec<TransactionRecord>,
    validated_hashes: HashSet<TxHash>,
    subscribed: HashSet<AccountId>,
    subscribed_proposed: HashSet<AccountId>,
    /// Every blob that reached the server, in arrival order
    received: Vec<TxHash>,
    drop_submissions: u32,
    lose_responses: u32,
    fail_history: u32,
}

/// Deterministic in-memory [`Connection`]
#[derive(Debug)]
pub struct SimulatedLedger {
    state: Mutex<SimState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn result(code: &'static str) -> EngineResult {
    EngineResult::from_static(code)
}

impl SimulatedLedger {
    /// A connected server whose last closed ledger is 100
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(SimState {
                connected: true,
                closed_ledger: GENESIS_LEDGER,
                fee: FeeSettings::default(),
                accounts: HashMap::new(),
                open: Vec::new(),
                validated: Vec::new(),
                validated_hashes: HashSet::new(),
                subscribed: HashSet::new(),
                subscribed_proposed: HashSet::new(),
                received: Vec::new(),
                drop_submissions: 0,
                lose_responses: 0,
                fail_history: 0,
            }),
            events,
        }
    }

    /// Create or top up an account
    pub fn fund(&self, account: &AccountId, drops: u64) {
        let mut state = self.state.lock();
        state
            .accounts
            .entry(account.clone())
            .and_modify(|a| a.balance = Drops::new(a.balance.get().saturating_add(drops)))
            .or_insert_with(|| SimAccount::new(Drops::new(drops)));
    }

    /// Make payments to `account` require a destination tag
    pub fn set_require_dest_tag(&self, account: &AccountId, required: bool) {
        if let Some(a) = self.state.lock().accounts.get_mut(account) {
            a.require_dest_tag = required;
        }
    }

    pub fn set_fee(&self, fee: FeeSettings) {
        self.state.lock().fee = fee;
    }

    /// Validate the open ledger and start a new one
    ///
    /// Subscribers see each validated transaction, then the ledger close.
    pub fn close_ledger(&self) -> u32 {
        let mut events = Vec::new();
        let index = {
            let mut state = self.state.lock();
            let index = state.closed_ledger + 1;
            let open = std::mem::take(&mut state.open);
            for mut record in open {
                record.validated = true;
                record.ledger_index = index;
                if let Some(account) = state.accounts.get_mut(&record.account) {
                    account.validated_sequence = account.validated_sequence.max(record.sequence + 1);
                }
                state.validated_hashes.insert(record.hash);
                if state.subscribed.contains(&record.account) {
                    events.push(ConnectionEvent::Transaction(record.clone()));
                }
                state.validated.push(record);
            }
            state.closed_ledger = index;
            events.push(ConnectionEvent::LedgerClosed {
                ledger_index: index,
                fee: state.fee,
            });
            if !state.connected {
                events.clear();
            }
            index
        };
        debug!(ledger = index, "simulated ledger closed");
        self.publish(events);
        index
    }

    /// Drop the client connection; subscriptions are forgotten
    pub fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if !state.connected {
                return;
            }
            state.connected = false;
            state.subscribed.clear();
            state.subscribed_proposed.clear();
        }
        self.publish(vec![ConnectionEvent::Disconnected]);
    }

    pub fn reconnect(&self) {
        {
            let mut state = self.state.lock();
            if state.connected {
                return;
            }
            state.connected = true;
        }
        self.publish(vec![ConnectionEvent::Connected]);
    }

    /// The next `count` submissions never reach the server
    pub fn drop_next_submissions(&self, count: u32) {
        self.state.lock().drop_submissions = count;
    }

    /// The next `count` submissions are applied but their responses are lost
    pub fn lose_next_responses(&self, count: u32) {
        self.state.lock().lose_responses = count;
    }

    /// The next `count` history queries fail
    pub fn fail_next_history(&self, count: u32) {
        self.state.lock().fail_history = count;
    }

    pub fn ledger_index(&self) -> u32 {
        self.state.lock().closed_ledger
    }

    pub fn balance(&self, account: &AccountId) -> Option<Drops> {
        self.state.lock().accounts.get(account).map(|a| a.balance)
    }

    /// Next sequence as of the last closed ledger
    pub fn account_sequence(&self, account: &AccountId) -> Option<u32> {
        self.state.lock().accounts.get(account).map(|a| a.validated_sequence)
    }

    /// How many times a blob with this hash reached the server
    pub fn times_received(&self, hash: &TxHash) -> usize {
        self.state.lock().received.iter().filter(|h| *h == hash).count()
    }

    /// Total blobs that reached the server
    pub fn received_count(&self) -> usize {
        self.state.lock().received.len()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Validated transactions of an account, oldest first
    pub fn validated_transactions(&self, account: &AccountId) -> Vec<TransactionRecord> {
        self.state
            .lock()
            .validated
            .iter()
            .filter(|record| &record.account == account)
            .cloned()
            .collect()
    }

    fn publish(&self, events: Vec<ConnectionEvent>) {
        for event in events {
            // No receivers is fine.
            let _ = self.events.send(event);
        }
    }
}

impl SimState {
    fn submit(&mut self, blob: &[u8], events: &mut Vec<ConnectionEvent>) -> Result<LedgerResponse, ConnectionError> {
        if self.drop_submissions > 0 {
            self.drop_submissions -= 1;
            trace!("simulated submission lost in transit");
            return Err(ConnectionError::Timeout(Duration::ZERO));
        }
        let (prepared, hash) = match decode_blob(blob) {
            Ok(decoded) => decoded,
            Err(_) => {
                return Ok(LedgerResponse::Submitted {
                    result: result(codes::TEM_MALFORMED),
                    hash: TxHash::of_blob(blob),
                })
            }
        };
        self.received.push(hash);
        let engine_result = self.apply(&prepared, hash, events);
        trace!(sequence = prepared.sequence, %hash, result = %engine_result, "simulated submission");
        if self.lose_responses > 0 {
            self.lose_responses -= 1;
            return Err(ConnectionError::Timeout(Duration::ZERO));
        }
        Ok(LedgerResponse::Submitted {
            result: engine_result,
            hash,
        })
    }

    fn apply(&mut self, tx: &PreparedTransaction, hash: TxHash, events: &mut Vec<ConnectionEvent>) -> EngineResult {
        if self.validated_hashes.contains(&hash) {
            return result(codes::TEF_ALREADY);
        }
        if let Some(existing) = self.open.iter().find(|record| record.hash == hash) {
            return existing.result.clone();
        }
        let open_ledger = self.closed_ledger + 1;
        if tx.last_ledger_sequence < open_ledger {
            return result(codes::TEF_MAX_LEDGER);
        }
        let Some(sender) = self.accounts.get(&tx.account) else {
            return EngineResult::from_static("terNO_ACCOUNT");
        };
        if tx.sequence < sender.sequence {
            return result(codes::TEF_PAST_SEQ);
        }
        if tx.sequence > sender.sequence {
            return result(codes::TER_PRE_SEQ);
        }
        if tx.fee < self.fee.scaled_fee() {
            return result(codes::TEL_INSUF_FEE_P);
        }
        if sender.balance < tx.fee {
            return EngineResult::from_static("terINSUF_FEE_B");
        }
        let spendable = sender.balance.get() - tx.fee.get();

        let mut transfer = None;
        let engine_result = match &tx.kind {
            TransactionKind::Payment {
                destination,
                amount,
                destination_tag,
                ..
            } => {
                if destination == &tx.account {
                    return EngineResult::from_static("temREDUNDANT");
                }
                let tag_required = self
                    .accounts
                    .get(destination)
                    .map_or(false, |a| a.require_dest_tag);
                if tag_required && destination_tag.is_none() {
                    return result(codes::TEF_DST_TAG_NEEDED);
                }
                match amount {
                    Amount::Native(drops) if drops.get() > spendable => result(codes::TEC_UNFUNDED_PAYMENT),
                    Amount::Native(drops) => {
                        transfer = Some((destination.clone(), *drops));
                        EngineResult::success()
                    }
                    // No trust lines in this model.
                    Amount::Issued(_) => EngineResult::from_static("tecPATH_DRY"),
                }
            }
            _ => EngineResult::success(),
        };

        // Applied: the fee is claimed and the sequence consumed either way.
        if let Some(sender) = self.accounts.get_mut(&tx.account) {
            sender.sequence += 1;
            sender.balance = Drops::new(sender.balance.get() - tx.fee.get());
            if let Some((_, drops)) = &transfer {
                sender.balance = Drops::new(sender.balance.get() - drops.get());
            }
        }
        if let Some((destination, drops)) = transfer {
            let receiver = self
                .accounts
                .entry(destination)
                .or_insert_with(|| SimAccount::new(Drops::ZERO));
            receiver.balance = Drops::new(receiver.balance.get().saturating_add(drops.get()));
        }

        let record = TransactionRecord {
            account: tx.account.clone(),
            sequence: tx.sequence,
            hash,
            result: engine_result.clone(),
            validated: false,
            ledger_index: open_ledger,
        };
        if self.subscribed_proposed.contains(&tx.account) {
            events.push(ConnectionEvent::Transaction(record.clone()));
        }
        self.open.push(record);
        engine_result
    }

    fn account_info(&self, account: &AccountId) -> Result<LedgerResponse, ConnectionError> {
        let found = self
            .accounts
            .get(account)
            .ok_or_else(|| ConnectionError::remote(format!("actNotFound: {}", account)))?;
        Ok(LedgerResponse::AccountInfo(AccountInfo {
            account: account.clone(),
            sequence: found.validated_sequence,
            balance: found.balance,
            ledger_index: self.closed_ledger,
        }))
    }

    fn history(&mut self, account: &AccountId, min_ledger: Option<u32>) -> Result<LedgerResponse, ConnectionError> {
        if self.fail_history > 0 {
            self.fail_history -= 1;
            return Err(ConnectionError::remote("history unavailable"));
        }
        let floor = min_ledger.unwrap_or(0);
        let records = self
            .validated
            .iter()
            .filter(|record| &record.account == account && record.ledger_index >= floor)
            .cloned()
            .collect();
        Ok(LedgerResponse::AccountTransactions(TransactionHistory {
            records,
            ledger_index_max: self.closed_ledger,
        }))
    }
}

#[async_trait]
impl Connection for SimulatedLedger {
    async fn call(&self, request: LedgerRequest) -> Result<LedgerResponse, ConnectionError> {
        let mut events = Vec::new();
        let response = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(ConnectionError::Disconnected);
            }
            match request {
                LedgerRequest::Submit { blob } => state.submit(&blob, &mut events),
                LedgerRequest::AccountInfo { account } => state.account_info(&account),
                LedgerRequest::AccountTransactions { account, min_ledger } => state.history(&account, min_ledger),
                LedgerRequest::ServerFee => Ok(LedgerResponse::ServerFee(state.fee)),
                LedgerRequest::Subscribe { account, proposed } => {
                    if proposed {
                        state.subscribed_proposed.insert(account);
                    } else {
                        state.subscribed.insert(account);
                    }
                    Ok(LedgerResponse::Subscribed)
                }
            }
        };
        self.publish(events);
        response
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtxn_ledger_core::{HmacSigner, Signer, SignedTransaction, TransactionTemplate};

    fn alice() -> AccountId {
        AccountId::parse("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh").unwrap()
    }

    fn bob() -> AccountId {
        AccountId::parse("rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe").unwrap()
    }

    fn pay(sequence: u32, drops: u64, last_ledger: u32) -> SignedTransaction {
        let prepared = TransactionTemplate::payment(alice(), bob(), Amount::native(drops))
            .prepare(sequence, Drops::new(12), last_ledger)
            .unwrap();
        HmacSigner::new(alice(), b"k".to_vec()).sign(&prepared).unwrap()
    }

    async fn submit(ledger: &SimulatedLedger, tx: &SignedTransaction) -> Result<EngineResult, ConnectionError> {
        match ledger.call(LedgerRequest::Submit { blob: tx.blob.clone() }).await? {
            LedgerResponse::Submitted { result, .. } => Ok(result),
            _ => panic!("unexpected response"),
        }
    }

    fn ledger() -> SimulatedLedger {
        let ledger = SimulatedLedger::new();
        ledger.fund(&alice(), 1_000_000);
        ledger.fund(&bob(), 1_000_000);
        ledger
    }

    #[tokio::test]
    async fn test_sequence_rules() {
        let ledger = ledger();
        assert!(submit(&ledger, &pay(2, 10, 200)).await.unwrap().is(codes::TER_PRE_SEQ));
        assert!(submit(&ledger, &pay(1, 10, 200)).await.unwrap().is_success());
        assert!(submit(&ledger, &pay(1, 11, 200)).await.unwrap().is(codes::TEF_PAST_SEQ));
        // Same blob again is not applied twice
        assert!(submit(&ledger, &pay(1, 10, 200)).await.unwrap().is_success());
        assert_eq!(ledger.open_count(), 1);

        ledger.close_ledger();
        assert!(submit(&ledger, &pay(1, 10, 200)).await.unwrap().is(codes::TEF_ALREADY));
        assert_eq!(ledger.account_sequence(&alice()), Some(2));
        assert_eq!(ledger.balance(&bob()), Some(Drops::new(1_000_010)));
        assert_eq!(ledger.balance(&alice()), Some(Drops::new(1_000_000 - 10 - 12)));
    }

    #[tokio::test]
    async fn test_destination_tag_and_funding() {
        let ledger = ledger();
        ledger.set_require_dest_tag(&bob(), true);
        assert!(submit(&ledger, &pay(1, 10, 200)).await.unwrap().is(codes::TEF_DST_TAG_NEEDED));
        assert_eq!(ledger.open_count(), 0);

        let too_much = pay(1, 5_000_000, 200);
        ledger.set_require_dest_tag(&bob(), false);
        let r = submit(&ledger, &too_much).await.unwrap();
        assert!(r.is(codes::TEC_UNFUNDED_PAYMENT));
        assert!(r.consumes_sequence());
        ledger.close_ledger();
        assert_eq!(ledger.account_sequence(&alice()), Some(2));
        assert_eq!(ledger.balance(&alice()), Some(Drops::new(1_000_000 - 12)));
    }

    #[tokio::test]
    async fn test_last_ledger_enforced() {
        let ledger = ledger();
        let index = ledger.ledger_index();
        assert!(submit(&ledger, &pay(1, 10, index)).await.unwrap().is(codes::TEF_MAX_LEDGER));
        assert!(submit(&ledger, &pay(1, 10, index + 1)).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_faults() {
        let ledger = ledger();
        let tx = pay(1, 10, 200);

        ledger.drop_next_submissions(1);
        assert!(matches!(submit(&ledger, &tx).await, Err(ConnectionError::Timeout(_))));
        assert_eq!(ledger.times_received(&tx.hash), 0);

        ledger.lose_next_responses(1);
        assert!(matches!(submit(&ledger, &tx).await, Err(ConnectionError::Timeout(_))));
        assert_eq!(ledger.times_received(&tx.hash), 1);
        assert_eq!(ledger.open_count(), 1);

        ledger.disconnect();
        assert!(!ledger.is_connected());
        assert!(matches!(submit(&ledger, &tx).await, Err(ConnectionError::Disconnected)));
        ledger.reconnect();

        ledger.fail_next_history(1);
        let request = LedgerRequest::AccountTransactions {
            account: alice(),
            min_ledger: None,
        };
        assert!(ledger.call(request.clone()).await.is_err());
        assert!(ledger.call(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_event_delivery_follows_subscriptions() {
        let ledger = ledger();
        let mut events = ledger.events();
        ledger.subscribe_account(&alice()).await.unwrap();
        ledger.subscribe_account_proposed(&alice()).await.unwrap();

        submit(&ledger, &pay(1, 10, 200)).await.unwrap();
        match events.recv().await.unwrap() {
            ConnectionEvent::Transaction(record) => assert!(!record.validated),
            other => panic!("unexpected {:?}", other),
        }

        let index = ledger.close_ledger();
        match events.recv().await.unwrap() {
            ConnectionEvent::Transaction(record) => {
                assert!(record.validated);
                assert_eq!(record.ledger_index, index);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            ConnectionEvent::LedgerClosed { ledger_index, .. } if ledger_index == index
        ));

        // Subscriptions do not survive a reconnect
        ledger.disconnect();
        ledger.close_ledger();
        ledger.reconnect();
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Disconnected);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
        submit(&ledger, &pay(2, 10, 200)).await.unwrap();
        ledger.close_ledger();
        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::LedgerClosed { .. }));
    }

    #[tokio::test]
    async fn test_history_and_account_info() {
        let ledger = ledger();
        submit(&ledger, &pay(1, 10, 200)).await.unwrap();
        let index = ledger.close_ledger();

        match ledger.call(LedgerRequest::AccountInfo { account: alice() }).await.unwrap() {
            LedgerResponse::AccountInfo(info) => {
                assert_eq!(info.sequence, 2);
                assert_eq!(info.ledger_index, index);
            }
            other => panic!("unexpected {:?}", other),
        }
        let request = LedgerRequest::AccountTransactions {
            account: alice(),
            min_ledger: Some(index + 1),
        };
        match ledger.call(request).await.unwrap() {
            LedgerResponse::AccountTransactions(history) => {
                assert!(history.records.is_empty());
                assert_eq!(history.ledger_index_max, index);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
