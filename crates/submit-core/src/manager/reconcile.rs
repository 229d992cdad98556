//! Resynchronisation with the server's validated state
//!
//! A pass reads the account's validated sequence and, when something looks
//! consumed without a local acknowledgement (or when forced), the validated
//! history since the oldest outstanding transaction entered the queue.
//! History finalizes transactions the stream never reported. Without it, a
//! slot whose last ledger has passed while the validated account sequence
//! still points at it is expired; anything that may have been consumed stays
//! pending until history can be read.

use rtxn_ledger_core::{codes, EngineResult};
use tracing::{debug, info, trace, warn};

use crate::connection::{self, AccountInfo, TransactionHistory};
use crate::error::ConnectionError;
use crate::transaction::TransactionState;

use super::worker::{log_finished, ManagerWorker, WorkerEvent};

impl ManagerWorker {
    /// Start a reconciliation pass, or queue one behind the running pass
    pub(super) fn request_reconcile(&mut self, force_history: bool, resubscribe: bool) {
        if self.reconcile.in_flight {
            self.reconcile.again = true;
            self.reconcile.force_history |= force_history;
            self.reconcile.resubscribe |= resubscribe;
            return;
        }
        if !self.connected {
            return;
        }
        self.reconcile.in_flight = true;

        let account = self.account.clone();
        let connection = self.connection.clone();
        let timeout = self.config.submission_timeout;
        let internal = self.internal_tx.clone();
        let lowest_outstanding = self.queue.lowest_sequence();
        let min_ledger = self.history_floor();
        trace!(%account, force_history, resubscribe, min_ledger, "reconciliation pass starting");

        tokio::spawn(async move {
            let resubscribed = if resubscribe {
                Some(connection::subscribe_both(connection.as_ref(), &account, timeout).await)
            } else {
                None
            };
            let info = connection::account_info(connection.as_ref(), &account, timeout).await;
            let consumed_unseen = match (&info, lowest_outstanding) {
                (Ok(info), Some(lowest)) => info.sequence > lowest,
                _ => false,
            };
            let history = if force_history || consumed_unseen {
                Some(
                    connection::account_transactions(connection.as_ref(), &account, Some(min_ledger), timeout)
                        .await,
                )
            } else {
                None
            };
            if internal
                .send(WorkerEvent::Reconciled {
                    resubscribed,
                    info,
                    history,
                })
                .await
                .is_err()
            {
                trace!(%account, "manager gone before reconciliation completed");
            }
        });
    }

    /// Earliest ledger any outstanding transaction could have landed in
    fn history_floor(&self) -> u32 {
        self.queue
            .iter()
            .flat_map(|slot| std::iter::once(&slot.active).chain(slot.superseded.iter()))
            .map(|tx| tx.created_ledger)
            .min()
            .unwrap_or(self.last_closed_ledger)
    }

    pub(super) fn on_reconciled(
        &mut self,
        resubscribed: Option<Result<(), ConnectionError>>,
        info: Result<AccountInfo, ConnectionError>,
        history: Option<Result<TransactionHistory, ConnectionError>>,
    ) {
        self.reconcile.in_flight = false;
        let was_reconnect = resubscribed.is_some();
        if let Some(Err(e)) = &resubscribed {
            warn!(account = %self.account, error = %e, "resubscription failed");
        }

        let have_info = match info {
            Ok(info) => {
                self.observe_account_info(&info);
                true
            }
            Err(e) => {
                debug!(account = %self.account, error = %e, "account info unavailable");
                false
            }
        };

        match history {
            Some(Ok(history)) => self.apply_history(history),
            Some(Err(e)) => {
                warn!(
                    account = %self.account,
                    error = %e,
                    outstanding = self.queue.len(),
                    "history unavailable, settling expiry from account sequence"
                );
                if have_info {
                    self.expire_unconsumed();
                }
            }
            None => {
                if have_info {
                    self.expire_unconsumed();
                }
            }
        }

        if was_reconnect && self.reconcile.resume_pending && self.connected {
            self.resume();
        }

        if self.reconcile.again {
            let force = std::mem::take(&mut self.reconcile.force_history);
            let resubscribe = std::mem::take(&mut self.reconcile.resubscribe);
            self.reconcile.again = false;
            self.request_reconcile(force, resubscribe);
        }
    }

    fn observe_account_info(&mut self, info: &AccountInfo) {
        if info.ledger_index < self.server_ledger {
            return;
        }
        self.server_sequence = info.sequence;
        self.server_ledger = info.ledger_index;
        // Closes missed while disconnected.
        self.last_closed_ledger = self.last_closed_ledger.max(info.ledger_index);
        let before = self.counter.next_sequence();
        self.counter.observe_server_sequence(info.sequence);
        if self.counter.next_sequence() != before {
            info!(
                account = %self.account,
                from = before,
                to = self.counter.next_sequence(),
                "adopted server sequence"
            );
        }
        for sequence in self.queue.sequences() {
            if sequence >= info.sequence {
                break;
            }
            if let Some(tx) = self.queue.active_mut(sequence) {
                tx.needs_reconcile = true;
            }
        }
        self.release_unused_sequences();
    }

    /// Expire slots the server's validated sequence proves unconsumed
    ///
    /// If the account still expects `sequence` in a validated ledger at or
    /// past the active transaction's last ledger, that transaction was never
    /// applied and never can be. Needs no history.
    fn expire_unconsumed(&mut self) {
        let (server_sequence, server_ledger) = (self.server_sequence, self.server_ledger);
        for sequence in self.queue.sequences() {
            if sequence < server_sequence {
                continue;
            }
            let expired = self
                .queue
                .active(sequence)
                .is_some_and(|tx| tx.last_ledger_sequence() <= server_ledger);
            if expired {
                debug!(account = %self.account, sequence, server_ledger, "expired by validated sequence");
                self.expire_active(sequence);
            }
        }
    }

    fn apply_history(&mut self, history: TransactionHistory) {
        let mut records: Vec<_> = history
            .records
            .into_iter()
            .filter(|record| record.validated && record.account == self.account)
            .collect();
        records.sort_by_key(|record| record.sequence);
        debug!(
            account = %self.account,
            records = records.len(),
            covers = history.ledger_index_max,
            "applying validated history"
        );
        for record in records {
            self.apply_validated(record);
        }
        self.resolve_unseen(history.ledger_index_max);
    }

    /// Settle slots the history proves were never filled by us
    fn resolve_unseen(&mut self, covered_through: u32) {
        for sequence in self.queue.sequences() {
            let Some(tx) = self.queue.active(sequence) else {
                continue;
            };
            let consumed = sequence < self.server_sequence && self.server_ledger <= covered_through;
            let lifetime_covered = tx.last_ledger_sequence() <= covered_through;

            if consumed {
                // Consumed by a transaction this manager does not know.
                if tx.needs_reconcile || lifetime_covered {
                    self.fail_consumed(sequence);
                }
            } else if lifetime_covered {
                self.expire_active(sequence);
            } else if tx.needs_reconcile {
                if let Some(tx) = self.queue.active_mut(sequence) {
                    tx.needs_reconcile = false;
                }
            }
        }
    }

    fn fail_consumed(&mut self, sequence: u32) {
        let Some(slot) = self.queue.remove(sequence) else {
            return;
        };
        warn!(account = %self.account, sequence, "slot consumed outside this manager");
        for tx in std::iter::once(slot.active).chain(slot.superseded) {
            let finished = tx.finish(
                TransactionState::Failed,
                EngineResult::from_static(codes::TEF_PAST_SEQ),
                false,
            );
            log_finished(&self.account, &finished);
        }
    }
}
