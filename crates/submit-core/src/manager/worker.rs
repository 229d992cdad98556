//! Worker task state and event loop

use std::sync::Arc;

use rtxn_ledger_core::{
    codes, AccountId, EngineResult, Signer, TransactionTemplate, TxHash,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};

use crate::config::SubmitConfig;
use crate::connection::{
    self, AccountInfo, Connection, ConnectionEvent, FeeSettings, TransactionHistory,
};
use crate::error::{ConnectionError, SubmitResult};
use crate::events::TransactionEvent;
use crate::transaction::{
    AccountSequenceCounter, PendingQueue, PendingTransaction, QueueSnapshot, TransactionState,
};

use super::fees::FeeSchedule;
use super::ManagerCommand;

/// Completions of connection calls spawned by the worker
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    SubmitCompleted {
        sequence: u32,
        hash: TxHash,
        outcome: Result<EngineResult, ConnectionError>,
    },
    Reconciled {
        resubscribed: Option<Result<(), ConnectionError>>,
        info: Result<AccountInfo, ConnectionError>,
        history: Option<Result<TransactionHistory, ConnectionError>>,
    },
}

/// Progress of history reconciliation
#[derive(Debug, Default)]
pub(crate) struct ReconcileState {
    /// A reconciliation task is running
    pub in_flight: bool,
    /// Another pass was requested while one was running
    pub again: bool,
    pub force_history: bool,
    pub resubscribe: bool,
    /// Resubmission is held back until a post-reconnect pass completes
    pub resume_pending: bool,
}

pub(crate) struct ManagerWorker {
    pub(super) account: AccountId,
    pub(super) config: SubmitConfig,
    pub(super) connection: Arc<dyn Connection>,
    pub(super) signer: Arc<dyn Signer>,
    pub(super) queue: PendingQueue,
    pub(super) counter: AccountSequenceCounter,
    pub(super) fees: FeeSchedule,
    pub(super) last_closed_ledger: u32,
    /// Sequence the server expects next, as of `server_ledger`
    pub(super) server_sequence: u32,
    pub(super) server_ledger: u32,
    pub(super) connected: bool,
    pub(super) reconcile: ReconcileState,
    pub(super) internal_tx: mpsc::Sender<WorkerEvent>,
    internal_rx: Option<mpsc::Receiver<WorkerEvent>>,
}

impl ManagerWorker {
    pub(super) fn new(
        connection: Arc<dyn Connection>,
        signer: Arc<dyn Signer>,
        config: SubmitConfig,
        info: AccountInfo,
        fee: FeeSettings,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::channel(config.command_buffer);
        Self {
            account: info.account.clone(),
            counter: AccountSequenceCounter::new(info.sequence),
            fees: FeeSchedule::new(fee),
            last_closed_ledger: info.ledger_index,
            server_sequence: info.sequence,
            server_ledger: info.ledger_index,
            connected: connection.is_connected(),
            queue: PendingQueue::new(),
            reconcile: ReconcileState::default(),
            config,
            connection,
            signer,
            internal_tx,
            internal_rx: Some(internal_rx),
        }
    }

    pub(super) async fn run(
        mut self,
        mut commands: mpsc::Receiver<ManagerCommand>,
        mut events: broadcast::Receiver<ConnectionEvent>,
    ) {
        let Some(mut internal_rx) = self.internal_rx.take() else {
            error!(account = %self.account, "worker started twice");
            return;
        };
        debug!(account = %self.account, "transaction manager loop starting");

        // Set once every manager handle is gone; the loop then runs until
        // the queue drains so each outstanding transaction still finishes.
        let mut detached = false;
        loop {
            if detached && self.queue.is_empty() {
                debug!(account = %self.account, "queue drained after handles dropped");
                break;
            }

            tokio::select! {
                biased;

                Some(event) = internal_rx.recv() => {
                    self.on_worker_event(event);
                }
                event = events.recv() => match event {
                    Ok(event) => self.on_connection_event(event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(account = %self.account, missed, "event stream lagged, reconciling");
                        self.request_reconcile(true, false);
                    }
                    Err(RecvError::Closed) => {
                        error!(account = %self.account, "connection event stream closed");
                        break;
                    }
                },
                command = commands.recv(), if !detached => match command {
                    Some(command) => {
                        if !self.on_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!(
                            account = %self.account,
                            outstanding = self.queue.len(),
                            "all manager handles dropped"
                        );
                        detached = true;
                    }
                },
            }
        }

        let outstanding = self.queue.len();
        if outstanding > 0 {
            warn!(account = %self.account, outstanding, "transaction manager stopped with work outstanding");
        }
        info!(account = %self.account, "transaction manager loop terminated");
    }

    /// Returns false when the loop should stop
    fn on_command(&mut self, command: ManagerCommand) -> bool {
        match command {
            ManagerCommand::Submit { id, template, events } => {
                self.handle_submit(id, template, events);
            }
            ManagerCommand::Cancel { id, reply } => {
                let _ = reply.send(self.handle_cancel(id));
            }
            ManagerCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            ManagerCommand::Shutdown { reply } => {
                info!(account = %self.account, outstanding = self.queue.len(), "shutdown requested");
                self.queue.drain();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::SubmitCompleted {
                sequence,
                hash,
                outcome,
            } => self.on_connection_result(super::handlers::ConnectionResult {
                sequence,
                hash,
                outcome,
                validated: false,
                ledger_index: None,
                from_submit: true,
            }),
            WorkerEvent::Reconciled {
                resubscribed,
                info,
                history,
            } => self.on_reconciled(resubscribed, info, history),
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => self.on_reconnect(),
            ConnectionEvent::Disconnected => self.on_disconnect(),
            ConnectionEvent::LedgerClosed { ledger_index, fee } => {
                self.on_ledger_closed(ledger_index, fee)
            }
            ConnectionEvent::Transaction(record) => {
                if record.account != self.account {
                    return;
                }
                self.on_connection_result(super::handlers::ConnectionResult {
                    sequence: record.sequence,
                    hash: record.hash,
                    outcome: Ok(record.result),
                    validated: record.validated,
                    ledger_index: Some(record.ledger_index),
                    from_submit: false,
                });
            }
        }
    }

    pub(super) fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            account: self.account.clone(),
            next_sequence: self.counter.next_sequence(),
            last_validated_sequence: self.counter.last_validated_sequence(),
            last_closed_ledger: self.last_closed_ledger,
            connected: self.connected,
            slots: self.queue.slot_snapshots(),
        }
    }

    /// Whether new submissions may go out right now
    pub(super) fn can_send(&self) -> bool {
        self.connected && !self.reconcile.resume_pending
    }

    /// Send the active transaction of a slot, first time or again
    pub(super) fn dispatch(&mut self, sequence: u32) {
        if !self.can_send() {
            return;
        }
        let closed = self.last_closed_ledger;
        let Some(tx) = self.queue.active_mut(sequence) else {
            return;
        };
        if tx.in_flight || tx.state.is_terminal() {
            return;
        }

        let resubmission = tx.submit_count > 0;
        let next_state = if resubmission {
            TransactionState::Resubmitting
        } else {
            TransactionState::Submitted
        };
        if let Err(e) = tx.transition_to(next_state) {
            error!(sequence, error = %e, "refusing to send transaction");
            return;
        }
        tx.submit_count += 1;
        tx.in_flight = true;
        tx.last_submit_ledger = Some(closed);

        let hash = tx.hash();
        if resubmission {
            debug!(account = %self.account, sequence, %hash, attempt = tx.submit_count, "resubmitting");
            tx.emit(TransactionEvent::Resubmitted {
                sequence,
                attempt: tx.submit_count,
            });
        } else {
            debug!(account = %self.account, sequence, %hash, "submitting");
        }

        let blob = tx.signed.blob.clone();
        let connection = self.connection.clone();
        let timeout = self.config.submission_timeout;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let outcome = connection::submit_blob(connection.as_ref(), blob, timeout).await;
            if internal
                .send(WorkerEvent::SubmitCompleted {
                    sequence,
                    hash,
                    outcome,
                })
                .await
                .is_err()
            {
                trace!(sequence, "manager gone before submit completed");
            }
        });
    }

    /// Sign a no-op at `sequence` to consume an abandoned slot
    pub(super) fn build_filler(&self, sequence: u32, fill_attempt: u32) -> SubmitResult<PendingTransaction> {
        let fee = self.fees.compute(self.config.fee_cushion).min(self.config.max_fee);
        let last_ledger = self.last_closed_ledger + self.config.default_last_ledger_offset;
        let prepared = TransactionTemplate::noop(self.account.clone()).prepare(sequence, fee, last_ledger)?;
        let signed = self.signer.sign(&prepared)?;
        Ok(PendingTransaction::filler(signed, fill_attempt).created_at(self.last_closed_ledger))
    }

    /// Fail every transaction racing for a slot and drop it
    pub(super) fn abandon_slot(&mut self, sequence: u32, terminal: TransactionState, result: EngineResult) {
        let Some(slot) = self.queue.remove(sequence) else {
            return;
        };
        error!(account = %self.account, sequence, %result, "abandoning sequence slot");
        let finished = slot.active.finish(terminal, result, false);
        log_finished(&self.account, &finished);
        for tx in slot.superseded {
            let finished = tx.finish(
                TransactionState::Failed,
                EngineResult::from_static(codes::TEJ_ABORT),
                false,
            );
            log_finished(&self.account, &finished);
        }
        self.release_unused_sequences();
    }

    /// Rewind the counter to the server's sequence when nothing at or above
    /// it is still queued, so abandoned slots are handed out again
    pub(super) fn release_unused_sequences(&mut self) {
        let server_sequence = self.server_sequence;
        if self.queue.iter().any(|slot| slot.sequence() >= server_sequence) {
            return;
        }
        let before = self.counter.next_sequence();
        self.counter.rewind(server_sequence);
        let after = self.counter.next_sequence();
        if after != before {
            info!(account = %self.account, from = before, to = after, "released unused sequences");
        }
    }
}

pub(super) fn log_finished(account: &AccountId, finished: &crate::transaction::FinishedTransaction) {
    if let Err(e) = &finished.transition {
        error!(%account, sequence = finished.sequence, error = %e, "unexpected terminal transition");
    }
    info!(
        %account,
        id = %finished.id,
        sequence = finished.sequence,
        hash = %finished.hash,
        result = %finished.result,
        from = ?finished.previous,
        state = ?finished.state,
        filler = finished.is_filler,
        fill_attempt = finished.fill_attempt,
        "transaction final"
    );
}
