use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    thread,
    time::Duration,
};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{
    AccountId, Amount,
    currency::Currency,
    event::{EventSink, LedgerEvent},
};

use super::ReceiptId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutKind {
    Withdrawal,
    EmergencyWithdrawal,
    Fees,
}

/// A transfer out of custody. `receipt` is the idempotency key: a channel
/// receiving the same receipt twice must move the funds only once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutInstruction {
    pub receipt: ReceiptId,
    pub recipient: AccountId,
    pub amount: Amount,
    pub currency: Currency,
    pub kind: PayoutKind,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayoutError {
    #[error("Payout was rejected: {0}")]
    Rejected(String),
    #[error("Payout did not complete within {0:?}")]
    TimedOut(Duration),
    #[error("Payout channel is unavailable: {0}")]
    Unavailable(String),
    #[error("Another attempt for this payout is still in flight")]
    InFlight,
}

/// External transfer primitive.
///
/// Called only after the ledger has committed the debit and released its
/// locks, so an implementation may call back into the ledger.
pub trait PayoutChannel: Send + Sync {
    fn transfer(&self, instruction: &PayoutInstruction) -> Result<(), PayoutError>;
}

/// Runs a tracked transfer on a worker thread and waits at most `timeout`.
///
/// The worker records the outcome in `book` itself. A transfer that outlives
/// the timeout therefore stays in flight, blocking retries, until it settles
/// or fails; a late settlement is announced on `events`.
pub(crate) fn deliver(
    channel: Arc<dyn PayoutChannel>,
    book: Arc<PayoutBook>,
    events: Arc<dyn EventSink>,
    instruction: PayoutInstruction,
    timeout: Duration,
) -> Result<(), PayoutError> {
    let receipt = instruction.receipt;
    let (tx, rx) = mpsc::sync_channel(1);
    let worker_book = book.clone();
    let spawned = thread::Builder::new()
        .name(format!("payout-{receipt}"))
        .spawn(move || {
            let result = channel.transfer(&instruction);
            if worker_book.complete(receipt, &result) {
                info!(receipt, "deferred payout settled");
                events.emit(LedgerEvent::PayoutSettled { receipt });
            }
            // receiver is gone when we already timed out
            let _ = tx.send(result);
        });
    if let Err(err) = spawned {
        let err = Err(PayoutError::Unavailable(err.to_string()));
        book.complete(receipt, &err);
        return err;
    }

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            let err = PayoutError::TimedOut(timeout);
            if book.mark_overdue(receipt, &err) {
                Err(err)
            } else {
                // settled between the timeout and the check
                Ok(())
            }
        }
        Err(RecvTimeoutError::Disconnected) => {
            // the channel panicked before the worker could record anything
            let err = Err(PayoutError::Unavailable(
                "payout worker exited without a result".to_string(),
            ));
            book.complete(receipt, &err);
            err
        }
    }
}

/// Payout whose debit is committed but whose transfer is not settled yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingPayout {
    pub instruction: PayoutInstruction,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// A transfer attempt is running, possibly past its timeout.
    pub in_flight: bool,
    /// The caller was told the payout is pending.
    pub overdue: bool,
}

pub(crate) enum RetryClaim {
    /// Nothing is owed under this receipt (settled or never issued).
    Settled,
    InFlight,
    Claimed(PayoutInstruction),
}

/// Receipt numbering plus the book of payouts that are not settled yet.
#[derive(Debug)]
pub(crate) struct PayoutBook {
    next_receipt: AtomicU64,
    outstanding: Mutex<BTreeMap<ReceiptId, PendingPayout>>,
}

impl Default for PayoutBook {
    fn default() -> Self {
        Self {
            next_receipt: AtomicU64::new(1),
            outstanding: Mutex::default(),
        }
    }
}

impl PayoutBook {
    pub fn next_receipt(&self) -> ReceiptId {
        self.next_receipt.fetch_add(1, Ordering::Relaxed)
    }

    fn outstanding(&self) -> std::sync::MutexGuard<'_, BTreeMap<ReceiptId, PendingPayout>> {
        self.outstanding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers the first delivery attempt.
    pub fn track(&self, instruction: PayoutInstruction) {
        self.outstanding().insert(
            instruction.receipt,
            PendingPayout {
                instruction,
                attempts: 1,
                last_error: None,
                in_flight: true,
                overdue: false,
            },
        );
    }

    /// Records the outcome of a transfer attempt. A success removes the
    /// payout and returns whether it had been reported as pending before, a
    /// failure frees it for a retry.
    pub fn complete(&self, receipt: ReceiptId, result: &Result<(), PayoutError>) -> bool {
        let mut outstanding = self.outstanding();
        match result {
            Ok(()) => outstanding
                .remove(&receipt)
                .is_some_and(|settled| settled.overdue || settled.attempts > 1),
            Err(err) => {
                if let Some(pending) = outstanding.get_mut(&receipt) {
                    pending.in_flight = false;
                    pending.overdue = true;
                    pending.last_error = Some(err.to_string());
                }
                false
            }
        }
    }

    /// Flags a payout whose attempt outlived its timeout. Returns `false` when
    /// the payout settled in the meantime.
    pub fn mark_overdue(&self, receipt: ReceiptId, error: &PayoutError) -> bool {
        let mut outstanding = self.outstanding();
        let Some(pending) = outstanding.get_mut(&receipt) else {
            return false;
        };
        pending.overdue = true;
        if pending.in_flight {
            pending.last_error = Some(error.to_string());
        }
        true
    }

    pub fn claim_retry(&self, receipt: ReceiptId) -> RetryClaim {
        match self.outstanding().get_mut(&receipt) {
            None => RetryClaim::Settled,
            Some(pending) if pending.in_flight => RetryClaim::InFlight,
            Some(pending) => {
                pending.in_flight = true;
                pending.attempts += 1;
                RetryClaim::Claimed(pending.instruction.clone())
            }
        }
    }

    /// Unsettled payouts, ordered by receipt.
    pub fn pending(&self) -> Vec<PendingPayout> {
        self.outstanding().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::event::RecordingEventSink;

    use super::*;

    struct Fixed(Result<(), PayoutError>);

    impl PayoutChannel for Fixed {
        fn transfer(&self, _: &PayoutInstruction) -> Result<(), PayoutError> {
            self.0.clone()
        }
    }

    struct Slow;

    impl PayoutChannel for Slow {
        fn transfer(&self, _: &PayoutInstruction) -> Result<(), PayoutError> {
            thread::sleep(Duration::from_millis(200));
            Ok(())
        }
    }

    struct Panicking;

    impl PayoutChannel for Panicking {
        fn transfer(&self, _: &PayoutInstruction) -> Result<(), PayoutError> {
            panic!("transfer blew up");
        }
    }

    fn instruction(receipt: ReceiptId) -> PayoutInstruction {
        PayoutInstruction {
            receipt,
            recipient: 1,
            amount: dec!(5),
            currency: Currency::Native,
            kind: PayoutKind::Withdrawal,
        }
    }

    fn tracked(receipt: ReceiptId) -> Arc<PayoutBook> {
        let book = Arc::new(PayoutBook::default());
        book.track(instruction(receipt));
        book
    }

    fn run(
        channel: impl PayoutChannel + 'static,
        book: &Arc<PayoutBook>,
        timeout: Duration,
    ) -> Result<(), PayoutError> {
        deliver(
            Arc::new(channel),
            book.clone(),
            Arc::new(RecordingEventSink::default()),
            instruction(1),
            timeout,
        )
    }

    #[test]
    fn deliver_reports_channel_result() {
        let timeout = Duration::from_secs(1);
        let book = tracked(1);
        assert_eq!(run(Fixed(Ok(())), &book, timeout), Ok(()));
        assert!(book.pending().is_empty());

        let book = tracked(1);
        let rejected = PayoutError::Rejected("frozen".into());
        assert_eq!(run(Fixed(Err(rejected.clone())), &book, timeout), Err(rejected));
        let pending = book.pending();
        assert!(!pending[0].in_flight);
        assert_eq!(pending[0].last_error.as_deref(), Some("Payout was rejected: frozen"));
    }

    #[test]
    fn timed_out_transfer_stays_in_flight_until_it_lands() {
        let timeout = Duration::from_millis(20);
        let book = tracked(1);
        let events = Arc::new(RecordingEventSink::default());
        let result = deliver(
            Arc::new(Slow),
            book.clone(),
            events.clone(),
            instruction(1),
            timeout,
        );
        assert_eq!(result, Err(PayoutError::TimedOut(timeout)));
        assert!(book.pending()[0].in_flight);
        assert!(matches!(book.claim_retry(1), RetryClaim::InFlight));

        thread::sleep(Duration::from_millis(600));
        assert!(book.pending().is_empty());
        assert!(matches!(book.claim_retry(1), RetryClaim::Settled));
        assert_eq!(events.events(), vec![LedgerEvent::PayoutSettled { receipt: 1 }]);
    }

    #[test]
    fn deliver_survives_panicking_channel() {
        let book = tracked(1);
        let err = run(Panicking, &book, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, PayoutError::Unavailable(_)));
        // freed for a retry
        assert!(!book.pending()[0].in_flight);
    }

    #[test]
    fn book_lifecycle() {
        let book = PayoutBook::default();
        let receipt = book.next_receipt();
        assert_eq!(book.next_receipt(), receipt + 1);

        book.track(instruction(receipt));
        assert!(book.pending()[0].in_flight);
        assert!(matches!(book.claim_retry(receipt), RetryClaim::InFlight));

        assert!(!book.complete(receipt, &Err(PayoutError::Rejected("nope".into()))));
        let pending = book.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("Payout was rejected: nope"));

        let RetryClaim::Claimed(claimed) = book.claim_retry(receipt) else {
            panic!("expected the payout to be claimable");
        };
        assert_eq!(claimed, instruction(receipt));
        assert!(matches!(book.claim_retry(receipt), RetryClaim::InFlight));
        // a retried payout that lands is announced
        assert!(book.complete(receipt, &Ok(())));
        assert!(matches!(book.claim_retry(receipt), RetryClaim::Settled));
        assert!(!book.mark_overdue(receipt, &PayoutError::TimedOut(Duration::ZERO)));
    }
}
