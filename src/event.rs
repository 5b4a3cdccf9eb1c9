use std::sync::Mutex;

use serde::Serialize;

use crate::{
    AccountId, Amount,
    account::AutoInvestTrigger,
    currency::{Currency, CurrencyRef, Stablecoin},
    ledger::ReceiptId,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    Deposited {
        account: AccountId,
        amount: Amount,
        currency: Currency,
    },
    AutoInvested {
        account: AccountId,
        amount: Amount,
        currency: Currency,
        trigger: AutoInvestTrigger,
    },
    Withdrawn {
        account: AccountId,
        amount: Amount,
        receipt: ReceiptId,
    },
    EmergencyWithdrawn {
        account: AccountId,
        payout: Amount,
        fee: Amount,
        receipt: ReceiptId,
    },
    MinimumInvestmentUpdated {
        old: Amount,
        new: Amount,
    },
    EmergencyModeChanged {
        active: bool,
    },
    EmergencyFeeUpdated {
        old_bps: u16,
        new_bps: u16,
    },
    StablecoinAdded(Stablecoin),
    StablecoinRemoved {
        reference: CurrencyRef,
    },
    FeesWithdrawn {
        administrator: AccountId,
        amount: Amount,
        receipt: ReceiptId,
    },
    PayoutDeferred {
        receipt: ReceiptId,
        reason: String,
    },
    PayoutSettled {
        receipt: ReceiptId,
    },
}

/// Receives every event exactly once, after the state change it describes is committed.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LedgerEvent);
}

/// Writes the audit trail into the `tracing` pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: LedgerEvent) {
        tracing::info!(target: "savings_ledger::audit", ?event);
    }
}

/// Keeps events in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<LedgerEvent>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn take(&self) -> Vec<LedgerEvent> {
        std::mem::take(
            &mut *self
                .events
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: LedgerEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
