use std::sync::{Arc, LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rust_decimal::{Decimal, prelude::Zero};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    AccountId, Amount,
    account::{AccountError, AccountEvent, AccountEventKind, AccountLedgerEntry},
    config::{AdminError, ConfigError, LedgerConfig, LedgerSettings},
    currency::{Currency, CurrencyRef},
    event::{EventSink, LedgerEvent, TracingEventSink},
    time::{Clock, SimpleRate, SystemClock, YieldModel},
};

pub mod admin;
pub mod payout;
pub mod stats;
pub mod store;

use payout::{PayoutBook, PayoutChannel, PayoutError, PayoutInstruction, PayoutKind, PendingPayout, RetryClaim};
use store::{AccountHandle, AccountStore, InMemoryAccountStore};

pub type ReceiptId = u64;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Deposit of {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Amount, minimum: Amount },
    #[error("Ledger is halted by emergency mode")]
    SystemHalted,
    #[error("Currency `{reference}` is not supported")]
    UnsupportedCurrency { reference: CurrencyRef },
    #[error("Payout for receipt {receipt} is pending: {source}")]
    PayoutPending {
        receipt: ReceiptId,
        #[source]
        source: PayoutError,
    },
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Admin(#[from] AdminError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositReceipt {
    pub account: AccountId,
    pub amount: Amount,
    pub currency: Currency,
    /// Set when the deposit pushed the pending balance over the threshold.
    pub auto_invested: Option<Amount>,
    pub pending_investment: Amount,
    pub balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawalReceipt {
    pub receipt: ReceiptId,
    pub account: AccountId,
    pub amount: Amount,
    pub balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmergencyWithdrawalReceipt {
    pub receipt: ReceiptId,
    pub account: AccountId,
    pub payout: Amount,
    pub fee: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeWithdrawalReceipt {
    pub receipt: ReceiptId,
    pub administrator: AccountId,
    pub amount: Amount,
}

/// Ledger-wide counters. `total_deposits - total_withdrawals` always equals
/// the sum of all account balances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlobalTotals {
    pub total_deposits: Amount,
    pub total_withdrawals: Amount,
    pub accumulated_fees: Amount,
    pub total_auto_invested: Amount,
}

impl GlobalTotals {
    fn apply(&mut self, event: &AccountEvent) -> Result<(), AccountError> {
        let add = |total: Amount, amount: Amount| {
            total.checked_add(amount).ok_or(AccountError::AmountOverflow)
        };
        match &event.kind {
            AccountEventKind::Deposited { .. } => {
                self.total_deposits = add(self.total_deposits, event.amount)?;
            }
            AccountEventKind::AutoInvested { .. } => {
                self.total_auto_invested = add(self.total_auto_invested, event.amount)?;
            }
            AccountEventKind::Withdrawn => {
                self.total_withdrawals = add(self.total_withdrawals, event.amount)?;
            }
            AccountEventKind::EmergencyExited { fee } => {
                let total_withdrawals = add(self.total_withdrawals, event.amount)?;
                self.accumulated_fees = add(self.accumulated_fees, *fee)?;
                self.total_withdrawals = total_withdrawals;
            }
        }
        Ok(())
    }
}

fn recover<G>(result: LockResult<G>, what: &str) -> G {
    result.unwrap_or_else(|poisoned| {
        error!("{what} lock poisoned, recovering");
        poisoned.into_inner()
    })
}

fn lock_account(handle: &AccountHandle) -> MutexGuard<'_, AccountLedgerEntry> {
    recover(handle.lock(), "account")
}

/// Custodial savings ledger.
///
/// Locks are always taken in the order config, account, totals and released
/// before the payout channel is called.
pub struct Ledger {
    config: RwLock<LedgerConfig>,
    totals: Mutex<GlobalTotals>,
    store: Box<dyn AccountStore>,
    payout: Arc<dyn PayoutChannel>,
    payouts: Arc<PayoutBook>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    yield_model: Box<dyn YieldModel>,
}

impl Ledger {
    pub fn new(
        settings: &LedgerSettings,
        payout: Arc<dyn PayoutChannel>,
    ) -> Result<Self, ConfigError> {
        let config = LedgerConfig::try_from(settings)?;
        info!(
            administrator = config.administrator(),
            minimum_deposit = %config.minimum_deposit(),
            threshold = %config.minimum_investment_threshold(),
            fee_bps = config.emergency_withdrawal_fee_bps(),
            "ledger initialized"
        );
        Ok(Self {
            config: RwLock::new(config),
            totals: Mutex::default(),
            store: Box::new(InMemoryAccountStore::default()),
            payout,
            payouts: Arc::default(),
            events: Arc::new(TracingEventSink),
            clock: Arc::new(SystemClock),
            yield_model: Box::new(SimpleRate {
                annual_rate_bps: settings.annual_yield_bps,
            }),
        })
    }

    pub fn with_store(mut self, store: Box<dyn AccountStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_yield_model(mut self, yield_model: Box<dyn YieldModel>) -> Self {
        self.yield_model = yield_model;
        self
    }

    fn read_config(&self) -> RwLockReadGuard<'_, LedgerConfig> {
        recover(self.config.read(), "config")
    }

    fn write_config(&self) -> RwLockWriteGuard<'_, LedgerConfig> {
        recover(self.config.write(), "config")
    }

    fn lock_totals(&self) -> MutexGuard<'_, GlobalTotals> {
        recover(self.totals.lock(), "totals")
    }

    /// Runs `f` under the account's lock. A missing account is handed in as an
    /// empty scratch entry: it has nothing to withdraw or invest, so every
    /// operation routed here rejects it and nothing is persisted.
    fn with_account<T>(
        &self,
        account: AccountId,
        f: impl FnOnce(&mut AccountLedgerEntry) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        match self.store.load(account) {
            Some(handle) => {
                let mut entry = lock_account(&handle);
                f(&mut *entry)
            }
            None => f(&mut AccountLedgerEntry::default()),
        }
    }

    /// Applies validated events to the account and the global totals.
    ///
    /// Both are updated on copies first, so an overflow anywhere rejects the
    /// whole operation and leaves the ledger as it was. Nothing under these
    /// locks can panic, which keeps the guarded state consistent even when a
    /// lock is later recovered from poisoning.
    fn commit(
        &self,
        entry: &mut AccountLedgerEntry,
        events: &[AccountEvent],
    ) -> Result<(), LedgerError> {
        let mut totals = self.lock_totals();
        let mut next_entry = entry.clone();
        let mut next_totals = totals.clone();
        for evt in events {
            next_entry.apply(evt)?;
            next_totals.apply(evt)?;
        }
        *entry = next_entry;
        *totals = next_totals;
        Ok(())
    }

    pub fn deposit(
        &self,
        account: AccountId,
        amount: Amount,
        currency: Option<CurrencyRef>,
    ) -> Result<DepositReceipt, LedgerError> {
        let (receipt, events) = {
            let config = self.read_config();
            if config.emergency_mode() {
                return Err(LedgerError::SystemHalted);
            }
            let currency = match currency {
                Some(reference) if !config.stablecoins().contains(&reference) => {
                    return Err(LedgerError::UnsupportedCurrency { reference });
                }
                Some(reference) => Currency::Stablecoin(reference),
                None => Currency::Native,
            };
            if amount < config.minimum_deposit() {
                return Err(LedgerError::BelowMinimum {
                    amount,
                    minimum: config.minimum_deposit(),
                });
            }

            // every account counter is bounded by the ledger-wide deposits
            if self.lock_totals().total_deposits.checked_add(amount).is_none() {
                return Err(AccountError::AmountOverflow.into());
            }

            let handle = self.store.load_or_create(account);
            let mut entry = lock_account(&handle);
            let events = entry.handle_deposit(
                amount,
                currency.clone(),
                config.minimum_investment_threshold(),
                config.deposit_timestamp_policy,
                self.clock.now(),
            )?;
            self.commit(&mut entry, &events)?;
            let auto_invested = events
                .iter()
                .find(|evt| matches!(evt.kind, AccountEventKind::AutoInvested { .. }))
                .map(|evt| evt.amount);
            let receipt = DepositReceipt {
                account,
                amount,
                currency,
                auto_invested,
                pending_investment: entry.pending_investment(),
                balance: entry.current_balance(),
            };
            (receipt, events)
        };

        debug!(account, amount = %amount, currency = %receipt.currency, "deposit accepted");
        for evt in events {
            match evt.kind {
                AccountEventKind::Deposited { currency, .. } => {
                    self.events.emit(LedgerEvent::Deposited {
                        account,
                        amount: evt.amount,
                        currency,
                    })
                }
                AccountEventKind::AutoInvested { currency, trigger } => {
                    info!(account, amount = %evt.amount, %currency, "pending balance auto-invested");
                    self.events.emit(LedgerEvent::AutoInvested {
                        account,
                        amount: evt.amount,
                        currency,
                        trigger,
                    })
                }
                _ => {}
            }
        }
        Ok(receipt)
    }

    pub fn withdraw(
        &self,
        account: AccountId,
        amount: Amount,
    ) -> Result<WithdrawalReceipt, LedgerError> {
        let (receipt, timeout) = {
            let config = self.read_config();
            if !config.normal_withdrawals_open() {
                return Err(LedgerError::SystemHalted);
            }
            let receipt = self.with_account(account, |entry| {
                let evt = entry.handle_withdraw(amount)?;
                self.commit(entry, std::slice::from_ref(&evt))?;
                Ok(WithdrawalReceipt {
                    receipt: self.payouts.next_receipt(),
                    account,
                    amount,
                    balance: entry.current_balance(),
                })
            })?;
            (receipt, config.payout_timeout)
        };

        debug!(account, amount = %amount, receipt = receipt.receipt, "withdrawal committed");
        self.events.emit(LedgerEvent::Withdrawn {
            account,
            amount,
            receipt: receipt.receipt,
        });
        self.pay_out(
            PayoutInstruction {
                receipt: receipt.receipt,
                recipient: account,
                amount,
                currency: Currency::Native,
                kind: PayoutKind::Withdrawal,
            },
            timeout,
        )?;
        Ok(receipt)
    }

    /// Drains the whole balance minus the emergency fee. Open in every mode.
    pub fn emergency_withdraw(
        &self,
        account: AccountId,
    ) -> Result<EmergencyWithdrawalReceipt, LedgerError> {
        let (receipt, timeout) = {
            let config = self.read_config();
            let receipt = self.with_account(account, |entry| {
                let evt = entry.handle_emergency_exit(config.emergency_withdrawal_fee_bps())?;
                self.commit(entry, std::slice::from_ref(&evt))?;
                let fee = evt.fee();
                Ok(EmergencyWithdrawalReceipt {
                    receipt: self.payouts.next_receipt(),
                    account,
                    payout: evt.amount - fee,
                    fee,
                })
            })?;
            (receipt, config.payout_timeout)
        };

        warn!(
            account,
            payout = %receipt.payout,
            fee = %receipt.fee,
            receipt = receipt.receipt,
            "emergency withdrawal committed"
        );
        self.events.emit(LedgerEvent::EmergencyWithdrawn {
            account,
            payout: receipt.payout,
            fee: receipt.fee,
            receipt: receipt.receipt,
        });
        if receipt.payout > Decimal::zero() {
            self.pay_out(
                PayoutInstruction {
                    receipt: receipt.receipt,
                    recipient: account,
                    amount: receipt.payout,
                    currency: Currency::Native,
                    kind: PayoutKind::EmergencyWithdrawal,
                },
                timeout,
            )?;
        }
        Ok(receipt)
    }

    pub fn get_total_yield(&self, account: AccountId) -> Amount {
        let Some(handle) = self.store.load(account) else {
            return Decimal::zero();
        };
        let (balance, since) = {
            let entry = lock_account(&handle);
            (entry.current_balance(), entry.deposit_timestamp())
        };
        match since {
            Some(since) => self.yield_model.accrued(balance, self.clock.now() - since),
            None => Decimal::zero(),
        }
    }

    /// Delivers a committed payout. On failure the debit stays in place and
    /// the payout waits for [`Ledger::retry_payout`].
    fn pay_out(
        &self,
        instruction: PayoutInstruction,
        timeout: std::time::Duration,
    ) -> Result<(), LedgerError> {
        let receipt = instruction.receipt;
        self.payouts.track(instruction.clone());
        self.deliver(instruction, timeout)
            .map_err(|source| self.defer_payout(receipt, source))
    }

    fn deliver(
        &self,
        instruction: PayoutInstruction,
        timeout: std::time::Duration,
    ) -> Result<(), PayoutError> {
        payout::deliver(
            self.payout.clone(),
            self.payouts.clone(),
            self.events.clone(),
            instruction,
            timeout,
        )
    }

    fn defer_payout(&self, receipt: ReceiptId, source: PayoutError) -> LedgerError {
        warn!(receipt, error = %source, "payout deferred");
        self.events.emit(LedgerEvent::PayoutDeferred {
            receipt,
            reason: source.to_string(),
        });
        LedgerError::PayoutPending { receipt, source }
    }

    /// Re-attempts a deferred payout. Settled or unknown receipts are a no-op,
    /// and a payout whose previous attempt is still running is reported as
    /// [`PayoutError::InFlight`] instead of being sent twice.
    pub fn retry_payout(&self, receipt: ReceiptId) -> Result<(), LedgerError> {
        let instruction = match self.payouts.claim_retry(receipt) {
            RetryClaim::Settled => return Ok(()),
            RetryClaim::InFlight => {
                return Err(LedgerError::PayoutPending {
                    receipt,
                    source: PayoutError::InFlight,
                });
            }
            RetryClaim::Claimed(instruction) => instruction,
        };
        let timeout = self.read_config().payout_timeout;
        self.deliver(instruction, timeout)
            .map_err(|source| self.defer_payout(receipt, source))
    }

    /// Payouts whose debit is committed but whose transfer has not settled.
    /// Entries with `in_flight` set have an attempt running and are not
    /// retryable yet.
    pub fn pending_payouts(&self) -> Vec<PendingPayout> {
        self.payouts.pending()
    }
}
