//! Administrator-only operations.
//!
//! Each operation holds the config write lock from the authorization check
//! until its state change is committed, so admin operations are serialized
//! with each other and with every in-flight user operation.

use std::sync::RwLockWriteGuard;

use rust_decimal::{Decimal, prelude::Zero};
use tracing::info;

use crate::{
    AccountId, Amount,
    account::AccountEventKind,
    config::{AdminError, LedgerConfig},
    currency::{Currency, CurrencyRef, Stablecoin},
    event::LedgerEvent,
};

use super::{
    FeeWithdrawalReceipt, Ledger, LedgerError,
    payout::{PayoutInstruction, PayoutKind},
};

impl Ledger {
    fn config_as_admin(
        &self,
        caller: AccountId,
    ) -> Result<RwLockWriteGuard<'_, LedgerConfig>, LedgerError> {
        let config = self.write_config();
        config.ensure_admin(caller)?;
        Ok(config)
    }

    pub fn update_minimum_investment(
        &self,
        caller: AccountId,
        new_amount: Amount,
    ) -> Result<(), LedgerError> {
        let old = self.config_as_admin(caller)?.set_minimum_investment(new_amount)?;
        info!(old = %old, new = %new_amount, "minimum investment threshold updated");
        self.events.emit(LedgerEvent::MinimumInvestmentUpdated {
            old,
            new: new_amount,
        });
        Ok(())
    }

    pub fn activate_emergency_mode(&self, caller: AccountId) -> Result<(), LedgerError> {
        self.set_emergency_mode(caller, true)
    }

    pub fn deactivate_emergency_mode(&self, caller: AccountId) -> Result<(), LedgerError> {
        self.set_emergency_mode(caller, false)
    }

    fn set_emergency_mode(&self, caller: AccountId, active: bool) -> Result<(), LedgerError> {
        let changed = self.config_as_admin(caller)?.set_emergency_mode(active);
        if changed {
            info!(active, "emergency mode switched");
            self.events.emit(LedgerEvent::EmergencyModeChanged { active });
        }
        Ok(())
    }

    pub fn update_emergency_fee(&self, caller: AccountId, new_bps: u16) -> Result<(), LedgerError> {
        let old_bps = self.config_as_admin(caller)?.set_emergency_fee(new_bps)?;
        info!(old_bps, new_bps, "emergency withdrawal fee updated");
        self.events
            .emit(LedgerEvent::EmergencyFeeUpdated { old_bps, new_bps });
        Ok(())
    }

    pub fn add_stablecoin(
        &self,
        caller: AccountId,
        reference: &str,
        symbol: &str,
        decimals: u8,
    ) -> Result<(), LedgerError> {
        let coin = Stablecoin {
            reference: reference.to_string(),
            symbol: symbol.to_string(),
            decimals,
        };
        self.config_as_admin(caller)?.add_stablecoin(coin.clone())?;
        info!(reference, symbol, decimals, "stablecoin added");
        self.events.emit(LedgerEvent::StablecoinAdded(coin));
        Ok(())
    }

    /// Returns whether the reference was registered before the call.
    pub fn remove_stablecoin(&self, caller: AccountId, reference: &str) -> Result<bool, LedgerError> {
        let removed = self.config_as_admin(caller)?.remove_stablecoin(reference);
        if removed.is_some() {
            info!(reference, "stablecoin removed");
            self.events.emit(LedgerEvent::StablecoinRemoved {
                reference: reference.to_string(),
            });
        }
        Ok(removed.is_some())
    }

    /// Moves part of an account's pending balance to invested, independent of
    /// the threshold. `currency` names the investment target: a registered
    /// stablecoin, or the native currency when absent.
    pub fn trigger_auto_invest(
        &self,
        caller: AccountId,
        account: AccountId,
        amount: Amount,
        currency: Option<CurrencyRef>,
    ) -> Result<(), LedgerError> {
        let evt = {
            let config = self.config_as_admin(caller)?;
            let currency = match currency {
                Some(reference) if !config.stablecoins().contains(&reference) => {
                    return Err(LedgerError::UnsupportedCurrency { reference });
                }
                Some(reference) => Currency::Stablecoin(reference),
                None => Currency::Native,
            };
            self.with_account(account, |entry| {
                let evt = entry.handle_manual_invest(amount, currency)?;
                self.commit(entry, std::slice::from_ref(&evt))?;
                Ok(evt)
            })?
        };
        if let AccountEventKind::AutoInvested { currency, trigger } = evt.kind {
            info!(account, amount = %amount, %currency, "pending balance invested by administrator");
            self.events.emit(LedgerEvent::AutoInvested {
                account,
                amount,
                currency,
                trigger,
            });
        }
        Ok(())
    }

    /// Pays every accumulated emergency fee to the administrator.
    pub fn withdraw_fees(&self, caller: AccountId) -> Result<FeeWithdrawalReceipt, LedgerError> {
        let (receipt, timeout) = {
            let config = self.config_as_admin(caller)?;
            let mut totals = self.lock_totals();
            if totals.accumulated_fees <= Decimal::zero() {
                return Err(AdminError::NoFeesAccrued.into());
            }
            let amount = std::mem::take(&mut totals.accumulated_fees);
            let receipt = FeeWithdrawalReceipt {
                receipt: self.payouts.next_receipt(),
                administrator: config.administrator(),
                amount,
            };
            (receipt, config.payout_timeout)
        };

        info!(amount = %receipt.amount, receipt = receipt.receipt, "fees withdrawn");
        self.events.emit(LedgerEvent::FeesWithdrawn {
            administrator: receipt.administrator,
            amount: receipt.amount,
            receipt: receipt.receipt,
        });
        self.pay_out(
            PayoutInstruction {
                receipt: receipt.receipt,
                recipient: receipt.administrator,
                amount: receipt.amount,
                currency: Currency::Native,
                kind: PayoutKind::Fees,
            },
            timeout,
        )?;
        Ok(receipt)
    }
}
