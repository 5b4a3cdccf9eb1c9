use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, prelude::Zero};
use serde::Serialize;

use crate::{AccountId, Amount, currency::Stablecoin};

use super::{Ledger, lock_account};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractStats {
    pub total_deposits: Amount,
    pub total_withdrawals: Amount,
    /// Accounts holding a positive balance.
    pub active_accounts: usize,
    pub accumulated_fees: Amount,
    pub total_auto_invested: Amount,
    pub emergency_mode: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BalanceDetails {
    pub account: AccountId,
    pub total_deposited: Amount,
    pub total_withdrawn: Amount,
    pub current_balance: Amount,
    pub pending_investment: Amount,
    pub total_invested: Amount,
    pub deposit_timestamp: Option<DateTime<Utc>>,
    pub used_emergency_exit: bool,
}

impl Ledger {
    pub fn get_contract_stats(&self) -> ContractStats {
        let emergency_mode = self.read_config().emergency_mode();
        let active_accounts = self
            .store
            .accounts()
            .iter()
            .filter(|(_, handle)| lock_account(handle).current_balance() > Decimal::zero())
            .count();
        let totals = self.lock_totals().clone();
        ContractStats {
            total_deposits: totals.total_deposits,
            total_withdrawals: totals.total_withdrawals,
            active_accounts,
            accumulated_fees: totals.accumulated_fees,
            total_auto_invested: totals.total_auto_invested,
            emergency_mode,
        }
    }

    /// Zeroed defaults for accounts that never deposited.
    pub fn get_user_balance_details(&self, account: AccountId) -> BalanceDetails {
        let Some(handle) = self.store.load(account) else {
            return BalanceDetails {
                account,
                ..Default::default()
            };
        };
        let entry = lock_account(&handle);
        BalanceDetails {
            account,
            total_deposited: entry.total_deposited(),
            total_withdrawn: entry.total_withdrawn(),
            current_balance: entry.current_balance(),
            pending_investment: entry.pending_investment(),
            total_invested: entry.total_invested(),
            deposit_timestamp: entry.deposit_timestamp(),
            used_emergency_exit: entry.used_emergency_exit(),
        }
    }

    /// Every known account, ordered by id.
    pub fn accounts(&self) -> Vec<BalanceDetails> {
        self.store
            .accounts()
            .into_iter()
            .map(|(account, _)| self.get_user_balance_details(account))
            .collect()
    }

    pub fn get_supported_stablecoins(&self) -> Vec<Stablecoin> {
        self.read_config().stablecoins().list()
    }

    pub fn is_stablecoin_supported(&self, reference: &str) -> bool {
        self.read_config().stablecoins().contains(reference)
    }

    pub fn emergency_mode(&self) -> bool {
        self.read_config().emergency_mode()
    }

    pub fn minimum_deposit(&self) -> Amount {
        self.read_config().minimum_deposit()
    }

    pub fn minimum_investment_threshold(&self) -> Amount {
        self.read_config().minimum_investment_threshold()
    }

    pub fn emergency_withdrawal_fee_bps(&self) -> u16 {
        self.read_config().emergency_withdrawal_fee_bps()
    }

    pub fn administrator(&self) -> AccountId {
        self.read_config().administrator()
    }
}
