use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy, prelude::Zero};
use serde::Serialize;
use thiserror::Error;

use crate::{AMOUNT_SCALE, Amount, config::DepositTimestampPolicy, currency::Currency};

pub const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoInvestTrigger {
    /// Pending balance reached the investment threshold during a deposit.
    Automatic,
    /// Administrator moved part of the pending balance explicitly.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountEventKind {
    Deposited {
        currency: Currency,
        yield_basis: DateTime<Utc>,
    },
    AutoInvested {
        currency: Currency,
        trigger: AutoInvestTrigger,
    },
    Withdrawn,
    /// `amount` is the whole balance, `fee` is retained by the ledger.
    EmergencyExited { fee: Amount },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountEvent {
    pub amount: Amount,
    pub kind: AccountEventKind,
}

impl AccountEvent {
    /// Part of `amount` retained by the ledger instead of leaving custody.
    pub fn fee(&self) -> Amount {
        match self.kind {
            AccountEventKind::EmergencyExited { fee } => fee,
            _ => Decimal::zero(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Amount must be greater than zero")]
    ZeroAmount,
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },
    #[error("Account has no balance to withdraw")]
    NoBalance,
    #[error("Insufficient pending investment: requested {requested}, pending {pending}")]
    InsufficientPending { requested: Amount, pending: Amount },
    #[error("Amount overflows the ledger's numeric range")]
    AmountOverflow,
}

fn checked_add(lhs: Amount, rhs: Amount) -> Result<Amount, AccountError> {
    lhs.checked_add(rhs).ok_or(AccountError::AmountOverflow)
}

fn checked_sub(lhs: Amount, rhs: Amount) -> Result<Amount, AccountError> {
    lhs.checked_sub(rhs).ok_or(AccountError::AmountOverflow)
}

/// Fee retained on an emergency exit, truncated toward zero.
///
/// The balance is scaled down before the multiplication, so any balance the
/// ledger can hold has a representable fee.
pub fn emergency_fee(balance: Amount, fee_bps: u16) -> Result<Amount, AccountError> {
    balance
        .checked_div(Decimal::from(BPS_DENOMINATOR))
        .and_then(|per_bps| per_bps.checked_mul(Decimal::from(fee_bps)))
        .map(|fee| fee.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero))
        .ok_or(AccountError::AmountOverflow)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountLedgerEntry {
    total_deposited: Amount,
    total_withdrawn: Amount,
    pending_investment: Amount,
    total_invested: Amount,
    deposit_timestamp: Option<DateTime<Utc>>,
    used_emergency_exit: bool,
}

impl AccountLedgerEntry {
    pub fn total_deposited(&self) -> Amount {
        self.total_deposited
    }

    pub fn total_withdrawn(&self) -> Amount {
        self.total_withdrawn
    }

    pub fn pending_investment(&self) -> Amount {
        self.pending_investment
    }

    pub fn total_invested(&self) -> Amount {
        self.total_invested
    }

    pub fn deposit_timestamp(&self) -> Option<DateTime<Utc>> {
        self.deposit_timestamp
    }

    pub fn used_emergency_exit(&self) -> bool {
        self.used_emergency_exit
    }

    pub fn current_balance(&self) -> Amount {
        self.total_deposited - self.total_withdrawn
    }

    /// Applies `event` as a whole or not at all: on overflow the entry is
    /// left untouched.
    pub fn apply(&mut self, event: &AccountEvent) -> Result<(), AccountError> {
        match &event.kind {
            AccountEventKind::Deposited { yield_basis, .. } => {
                let total_deposited = checked_add(self.total_deposited, event.amount)?;
                let pending_investment = checked_add(self.pending_investment, event.amount)?;
                self.total_deposited = total_deposited;
                self.pending_investment = pending_investment;
                self.deposit_timestamp = Some(*yield_basis);
            }
            AccountEventKind::AutoInvested { .. } => {
                let pending_investment = checked_sub(self.pending_investment, event.amount)?;
                let total_invested = checked_add(self.total_invested, event.amount)?;
                self.pending_investment = pending_investment;
                self.total_invested = total_invested;
            }
            AccountEventKind::Withdrawn => {
                self.total_withdrawn = checked_add(self.total_withdrawn, event.amount)?;
                // never promise to invest money that already left
                self.pending_investment = self.pending_investment.min(self.current_balance());
            }
            AccountEventKind::EmergencyExited { .. } => {
                self.total_withdrawn = self.total_deposited;
                self.pending_investment = Decimal::zero();
                self.used_emergency_exit = true;
            }
        }
        Ok(())
    }

    /// Deposit validation (minimum, halt, currency) happens on the ledger level,
    /// so a deposit only fails when it would overflow the account. A second,
    /// auto-invest event follows when the pending balance reaches `threshold`.
    pub fn handle_deposit(
        &self,
        amount: Amount,
        currency: Currency,
        threshold: Amount,
        policy: DepositTimestampPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccountEvent>, AccountError> {
        let yield_basis = match (policy, self.deposit_timestamp) {
            (DepositTimestampPolicy::KeepFirst, Some(first))
                if self.current_balance() > Decimal::zero() =>
            {
                first
            }
            _ => now,
        };
        checked_add(self.total_deposited, amount)?;
        let pending_after = checked_add(self.pending_investment, amount)?;

        let mut events = vec![AccountEvent {
            amount,
            kind: AccountEventKind::Deposited {
                currency: currency.clone(),
                yield_basis,
            },
        }];
        if pending_after >= threshold {
            events.push(AccountEvent {
                amount: pending_after,
                kind: AccountEventKind::AutoInvested {
                    currency,
                    trigger: AutoInvestTrigger::Automatic,
                },
            });
        }
        Ok(events)
    }

    pub fn handle_withdraw(&self, amount: Amount) -> Result<AccountEvent, AccountError> {
        if amount <= Decimal::zero() {
            return Err(AccountError::ZeroAmount);
        }
        let available = self.current_balance();
        if amount > available {
            return Err(AccountError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        Ok(AccountEvent {
            amount,
            kind: AccountEventKind::Withdrawn,
        })
    }

    pub fn handle_emergency_exit(&self, fee_bps: u16) -> Result<AccountEvent, AccountError> {
        let balance = self.current_balance();
        if balance <= Decimal::zero() {
            return Err(AccountError::NoBalance);
        }
        Ok(AccountEvent {
            amount: balance,
            kind: AccountEventKind::EmergencyExited {
                fee: emergency_fee(balance, fee_bps)?,
            },
        })
    }

    /// Moves part of the pending balance into `currency`, the investment
    /// target picked by the administrator.
    pub fn handle_manual_invest(
        &self,
        amount: Amount,
        currency: Currency,
    ) -> Result<AccountEvent, AccountError> {
        if amount <= Decimal::zero() {
            return Err(AccountError::ZeroAmount);
        }
        if amount > self.pending_investment {
            return Err(AccountError::InsufficientPending {
                requested: amount,
                pending: self.pending_investment,
            });
        }
        Ok(AccountEvent {
            amount,
            kind: AccountEventKind::AutoInvested {
                currency,
                trigger: AutoInvestTrigger::Manual,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use rust_decimal_macros::dec;

    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn deposit(
        acc: &mut AccountLedgerEntry,
        amount: Amount,
        threshold: Amount,
        now: DateTime<Utc>,
    ) -> Vec<AccountEvent> {
        let events = acc
            .handle_deposit(
                amount,
                Currency::Native,
                threshold,
                DepositTimestampPolicy::RefreshOnDeposit,
                now,
            )
            .unwrap();
        for evt in &events {
            acc.apply(evt).unwrap();
        }
        events
    }

    #[test]
    fn deposits_below_threshold_accumulate() {
        let mut acc = AccountLedgerEntry::default();
        assert_eq!(deposit(&mut acc, dec!(1), dec!(10), t0()).len(), 1);
        assert_eq!(deposit(&mut acc, dec!(1), dec!(10), t0()).len(), 1);
        assert_eq!(acc.pending_investment(), dec!(2));
        assert_eq!(acc.total_invested(), Decimal::zero());
        assert_eq!(acc.current_balance(), dec!(2));
    }

    #[test]
    fn deposit_crossing_threshold_invests_whole_pending() {
        let mut acc = AccountLedgerEntry::default();
        deposit(&mut acc, dec!(1), dec!(10), t0());
        deposit(&mut acc, dec!(1), dec!(10), t0());
        let events = deposit(&mut acc, dec!(15), dec!(10), t0());
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].amount, dec!(17));
        assert!(matches!(
            events[1].kind,
            AccountEventKind::AutoInvested {
                trigger: AutoInvestTrigger::Automatic,
                ..
            }
        ));
        assert_eq!(acc.pending_investment(), Decimal::zero());
        assert_eq!(acc.total_invested(), dec!(17));
        assert_eq!(acc.current_balance(), dec!(17));
    }

    #[test]
    fn deposit_exactly_at_threshold_invests() {
        let mut acc = AccountLedgerEntry::default();
        let events = deposit(&mut acc, dec!(10), dec!(10), t0());
        assert_eq!(events.len(), 2);
        assert_eq!(acc.pending_investment(), Decimal::zero());
    }

    #[test]
    fn timestamp_policies() {
        let later = t0() + TimeDelta::days(3);

        let mut refresh = AccountLedgerEntry::default();
        deposit(&mut refresh, dec!(1), dec!(10), t0());
        deposit(&mut refresh, dec!(1), dec!(10), later);
        assert_eq!(refresh.deposit_timestamp(), Some(later));

        let mut keep = AccountLedgerEntry::default();
        for (amount, now) in [(dec!(1), t0()), (dec!(1), later)] {
            let events = keep
                .handle_deposit(
                    amount,
                    Currency::Native,
                    dec!(10),
                    DepositTimestampPolicy::KeepFirst,
                    now,
                )
                .unwrap();
            events.iter().for_each(|evt| keep.apply(evt).unwrap());
        }
        assert_eq!(keep.deposit_timestamp(), Some(t0()));
    }

    #[test]
    fn keep_first_restarts_after_full_drain() {
        let later = t0() + TimeDelta::days(3);
        let mut acc = AccountLedgerEntry::default();
        let evts = acc
            .handle_deposit(
                dec!(1),
                Currency::Native,
                dec!(10),
                DepositTimestampPolicy::KeepFirst,
                t0(),
            )
            .unwrap();
        evts.iter().for_each(|evt| acc.apply(evt).unwrap());
        acc.apply(&acc.handle_withdraw(dec!(1)).unwrap()).unwrap();
        let evts = acc
            .handle_deposit(
                dec!(1),
                Currency::Native,
                dec!(10),
                DepositTimestampPolicy::KeepFirst,
                later,
            )
            .unwrap();
        evts.iter().for_each(|evt| acc.apply(evt).unwrap());
        assert_eq!(acc.deposit_timestamp(), Some(later));
    }

    #[test]
    fn withdraw_checks() {
        let mut acc = AccountLedgerEntry::default();
        deposit(&mut acc, dec!(15), dec!(10), t0());

        assert_eq!(acc.handle_withdraw(dec!(0)).unwrap_err(), AccountError::ZeroAmount);
        assert_eq!(
            acc.handle_withdraw(dec!(20)).unwrap_err(),
            AccountError::InsufficientBalance {
                requested: dec!(20),
                available: dec!(15)
            }
        );

        let evt = acc.handle_withdraw(dec!(5)).unwrap();
        acc.apply(&evt).unwrap();
        assert_eq!(acc.total_withdrawn(), dec!(5));
        assert_eq!(acc.current_balance(), dec!(10));
        // deposits stay monotonic
        assert_eq!(acc.total_deposited(), dec!(15));
    }

    #[test]
    fn withdraw_clamps_pending_investment() {
        let mut acc = AccountLedgerEntry::default();
        deposit(&mut acc, dec!(6), dec!(10), t0());
        assert_eq!(acc.pending_investment(), dec!(6));
        acc.apply(&acc.handle_withdraw(dec!(4)).unwrap()).unwrap();
        assert_eq!(acc.pending_investment(), dec!(2));
        assert!(acc.pending_investment() <= acc.current_balance());
    }

    #[test]
    fn emergency_exit_drains_account() {
        let mut acc = AccountLedgerEntry::default();
        deposit(&mut acc, dec!(15), dec!(100), t0());
        let evt = acc.handle_emergency_exit(100).unwrap();
        assert_eq!(evt.amount, dec!(15));
        assert_eq!(evt.kind, AccountEventKind::EmergencyExited { fee: dec!(0.15) });
        acc.apply(&evt).unwrap();
        assert_eq!(acc.current_balance(), Decimal::zero());
        assert_eq!(acc.pending_investment(), Decimal::zero());
        assert!(acc.used_emergency_exit());
        assert_eq!(acc.handle_emergency_exit(100).unwrap_err(), AccountError::NoBalance);
    }

    #[test]
    fn manual_invest_is_bounded_by_pending() {
        let mut acc = AccountLedgerEntry::default();
        deposit(&mut acc, dec!(4), dec!(10), t0());
        assert_eq!(
            acc.handle_manual_invest(dec!(5), Currency::Native).unwrap_err(),
            AccountError::InsufficientPending {
                requested: dec!(5),
                pending: dec!(4)
            }
        );
        assert_eq!(
            acc.handle_manual_invest(dec!(0), Currency::Native).unwrap_err(),
            AccountError::ZeroAmount
        );
        let usdc = Currency::Stablecoin("USDC".into());
        let evt = acc.handle_manual_invest(dec!(3), usdc.clone()).unwrap();
        assert_eq!(
            evt.kind,
            AccountEventKind::AutoInvested {
                currency: usdc,
                trigger: AutoInvestTrigger::Manual
            }
        );
        acc.apply(&evt).unwrap();
        assert_eq!(acc.pending_investment(), dec!(1));
        assert_eq!(acc.total_invested(), dec!(3));
    }

    #[test]
    fn overflowing_deposit_leaves_account_untouched() {
        let mut acc = AccountLedgerEntry::default();
        deposit(&mut acc, dec!(40000000000000000000000000000), Decimal::MAX, t0());
        let before = acc.clone();

        let err = acc
            .handle_deposit(
                dec!(40000000000000000000000000000),
                Currency::Native,
                Decimal::MAX,
                DepositTimestampPolicy::RefreshOnDeposit,
                t0(),
            )
            .unwrap_err();
        assert_eq!(err, AccountError::AmountOverflow);

        let oversized = AccountEvent {
            amount: Decimal::MAX,
            kind: AccountEventKind::Deposited {
                currency: Currency::Native,
                yield_basis: t0() + TimeDelta::days(1),
            },
        };
        assert_eq!(acc.apply(&oversized), Err(AccountError::AmountOverflow));
        assert_eq!(acc, before);
    }

    #[test]
    fn fee_is_truncated() {
        assert_eq!(emergency_fee(dec!(15), 100), Ok(dec!(0.15)));
        assert_eq!(emergency_fee(dec!(15), 0), Ok(Decimal::zero()));
        assert_eq!(emergency_fee(dec!(15), 1000), Ok(dec!(1.5)));
        assert_eq!(
            emergency_fee(dec!(0.000000000000000001), 999),
            Ok(Decimal::zero())
        );
        assert_eq!(emergency_fee(dec!(1.2345), 100), Ok(dec!(0.012345)));
    }

    #[test]
    fn fee_of_huge_balance_is_representable() {
        assert_eq!(
            emergency_fee(dec!(70000000000000000000000000000), 1000),
            Ok(dec!(7000000000000000000000000000))
        );
        let fee = emergency_fee(Decimal::MAX, 1000).unwrap();
        assert!(fee > Decimal::zero() && fee < Decimal::MAX);

        let mut acc = AccountLedgerEntry::default();
        deposit(&mut acc, Decimal::MAX, Decimal::MAX, t0());
        let evt = acc.handle_emergency_exit(1000).unwrap();
        assert_eq!(evt.amount, Decimal::MAX);
        assert_eq!(evt.fee(), fee);
    }
}
