use rust_decimal::{Decimal, prelude::ToPrimitive, prelude::Zero};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    AccountId, Amount,
    currency::CurrencyRef,
    ledger::{
        DepositReceipt, EmergencyWithdrawalReceipt, FeeWithdrawalReceipt, Ledger, LedgerError,
        WithdrawalReceipt,
    },
};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deposit,
    Withdraw,
    EmergencyWithdraw,
    TriggerAutoInvest,
    UpdateMinimumInvestment,
    ActivateEmergencyMode,
    DeactivateEmergencyMode,
    UpdateEmergencyFee,
    AddStablecoin,
    RemoveStablecoin,
    WithdrawFees,
}

/// Untyped request, as it arrives from a batch file.
///
/// `caller` is the account acting. `account` names the target of
/// `trigger_auto_invest`, `currency` the token of a deposit, of a registry
/// change or of a manual investment.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationRequest {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub caller: AccountId,
    pub amount: Option<Decimal>,
    pub account: Option<AccountId>,
    pub currency: Option<CurrencyRef>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    UpdateMinimumInvestment(Amount),
    ActivateEmergencyMode,
    DeactivateEmergencyMode,
    UpdateEmergencyFee(u16),
    AddStablecoin {
        reference: CurrencyRef,
        symbol: String,
        decimals: u8,
    },
    RemoveStablecoin(CurrencyRef),
    TriggerAutoInvest {
        account: AccountId,
        amount: Amount,
        currency: Option<CurrencyRef>,
    },
    WithdrawFees,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCommand {
    Deposit {
        account: AccountId,
        amount: Amount,
        currency: Option<CurrencyRef>,
    },
    Withdraw {
        account: AccountId,
        amount: Amount,
    },
    EmergencyWithdraw {
        account: AccountId,
    },
    Admin {
        caller: AccountId,
        action: AdminAction,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Amount is required for {kind:?}")]
    AmountRequired { kind: OperationKind },
    #[error("Amount must not be negative for {kind:?}")]
    NegativeAmount { kind: OperationKind },
    #[error("Field `{field}` is required for {kind:?}")]
    FieldRequired {
        kind: OperationKind,
        field: &'static str,
    },
    #[error("Fee must be a whole number of basis points, got {0}")]
    InvalidBasisPoints(Decimal),
}

/// What a successfully executed command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Deposited(DepositReceipt),
    Withdrawn(WithdrawalReceipt),
    EmergencyWithdrawn(EmergencyWithdrawalReceipt),
    FeesWithdrawn(FeeWithdrawalReceipt),
    Configured,
}

impl LedgerCommand {
    pub fn parse_command(request: OperationRequest) -> Result<Self, CommandError> {
        let kind = request.kind;
        let caller = request.caller;
        let admin = |action| Ok(Self::Admin { caller, action });
        match kind {
            OperationKind::Deposit => Ok(Self::Deposit {
                account: caller,
                amount: Self::parse_amount(kind, request.amount)?,
                currency: request.currency,
            }),
            OperationKind::Withdraw => Ok(Self::Withdraw {
                account: caller,
                amount: Self::parse_amount(kind, request.amount)?,
            }),
            OperationKind::EmergencyWithdraw => Ok(Self::EmergencyWithdraw { account: caller }),
            OperationKind::TriggerAutoInvest => admin(AdminAction::TriggerAutoInvest {
                account: Self::require(kind, "account", request.account)?,
                amount: Self::parse_amount(kind, request.amount)?,
                currency: request.currency,
            }),
            OperationKind::UpdateMinimumInvestment => admin(AdminAction::UpdateMinimumInvestment(
                Self::parse_amount(kind, request.amount)?,
            )),
            OperationKind::ActivateEmergencyMode => admin(AdminAction::ActivateEmergencyMode),
            OperationKind::DeactivateEmergencyMode => admin(AdminAction::DeactivateEmergencyMode),
            OperationKind::UpdateEmergencyFee => {
                let bps = Self::parse_amount(kind, request.amount)?;
                let whole = (bps.fract().is_zero())
                    .then(|| bps.to_u16())
                    .flatten()
                    .ok_or(CommandError::InvalidBasisPoints(bps))?;
                admin(AdminAction::UpdateEmergencyFee(whole))
            }
            OperationKind::AddStablecoin => admin(AdminAction::AddStablecoin {
                reference: Self::require(kind, "currency", request.currency)?,
                symbol: Self::require(kind, "symbol", request.symbol)?,
                decimals: Self::require(kind, "decimals", request.decimals)?,
            }),
            OperationKind::RemoveStablecoin => admin(AdminAction::RemoveStablecoin(
                Self::require(kind, "currency", request.currency)?,
            )),
            OperationKind::WithdrawFees => admin(AdminAction::WithdrawFees),
        }
    }

    fn parse_amount(kind: OperationKind, amount: Option<Decimal>) -> Result<Amount, CommandError> {
        let Some(amount) = amount else {
            return Err(CommandError::AmountRequired { kind });
        };
        if amount < Decimal::zero() {
            return Err(CommandError::NegativeAmount { kind });
        }
        Ok(amount)
    }

    fn require<T>(
        kind: OperationKind,
        field: &'static str,
        value: Option<T>,
    ) -> Result<T, CommandError> {
        value.ok_or(CommandError::FieldRequired { kind, field })
    }

    pub fn execute(self, ledger: &Ledger) -> Result<CommandOutcome, LedgerError> {
        match self {
            Self::Deposit {
                account,
                amount,
                currency,
            } => ledger
                .deposit(account, amount, currency)
                .map(CommandOutcome::Deposited),
            Self::Withdraw { account, amount } => ledger
                .withdraw(account, amount)
                .map(CommandOutcome::Withdrawn),
            Self::EmergencyWithdraw { account } => ledger
                .emergency_withdraw(account)
                .map(CommandOutcome::EmergencyWithdrawn),
            Self::Admin { caller, action } => match action {
                AdminAction::UpdateMinimumInvestment(amount) => ledger
                    .update_minimum_investment(caller, amount)
                    .map(|_| CommandOutcome::Configured),
                AdminAction::ActivateEmergencyMode => ledger
                    .activate_emergency_mode(caller)
                    .map(|_| CommandOutcome::Configured),
                AdminAction::DeactivateEmergencyMode => ledger
                    .deactivate_emergency_mode(caller)
                    .map(|_| CommandOutcome::Configured),
                AdminAction::UpdateEmergencyFee(bps) => ledger
                    .update_emergency_fee(caller, bps)
                    .map(|_| CommandOutcome::Configured),
                AdminAction::AddStablecoin {
                    reference,
                    symbol,
                    decimals,
                } => ledger
                    .add_stablecoin(caller, &reference, &symbol, decimals)
                    .map(|_| CommandOutcome::Configured),
                AdminAction::RemoveStablecoin(reference) => ledger
                    .remove_stablecoin(caller, &reference)
                    .map(|_| CommandOutcome::Configured),
                AdminAction::TriggerAutoInvest {
                    account,
                    amount,
                    currency,
                } => ledger
                    .trigger_auto_invest(caller, account, amount, currency)
                    .map(|_| CommandOutcome::Configured),
                AdminAction::WithdrawFees => ledger
                    .withdraw_fees(caller)
                    .map(CommandOutcome::FeesWithdrawn),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn request(kind: OperationKind) -> OperationRequest {
        OperationRequest {
            kind,
            caller: 1,
            amount: None,
            account: None,
            currency: None,
            symbol: None,
            decimals: None,
        }
    }

    #[test]
    fn parse_user_commands() {
        let cmd = LedgerCommand::parse_command(OperationRequest {
            amount: Some(dec!(2.5)),
            currency: Some("usdc".into()),
            ..request(OperationKind::Deposit)
        })
        .unwrap();
        assert_eq!(
            cmd,
            LedgerCommand::Deposit {
                account: 1,
                amount: dec!(2.5),
                currency: Some("usdc".into())
            }
        );

        let err = LedgerCommand::parse_command(request(OperationKind::Withdraw)).unwrap_err();
        assert_eq!(
            err,
            CommandError::AmountRequired {
                kind: OperationKind::Withdraw
            }
        );

        let err = LedgerCommand::parse_command(OperationRequest {
            amount: Some(dec!(-1)),
            ..request(OperationKind::Deposit)
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "Amount must not be negative for Deposit");

        assert_eq!(
            LedgerCommand::parse_command(request(OperationKind::EmergencyWithdraw)).unwrap(),
            LedgerCommand::EmergencyWithdraw { account: 1 }
        );
    }

    #[test]
    fn parse_admin_commands() {
        let cmd = LedgerCommand::parse_command(OperationRequest {
            amount: Some(dec!(3)),
            account: Some(7),
            ..request(OperationKind::TriggerAutoInvest)
        })
        .unwrap();
        assert_eq!(
            cmd,
            LedgerCommand::Admin {
                caller: 1,
                action: AdminAction::TriggerAutoInvest {
                    account: 7,
                    amount: dec!(3),
                    currency: None
                }
            }
        );

        let err = LedgerCommand::parse_command(OperationRequest {
            currency: Some("usdc".into()),
            symbol: Some("USDC".into()),
            ..request(OperationKind::AddStablecoin)
        })
        .unwrap_err();
        assert_eq!(
            err,
            CommandError::FieldRequired {
                kind: OperationKind::AddStablecoin,
                field: "decimals"
            }
        );

        let cmd = LedgerCommand::parse_command(OperationRequest {
            amount: Some(dec!(250)),
            ..request(OperationKind::UpdateEmergencyFee)
        })
        .unwrap();
        assert_eq!(
            cmd,
            LedgerCommand::Admin {
                caller: 1,
                action: AdminAction::UpdateEmergencyFee(250)
            }
        );

        for bps in [dec!(2.5), dec!(70000)] {
            let err = LedgerCommand::parse_command(OperationRequest {
                amount: Some(bps),
                ..request(OperationKind::UpdateEmergencyFee)
            })
            .unwrap_err();
            assert_eq!(err, CommandError::InvalidBasisPoints(bps));
        }
    }
}
