use std::time::Duration;

use rust_decimal::{Decimal, prelude::Zero};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    AccountId, Amount,
    currency::{CurrencyRef, Stablecoin, StablecoinRegistry},
};

pub const MAX_EMERGENCY_FEE_BPS: u16 = 1_000;

/// What `deposit_timestamp` means when an account deposits more than once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositTimestampPolicy {
    /// Every deposit restarts yield accrual for the whole balance.
    #[default]
    RefreshOnDeposit,
    /// The first deposit of a non-empty balance stays the accrual basis.
    KeepFirst,
}

/// Whether a normal withdrawal is accepted while emergency mode is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyWithdrawalPolicy {
    /// All exits go through the emergency withdrawal while halted.
    #[default]
    EmergencyExitOnly,
    AllowNormalWithdrawals,
}

/// Initialization parameters, usually read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub administrator: AccountId,
    pub minimum_deposit: Amount,
    pub minimum_investment_threshold: Amount,
    pub emergency_withdrawal_fee_bps: u16,
    pub annual_yield_bps: u32,
    pub deposit_timestamp_policy: DepositTimestampPolicy,
    pub emergency_withdrawal_policy: EmergencyWithdrawalPolicy,
    pub payout_timeout_ms: u64,
    pub stablecoins: Vec<Stablecoin>,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            administrator: 0,
            minimum_deposit: Decimal::new(1, 2),
            minimum_investment_threshold: Decimal::from(10),
            emergency_withdrawal_fee_bps: 100,
            annual_yield_bps: 500,
            deposit_timestamp_policy: DepositTimestampPolicy::default(),
            emergency_withdrawal_policy: EmergencyWithdrawalPolicy::default(),
            payout_timeout_ms: 5_000,
            stablecoins: Vec::new(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Minimum deposit must be greater than zero, got {0}")]
    NonPositiveMinimumDeposit(Amount),
    #[error("Minimum investment threshold must not be negative, got {0}")]
    NegativeThreshold(Amount),
    #[error("Emergency fee of {0} bps exceeds the 1000 bps cap")]
    FeeTooHigh(u16),
    #[error("Stablecoin `{0}` is listed more than once")]
    DuplicateStablecoin(CurrencyRef),
    #[error("Payout timeout must be greater than zero")]
    ZeroPayoutTimeout,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("Caller {caller} is not the administrator")]
    Unauthorized { caller: AccountId },
    #[error("Emergency fee of {requested} bps exceeds the 1000 bps cap")]
    FeeTooHigh { requested: u16 },
    #[error("Stablecoin `{reference}` is already supported")]
    AlreadySupported { reference: CurrencyRef },
    #[error("Amount must not be negative, got {0}")]
    NegativeAmount(Amount),
    #[error("There are no accumulated fees to withdraw")]
    NoFeesAccrued,
}

/// Runtime configuration shared by every operation.
///
/// Mutators return the previous value so the ledger can report changes.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    administrator: AccountId,
    emergency_mode: bool,
    minimum_deposit: Amount,
    minimum_investment_threshold: Amount,
    emergency_withdrawal_fee_bps: u16,
    stablecoins: StablecoinRegistry,
    pub(crate) deposit_timestamp_policy: DepositTimestampPolicy,
    pub(crate) emergency_withdrawal_policy: EmergencyWithdrawalPolicy,
    pub(crate) payout_timeout: Duration,
}

impl TryFrom<&LedgerSettings> for LedgerConfig {
    type Error = ConfigError;

    fn try_from(settings: &LedgerSettings) -> Result<Self, Self::Error> {
        if settings.minimum_deposit <= Decimal::zero() {
            return Err(ConfigError::NonPositiveMinimumDeposit(
                settings.minimum_deposit,
            ));
        }
        if settings.minimum_investment_threshold < Decimal::zero() {
            return Err(ConfigError::NegativeThreshold(
                settings.minimum_investment_threshold,
            ));
        }
        if settings.emergency_withdrawal_fee_bps > MAX_EMERGENCY_FEE_BPS {
            return Err(ConfigError::FeeTooHigh(
                settings.emergency_withdrawal_fee_bps,
            ));
        }
        if settings.payout_timeout_ms == 0 {
            return Err(ConfigError::ZeroPayoutTimeout);
        }
        let mut stablecoins = StablecoinRegistry::default();
        for coin in &settings.stablecoins {
            if !stablecoins.add(coin.clone()) {
                return Err(ConfigError::DuplicateStablecoin(coin.reference.clone()));
            }
        }
        Ok(Self {
            administrator: settings.administrator,
            emergency_mode: false,
            minimum_deposit: settings.minimum_deposit,
            minimum_investment_threshold: settings.minimum_investment_threshold,
            emergency_withdrawal_fee_bps: settings.emergency_withdrawal_fee_bps,
            stablecoins,
            deposit_timestamp_policy: settings.deposit_timestamp_policy,
            emergency_withdrawal_policy: settings.emergency_withdrawal_policy,
            payout_timeout: Duration::from_millis(settings.payout_timeout_ms),
        })
    }
}

impl LedgerConfig {
    pub fn administrator(&self) -> AccountId {
        self.administrator
    }

    pub fn emergency_mode(&self) -> bool {
        self.emergency_mode
    }

    pub fn minimum_deposit(&self) -> Amount {
        self.minimum_deposit
    }

    pub fn minimum_investment_threshold(&self) -> Amount {
        self.minimum_investment_threshold
    }

    pub fn emergency_withdrawal_fee_bps(&self) -> u16 {
        self.emergency_withdrawal_fee_bps
    }

    pub fn stablecoins(&self) -> &StablecoinRegistry {
        &self.stablecoins
    }

    pub fn normal_withdrawals_open(&self) -> bool {
        !self.emergency_mode
            || self.emergency_withdrawal_policy == EmergencyWithdrawalPolicy::AllowNormalWithdrawals
    }

    pub fn ensure_admin(&self, caller: AccountId) -> Result<(), AdminError> {
        if caller == self.administrator {
            Ok(())
        } else {
            Err(AdminError::Unauthorized { caller })
        }
    }

    pub fn set_minimum_investment(&mut self, new_amount: Amount) -> Result<Amount, AdminError> {
        if new_amount < Decimal::zero() {
            return Err(AdminError::NegativeAmount(new_amount));
        }
        Ok(std::mem::replace(
            &mut self.minimum_investment_threshold,
            new_amount,
        ))
    }

    /// Returns `true` when the flag actually changed.
    pub fn set_emergency_mode(&mut self, active: bool) -> bool {
        std::mem::replace(&mut self.emergency_mode, active) != active
    }

    pub fn set_emergency_fee(&mut self, new_bps: u16) -> Result<u16, AdminError> {
        if new_bps > MAX_EMERGENCY_FEE_BPS {
            return Err(AdminError::FeeTooHigh { requested: new_bps });
        }
        Ok(std::mem::replace(
            &mut self.emergency_withdrawal_fee_bps,
            new_bps,
        ))
    }

    pub fn add_stablecoin(&mut self, coin: Stablecoin) -> Result<(), AdminError> {
        let reference = coin.reference.clone();
        if self.stablecoins.add(coin) {
            Ok(())
        } else {
            Err(AdminError::AlreadySupported { reference })
        }
    }

    pub fn remove_stablecoin(&mut self, reference: &str) -> Option<Stablecoin> {
        self.stablecoins.remove(reference)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn config() -> LedgerConfig {
        LedgerConfig::try_from(&LedgerSettings::default()).unwrap()
    }

    #[test]
    fn default_settings_are_valid() {
        let cfg = config();
        assert_eq!(cfg.minimum_deposit(), dec!(0.01));
        assert_eq!(cfg.minimum_investment_threshold(), dec!(10));
        assert_eq!(cfg.emergency_withdrawal_fee_bps(), 100);
        assert!(!cfg.emergency_mode());
        assert!(cfg.normal_withdrawals_open());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let err = LedgerConfig::try_from(&LedgerSettings {
            minimum_deposit: dec!(0),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::NonPositiveMinimumDeposit(dec!(0)));

        let err = LedgerConfig::try_from(&LedgerSettings {
            emergency_withdrawal_fee_bps: 1001,
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::FeeTooHigh(1001));

        let usdc = Stablecoin {
            reference: "usdc".into(),
            symbol: "USDC".into(),
            decimals: 6,
        };
        let err = LedgerConfig::try_from(&LedgerSettings {
            stablecoins: vec![usdc.clone(), usdc],
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateStablecoin("usdc".into()));
    }

    #[test]
    fn settings_from_json() {
        let settings: LedgerSettings = serde_json::from_str(
            r#"{
                "administrator": 7,
                "minimum_investment_threshold": "25",
                "deposit_timestamp_policy": "keep_first",
                "emergency_withdrawal_policy": "allow_normal_withdrawals"
            }"#,
        )
        .unwrap();
        assert_eq!(settings.administrator, 7);
        assert_eq!(settings.minimum_investment_threshold, dec!(25));
        assert_eq!(settings.minimum_deposit, dec!(0.01));
        assert_eq!(
            settings.deposit_timestamp_policy,
            DepositTimestampPolicy::KeepFirst
        );
        let mut cfg = LedgerConfig::try_from(&settings).unwrap();
        cfg.set_emergency_mode(true);
        assert!(cfg.normal_withdrawals_open());
    }

    #[test]
    fn emergency_policy_blocks_withdrawals_by_default() {
        let mut cfg = config();
        assert!(cfg.set_emergency_mode(true));
        assert!(!cfg.set_emergency_mode(true));
        assert!(!cfg.normal_withdrawals_open());
    }

    #[test]
    fn admin_mutators() {
        let mut cfg = config();
        assert_eq!(cfg.ensure_admin(0), Ok(()));
        assert_eq!(
            cfg.ensure_admin(3),
            Err(AdminError::Unauthorized { caller: 3 })
        );

        assert_eq!(cfg.set_emergency_fee(250), Ok(100));
        assert_eq!(
            cfg.set_emergency_fee(1001),
            Err(AdminError::FeeTooHigh { requested: 1001 })
        );
        assert_eq!(cfg.emergency_withdrawal_fee_bps(), 250);

        assert_eq!(cfg.set_minimum_investment(dec!(5)), Ok(dec!(10)));
        assert_eq!(
            cfg.set_minimum_investment(dec!(-1)),
            Err(AdminError::NegativeAmount(dec!(-1)))
        );
        assert_eq!(cfg.minimum_investment_threshold(), dec!(5));
    }
}
