/// Per-account balance bookkeeping.
/// State is modified using events, which are created by handling operations.
pub mod account;

/// Ledger configuration: initialization settings plus the runtime
/// configuration that only the administrator may change.
pub mod config;

/// Parses operation requests into typed commands executed against [`ledger::Ledger`].
pub mod command;

/// Native currency and the registry of supported stablecoins.
pub mod currency;

/// Audit trail emitted after every committed operation.
pub mod event;

/// The ledger itself: deposit/withdraw/emergency flow, admin surface and
/// reporting views, plus the collaborator traits it is built from.
pub mod ledger;

/// Time source and yield accrual curve.
pub mod time;

/// Bootstraps [`ledger`] for batch processing of CSV operation files.
/// Lives in the library so the integration test can drive it.
pub mod bin_utils;

/// Amounts are expressed in the unit of their currency.
pub type Amount = rust_decimal::Decimal;

/// Identifies both depositors and the administrator principal.
pub type AccountId = u32;

/// Decimal places kept when fees and yield are truncated.
pub const AMOUNT_SCALE: u32 = 18;
