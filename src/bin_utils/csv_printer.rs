use std::io::Write;

use crate::{AccountId, Amount};
use anyhow::Context;
use csv::Writer;
use serde::Serialize;

/// One output line per account, amounts normalized (`3` rather than `3.0`).
#[derive(Debug, Serialize)]
pub struct AccountRow {
    pub account: AccountId,
    pub deposited: Amount,
    pub withdrawn: Amount,
    pub balance: Amount,
    pub pending: Amount,
    pub invested: Amount,
    pub emergency_exit: bool,
}

pub fn print_accounts<W>(
    output: &mut W,
    accounts: impl Iterator<Item = AccountRow>,
) -> anyhow::Result<()>
where
    W: Write,
{
    let mut writer = Writer::from_writer(output);
    for row in accounts {
        let account = row.account;
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write account {account} to CSV"))?;
    }
    writer.flush().context("Failed to flush CSV writer")
}
