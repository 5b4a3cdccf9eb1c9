//! Batch front end for [`crate::ledger`]: reads operations from CSV, executes
//! them in order and prints the resulting account balances.

use std::{
    io::{Read, Write},
    sync::Arc,
};

use crate::{
    command::{CommandError, LedgerCommand},
    config::LedgerSettings,
    ledger::{
        Ledger, LedgerError,
        payout::{PayoutChannel, PayoutError, PayoutInstruction},
    },
};
use anyhow::{Context, Result};
use csv_parser::CsvOperationParser;
use csv_printer::{AccountRow, print_accounts};
use thiserror::Error;
pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Malformed row: {0}")]
    Malformed(#[from] csv::Error),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Payout channel for offline runs: transfers are only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPayout;

impl PayoutChannel for LoggingPayout {
    fn transfer(&self, instruction: &PayoutInstruction) -> Result<(), PayoutError> {
        tracing::info!(
            receipt = instruction.receipt,
            recipient = instruction.recipient,
            amount = %instruction.amount,
            currency = %instruction.currency,
            kind = ?instruction.kind,
            "payout"
        );
        Ok(())
    }
}

pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub settings: LedgerSettings,
    pub payout: Arc<dyn PayoutChannel>,
    pub error_printer: Box<dyn FnMut(u64, OperationError)>,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let parser = CsvOperationParser::new(self.input);

        let ledger =
            Ledger::new(&self.settings, self.payout).context("Invalid ledger settings")?;

        for (line, row) in parser {
            let outcome = row
                .map_err(OperationError::from)
                .and_then(|request| Ok(LedgerCommand::parse_command(request)?))
                .and_then(|command| Ok(command.execute(&ledger)?));
            if let Err(err) = outcome {
                (self.error_printer)(line, err);
            }
        }

        print_accounts(
            self.output,
            ledger.accounts().into_iter().map(|acc| AccountRow {
                account: acc.account,
                deposited: acc.total_deposited.normalize(),
                withdrawn: acc.total_withdrawn.normalize(),
                balance: acc.current_balance.normalize(),
                pending: acc.pending_investment.normalize(),
                invested: acc.total_invested.normalize(),
                emergency_exit: acc.used_emergency_exit,
            }),
        )
    }
}
