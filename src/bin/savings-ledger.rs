use std::{fs::File, sync::Arc};

use anyhow::{Context, Result};
use savings_ledger::{
    bin_utils::{LoggingPayout, OperationError, Service},
    config::LedgerSettings,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let filename = args
        .next()
        .context("Expected an operations file name as the first argument")?;
    let file = File::open(&filename).with_context(|| format!("Failed to open `{filename}`"))?;

    let settings = match args.next() {
        Some(path) => {
            let raw = File::open(&path).with_context(|| format!("Failed to open `{path}`"))?;
            serde_json::from_reader(raw)
                .with_context(|| format!("Failed to parse settings from `{path}`"))?
        }
        None => LedgerSettings::default(),
    };

    let service = Service {
        input: file,
        output: &mut std::io::stdout(),
        settings,
        payout: Arc::new(LoggingPayout),
        error_printer: Box::new(|line: u64, err: OperationError| match err {
            OperationError::Ledger(err) => {
                // rejected operations are part of normal ledger life
                tracing::debug!(line, %err, "operation rejected")
            }
            err => eprintln!("Error at line {line}: {err}"),
        }),
    };
    service.run()
}
