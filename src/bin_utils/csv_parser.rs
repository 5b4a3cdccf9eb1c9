use std::io::Read;

use crate::command::OperationRequest;
use csv::{DeserializeRecordsIntoIter, Trim};

/// Parses ledger operations in CSV format, with the columns
/// `type,caller,amount,account,currency,symbol,decimals`.
/// Trailing empty columns may be omitted.
pub struct CsvOperationParser<R> {
    iter: DeserializeRecordsIntoIter<R, OperationRequest>,
}

impl<R> CsvOperationParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);

        Self {
            iter: reader.into_deserialize(),
        }
    }
}

impl<R> Iterator for CsvOperationParser<R>
where
    R: Read,
{
    type Item = (u64, Result<OperationRequest, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}
