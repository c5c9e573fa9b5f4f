//! Synchronous CSV reader with iterator interface
//!
//! Provides a streaming iterator over ledger commands from a CSV file.
//! Delegates CSV format concerns to the csv_format module.
//!
//! # Design
//!
//! The SyncReader uses csv::Reader to read and deserialize CSV records
//! sequentially, one at a time, without loading the file into memory.
//!
//! # Error Handling
//!
//! - Fatal errors (file not found, I/O errors) are returned from `new()`
//! - Individual row errors are yielded as `ParseError` items carrying the
//!   line number, so callers can log them and carry on

use crate::io::csv_format::{convert_csv_record, CsvRecord, LedgerCommand};
use crate::io::open_error;
use crate::types::LedgerError;
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::path::Path;

/// Synchronous CSV reader
///
/// Provides an iterator interface over ledger commands.
#[derive(Debug)]
pub struct SyncReader {
    reader: csv::Reader<File>,
    /// Line of the last row read; the header is line 1
    line: u64,
}

impl SyncReader {
    /// Create a new SyncReader from a file path
    ///
    /// The CSV reader trims whitespace from all fields and allows rows with
    /// missing trailing fields.
    ///
    /// # Errors
    ///
    /// `FileNotFound` if the file does not exist, `IoError` if it cannot be
    /// opened.
    pub fn new(path: &Path) -> Result<Self, LedgerError> {
        let file = File::open(path).map_err(|e| open_error(path, e))?;

        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(file);

        Ok(Self { reader, line: 1 })
    }
}

impl Iterator for SyncReader {
    type Item = Result<LedgerCommand, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.reader.deserialize::<CsvRecord>().next()?;
        self.line += 1;
        let line = self.line;

        Some(
            next.map_err(LedgerError::from)
                .and_then(convert_csv_record)
                .map_err(|e| match e {
                    LedgerError::ParseError { message, .. } => {
                        LedgerError::parse_error(Some(line), message)
                    }
                    other => LedgerError::parse_error(Some(line), other),
                }),
        )
    }
}
