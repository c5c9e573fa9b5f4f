//! Asynchronous CSV reader with batch interface
//!
//! Provides batch reading of ledger commands from any `futures::io::AsyncRead`
//! source, using csv-async for streaming parsing.
//!
//! # Architecture
//!
//! ```text
//! CSV Reader → AsyncReader → Batches of LedgerCommands
//!                  ↓
//!           csv_format module
//!           (CsvRecord, convert_csv_record)
//! ```

use crate::io::csv_format::{convert_csv_record, CsvRecord, LedgerCommand};
use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tracing::warn;

/// Asynchronous CSV reader
///
/// Provides batch reading interface over ledger commands.
pub struct AsyncReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    /// Line of the last row read; the header is line 1
    line: u64,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncReader<R> {
    /// Create a new AsyncReader from an async reader
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self {
            csv_reader,
            line: 1,
        }
    }

    /// Read a batch of ledger commands
    ///
    /// Reads up to `batch_size` rows. Rows that fail to parse are logged and
    /// skipped, and do not count towards the batch size.
    ///
    /// # Returns
    ///
    /// The parsed commands in file order; an empty vector at end of file.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<LedgerCommand> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<CsvRecord>();

        while batch.len() < batch_size {
            let Some(next) = records.next().await else {
                break;
            };
            self.line += 1;

            match next {
                Ok(csv_record) => match convert_csv_record(csv_record) {
                    Ok(command) => batch.push(command),
                    Err(error) => warn!(line = self.line, %error, "Skipping invalid row"),
                },
                Err(error) => warn!(line = self.line, %error, "Skipping malformed row"),
            }
        }

        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_async_reader_read_batch() {
        let csv_content = "type,wallet,txid,amount\n\
            open,a,,10\n\
            tx,a,TX1,-5\n\
            open,b,,\n";
        let mut reader = AsyncReader::new(Cursor::new(csv_content.as_bytes()));

        let batch = reader.read_batch(2).await;
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch[1],
            LedgerCommand::Apply {
                label: "a".to_string(),
                txid: "TX1".to_string(),
                amount: Decimal::new(-5, 0)
            }
        );

        let batch = reader.read_batch(2).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].label(), "b");

        assert!(reader.read_batch(2).await.is_empty());
    }

    #[tokio::test]
    async fn test_async_reader_empty_csv() {
        let mut reader = AsyncReader::new(Cursor::new("type,wallet,txid,amount\n".as_bytes()));

        assert!(reader.read_batch(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_async_reader_skips_invalid_rows() {
        let csv_content = "type,wallet,txid,amount\n\
            bogus,a,,1\n\
            tx,a,,1\n\
            tx,a,TX2,1\n";
        let mut reader = AsyncReader::new(Cursor::new(csv_content.as_bytes()));

        let batch = reader.read_batch(10).await;

        assert_eq!(batch.len(), 1);
        assert!(matches!(&batch[0], LedgerCommand::Apply { txid, .. } if txid == "TX2"));
        assert_eq!(reader.line, 4);
    }

    #[tokio::test]
    async fn test_async_reader_case_insensitive_and_trimmed() {
        let csv_content = "type,wallet,txid,amount\n  OPEN , a ,, 1.5 \nClose,a,,\n";
        let mut reader = AsyncReader::new(Cursor::new(csv_content.as_bytes()));

        let batch = reader.read_batch(10).await;

        assert_eq!(
            batch,
            vec![
                LedgerCommand::Open {
                    label: "a".to_string(),
                    opening_balance: Decimal::new(15, 1)
                },
                LedgerCommand::Close {
                    label: "a".to_string()
                },
            ]
        );
    }
}
