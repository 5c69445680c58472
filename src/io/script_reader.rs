//! Streaming reader over action-script CSV files
//!
//! Provides an iterator over [`ScriptAction`]s, delegating format concerns
//! to the csv_format module. Rows are deserialized one at a time, so a long
//! script is never loaded into memory at once.
//!
//! ```no_run
//! use rust_ledger_engine::io::ScriptReader;
//! use std::path::Path;
//!
//! let reader = ScriptReader::new(Path::new("actions.csv")).unwrap();
//! for result in reader {
//!     match result {
//!         Ok(action) => println!("Replaying: {:?}", action),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! ```
//!
//! Opening failures are returned from `new()`. Malformed rows are yielded as
//! `Err` items carrying their line number, and iteration continues.

use crate::io::csv_format::{convert_action_record, ActionRecord, ScriptAction};
use crate::types::LedgerError;
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::path::Path;

/// Action-script reader
#[derive(Debug)]
pub struct ScriptReader {
    reader: csv::Reader<File>,
    line_num: u64,
}

impl ScriptReader {
    /// Open a script for streaming iteration
    ///
    /// Fields are trimmed and rows may omit the trailing `destination`.
    pub fn new(path: &Path) -> Result<Self, LedgerError> {
        let file = File::open(path).map_err(|e| LedgerError::Io {
            message: format!("Failed to open file '{}': {}", path.display(), e),
        })?;

        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(file);

        Ok(Self {
            reader,
            line_num: 1,
        })
    }
}

impl Iterator for ScriptReader {
    type Item = Result<ScriptAction, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<ActionRecord>();
        let row = deserializer.next()?;
        self.line_num += 1;

        let line = Some(self.line_num);
        Some(match row {
            Ok(record) => {
                convert_action_record(record).map_err(|message| LedgerError::Parse { line, message })
            }
            Err(e) => Err(LedgerError::Parse {
                line,
                message: e.to_string(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    #[test]
    fn test_script_reader_fails_on_missing_file() {
        let result = ScriptReader::new(Path::new("nonexistent.csv"));
        assert!(matches!(result, Err(LedgerError::Io { .. })));
    }

    #[test]
    fn test_script_reader_iterates_all_actions() {
        let file = create_temp_csv(
            "user,action,amount,destination\n\
             u1,balance,1000,\n\
             u1,deposit,500\n\
             u1,withdrawal,200,0x742d35Cc6634C0532925a3b844Bc454e4438f44e\n",
        );

        let actions: Vec<_> = ScriptReader::new(file.path())
            .unwrap()
            .filter_map(Result::ok)
            .collect();

        assert_eq!(actions.len(), 3);
        assert_eq!(
            actions[0],
            ScriptAction::SetBalance {
                user: "u1".to_string(),
                amount: Decimal::new(1000, 0)
            }
        );
        assert!(matches!(actions[1], ScriptAction::Deposit { .. }));
        assert!(matches!(actions[2], ScriptAction::Withdrawal { .. }));
    }

    #[test]
    fn test_script_reader_includes_line_numbers_in_errors() {
        let file = create_temp_csv(
            "user,action,amount,destination\n\
             u1,deposit,500,\n\
             u1,deposit,lots,\n\
             u2,deposit,75,\n",
        );

        let records: Vec<_> = ScriptReader::new(file.path()).unwrap().collect();

        assert_eq!(records.len(), 3);
        assert!(records[0].is_ok());
        assert!(records[2].is_ok());
        match &records[1] {
            Err(LedgerError::Parse { line, message }) => {
                assert_eq!(*line, Some(3));
                assert!(message.contains("Invalid amount"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_script_reader_handles_whitespace() {
        let file = create_temp_csv("user,action,amount,destination\n  u1  ,  Deposit  ,  100.0  ,\n");

        let records: Vec<_> = ScriptReader::new(file.path()).unwrap().collect();

        assert_eq!(
            records,
            vec![Ok(ScriptAction::Deposit {
                user: "u1".to_string(),
                amount: Decimal::new(1000, 1)
            })]
        );
    }

    #[test]
    fn test_script_reader_handles_empty_file_after_header() {
        let file = create_temp_csv("user,action,amount,destination\n");
        assert_eq!(ScriptReader::new(file.path()).unwrap().count(), 0);
    }
}
