//! I/O module
//!
//! Handles action-script parsing and CSV output.
//!
//! # Components
//!
//! - `csv_format` - Script row conversion, ledger export and stats serialization
//! - `script_reader` - Streaming action-script reader with iterator interface

pub mod csv_format;
pub mod script_reader;

pub use csv_format::{
    convert_action_record, write_ledger_csv, write_stats_csv, ActionRecord, ScriptAction,
};
pub use script_reader::ScriptReader;
