//! Row Output Formatters
//!
//! A formatter turns the rows of one table into bytes. The cursor reader
//! drives it: `write_header` once with the column metadata, `write_row` per
//! fetched row, `write_footer` once at the end (also for an empty table).
//!
//! # Formats
//! - [`sql::SqlFormatter`]: `COPY ... FROM stdin` blocks or `INSERT`
//!   statements (one per row, or batched multi-row)
//! - [`delimited::DelimitedFormatter`]: CSV or TSV with a header row

use serde::{Deserialize, Serialize};

use crate::driver::{Cell, FieldInfo};
use crate::error::Result;

pub mod delimited;
pub mod sql;

pub use delimited::DelimitedFormatter;
pub use sql::SqlFormatter;

/// How table data is written in a SQL dump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertFormat {
    /// `COPY ... FROM stdin` data block
    #[default]
    Copy,
    /// Multi-row `INSERT` statements of up to `batch_size` rows
    Multi,
    /// One `INSERT` statement per row
    Single,
}

impl InsertFormat {
    /// Parse a format name (`copy`, `multi`, `single`)
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "copy" => Some(Self::Copy),
            "multi" => Some(Self::Multi),
            "single" => Some(Self::Single),
            _ => None,
        }
    }
}

/// Per-table information a formatter needs besides the columns
#[derive(Debug, Clone)]
pub struct FormatMetadata {
    /// Quoted, schema-qualified table name
    pub table: String,
    /// Rows per multi-row `INSERT`
    pub batch_size: usize,
}

impl FormatMetadata {
    #[must_use]
    pub fn new(table: impl Into<String>, batch_size: usize) -> Self {
        Self { table: table.into(), batch_size: batch_size.max(1) }
    }
}

/// How a column's values are rendered, decided once from its type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeMode {
    /// Numeric types, written as-is
    Numeric,
    /// Booleans, written as `true`/`false`
    Boolean,
    /// bytea, decoded from hex output
    Bytea,
    /// Everything else, written as a string literal
    Literal,
}

impl EscapeMode {
    /// Pick the mode for a server type name
    #[must_use]
    pub fn for_type(type_name: &str) -> Self {
        match type_name.to_ascii_lowercase().as_str() {
            "int2" | "int4" | "int8" | "integer" | "bigint" | "smallint" | "float4" | "float8"
            | "real" | "double precision" | "numeric" | "decimal" | "oid" => Self::Numeric,
            "bool" | "boolean" => Self::Boolean,
            "bytea" => Self::Bytea,
            _ => Self::Literal,
        }
    }
}

/// Writes rows of one table
pub trait RowFormatter {
    /// Start the output for a table; escape modes are computed here
    fn write_header(&mut self, fields: &[FieldInfo], meta: &FormatMetadata) -> Result<()>;

    fn write_row(&mut self, row: &[Cell]) -> Result<()>;

    /// Close whatever the header or the last row left open
    fn write_footer(&mut self) -> Result<()>;

    /// Rows written since the header
    fn rows_written(&self) -> u64;
}

/// Decode a bytea value in hex output form (`\x0aff`)
///
/// Values that are not valid hex output are taken as raw bytes.
#[must_use]
pub fn decode_bytea(text: &str) -> Vec<u8> {
    text.strip_prefix("\\x")
        .and_then(|digits| hex::decode(digits).ok())
        .unwrap_or_else(|| text.as_bytes().to_vec())
}
