//! Streaming JSON Row Import
//!
//! Reads exported table data of the form
//!
//! ```json
//! {
//!   "columns": [ { "name": "id", "type": "int4" }, ... ],
//!   "data": [ { "id": 1, ... }, ... ]
//! }
//! ```
//!
//! chunk by chunk without holding the document in memory. [`JsonRowParser`]
//! is a small tokenizer plus a mode machine; a token cut by a chunk boundary
//! is handed back as the remainder, which the caller prepends to the next
//! chunk ([`JsonRowStream`] does this). Row values are scalars; a nested
//! array or object inside a row is read as `null`, and a number too precise
//! for `f64` is kept as its text.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::driver::{quote_ident, quote_literal};
use crate::error::{FerryError, Result};

/// Column header entry of a JSON export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// One data row, keyed by column name
pub type JsonRow = Map<String, Value>;

/// Result of feeding one chunk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonParseOutput {
    pub rows: Vec<JsonRow>,
    /// Unconsumed tail; prepend it to the next chunk
    pub remainder: String,
    /// Column header, once it has been read
    pub header: Option<Vec<JsonColumn>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(u8),
    Close(u8),
    Colon,
    Comma,
    Str(String),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Root,
    /// Saw the `columns` key, waiting for its array
    Columns,
    ColumnsArray,
    /// Inside one `{ "name": .., "type": .. }` header entry
    Column,
    /// Saw the `data` key, waiting for its array
    Data,
    DataArray,
    Row,
}

/// Resumable parser for the JSON rows document
#[derive(Debug, Clone)]
pub struct JsonRowParser {
    mode: Mode,
    stack: Vec<u8>,
    columns: Option<Vec<JsonColumn>>,
    current_row: JsonRow,
    current_column: JsonColumn,
    current_key: Option<String>,
    /// Stack depth of the row object being read
    row_depth: usize,
}

impl Default for JsonRowParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRowParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: Mode::Root,
            stack: Vec::new(),
            columns: None,
            current_row: Map::new(),
            current_column: JsonColumn::default(),
            current_key: None,
            row_depth: 0,
        }
    }

    /// Consume `chunk` (with the previous remainder already prepended)
    pub fn parse(&mut self, chunk: &str) -> JsonParseOutput {
        let (tokens, consumed) = tokenize(chunk);
        let mut rows = Vec::new();
        for token in tokens {
            if let Some(row) = self.consume(token) {
                rows.push(row);
            }
        }
        JsonParseOutput { rows, remainder: chunk[consumed..].to_string(), header: self.columns.clone() }
    }

    /// Column header, once read
    #[must_use]
    pub fn header(&self) -> Option<&[JsonColumn]> {
        self.columns.as_deref()
    }

    /// Whether the parser is back at the top level of the document
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stack.is_empty() && self.mode == Mode::Root
    }

    fn consume(&mut self, token: Token) -> Option<JsonRow> {
        match token {
            Token::Open(bracket) => {
                self.stack.push(bracket);
                match (self.mode, bracket) {
                    (Mode::Columns, b'[') => {
                        self.columns = Some(Vec::new());
                        self.mode = Mode::ColumnsArray;
                    }
                    (Mode::ColumnsArray, b'{') => {
                        self.current_column = JsonColumn::default();
                        self.current_key = None;
                        self.mode = Mode::Column;
                    }
                    (Mode::Data, b'[') => self.mode = Mode::DataArray,
                    (Mode::DataArray, b'{') => {
                        self.current_row = Map::new();
                        self.current_key = None;
                        self.row_depth = self.stack.len();
                        self.mode = Mode::Row;
                    }
                    _ => {}
                }
                None
            }
            Token::Close(_) => {
                let depth = self.stack.len();
                self.stack.pop();
                match self.mode {
                    Mode::Row if depth == self.row_depth => {
                        self.mode = Mode::DataArray;
                        return Some(std::mem::take(&mut self.current_row));
                    }
                    Mode::Row if depth == self.row_depth + 1 => {
                        // nested container value ends
                        if let Some(key) = self.current_key.take() {
                            self.current_row.insert(key, Value::Null);
                        }
                    }
                    Mode::Column => {
                        if let Some(columns) = self.columns.as_mut() {
                            columns.push(std::mem::take(&mut self.current_column));
                        }
                        self.mode = Mode::ColumnsArray;
                    }
                    Mode::ColumnsArray | Mode::DataArray => self.mode = Mode::Root,
                    _ => {}
                }
                None
            }
            Token::Colon | Token::Comma => None,
            Token::Str(text) => {
                self.string(text);
                None
            }
            Token::Literal(value) => {
                self.value(value);
                None
            }
        }
    }

    fn string(&mut self, text: String) {
        match self.mode {
            Mode::Root if self.stack.len() == 1 => match text.as_str() {
                "columns" => self.mode = Mode::Columns,
                "data" => self.mode = Mode::Data,
                _ => {}
            },
            Mode::Column => match self.current_key.take() {
                None => self.current_key = Some(text),
                Some(key) if key == "name" => self.current_column.name = text,
                Some(key) if key == "type" => self.current_column.type_name = text,
                Some(_) => {}
            },
            Mode::Row if self.stack.len() == self.row_depth => match self.current_key.take() {
                None => self.current_key = Some(text),
                Some(key) => {
                    self.current_row.insert(key, Value::String(text));
                }
            },
            _ => {}
        }
    }

    fn value(&mut self, value: Value) {
        match self.mode {
            Mode::Row if self.stack.len() == self.row_depth => {
                if let Some(key) = self.current_key.take() {
                    self.current_row.insert(key, value);
                }
            }
            Mode::Column => {
                self.current_key = None;
            }
            _ => {}
        }
    }
}

/// Split `buffer` into tokens; returns them with the number of bytes consumed
///
/// Stops before a string or literal that may continue in the next chunk, and
/// before a byte that cannot start a token.
fn tokenize(buffer: &str) -> (Vec<Token>, usize) {
    let bytes = buffer.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            _ if c.is_ascii_whitespace() => i += 1,
            b'{' | b'[' => {
                tokens.push(Token::Open(c));
                i += 1;
            }
            b'}' | b']' => {
                tokens.push(Token::Close(c));
                i += 1;
            }
            b':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            b',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            b'"' => {
                let Some(end) = string_end(bytes, i + 1) else { break };
                match serde_json::from_str::<String>(&buffer[i..=end]) {
                    Ok(text) => tokens.push(Token::Str(text)),
                    Err(_) => break,
                }
                i = end + 1;
            }
            b'-' | b'0'..=b'9' | b't' | b'f' | b'n' => {
                let start = i;
                while i < bytes.len() && matches!(bytes[i], b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'+' | b'-' | b'.') {
                    i += 1;
                }
                // a literal touching the end of the chunk may be cut short
                if i == bytes.len() {
                    i = start;
                    break;
                }
                match serde_json::from_str::<Value>(&buffer[start..i]) {
                    Ok(value) => tokens.push(Token::Literal(exact_number(value, &buffer[start..i]))),
                    Err(_) => {
                        i = start;
                        break;
                    }
                }
            }
            _ => break,
        }
    }

    (tokens, i)
}

/// A number `i64`/`u64`/`f64` cannot hold exactly keeps its source text
///
/// The text reaches SQL as a quoted literal, which the server converts to the
/// column's type without going through a float.
fn exact_number(value: Value, token: &str) -> Value {
    let Value::Number(n) = &value else {
        return value;
    };
    let exact = if token.contains(['.', 'e', 'E']) {
        significant_digits(token) <= 15
    } else {
        n.is_i64() || n.is_u64()
    };
    if exact {
        value
    } else {
        Value::String(token.to_string())
    }
}

fn significant_digits(token: &str) -> usize {
    let mantissa = token.split(['e', 'E']).next().unwrap_or(token);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    digits.trim_start_matches('0').trim_end_matches('0').len()
}

/// Index of the closing quote of a string whose body starts at `from`
fn string_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Feeds a [`JsonRowParser`] from arbitrary chunks, carrying the remainder
#[derive(Debug, Clone, Default)]
pub struct JsonRowStream {
    parser: JsonRowParser,
    carry: String,
}

impl JsonRowStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows completed by `chunk`
    pub fn feed(&mut self, chunk: &str) -> Vec<JsonRow> {
        self.carry.push_str(chunk);
        let output = self.parser.parse(&self.carry);
        self.carry = output.remainder;
        output.rows
    }

    #[must_use]
    pub fn header(&self) -> Option<&[JsonColumn]> {
        self.parser.header()
    }

    /// End of input: anything left over means the document was malformed
    pub fn finish(self) -> Result<()> {
        if !self.carry.trim().is_empty() {
            return Err(FerryError::invalid_input(format!(
                "Unexpected trailing JSON input: {}",
                super::log::excerpt(self.carry.trim(), 40)
            )));
        }
        if !self.parser.is_complete() {
            return Err(FerryError::invalid_input("JSON document ended before it was complete"));
        }
        Ok(())
    }
}

/// Build one `INSERT` per row for `table` (`name` or `schema.name`)
///
/// Columns come from the header when known, otherwise from each row's keys.
/// Missing values are NULL; a row without any column inserts `DEFAULT VALUES`.
#[must_use]
pub fn rows_to_insert(table: &str, columns: Option<&[JsonColumn]>, rows: &[JsonRow]) -> Vec<String> {
    let target = match table.split_once('.') {
        Some((schema, name)) => format!("{}.{}", quote_ident(schema), quote_ident(name)),
        None => quote_ident(table),
    };

    rows.iter()
        .map(|row| {
            let names: Vec<&str> = match columns {
                Some(cols) if !cols.is_empty() => cols.iter().map(|c| c.name.as_str()).collect(),
                _ => row.keys().map(String::as_str).collect(),
            };
            if names.is_empty() {
                return format!("INSERT INTO {target} DEFAULT VALUES;");
            }
            let column_list = names.iter().map(|n| quote_ident(n)).collect::<Vec<_>>().join(", ");
            let values = names
                .iter()
                .map(|n| sql_value(row.get(*n).unwrap_or(&Value::Null)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("INSERT INTO {target} ({column_list}) VALUES ({values});")
        })
        .collect()
}

fn sql_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_literal(s),
        other => quote_literal(&other.to_string()),
    }
}
