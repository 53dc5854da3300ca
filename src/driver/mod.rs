//! Database Driver Boundary
//!
//! Everything that talks to a server goes through the [`Driver`] trait: the
//! dumpers read catalog rows with [`Driver::select_set`], the cursor reader
//! streams table data with it, and the import executor replays statements
//! with [`Driver::execute`].
//!
//! # Value Model
//! Result values are carried as PostgreSQL text output (`Option<String>`,
//! `None` for SQL NULL). bytea arrives in hex output format (`\x...`) and is
//! decoded by the formatters.
//!
//! # Implementations
//! - [`postgres::PostgresDriver`]: `tokio-postgres` client behind a
//!   blocking facade (feature `postgres`)
//! - [`scripted::ScriptedDriver`]: in-memory driver answering queries from
//!   registered responses and recording executed statements

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[cfg(feature = "postgres")]
pub mod postgres;

pub mod scripted;

/// Connection parameters for a PostgreSQL server
///
/// All fields are optional at the serde level so a profile can leave some of
/// them to command-line flags; [`postgres::PostgresDriver::connect`] reports
/// the ones still missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl ConnectionConfig {
    /// Create a fully specified connection config
    #[must_use]
    pub fn postgres(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            database: Some(database.into()),
        }
    }

    /// Fill unset fields from `other`
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self {
            host: self.host.or(other.host),
            port: self.port.or(other.port),
            user: self.user.or(other.user),
            password: self.password.or(other.password),
            database: self.database.or(other.database),
        }
    }
}

/// One result value in text form; `None` is SQL NULL
pub type Cell = Option<String>;

/// Column metadata of a result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Column name as returned by the server
    pub name: String,

    /// Type name (`int4`, `text`, `bytea`, ...); empty when unknown
    pub type_name: String,
}

impl FieldInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self { name: name.into(), type_name: type_name.into() }
    }
}

/// Rows returned by a query, values in text form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    fields: Vec<FieldInfo>,
    rows: Vec<Vec<Cell>>,
}

impl RecordSet {
    #[must_use]
    pub fn new(fields: Vec<FieldInfo>, rows: Vec<Vec<Cell>>) -> Self {
        Self { fields, rows }
    }

    /// Build a record set from untyped column names and rows of optional strings
    ///
    /// Convenient for scripted responses:
    /// `RecordSet::from_rows(&["relname"], vec![vec![Some("t")]])`
    #[must_use]
    pub fn from_rows(columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> Self {
        let fields = columns.iter().map(|c| FieldInfo::new(*c, "")).collect();
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.map(str::to_string)).collect())
            .collect();
        Self { fields, rows }
    }

    /// True when the set holds no rows
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over rows with by-name access
    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(move |values| RowRef { fields: &self.fields, values })
    }

    /// First row, if any
    #[must_use]
    pub fn first(&self) -> Option<RowRef<'_>> {
        self.rows.first().map(|values| RowRef { fields: &self.fields, values })
    }
}

/// Borrowed view of one row in a [`RecordSet`]
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    fields: &'a [FieldInfo],
    values: &'a [Cell],
}

impl<'a> RowRef<'a> {
    /// Value of the named column; `None` for NULL or an unknown column
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a str> {
        let idx = self.fields.iter().position(|f| f.name == name)?;
        self.values.get(idx).and_then(|v| v.as_deref())
    }

    /// Value of the named column, empty string for NULL
    #[must_use]
    pub fn text(&self, name: &str) -> &'a str {
        self.get(name).unwrap_or("")
    }

    /// Boolean column (`t`/`true`)
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some("t" | "true" | "on" | "1"))
    }

    /// Integer column; `None` when NULL or not a number
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    /// Raw values in field order
    #[must_use]
    pub fn values(&self) -> &'a [Cell] {
        self.values
    }
}

/// Connection to a PostgreSQL-compatible server
///
/// Statements run one at a time on a single session. Methods take `&mut self`
/// because a driver owns its session state (open transaction, cursors).
pub trait Driver {
    /// Execute a statement; a non-zero status is [`crate::FerryError::Driver`]
    ///
    /// A `COPY ... FROM stdin;` block (header line, data lines, `\.`) is
    /// accepted as a single statement.
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Run a query and return its rows in text form
    fn select_set(&mut self, sql: &str) -> Result<RecordSet>;

    /// Column names and types a query would return, without fetching rows
    fn describe(&mut self, sql: &str) -> Result<Vec<FieldInfo>> {
        let set = self.select_set(&format!("SELECT * FROM ({sql}) AS described LIMIT 0"))?;
        Ok(set.fields().to_vec())
    }

    /// Server version as `major.minor` (`9.6`, `14.0`)
    fn server_version(&self) -> f64;

    /// Role the session is connected as
    fn current_user(&self) -> &str;

    /// Whether the session role is a superuser
    fn is_superuser(&self) -> bool;

    fn escape_identifier(&self, ident: &str) -> String {
        quote_ident(ident)
    }

    fn escape_literal(&self, value: &str) -> String {
        quote_literal(value)
    }

    /// bytea literal in hex input format
    fn escape_bytea(&self, bytes: &[u8]) -> String {
        format!("'\\x{}'", hex::encode(bytes))
    }
}

/// Double-quote an identifier, doubling embedded quotes
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Schema-qualified, quoted name: `"schema"."name"`
#[must_use]
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Single-quote a string literal
///
/// Quotes are doubled. A value containing a backslash is written as an
/// escape string (`E'...'`) with the backslashes doubled, so the literal reads
/// the same under either `standard_conforming_strings` setting.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    let quoted = value.replace('\'', "''");
    if quoted.contains('\\') {
        format!("E'{}'", quoted.replace('\\', "\\\\"))
    } else {
        format!("'{quoted}'")
    }
}

/// Convert `server_version_num` (`90624`, `140005`) into `major.minor`
#[must_use]
pub fn version_from_num(num: i64) -> f64 {
    let major = num / 10000;
    if major >= 10 {
        major as f64
    } else {
        let minor = (num / 100) % 100;
        major as f64 + minor as f64 / 10.0
    }
}

/// Split a `COPY ... FROM stdin;` block into its command and data payload
///
/// Returns the command without its trailing semicolon and the data lines with
/// the `\.` terminator line removed. Returns `None` for anything else.
#[must_use]
pub fn split_copy_block(sql: &str) -> Option<(&str, &str)> {
    let body = crate::import::classify::skip_leading_noise(sql);
    let (header, data) = match body.find('\n') {
        Some(idx) => (&body[..idx], &body[idx + 1..]),
        None => (body, ""),
    };
    let upper = header.to_ascii_uppercase();
    if !upper.starts_with("COPY") || !upper.contains("FROM STDIN") {
        return None;
    }

    let mut end = data.len();
    for terminator in ["\\.\r\n", "\\.\n", "\\."] {
        if data.ends_with(terminator) {
            let start = data.len() - terminator.len();
            if start == 0 || data[..start].ends_with('\n') {
                end = start;
                break;
            }
        }
    }

    Some((header.trim_end().trim_end_matches(';').trim_end(), &data[..end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_or() {
        let flags = ConnectionConfig { database: Some("app".into()), ..Default::default() };
        let profile = ConnectionConfig::postgres("db.local", 5433, "admin", "secret", "postgres");
        let merged = flags.or(profile);
        assert_eq!(merged.database.as_deref(), Some("app"));
        assert_eq!(merged.host.as_deref(), Some("db.local"));
        assert_eq!(merged.port, Some(5433));
    }

    #[test]
    fn test_connection_config_password_not_serialized_when_none() {
        let config = ConnectionConfig { host: Some("localhost".into()), ..Default::default() };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("password"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified("public", "t"), "\"public\".\"t\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("abc"), "'abc'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("a\\b"), "E'a\\\\b'");
    }

    #[test]
    fn test_version_from_num() {
        assert!((version_from_num(90624) - 9.6).abs() < f64::EPSILON);
        assert!((version_from_num(90500) - 9.5).abs() < f64::EPSILON);
        assert!((version_from_num(140005) - 14.0).abs() < f64::EPSILON);
        assert!((version_from_num(100001) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_set_access() {
        let set = RecordSet::from_rows(
            &["name", "is_called", "cache"],
            vec![vec![Some("seq"), Some("t"), None]],
        );
        assert!(!set.is_eof());
        let row = set.first().unwrap();
        assert_eq!(row.get("name"), Some("seq"));
        assert!(row.flag("is_called"));
        assert_eq!(row.get("cache"), None);
        assert_eq!(row.text("cache"), "");
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.int("name"), None);
    }

    #[test]
    fn test_split_copy_block() {
        let sql = "COPY t (id) FROM stdin;\n1\n2\n\\.\n";
        assert_eq!(split_copy_block(sql), Some(("COPY t (id) FROM stdin", "1\n2\n")));

        let sql = "\n-- data\ncopy t from STDIN;\r\n\\.";
        assert_eq!(split_copy_block(sql), Some(("copy t from STDIN", "")));

        assert_eq!(split_copy_block("COPY t TO stdout;"), None);
        assert_eq!(split_copy_block("INSERT INTO t VALUES (1);"), None);
    }
}
