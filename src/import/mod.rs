//! Import Engine
//!
//! Replays a SQL script (or a JSON rows document) against a live server
//! under a safety policy.
//!
//! # Pipeline
//! ```text
//! reader -> SqlParser -> classify -> SessionSettingsApplier -> StatementExecutor -> Driver
//! ```
//!
//! Self-affecting statements go straight to the executor (which defers
//! them); every other statement is offered to the settings applier first,
//! which caches known `SET`s and drops unknown ones. After the input is
//! exhausted the queued ownership and rights statements run, then the
//! deferred ones.
//!
//! # Session State
//! One [`ImportSession`] per run is passed by `&mut` through the pipeline.
//! The queues and `truncated_tables` are written by the executor only; the
//! cached settings, `current_schema` and `encoding` by the settings applier
//! only; the scope is fixed at construction.

use std::collections::HashSet;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::config::ImportOptions;
use crate::driver::{split_copy_block, Driver};
use crate::error::{FerryError, Result};

pub mod adapt;
pub mod classify;
pub mod executor;
pub mod json;
pub mod log;
pub mod parser;
pub mod settings;

pub use classify::{classify, StatementCategory};
pub use executor::{ExecError, ExecResult, StatementExecutor};
pub use json::{JsonRowParser, JsonRowStream};
pub use log::{ImportLog, LogEntry, LogKind};
pub use parser::{ItemKind, SqlItem, SqlParser};
pub use settings::{SessionSettingsApplier, SettingDecision};

/// Level an import targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportScope {
    /// Whole cluster: roles and databases may be created
    Server,
    #[default]
    Database,
    /// One schema; unqualified data targets resolve into it
    Schema,
}

/// Mutable state of one import run
#[derive(Debug, Clone, Default)]
pub struct ImportSession {
    scope: ImportScope,
    scope_ident: Option<String>,
    deferred: Vec<String>,
    ownership_queue: Vec<String>,
    rights_queue: Vec<String>,
    truncated_tables: HashSet<String>,
    cached_settings: Vec<String>,
    seen_settings: HashSet<String>,
    current_schema: Option<String>,
    encoding: Option<String>,
    log: ImportLog,
}

impl ImportSession {
    /// Session for `scope`; `scope_ident` names the schema of a schema scope
    #[must_use]
    pub fn new(scope: ImportScope, scope_ident: Option<String>) -> Self {
        Self { scope, scope_ident, ..Self::default() }
    }

    #[must_use]
    pub fn scope(&self) -> ImportScope {
        self.scope
    }

    #[must_use]
    pub fn scope_ident(&self) -> Option<&str> {
        self.scope_ident.as_deref()
    }

    /// Self-affecting statements held for the end of the run
    #[must_use]
    pub fn deferred(&self) -> &[String] {
        &self.deferred
    }

    #[must_use]
    pub fn ownership_queue(&self) -> &[String] {
        &self.ownership_queue
    }

    #[must_use]
    pub fn rights_queue(&self) -> &[String] {
        &self.rights_queue
    }

    /// Whether `schema.table` (or a bare name truncated without a known
    /// schema) was already truncated in this run
    #[must_use]
    pub fn is_truncated(&self, table: &str) -> bool {
        self.truncated_tables.contains(table)
    }

    /// Known `SET` statements seen so far, in order, de-duplicated
    #[must_use]
    pub fn cached_settings(&self) -> &[String] {
        &self.cached_settings
    }

    /// First schema of the last `search_path` setting
    #[must_use]
    pub fn current_schema(&self) -> Option<&str> {
        self.current_schema.as_deref()
    }

    /// Last `client_encoding` setting
    #[must_use]
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    #[must_use]
    pub fn log(&self) -> &ImportLog {
        &self.log
    }
}

/// Summary of a finished import
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    /// Statements read from the input
    pub statements: usize,
    /// Statements that reached the server and succeeded
    pub executed: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    pub cached_settings: Vec<String>,
    pub log: ImportLog,
}

/// Drives one import from input to report
pub struct ImportRunner<'d> {
    driver: &'d mut dyn Driver,
    executor: StatementExecutor,
    settings: SessionSettingsApplier,
    session: ImportSession,
    statements: usize,
    executed: usize,
    failed: usize,
}

impl<'d> ImportRunner<'d> {
    pub fn new(driver: &'d mut dyn Driver, options: ImportOptions, session: ImportSession) -> Result<Self> {
        let executor = StatementExecutor::new(options, &*driver)?;
        let settings = SessionSettingsApplier::new(driver.server_version());
        Ok(Self { driver, executor, settings, session, statements: 0, executed: 0, failed: 0 })
    }

    /// Reject `ddl_other` statements for which `filter` returns false
    #[must_use]
    pub fn with_category_filter(mut self, filter: impl Fn(StatementCategory, &str) -> bool + 'static) -> Self {
        self.executor = self.executor.with_category_filter(filter);
        self
    }

    #[must_use]
    pub fn session(&self) -> &ImportSession {
        &self.session
    }

    /// Route one statement through settings and policy
    ///
    /// Returns [`FerryError::ImportAborted`] when it fails under `abort`.
    pub fn run_statement(&mut self, sql: &str) -> Result<()> {
        if sql.trim().is_empty() {
            return Ok(());
        }
        self.statements += 1;

        let category = classify(sql, self.executor.current_user());
        if category != StatementCategory::SelfAffecting
            && self.settings.collect(sql, &mut self.session) == SettingDecision::Skip
        {
            return Ok(());
        }

        let result = self.executor.execute(&mut *self.driver, &mut self.session, sql);
        self.record(&result)
    }

    fn record(&mut self, result: &ExecResult) -> Result<()> {
        if result.executed {
            self.executed += 1;
        }
        if result.is_error() {
            self.failed += 1;
        }
        self.executor.settle(result)
    }

    /// Read a SQL script in chunks of `chunk_size` bytes and run it
    pub fn import_sql<R: Read>(&mut self, reader: R) -> Result<()> {
        let mut parser = SqlParser::new();
        let chunk_size = self.executor.options().chunk_size;

        read_text_chunks(reader, chunk_size, |chunk| {
            for item in parser.parse(chunk).items {
                self.run_statement(item.sql())?;
            }
            Ok(())
        })?;

        let output = parser.finish();
        for item in output.items {
            self.run_statement(item.sql())?;
        }
        self.run_tail(&output.remainder)
    }

    /// Text left after the last complete item
    fn run_tail(&mut self, tail: &str) -> Result<()> {
        let sql = classify::skip_leading_noise(tail).trim_end();
        if sql.is_empty() {
            return Ok(());
        }

        if split_copy_block(sql).is_some() {
            self.statements += 1;
            self.session.log.push(
                LogEntry::new(LogKind::Error, "Input ended inside a COPY block without a \\. terminator")
                    .with_sql(sql),
            );
            let result = ExecResult {
                executed: false,
                error: Some(ExecError { sql: log::excerpt(sql, 200), message: "unterminated COPY data".into() }),
            };
            return self.record(&result);
        }

        self.run_statement(sql)
    }

    /// Read a JSON rows document and insert its rows into `table`
    pub fn import_json<R: Read>(&mut self, reader: R, table: &str) -> Result<()> {
        let mut stream = JsonRowStream::new();
        let chunk_size = self.executor.options().chunk_size;

        read_text_chunks(reader, chunk_size, |chunk| {
            let rows = stream.feed(chunk);
            for sql in json::rows_to_insert(table, stream.header(), &rows) {
                self.run_statement(&sql)?;
            }
            Ok(())
        })?;

        stream.finish()
    }

    /// Replay the cached session settings, e.g. after reconnecting
    pub fn reapply_settings(&mut self) -> usize {
        self.settings.apply_settings(&mut *self.driver, &mut self.session)
    }

    /// Run the queued and deferred statements and summarise the run
    pub fn finish(mut self) -> Result<ImportReport> {
        self.failed += self.executor.flush_queues(&mut *self.driver, &mut self.session)?;

        let session = self.session;
        tracing::info!(
            statements = self.statements,
            executed = self.executed,
            failed = self.failed,
            "import finished"
        );
        Ok(ImportReport {
            statements: self.statements,
            executed: self.executed,
            failed: self.failed,
            current_schema: session.current_schema,
            encoding: session.encoding,
            cached_settings: session.cached_settings,
            log: session.log,
        })
    }
}

/// Read `reader` as UTF-8 text, handing out chunks of about `chunk_size` bytes
///
/// A character split by a read boundary is carried into the next chunk.
fn read_text_chunks<R: Read>(
    mut reader: R,
    chunk_size: usize,
    mut on_chunk: impl FnMut(&str) -> Result<()>,
) -> Result<()> {
    let mut buf = vec![0u8; chunk_size.max(16)];
    let mut carry: Vec<u8> = Vec::new();

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        carry.extend_from_slice(&buf[..n]);

        let valid = match std::str::from_utf8(&carry) {
            Ok(text) => text.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(FerryError::invalid_input(format!(
                    "Input is not valid UTF-8 near byte {}",
                    e.valid_up_to()
                )))
            }
        };
        if valid > 0 {
            let text = std::str::from_utf8(&carry[..valid])
                .map_err(|e| FerryError::invalid_input(e.to_string()))?;
            on_chunk(text)?;
            carry.drain(..valid);
        }
    }

    if !carry.is_empty() {
        return Err(FerryError::invalid_input("Input ends with an incomplete UTF-8 sequence"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::scripted::ScriptedDriver;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_text_chunks_keeps_characters_whole() {
        let input = "grüße aus köln".repeat(10);
        let mut pieces = Vec::new();
        read_text_chunks(input.as_bytes(), 16, |chunk| {
            pieces.push(chunk.to_string());
            Ok(())
        })
        .unwrap();
        assert!(pieces.len() > 1);
        assert_eq!(pieces.concat(), input);
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let input: &[u8] = b"SELECT 1;\xff\xfe";
        let err = read_text_chunks(input, 64, |_| Ok(())).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_unknown_set_is_not_executed() {
        let mut driver = ScriptedDriver::new(14.0);
        let mut runner = ImportRunner::new(&mut driver, ImportOptions::default(), ImportSession::default()).unwrap();
        runner.import_sql("SET work_mem = '1GB';\nSET statement_timeout = 0;\n".as_bytes()).unwrap();
        let report = runner.finish().unwrap();
        assert_eq!(report.statements, 2);
        assert_eq!(report.executed, 1);
        assert_eq!(report.cached_settings, ["SET statement_timeout = 0;"]);
        assert_eq!(driver.executed(), ["SET statement_timeout = 0;"]);
    }

    #[test]
    fn test_tail_without_semicolon_runs() {
        let mut driver = ScriptedDriver::new(14.0);
        let mut runner = ImportRunner::new(&mut driver, ImportOptions::default(), ImportSession::default()).unwrap();
        runner.import_sql("CREATE TABLE a (id int);\nCREATE TABLE b (id int)\n".as_bytes()).unwrap();
        runner.finish().unwrap();
        assert_eq!(driver.executed(), ["CREATE TABLE a (id int);", "CREATE TABLE b (id int)"]);
    }

    #[test]
    fn test_unterminated_copy_fails() {
        let mut driver = ScriptedDriver::new(14.0);
        let mut runner = ImportRunner::new(&mut driver, ImportOptions::default(), ImportSession::default()).unwrap();
        let err = runner.import_sql("COPY t (id) FROM stdin;\n1\n2\n".as_bytes()).unwrap_err();
        assert_eq!(err.error_code(), "IMPORT_ABORTED");
        assert_eq!(runner.session().log().count(LogKind::Error), 1);
        drop(runner);
        assert!(driver.executed().is_empty());
    }
}
