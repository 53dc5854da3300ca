//! Statement Executor
//!
//! Applies the import safety policy to one statement and runs it:
//!
//! | category | behaviour |
//! |----------|-----------|
//! | `self_affecting` | deferred to the end of the run (`defer_self`) |
//! | `data` | needs `data`; optional truncate-once of the target table |
//! | `drop` | needs `allow_drops`, otherwise blocked |
//! | `ownership_change` | queued when `ownership`, otherwise skipped |
//! | `rights` | queued when `rights`, otherwise skipped |
//! | `ddl_other` | schema / role / tablespace gates, then the category filter |
//!
//! Statements that reach the server are version adapted first
//! ([`VersionAdapter`]). A failed statement never unwinds: it is logged and
//! returned in [`ExecResult::error`], and the run decides with
//! [`StatementExecutor::settle`] whether to stop.

use serde::Serialize;

use super::adapt::VersionAdapter;
use super::classify::{self, StatementCategory};
use super::log::{excerpt, LogEntry, LogKind};
use super::{ImportScope, ImportSession};
use crate::config::{ErrorMode, ImportOptions};
use crate::driver::{qualified, quote_ident, Driver};
use crate::error::{FerryError, Result};

/// Characters of a statement shown by verbose logging
const VERBOSE_CHARS: usize = 200;

/// Failure of one statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecError {
    pub sql: String,
    pub message: String,
}

/// Outcome of [`StatementExecutor::execute`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    /// The statement reached the server and succeeded
    pub executed: bool,
    pub error: Option<ExecError>,
}

impl ExecResult {
    const fn done() -> Self {
        Self { executed: true, error: None }
    }

    const fn held() -> Self {
        Self { executed: false, error: None }
    }

    fn failed(sql: &str, message: impl Into<String>) -> Self {
        Self { executed: false, error: Some(ExecError { sql: sql.to_string(), message: message.into() }) }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Extra gate applied to `ddl_other` statements after the built-in ones
pub type CategoryFilter = Box<dyn Fn(StatementCategory, &str) -> bool>;

/// Runs classified statements under the import options
pub struct StatementExecutor {
    options: ImportOptions,
    adapter: VersionAdapter,
    current_user: String,
    superuser: bool,
    allow_category: Option<CategoryFilter>,
}

impl StatementExecutor {
    /// Executor for the server and role `driver` is connected to
    pub fn new(options: ImportOptions, driver: &dyn Driver) -> Result<Self> {
        Ok(Self {
            options,
            adapter: VersionAdapter::new(driver.server_version())?,
            current_user: driver.current_user().to_string(),
            superuser: driver.is_superuser(),
            allow_category: None,
        })
    }

    /// Reject `ddl_other` statements for which `filter` returns false
    #[must_use]
    pub fn with_category_filter(mut self, filter: impl Fn(StatementCategory, &str) -> bool + 'static) -> Self {
        self.allow_category = Some(Box::new(filter));
        self
    }

    #[must_use]
    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    #[must_use]
    pub fn current_user(&self) -> &str {
        &self.current_user
    }

    /// Classify `statement` and apply the policy of its category
    pub fn execute(&self, driver: &mut dyn Driver, session: &mut ImportSession, statement: &str) -> ExecResult {
        let sql = classify::skip_leading_noise(statement).trim_end();
        if sql.is_empty() {
            return ExecResult::held();
        }

        let category = classify::classify(sql, &self.current_user);
        match category {
            StatementCategory::SelfAffecting => self.handle_self_affecting(driver, session, sql),
            StatementCategory::Data => self.handle_data(driver, session, sql),
            StatementCategory::Drop => {
                if !self.options.allow_drops {
                    return self.refuse(session, LogKind::Blocked, "DROP statements not allowed", "drops_not_allowed", sql, category);
                }
                self.execute_statement(driver, session, sql)
            }
            StatementCategory::OwnershipChange => {
                if !self.options.ownership {
                    return self.refuse(session, LogKind::Skipped, "Ownership changes disabled", "ownership_disabled", sql, category);
                }
                session.ownership_queue.push(sql.to_string());
                session.log.push(
                    LogEntry::new(LogKind::QueuedOwnership, "Ownership statement queued").with_sql(sql).with_category(category),
                );
                ExecResult::held()
            }
            StatementCategory::Rights => {
                if !self.options.rights {
                    return self.refuse(session, LogKind::Skipped, "Rights statements disabled", "rights_disabled", sql, category);
                }
                session.rights_queue.push(sql.to_string());
                session.log.push(
                    LogEntry::new(LogKind::QueuedRights, "Rights statement queued").with_sql(sql).with_category(category),
                );
                ExecResult::held()
            }
            StatementCategory::DdlOther => self.handle_ddl(driver, session, sql),
        }
    }

    fn handle_self_affecting(&self, driver: &mut dyn Driver, session: &mut ImportSession, sql: &str) -> ExecResult {
        let message = if self.options.defer_self {
            "Self-affecting statement deferred"
        } else if self.superuser || session.scope == ImportScope::Server {
            return self.execute_statement(driver, session, sql);
        } else {
            "Self-affecting statement deferred (not superuser)"
        };

        session.deferred.push(sql.to_string());
        session.log.push(
            LogEntry::new(LogKind::Deferred, message).with_sql(sql).with_category(StatementCategory::SelfAffecting),
        );
        ExecResult::held()
    }

    fn handle_data(&self, driver: &mut dyn Driver, session: &mut ImportSession, sql: &str) -> ExecResult {
        if !self.options.data {
            return self.refuse(session, LogKind::Skipped, "Data import disabled", "data_disabled", sql, StatementCategory::Data);
        }
        if self.options.truncate {
            self.truncate_once(driver, session, sql);
        }
        self.execute_statement(driver, session, sql)
    }

    fn handle_ddl(&self, driver: &mut dyn Driver, session: &mut ImportSession, sql: &str) -> ExecResult {
        let category = StatementCategory::DdlOther;
        if !self.options.schema_create && classify::is_create_schema(sql) {
            return self.refuse(session, LogKind::Skipped, "Schema creation disabled", "schema_create_disabled", sql, category);
        }
        if !self.options.roles && classify::is_role_statement(sql) {
            return self.refuse(session, LogKind::Skipped, "Role operations disabled", "roles_disabled", sql, category);
        }
        if !self.options.tablespaces && classify::is_tablespace_statement(sql) {
            return self.refuse(session, LogKind::Skipped, "Tablespace operations disabled", "tablespaces_disabled", sql, category);
        }
        if let Some(filter) = &self.allow_category {
            if !filter(category, sql) {
                return self.refuse(session, LogKind::Blocked, "Statement category not allowed", "category_not_allowed", sql, category);
            }
        }
        self.execute_statement(driver, session, sql)
    }

    fn refuse(
        &self,
        session: &mut ImportSession,
        kind: LogKind,
        message: &str,
        reason: &str,
        sql: &str,
        category: StatementCategory,
    ) -> ExecResult {
        session
            .log
            .push(LogEntry::new(kind, message).with_sql(sql).with_reason(reason).with_category(category));
        ExecResult::held()
    }

    /// Truncate the target table of a data statement, once per session
    ///
    /// Without a known schema the name stays unqualified and the server's
    /// `search_path` picks the table, as it does for the data statement. A
    /// table counts as truncated only after `TRUNCATE` succeeded.
    fn truncate_once(&self, driver: &mut dyn Driver, session: &mut ImportSession, sql: &str) {
        let Some((schema, table)) = classify::data_target(sql) else {
            return;
        };
        let schema = schema
            .or_else(|| match session.scope {
                ImportScope::Schema => session.scope_ident.clone(),
                _ => None,
            })
            .or_else(|| session.current_schema.clone());

        let (key, target) = match &schema {
            Some(schema) => (format!("{schema}.{table}"), qualified(schema, &table)),
            None => (table.clone(), quote_ident(&table)),
        };
        if session.truncated_tables.contains(&key) {
            return;
        }

        let truncate = format!("TRUNCATE TABLE {target}");
        match driver.execute(&truncate) {
            Ok(()) => {
                session.truncated_tables.insert(key);
                session
                    .log
                    .push(LogEntry::new(LogKind::Truncated, "Table truncated before data import").with_sql(&truncate));
            }
            Err(e) => session.log.push(
                LogEntry::new(LogKind::Warning, format!("TRUNCATE failed: {}", driver_message(&e))).with_sql(&truncate),
            ),
        }
    }

    /// Adapt `sql` to the server version and run it
    pub fn execute_statement(&self, driver: &mut dyn Driver, session: &mut ImportSession, sql: &str) -> ExecResult {
        let adapted = self.adapter.adapt(sql);

        if self.options.verbose {
            session.log.info(format!("Executing: {}", excerpt(&adapted, VERBOSE_CHARS)));
        }

        match driver.execute(&adapted) {
            Ok(()) => {
                if self.options.verbose {
                    session.log.push(LogEntry::new(LogKind::Success, "Statement executed"));
                }
                ExecResult::done()
            }
            Err(e) => {
                let message = driver_message(&e);
                session.log.push(
                    LogEntry::new(LogKind::Error, format!("Statement execution failed: {message}")).with_sql(&adapted),
                );
                ExecResult::failed(&adapted, message)
            }
        }
    }

    /// Apply the error mode to a result: `abort` turns a failure into an error
    pub fn settle(&self, result: &ExecResult) -> Result<()> {
        match (&result.error, self.options.error_mode) {
            (Some(error), ErrorMode::Abort) => Err(FerryError::ImportAborted {
                sql: error.sql.clone(),
                message: error.message.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Run the held statements: ownership queue, rights queue, then deferred
    ///
    /// Returns the number of failed statements; under `abort` the first
    /// failure ends the flush with [`FerryError::ImportAborted`].
    pub fn flush_queues(&self, driver: &mut dyn Driver, session: &mut ImportSession) -> Result<usize> {
        let queues = [
            ("ownership", std::mem::take(&mut session.ownership_queue)),
            ("rights", std::mem::take(&mut session.rights_queue)),
            ("deferred", std::mem::take(&mut session.deferred)),
        ];

        let mut failed = 0;
        for (name, statements) in queues {
            if statements.is_empty() {
                continue;
            }
            session.log.info(format!("Executing {} queued {name} statement(s)", statements.len()));
            for sql in statements {
                let result = self.execute_statement(driver, session, &sql);
                if result.is_error() {
                    failed += 1;
                }
                self.settle(&result)?;
            }
        }
        Ok(failed)
    }
}

/// Server message of a driver error, without the crate's prefix
fn driver_message(error: &FerryError) -> String {
    match error {
        FerryError::Driver { message, .. } => message.clone(),
        other => other.message(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::scripted::ScriptedDriver;
    use crate::import::SessionSettingsApplier;
    use pretty_assertions::assert_eq;

    fn options() -> ImportOptions {
        ImportOptions::default()
    }

    fn run(options: ImportOptions, driver: &mut ScriptedDriver, statements: &[&str]) -> ImportSession {
        let executor = StatementExecutor::new(options, driver).unwrap();
        let mut session = ImportSession::new(ImportScope::Database, None);
        for sql in statements {
            executor.execute(driver, &mut session, sql);
        }
        session
    }

    #[test]
    fn test_self_affecting_is_deferred_by_default() {
        let mut driver = ScriptedDriver::new(14.0);
        let session = run(options(), &mut driver, &["SET ROLE app;"]);
        assert!(driver.executed().is_empty());
        assert_eq!(session.deferred(), ["SET ROLE app;"]);
        assert_eq!(session.log().count(LogKind::Deferred), 1);
    }

    #[test]
    fn test_self_affecting_runs_for_superuser_without_defer() {
        let opts = ImportOptions { defer_self: false, ..options() };
        let mut driver = ScriptedDriver::new(14.0);
        let session = run(opts.clone(), &mut driver, &["SET ROLE app;"]);
        assert_eq!(driver.executed(), ["SET ROLE app;"]);
        assert!(session.deferred().is_empty());

        let mut driver = ScriptedDriver::new(14.0).with_user("importer", false);
        let session = run(opts, &mut driver, &["ALTER ROLE importer NOSUPERUSER;"]);
        assert!(driver.executed().is_empty());
        assert_eq!(session.log().entries()[0].message, "Self-affecting statement deferred (not superuser)");
    }

    #[test]
    fn test_server_scope_runs_self_affecting() {
        let opts = ImportOptions { defer_self: false, ..options() };
        let mut driver = ScriptedDriver::new(14.0).with_user("importer", false);
        let executor = StatementExecutor::new(opts, &driver).unwrap();
        let mut session = ImportSession::new(ImportScope::Server, None);
        let result = executor.execute(&mut driver, &mut session, "RESET ROLE;");
        assert!(result.executed);
    }

    #[test]
    fn test_drop_blocked_unless_allowed() {
        let mut driver = ScriptedDriver::new(14.0);
        let session = run(options(), &mut driver, &["DROP TABLE t;"]);
        assert!(driver.executed().is_empty());
        let entry = &session.log().entries()[0];
        assert_eq!(entry.kind, LogKind::Blocked);
        assert_eq!(entry.reason.as_deref(), Some("drops_not_allowed"));

        let mut driver = ScriptedDriver::new(14.0);
        run(ImportOptions { allow_drops: true, ..options() }, &mut driver, &["DROP TABLE t;"]);
        assert_eq!(driver.executed(), ["DROP TABLE t;"]);
    }

    #[test]
    fn test_ownership_and_rights_queue() {
        let opts = ImportOptions { ownership: true, rights: true, ..options() };
        let mut driver = ScriptedDriver::new(14.0);
        let session = run(opts, &mut driver, &[
            "ALTER TABLE t OWNER TO app;",
            "GRANT SELECT ON t TO reader;",
        ]);
        assert!(driver.executed().is_empty());
        assert_eq!(session.ownership_queue(), ["ALTER TABLE t OWNER TO app;"]);
        assert_eq!(session.rights_queue(), ["GRANT SELECT ON t TO reader;"]);

        let mut driver = ScriptedDriver::new(14.0);
        let session = run(options(), &mut driver, &["GRANT SELECT ON t TO reader;"]);
        assert!(session.rights_queue().is_empty());
        assert_eq!(session.log().entries()[0].reason.as_deref(), Some("rights_disabled"));
    }

    #[test]
    fn test_truncate_once_per_table() {
        let opts = ImportOptions { truncate: true, ..options() };
        let mut driver = ScriptedDriver::new(14.0);
        let session = run(opts, &mut driver, &[
            "INSERT INTO t VALUES (1);",
            "INSERT INTO t VALUES (2);",
            "INSERT INTO app.u VALUES (3);",
        ]);
        assert_eq!(driver.executed(), [
            "TRUNCATE TABLE \"t\"",
            "INSERT INTO t VALUES (1);",
            "INSERT INTO t VALUES (2);",
            "TRUNCATE TABLE \"app\".\"u\"",
            "INSERT INTO app.u VALUES (3);",
        ]);
        assert!(session.is_truncated("t"));
        assert!(!session.is_truncated("public.t"));
        assert_eq!(session.log().count(LogKind::Truncated), 2);
    }

    #[test]
    fn test_truncate_follows_current_schema() {
        let opts = ImportOptions { truncate: true, ..options() };
        let mut driver = ScriptedDriver::new(14.0);
        let executor = StatementExecutor::new(opts, &driver).unwrap();
        let mut session = ImportSession::new(ImportScope::Database, None);
        SessionSettingsApplier::new(14.0).collect("SET search_path = app, public;", &mut session);

        executor.execute(&mut driver, &mut session, "INSERT INTO t VALUES (1);");
        assert_eq!(driver.executed()[0], "TRUNCATE TABLE \"app\".\"t\"");
        assert!(session.is_truncated("app.t"));
    }

    #[test]
    fn test_truncate_uses_schema_scope() {
        let opts = ImportOptions { truncate: true, ..options() };
        let mut driver = ScriptedDriver::new(14.0);
        let executor = StatementExecutor::new(opts, &driver).unwrap();
        let mut session = ImportSession::new(ImportScope::Schema, Some("sales".to_string()));
        executor.execute(&mut driver, &mut session, "COPY orders (id) FROM stdin;\n1\n\\.\n");
        assert_eq!(driver.executed()[0], "TRUNCATE TABLE \"sales\".\"orders\"");
    }

    #[test]
    fn test_truncate_failure_is_not_fatal() {
        let opts = ImportOptions { truncate: true, ..options() };
        let mut driver = ScriptedDriver::new(14.0);
        driver.fail_on("TRUNCATE", "permission denied for table t");
        let executor = StatementExecutor::new(opts, &driver).unwrap();
        let mut session = ImportSession::new(ImportScope::Database, None);
        let result = executor.execute(&mut driver, &mut session, "INSERT INTO t VALUES (1);");
        assert!(result.executed);
        assert_eq!(session.log().entries()[0].message, "TRUNCATE failed: permission denied for table t");
        assert!(!session.is_truncated("t"));

        executor.execute(&mut driver, &mut session, "INSERT INTO t VALUES (2);");
        let attempts = driver.executed().iter().filter(|sql| sql.starts_with("TRUNCATE")).count();
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_data_disabled() {
        let mut driver = ScriptedDriver::new(14.0);
        let session = run(ImportOptions { data: false, ..options() }, &mut driver, &["INSERT INTO t VALUES (1);"]);
        assert!(driver.executed().is_empty());
        assert_eq!(session.log().entries()[0].reason.as_deref(), Some("data_disabled"));
    }

    #[test]
    fn test_ddl_gates() {
        let opts = ImportOptions { schema_create: false, ..options() };
        let mut driver = ScriptedDriver::new(14.0);
        let session = run(opts, &mut driver, &[
            "CREATE SCHEMA app;",
            "CREATE ROLE reader;",
            "CREATE TABLESPACE fast LOCATION '/ssd';",
            "CREATE TABLE t (id int);",
        ]);
        assert_eq!(driver.executed(), ["CREATE TABLE t (id int);"]);
        let reasons: Vec<_> = session.log().entries().iter().filter_map(|e| e.reason.as_deref()).collect();
        assert_eq!(reasons, ["schema_create_disabled", "roles_disabled", "tablespaces_disabled"]);
    }

    #[test]
    fn test_category_filter() {
        let mut driver = ScriptedDriver::new(14.0);
        let executor = StatementExecutor::new(options(), &driver)
            .unwrap()
            .with_category_filter(|_, sql| !sql.starts_with("CREATE EXTENSION"));
        let mut session = ImportSession::new(ImportScope::Database, None);
        let result = executor.execute(&mut driver, &mut session, "CREATE EXTENSION hstore;");
        assert!(!result.executed);
        assert_eq!(session.log().entries()[0].message, "Statement category not allowed");
    }

    #[test]
    fn test_statement_is_adapted_before_execution() {
        let mut driver = ScriptedDriver::new(9.4);
        run(options(), &mut driver, &["-- sequence\nCREATE SEQUENCE IF NOT EXISTS s;\n"]);
        assert_eq!(driver.executed(), ["CREATE SEQUENCE s;"]);
    }

    #[test]
    fn test_failure_is_returned_and_settled() {
        let mut driver = ScriptedDriver::new(14.0);
        driver.fail_on("broken", "syntax error at or near \"broken\"");
        let executor = StatementExecutor::new(options(), &driver).unwrap();
        let mut session = ImportSession::new(ImportScope::Database, None);

        let result = executor.execute(&mut driver, &mut session, "CREATE broken;");
        let error = result.error.as_ref().unwrap();
        assert_eq!(error.message, "syntax error at or near \"broken\"");
        assert_eq!(executor.settle(&result).unwrap_err().error_code(), "IMPORT_ABORTED");

        let lenient =
            StatementExecutor::new(ImportOptions { error_mode: ErrorMode::Continue, ..options() }, &driver).unwrap();
        assert!(lenient.settle(&result).is_ok());
    }

    #[test]
    fn test_verbose_logs_statement() {
        let mut driver = ScriptedDriver::new(14.0);
        let session = run(ImportOptions { verbose: true, ..options() }, &mut driver, &["CREATE TABLE t (id int);"]);
        let messages: Vec<_> = session.log().entries().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["Executing: CREATE TABLE t (id int);", "Statement executed"]);
    }

    #[test]
    fn test_flush_order() {
        let opts = ImportOptions { ownership: true, rights: true, ..options() };
        let mut driver = ScriptedDriver::new(14.0);
        let executor = StatementExecutor::new(opts, &driver).unwrap();
        let mut session = ImportSession::new(ImportScope::Database, None);
        for sql in ["SET ROLE app;", "GRANT SELECT ON t TO r;", "ALTER TABLE t OWNER TO app;"] {
            executor.execute(&mut driver, &mut session, sql);
        }

        let failed = executor.flush_queues(&mut driver, &mut session).unwrap();
        assert_eq!(failed, 0);
        assert_eq!(driver.executed(), ["ALTER TABLE t OWNER TO app;", "GRANT SELECT ON t TO r;", "SET ROLE app;"]);
        assert!(session.deferred().is_empty());
    }

    #[test]
    fn test_empty_statement() {
        let mut driver = ScriptedDriver::new(14.0);
        let session = run(options(), &mut driver, &["  -- just a comment\n"]);
        assert!(driver.executed().is_empty());
        assert!(session.log().is_empty());
    }
}
