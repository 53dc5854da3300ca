//! In-memory Scripted Driver
//!
//! Answers queries from registered responses and records every executed
//! statement. Used by the integration tests and by `import --dry-run`, where
//! the statement stream is classified and adapted but nothing reaches a
//! server.
//!
//! # Matching
//! A query is answered by the first registered needle it contains. A needle
//! registered several times answers with its responses in order; the last
//! one keeps answering once the others are used up.

use std::collections::VecDeque;

use super::{Driver, RecordSet};
use crate::error::{FerryError, Result};

#[derive(Debug)]
struct Script {
    needle: String,
    responses: VecDeque<RecordSet>,
}

#[derive(Debug)]
struct Failure {
    needle: String,
    message: String,
    /// Matching statements still allowed to succeed
    passes: usize,
}

/// Driver that never touches the network
#[derive(Debug)]
pub struct ScriptedDriver {
    version: f64,
    user: String,
    superuser: bool,
    scripts: Vec<Script>,
    failures: Vec<Failure>,
    executed: Vec<String>,
    queries: Vec<String>,
}

impl ScriptedDriver {
    /// Driver reporting the given server version, connected as `postgres`
    #[must_use]
    pub fn new(version: f64) -> Self {
        Self {
            version,
            user: "postgres".to_string(),
            superuser: true,
            scripts: Vec::new(),
            failures: Vec::new(),
            executed: Vec::new(),
            queries: Vec::new(),
        }
    }

    /// Connect as a different role
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>, superuser: bool) -> Self {
        self.user = user.into();
        self.superuser = superuser;
        self
    }

    /// Answer queries containing `needle` with `response`
    pub fn respond(&mut self, needle: impl Into<String>, response: RecordSet) -> &mut Self {
        let needle = needle.into();
        if let Some(script) = self.scripts.iter_mut().find(|s| s.needle == needle) {
            script.responses.push_back(response);
        } else {
            self.scripts.push(Script { needle, responses: VecDeque::from([response]) });
        }
        self
    }

    /// Fail executed statements containing `needle` with `message`
    pub fn fail_on(&mut self, needle: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.fail_after(needle, 0, message)
    }

    /// Like [`fail_on`](Self::fail_on), but the first `passes` matches succeed
    pub fn fail_after(&mut self, needle: impl Into<String>, passes: usize, message: impl Into<String>) -> &mut Self {
        self.failures.push(Failure { needle: needle.into(), message: message.into(), passes });
        self
    }

    fn check_failure(&mut self, sql: &str) -> Result<()> {
        let Some(failure) = self.failures.iter_mut().find(|f| sql.contains(f.needle.as_str())) else {
            return Ok(());
        };
        if failure.passes > 0 {
            failure.passes -= 1;
            return Ok(());
        }
        Err(FerryError::driver(sql, failure.message.clone()))
    }

    /// Statements passed to [`Driver::execute`], in order
    #[must_use]
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Queries passed to [`Driver::select_set`], in order
    #[must_use]
    pub fn queries(&self) -> &[String] {
        &self.queries
    }
}

impl Driver for ScriptedDriver {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.executed.push(sql.to_string());
        self.check_failure(sql)
    }

    fn select_set(&mut self, sql: &str) -> Result<RecordSet> {
        self.queries.push(sql.to_string());
        self.check_failure(sql)?;

        let Some(script) = self.scripts.iter_mut().find(|s| sql.contains(s.needle.as_str())) else {
            return Ok(RecordSet::default());
        };
        let response = if script.responses.len() > 1 {
            script.responses.pop_front().unwrap_or_default()
        } else {
            script.responses.front().cloned().unwrap_or_default()
        };
        Ok(response)
    }

    fn server_version(&self) -> f64 {
        self.version
    }

    fn current_user(&self) -> &str {
        &self.user
    }

    fn is_superuser(&self) -> bool {
        self.superuser
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_matching_needle_answers() {
        let mut driver = ScriptedDriver::new(14.0);
        driver.respond("pg_class", RecordSet::from_rows(&["relname"], vec![vec![Some("t")]]));

        let set = driver.select_set("SELECT relname FROM pg_catalog.pg_class").unwrap();
        assert_eq!(set.first().unwrap().get("relname"), Some("t"));
        assert!(driver.select_set("SELECT 1").unwrap().is_eof());
        assert_eq!(driver.queries().len(), 2);
    }

    #[test]
    fn test_responses_are_consumed_in_order() {
        let mut driver = ScriptedDriver::new(14.0);
        driver
            .respond("FETCH", RecordSet::from_rows(&["id"], vec![vec![Some("1")]]))
            .respond("FETCH", RecordSet::default());

        assert_eq!(driver.select_set("FETCH 10 FROM c").unwrap().len(), 1);
        assert!(driver.select_set("FETCH 10 FROM c").unwrap().is_eof());
        assert!(driver.select_set("FETCH 10 FROM c").unwrap().is_eof());
    }

    #[test]
    fn test_failures_and_recording() {
        let mut driver = ScriptedDriver::new(9.6).with_user("app", false);
        driver.fail_on("DROP", "permission denied");

        assert!(driver.execute("CREATE TABLE t (id int)").is_ok());
        let err = driver.execute("DROP TABLE t").unwrap_err();
        assert_eq!(err.error_code(), "STATEMENT_FAILED");
        assert_eq!(driver.executed(), ["CREATE TABLE t (id int)", "DROP TABLE t"]);
        assert_eq!(driver.current_user(), "app");
        assert!(!driver.is_superuser());
    }

    #[test]
    fn test_fail_after_passes() {
        let mut driver = ScriptedDriver::new(14.0);
        driver.fail_after("FETCH", 1, "connection lost");

        assert!(driver.select_set("FETCH 10 FROM c").is_ok());
        assert!(driver.select_set("FETCH 10 FROM c").is_err());
        assert!(driver.select_set("FETCH 10 FROM c").is_err());
    }
}
