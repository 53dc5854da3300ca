//! Session Settings
//!
//! Dump scripts open with `SET` statements that shape how the rest of the
//! script is read (`search_path`, `client_encoding`, `standard_conforming_strings`).
//! The applier lets known settings through, caches them so they can be
//! replayed on a fresh connection, and tracks their side effects on the
//! import session. Unknown settings are skipped with a warning, settings the
//! target server is too old for with an info entry.

use once_cell::sync::Lazy;
use regex::Regex;

use super::log::{excerpt, LogEntry, LogKind};
use super::ImportSession;
use crate::driver::Driver;

/// A setting the importer lets through, and the first server version with it
struct KnownSetting {
    pattern: &'static str,
    since: f64,
}

const KNOWN_SETTINGS: &[KnownSetting] = &[
    KnownSetting { pattern: r"^SET\s+session_replication_role\s*=\s*", since: 0.0 },
    KnownSetting { pattern: r"^SET\s+statement_timeout\s*=\s*", since: 0.0 },
    KnownSetting { pattern: r"^SET\s+lock_timeout\s*=\s*", since: 9.3 },
    KnownSetting { pattern: r"^SET\s+idle_in_transaction_session_timeout\s*=\s*", since: 9.6 },
    KnownSetting { pattern: r"^SET\s+transaction_timeout\s*=\s*", since: 14.0 },
    KnownSetting { pattern: r"^SET\s+client_encoding\s*=\s*", since: 0.0 },
    KnownSetting { pattern: r"^SET\s+standard_conforming_strings\s*", since: 0.0 },
    KnownSetting { pattern: r"^SET\s+search_path\s+", since: 0.0 },
    KnownSetting { pattern: r"^SET\s+check_function_bodies\s*=\s*", since: 0.0 },
    KnownSetting { pattern: r"^SET\s+xmloption\s*=\s*", since: 0.0 },
    KnownSetting { pattern: r"^SET\s+client_min_messages\s*=\s*", since: 0.0 },
    KnownSetting { pattern: r"^SET\s+row_security\s*=\s*", since: 9.5 },
    KnownSetting { pattern: r"^SET\s+default_tablespace\s*=\s*", since: 0.0 },
    KnownSetting { pattern: r"^SET\s+default_with_oids\s*=\s*", since: 0.0 },
    KnownSetting { pattern: r"^SELECT\s+pg_catalog\.set_config\(\s*'search_path'", since: 0.0 },
];

static KNOWN: Lazy<Vec<(Regex, f64)>> = Lazy::new(|| {
    KNOWN_SETTINGS
        .iter()
        .map(|s| (Regex::new(&format!("(?i){}", s.pattern)).unwrap(), s.since))
        .collect()
});

static SET_CONFIG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^SELECT\s+pg_catalog\.set_config\(\s*'search_path'").unwrap());
static SEARCH_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^SET\s+search_path\s*(?:TO|=)\s*(.+?);?$").unwrap());
static SET_CONFIG_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)set_config\(\s*'search_path'\s*,\s*'([^']*)'").unwrap());
static CLIENT_ENCODING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^SET\s+client_encoding\s*=\s*'?([A-Za-z0-9_-]+)'?").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// What to do with a statement after [`SessionSettingsApplier::collect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingDecision {
    /// Not a session setting; handle it like any other statement
    NotASetting,
    /// A known setting, now cached; execute it
    Apply,
    /// Unknown or unsupported setting; do not execute
    Skip,
}

/// Filters, caches and replays session `SET` statements
#[derive(Debug, Clone)]
pub struct SessionSettingsApplier {
    version: f64,
}

impl SessionSettingsApplier {
    #[must_use]
    pub const fn new(version: f64) -> Self {
        Self { version }
    }

    /// Decide on `statement`, caching known settings and tracking their effects
    pub fn collect(&self, statement: &str, session: &mut ImportSession) -> SettingDecision {
        let stmt = statement.trim();
        if !is_set_command(stmt) && !SET_CONFIG.is_match(stmt) {
            return SettingDecision::NotASetting;
        }

        let Some(since) = KNOWN.iter().find(|(re, _)| re.is_match(stmt)).map(|(_, since)| *since) else {
            session.log.warning(format!("Skipping unknown SET command: {}", excerpt(stmt, 80)));
            return SettingDecision::Skip;
        };
        if self.version < since {
            session.log.info(format!(
                "Skipping unsupported SET command for PostgreSQL {}: {}",
                self.version,
                excerpt(stmt, 80)
            ));
            return SettingDecision::Skip;
        }

        let stmt = if stmt.ends_with(';') { stmt.to_string() } else { format!("{stmt};") };
        track_side_effects(&stmt, session);

        let key = normalize(&stmt);
        if session.seen_settings.insert(key) {
            session.cached_settings.push(stmt);
        }
        SettingDecision::Apply
    }

    /// Replay the cached settings in order; returns the number that failed
    pub fn apply_settings(&self, driver: &mut dyn Driver, session: &mut ImportSession) -> usize {
        let mut errors = 0;
        for sql in session.cached_settings.clone() {
            match driver.execute(&sql) {
                Ok(()) => session.log.info(format!("Session setting applied: {}", excerpt(&sql, 120))),
                Err(e) => {
                    errors += 1;
                    session
                        .log
                        .push(LogEntry::new(LogKind::Error, format!("Session setting failed: {e}")).with_sql(&sql));
                }
            }
        }
        errors
    }

    /// Replace the cache, e.g. with the settings of a previous connection
    pub fn restore_cached(&self, session: &mut ImportSession, settings: Vec<String>) {
        session.seen_settings = settings.iter().map(|s| normalize(s)).collect();
        session.cached_settings = settings;
    }
}

/// `SET` followed by whitespace and something else
fn is_set_command(stmt: &str) -> bool {
    let bytes = stmt.as_bytes();
    bytes.len() > 4 && bytes[..3].eq_ignore_ascii_case(b"SET") && bytes[3].is_ascii_whitespace()
}

fn normalize(stmt: &str) -> String {
    WHITESPACE.replace_all(stmt.trim(), " ").to_lowercase()
}

fn first_schema(path: &str) -> Option<String> {
    let first = path.split(',').next()?.trim_matches(|c: char| c.is_whitespace() || "\"'{}".contains(c));
    (!first.is_empty()).then(|| first.to_string())
}

fn track_side_effects(stmt: &str, session: &mut ImportSession) {
    if let Some(caps) = SEARCH_PATH.captures(stmt) {
        session.current_schema = first_schema(&caps[1]);
    } else if let Some(caps) = SET_CONFIG_PATH.captures(stmt) {
        session.current_schema = first_schema(&caps[1]);
    }

    if let Some(caps) = CLIENT_ENCODING.captures(stmt) {
        session.encoding = Some(caps[1].to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::scripted::ScriptedDriver;
    use crate::import::ImportScope;
    use pretty_assertions::assert_eq;

    fn session() -> ImportSession {
        ImportSession::new(ImportScope::Database, None)
    }

    #[test]
    fn test_non_settings_pass_through() {
        let applier = SessionSettingsApplier::new(14.0);
        let mut session = session();
        assert_eq!(applier.collect("CREATE TABLE t (id int);", &mut session), SettingDecision::NotASetting);
        assert_eq!(applier.collect("SETUP", &mut session), SettingDecision::NotASetting);
        assert!(session.cached_settings().is_empty());
    }

    #[test]
    fn test_dedupe_by_normalized_text() {
        let applier = SessionSettingsApplier::new(14.0);
        let mut session = session();
        assert_eq!(applier.collect("SET statement_timeout = 0;", &mut session), SettingDecision::Apply);
        assert_eq!(applier.collect("set   STATEMENT_TIMEOUT =   0", &mut session), SettingDecision::Apply);
        assert_eq!(applier.collect("SET client_min_messages = warning", &mut session), SettingDecision::Apply);
        assert_eq!(session.cached_settings(), ["SET statement_timeout = 0;", "SET client_min_messages = warning;"]);
    }

    #[test]
    fn test_repeated_search_path_is_cached_once() {
        let applier = SessionSettingsApplier::new(14.0);
        let mut session = session();
        assert_eq!(applier.collect("SET search_path TO public;", &mut session), SettingDecision::Apply);
        assert_eq!(applier.collect("SET search_path TO public;", &mut session), SettingDecision::Apply);
        assert_eq!(session.cached_settings(), ["SET search_path TO public;"]);
        assert_eq!(session.current_schema(), Some("public"));
    }

    #[test]
    fn test_unknown_setting_is_skipped() {
        let applier = SessionSettingsApplier::new(14.0);
        let mut session = session();
        assert_eq!(applier.collect("SET work_mem = '1GB';", &mut session), SettingDecision::Skip);
        assert_eq!(session.log().entries()[0].kind, LogKind::Warning);
        assert_eq!(session.log().entries()[0].message, "Skipping unknown SET command: SET work_mem = '1GB';");
    }

    #[test]
    fn test_version_gated_settings() {
        let applier = SessionSettingsApplier::new(9.4);
        let mut session = session();
        assert_eq!(applier.collect("SET row_security = off;", &mut session), SettingDecision::Skip);
        assert_eq!(applier.collect("SET lock_timeout = 0;", &mut session), SettingDecision::Apply);
        assert_eq!(applier.collect("SET idle_in_transaction_session_timeout = 0;", &mut session), SettingDecision::Skip);
        assert_eq!(session.log().count(LogKind::Info), 2);
        assert!(session.log().entries()[0].message.starts_with("Skipping unsupported SET command for PostgreSQL 9.4"));
    }

    #[test]
    fn test_search_path_and_encoding_tracking() {
        let applier = SessionSettingsApplier::new(14.0);
        let mut session = session();
        applier.collect("SET search_path TO \"sales\", public;", &mut session);
        assert_eq!(session.current_schema(), Some("sales"));

        applier.collect("SET search_path = app, pg_catalog;", &mut session);
        assert_eq!(session.current_schema(), Some("app"));

        assert_eq!(
            applier.collect("SELECT pg_catalog.set_config('search_path', '', false);", &mut session),
            SettingDecision::Apply
        );
        assert_eq!(session.current_schema(), None);

        applier.collect("SET client_encoding = 'UTF8';", &mut session);
        assert_eq!(session.encoding(), Some("UTF8"));
    }

    #[test]
    fn test_apply_settings_counts_errors() {
        let applier = SessionSettingsApplier::new(14.0);
        let mut session = session();
        applier.collect("SET statement_timeout = 0;", &mut session);
        applier.collect("SET xmloption = content;", &mut session);

        let mut driver = ScriptedDriver::new(14.0);
        driver.fail_on("xmloption", "invalid value");
        assert_eq!(applier.apply_settings(&mut driver, &mut session), 1);
        assert_eq!(driver.executed(), ["SET statement_timeout = 0;", "SET xmloption = content;"]);
        assert_eq!(session.log().count(LogKind::Error), 1);
    }

    #[test]
    fn test_restore_cached_rebuilds_dedupe() {
        let applier = SessionSettingsApplier::new(14.0);
        let mut session = session();
        applier.restore_cached(&mut session, vec!["SET statement_timeout = 0;".to_string()]);
        applier.collect("SET  statement_timeout = 0;", &mut session);
        assert_eq!(session.cached_settings(), ["SET statement_timeout = 0;"]);
    }
}
