//! Version Adaptation
//!
//! Scripts dumped from a newer server use syntax an older target rejects.
//! The rules below rewrite that syntax before execution; each applies only
//! when the target server is older than its version.
//!
//! | rule | server below |
//! |------|--------------|
//! | `CREATE EXTENSION IF NOT EXISTS` -> `CREATE EXTENSION` | 9.1 |
//! | `CREATE SCHEMA IF NOT EXISTS` | 9.3 |
//! | `CREATE MATERIALIZED VIEW IF NOT EXISTS` | 9.4 |
//! | `CREATE SEQUENCE / TABLE / [UNIQUE] INDEX IF NOT EXISTS` | 9.5 |
//! | `CREATE OPERATOR IF NOT EXISTS` | 9.6 |
//! | `CREATE OR REPLACE AGGREGATE` -> `CREATE AGGREGATE` | 12 |
//! | `CREATE OR REPLACE [CONSTRAINT] TRIGGER` | 14 |
//! | `EXECUTE FUNCTION` -> `EXECUTE PROCEDURE` in trigger definitions | 11 |
//!
//! From 11 on the last rule runs the other way. Matching rules are combined
//! into one pattern per rewrite and compiled once per adapter.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{FerryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rewrite {
    /// Drop `IF NOT EXISTS` after `CREATE <item>`
    IfNotExists,
    /// Drop `OR REPLACE` before `<item>`
    OrReplace,
}

struct AdaptRule {
    below: f64,
    rewrite: Rewrite,
    item: &'static str,
}

const RULES: &[AdaptRule] = &[
    AdaptRule { below: 9.1, rewrite: Rewrite::IfNotExists, item: "EXTENSION" },
    AdaptRule { below: 9.3, rewrite: Rewrite::IfNotExists, item: "SCHEMA" },
    AdaptRule { below: 9.4, rewrite: Rewrite::IfNotExists, item: r"MATERIALIZED\s+VIEW" },
    AdaptRule { below: 9.5, rewrite: Rewrite::IfNotExists, item: "SEQUENCE" },
    AdaptRule { below: 9.5, rewrite: Rewrite::IfNotExists, item: "TABLE" },
    AdaptRule { below: 9.5, rewrite: Rewrite::IfNotExists, item: r"(?:UNIQUE\s+)?INDEX" },
    AdaptRule { below: 9.6, rewrite: Rewrite::IfNotExists, item: "OPERATOR" },
    AdaptRule { below: 12.0, rewrite: Rewrite::OrReplace, item: "AGGREGATE" },
    AdaptRule { below: 14.0, rewrite: Rewrite::OrReplace, item: r"(?:CONSTRAINT\s+)?TRIGGER" },
];

/// Server version where `EXECUTE FUNCTION` replaced `EXECUTE PROCEDURE`
const EXECUTE_FUNCTION_SINCE: f64 = 11.0;

static TRIGGER_DEFINITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*CREATE\b.*\bTRIGGER\b").unwrap());
static EXECUTE_FUNCTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bEXECUTE\s+FUNCTION\b").unwrap());
static EXECUTE_PROCEDURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bEXECUTE\s+PROCEDURE\b").unwrap());

/// Rewrites statements for one target server version
#[derive(Debug, Clone)]
pub struct VersionAdapter {
    version: f64,
    if_not_exists: Option<Regex>,
    or_replace: Option<Regex>,
}

impl VersionAdapter {
    /// Compile the rules that apply to `version`
    pub fn new(version: f64) -> Result<Self> {
        let items = |rewrite: Rewrite| -> Vec<&'static str> {
            RULES.iter().filter(|r| r.rewrite == rewrite && version < r.below).map(|r| r.item).collect()
        };

        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|e| FerryError::invalid_input(format!("Invalid adaptation rule: {e}")))
        };

        let if_not_exists = match items(Rewrite::IfNotExists) {
            list if list.is_empty() => None,
            list => Some(compile(format!(r"(?i)^\s*CREATE\s+({})\s+IF\s+NOT\s+EXISTS\b", list.join("|")))?),
        };
        let or_replace = match items(Rewrite::OrReplace) {
            list if list.is_empty() => None,
            list => Some(compile(format!(r"(?i)^\s*CREATE\s+OR\s+REPLACE\s+({})\b", list.join("|")))?),
        };

        Ok(Self { version, if_not_exists, or_replace })
    }

    #[must_use]
    pub fn version(&self) -> f64 {
        self.version
    }

    /// Rewrite `statement` for the target server; unchanged text is borrowed
    #[must_use]
    pub fn adapt<'a>(&self, statement: &'a str) -> Cow<'a, str> {
        let mut sql = Cow::Borrowed(statement);

        for pattern in [&self.if_not_exists, &self.or_replace].into_iter().flatten() {
            if pattern.is_match(&sql) {
                sql = Cow::Owned(pattern.replace(&sql, "CREATE $1").into_owned());
            }
        }

        if TRIGGER_DEFINITION.is_match(&sql) {
            let (from, to) = if self.version < EXECUTE_FUNCTION_SINCE {
                (&*EXECUTE_FUNCTION, "EXECUTE PROCEDURE")
            } else {
                (&*EXECUTE_PROCEDURE, "EXECUTE FUNCTION")
            };
            if from.is_match(&sql) {
                sql = Cow::Owned(from.replace_all(&sql, to).into_owned());
            }
        }

        sql
    }
}
