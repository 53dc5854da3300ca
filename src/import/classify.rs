//! Statement Classification
//!
//! Every imported statement is put into one policy category before anything
//! is executed. Classification is pure: it looks at the statement text and
//! the importing role's name, nothing else.
//!
//! # Categories (first match wins)
//! 1. `self_affecting`: changes the importing session's own identity or
//!    rights (`SET ROLE`, `SET SESSION AUTHORIZATION`, `RESET ROLE`,
//!    `ALTER ROLE <me>`, `DROP ROLE <me>`, `REVOKE ... FROM <me>`)
//! 2. `data`: `INSERT`, `COPY ... FROM`
//! 3. `drop`: `DROP ...`
//! 4. `ownership_change`: `ALTER ... OWNER TO`, `REASSIGN OWNED`
//! 5. `rights`: `GRANT`, `REVOKE`, `ALTER DEFAULT PRIVILEGES`
//! 6. `ddl_other`: everything else
//!
//! # Identifier Matching
//! Unquoted role names compare case-insensitively (they fold to lower case);
//! quoted names compare exactly.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Policy category of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementCategory {
    SelfAffecting,
    Data,
    Drop,
    OwnershipChange,
    Rights,
    DdlOther,
}

impl StatementCategory {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SelfAffecting => "self_affecting",
            Self::Data => "data",
            Self::Drop => "drop",
            Self::OwnershipChange => "ownership_change",
            Self::Rights => "rights",
            Self::DdlOther => "ddl_other",
        }
    }
}

impl std::fmt::Display for StatementCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static SET_ROLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^SET\s+(?:(?:SESSION|LOCAL)\s+)?(?:ROLE\b|SESSION\s+AUTHORIZATION\b)").unwrap()
});
static RESET_ROLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^RESET\s+(?:ROLE|SESSION\s+AUTHORIZATION)\b").unwrap());
static ALTER_ROLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)^ALTER\s+(?:ROLE|USER)\s+("(?:[^"]|"")+"|[^\s;]+)"#).unwrap());
static DROP_ROLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^DROP\s+(?:ROLE|USER)\s+(?:IF\s+EXISTS\s+)?(.+?)\s*;?\s*$").unwrap());
static REVOKE_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^REVOKE\b.*\bFROM\s+(.+?)(?:\s+(?:CASCADE|RESTRICT|GRANTED\s+BY\b.*))?\s*;?\s*$").unwrap()
});
static INSERT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^INSERT\b").unwrap());
static COPY_FROM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^COPY\b.*\bFROM\b").unwrap());
static DROP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^DROP\b").unwrap());
static OWNER_TO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^(?:ALTER\b.*\bOWNER\s+TO\b|REASSIGN\s+OWNED\b)").unwrap());
static RIGHTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^(?:GRANT\b|REVOKE\b|ALTER\s+DEFAULT\s+PRIVILEGES\b)").unwrap());

static CREATE_SCHEMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^CREATE\s+SCHEMA\b").unwrap());
static ROLE_DDL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^(?:CREATE|ALTER|DROP)\s+(?:ROLE|USER)\b").unwrap());
static TABLESPACE_DDL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^(?:CREATE|ALTER|DROP)\s+TABLESPACE\b").unwrap());
static DATA_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)^(?:INSERT\s+INTO|COPY)\s+((?:"(?:[^"]|"")*"|[^\s("])+(?:\s*\.\s*(?:"(?:[^"]|"")*"|[^\s("]+))*)"#)
        .unwrap()
});

/// Classify a statement for the importing role `current_user`
#[must_use]
pub fn classify(statement: &str, current_user: &str) -> StatementCategory {
    let sql = skip_leading_noise(statement).trim_end();

    if is_self_affecting(sql, current_user) {
        StatementCategory::SelfAffecting
    } else if INSERT.is_match(sql) || COPY_FROM.is_match(sql) {
        StatementCategory::Data
    } else if DROP.is_match(sql) {
        StatementCategory::Drop
    } else if OWNER_TO.is_match(&strip_comments(sql)) {
        StatementCategory::OwnershipChange
    } else if RIGHTS.is_match(sql) {
        StatementCategory::Rights
    } else {
        StatementCategory::DdlOther
    }
}

fn is_self_affecting(sql: &str, current_user: &str) -> bool {
    if SET_ROLE.is_match(sql) || RESET_ROLE.is_match(sql) {
        return true;
    }
    if let Some(caps) = ALTER_ROLE.captures(sql) {
        return names_current_user(&caps[1], current_user);
    }
    if let Some(caps) = DROP_ROLE.captures(sql) {
        return split_names(&caps[1]).iter().any(|name| names_current_user(name, current_user));
    }
    if let Some(caps) = REVOKE_FROM.captures(sql) {
        return split_names(&caps[1]).iter().any(|name| {
            let name = name.strip_prefix("GROUP ").or_else(|| name.strip_prefix("group ")).unwrap_or(name);
            names_current_user(name.trim(), current_user)
        });
    }
    false
}

/// Whether a role name refers to the importing role
fn names_current_user(role: &str, current_user: &str) -> bool {
    let role = role.trim();
    if let Some(quoted) = role.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return quoted.replace("\"\"", "\"") == current_user;
    }
    let lower = role.to_lowercase();
    matches!(lower.as_str(), "current_user" | "session_user" | "current_role") || lower == current_user
}

/// Split a comma-separated list of role names, respecting quotes
fn split_names(list: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in list.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => names.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        names.push(current.trim().to_string());
    }
    names
}

/// `CREATE SCHEMA ...`
#[must_use]
pub fn is_create_schema(statement: &str) -> bool {
    CREATE_SCHEMA.is_match(skip_leading_noise(statement))
}

/// `CREATE|ALTER|DROP ROLE|USER ...`
#[must_use]
pub fn is_role_statement(statement: &str) -> bool {
    ROLE_DDL.is_match(skip_leading_noise(statement))
}

/// `CREATE|ALTER|DROP TABLESPACE ...`
#[must_use]
pub fn is_tablespace_statement(statement: &str) -> bool {
    TABLESPACE_DDL.is_match(skip_leading_noise(statement))
}

/// Target of a data statement as `(schema, table)`, unquoted
///
/// `INSERT INTO "s"."t" ...` gives `(Some("s"), "t")`; an unqualified name
/// gives `(None, name)`.
#[must_use]
pub fn data_target(statement: &str) -> Option<(Option<String>, String)> {
    let caps = DATA_TARGET.captures(skip_leading_noise(statement))?;
    let mut parts = split_qualified(&caps[1]);
    let table = parts.pop()?;
    Some((parts.pop(), table))
}

/// Split `a."b.c"` into `["a", "b.c"]`, removing quotes
fn split_qualified(name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = name.trim().chars().peekable();
    let mut in_quotes = false;
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => parts.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(ch),
        }
    }
    parts.push(current.trim().to_string());
    parts
}

/// Skip leading whitespace, `--` line comments and (nested) block comments
#[must_use]
pub fn skip_leading_noise(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.find('\n').map_or("", |idx| &after[idx + 1..]);
        } else if trimmed.starts_with("/*") {
            let mut depth = 0usize;
            let bytes = trimmed.as_bytes();
            let mut i = 0;
            let mut end = trimmed.len();
            while i < bytes.len() {
                if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
                    depth += 1;
                    i += 2;
                } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        end = i;
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            rest = &trimmed[end..];
        } else {
            return trimmed;
        }
    }
}

/// Strip SQL comments outside string literals and quoted identifiers
///
/// Handles:
/// - Line comments: -- comment
/// - Block comments: /* comment */
#[must_use]
pub fn strip_comments(sql: &str) -> String {
    let mut result = String::new();
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            result.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => {
                quote = Some(ch);
                result.push(ch);
            }
            '-' if chars.peek() == Some(&'-') => {
                // Line comment: skip until newline
                chars.next();
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        result.push('\n'); // preserve newline
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                // Block comment: skip until */
                chars.next();
                let mut prev = ' ';
                for ch in chars.by_ref() {
                    if prev == '*' && ch == '/' {
                        break;
                    }
                    prev = ch;
                }
                result.push(' '); // replace comment with space
            }
            _ => result.push(ch),
        }
    }

    result
}
