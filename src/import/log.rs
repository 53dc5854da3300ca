//! Import Run Log
//!
//! Every decision the importer takes about a statement (executed, skipped,
//! blocked, queued, deferred, failed) is recorded as a [`LogEntry`] and
//! returned in the run report. Entries are mirrored to `tracing` as they are
//! pushed.

use serde::{Deserialize, Serialize};

use super::classify::StatementCategory;

/// Kind of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Warning,
    Error,
    Success,
    /// Self-affecting statement held until the end of the run
    Deferred,
    /// Statement not executed because its category is disabled
    Skipped,
    /// Statement refused by a safety policy
    Blocked,
    QueuedOwnership,
    QueuedRights,
    Truncated,
}

impl LogKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Success => "success",
            Self::Deferred => "deferred",
            Self::Skipped => "skipped",
            Self::Blocked => "blocked",
            Self::QueuedOwnership => "queued_ownership",
            Self::QueuedRights => "queued_rights",
            Self::Truncated => "truncated",
        }
    }
}

/// One recorded decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    /// Machine-readable cause for skipped and blocked statements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<StatementCategory>,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), sql: None, reason: None, category: None }
    }

    /// Attach the statement, shortened for the log
    #[must_use]
    pub fn with_sql(mut self, sql: &str) -> Self {
        self.sql = Some(excerpt(sql, SQL_EXCERPT_CHARS));
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: StatementCategory) -> Self {
        self.category = Some(category);
        self
    }
}

/// Characters of SQL kept in a log entry
const SQL_EXCERPT_CHARS: usize = 1000;

/// First `max_chars` characters of `text`, with `...` when cut
#[must_use]
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

/// Ordered log of one import run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportLog {
    entries: Vec<LogEntry>,
}

impl ImportLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry and mirror it to `tracing`
    pub fn push(&mut self, entry: LogEntry) {
        let reason = entry.reason.as_deref().unwrap_or("");
        match entry.kind {
            LogKind::Error => tracing::error!(reason, sql = entry.sql.as_deref(), "{}", entry.message),
            LogKind::Warning => tracing::warn!("{}", entry.message),
            LogKind::Blocked | LogKind::Skipped => {
                tracing::info!(kind = entry.kind.as_str(), reason, "{}", entry.message);
            }
            LogKind::Info | LogKind::Success => tracing::debug!("{}", entry.message),
            LogKind::Deferred | LogKind::QueuedOwnership | LogKind::QueuedRights | LogKind::Truncated => {
                tracing::info!(kind = entry.kind.as_str(), "{}", entry.message);
            }
        }
        self.entries.push(entry);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogEntry::new(LogKind::Info, message));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(LogEntry::new(LogKind::Warning, message));
    }

    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries of `kind`
    #[must_use]
    pub fn count(&self, kind: LogKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}
