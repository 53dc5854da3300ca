//! JSON Output Envelope Types
//!
//! Every `pgferry` command reports its outcome on stdout as exactly one
//! JSON document, either a [`SuccessEnvelope`] or an [`ErrorEnvelope`].
//! The dump itself goes to `--output` (or stdout when no file is given and
//! the report goes to stderr instead).
//!
//! # Output Contract
//! - Success: `{"ok": true, "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "command": "...", "error": {"code": "...", "message": "..."}}`

use serde::{Deserialize, Serialize};

use crate::error::FerryError;

/// Success envelope for command results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Command that was executed (dump, import)
    pub command: String,

    /// Command-specific report
    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, command: command.into(), data, meta }
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Command that was attempted
    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, command: command.into(), error }
    }

    /// Envelope carrying the stable code of a [`FerryError`]
    pub fn from_error(command: impl Into<String>, err: &FerryError) -> Self {
        let mut info = ErrorInfo::new(err.error_code(), err.message());
        info.sql = err.sql().map(str::to_string);
        Self::new(command, info)
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g. "IMPORT_ABORTED", "CONNECTION_FAILED")
    pub code: String,

    pub message: String,

    /// Statement that failed, for statement-level errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into(), sql: None }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Wall time in milliseconds
    pub execution_ms: u64,

    /// Server version the command ran against (absent for dry runs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<f64>,
}

impl Metadata {
    pub fn new(execution_ms: u64) -> Self {
        Self { execution_ms, server_version: None }
    }

    #[must_use]
    pub fn with_server_version(mut self, version: f64) -> Self {
        self.server_version = Some(version);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = SuccessEnvelope::new(
            "dump",
            serde_json::json!({"objects": 3}),
            Metadata::new(42).with_server_version(14.0),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""ok":true"#));
        assert!(json.contains(r#""command":"dump""#));
        assert!(json.contains(r#""execution_ms":42"#));
        assert!(json.contains(r#""server_version":14.0"#));
    }

    #[test]
    fn test_error_envelope_from_statement_error() {
        let err = FerryError::ImportAborted {
            sql: "DROP TABLE t".to_string(),
            message: "permission denied".to_string(),
        };
        let envelope = ErrorEnvelope::from_error("import", &err);

        assert!(!envelope.ok);
        assert_eq!(envelope.command, "import");
        assert_eq!(envelope.error.code, "IMPORT_ABORTED");
        assert_eq!(envelope.error.sql.as_deref(), Some("DROP TABLE t"));
    }

    #[test]
    fn test_error_envelope_omits_missing_sql() {
        let envelope = ErrorEnvelope::new("dump", ErrorInfo::new("CONNECTION_FAILED", "refused"));
        let json = serde_json::to_string(&envelope).unwrap();

        assert!(json.contains(r#""ok":false"#));
        assert!(json.contains(r#""code":"CONNECTION_FAILED""#));
        assert!(!json.contains("sql"));
    }

    #[test]
    fn test_metadata_without_server_version() {
        let json = serde_json::to_string(&Metadata::new(100)).unwrap();
        assert!(json.contains(r#""execution_ms":100"#));
        assert!(!json.contains("server_version"));
    }
}
