//! pgferry - PostgreSQL Dump-and-Restore Engine
//!
//! pgferry exports a database, a schema or a single object as a replayable
//! SQL script written in dependency order, and imports such scripts back
//! under a configurable safety policy.
//!
//! # Core Principles
//! - Catalog-driven: every object is reconstructed from `pg_catalog`
//! - Dependency-ordered: objects are written after what they reference
//! - Policy-driven import: drops, ownership, rights and roles are opt-in
//! - Streaming: table data and import input are processed in chunks
//!
//! # Architecture
//! The CLI in `main.rs` is a thin wrapper over this library. Both halves
//! talk to the server only through the [`Driver`] trait, so they run
//! unchanged against the in-memory [`ScriptedDriver`] in tests.
//!
//! # Module Organization
//! - [`error`] - Error types and stable error codes
//! - [`graph`] - Object dependency graph and topological ordering
//! - [`driver`] - Driver trait, record sets, quoting helpers
//! - [`catalog`] - Catalog queries per object kind
//! - [`dump`] - Object dumpers, dump context and orchestration
//! - [`cursor`] - Chunked table reads through a server-side cursor
//! - [`format`] - Row formatters (COPY, INSERT, CSV, TSV)
//! - [`import`] - Streaming SQL parser, classifier and import executor
//! - [`config`] - Run options and connection profiles
//! - [`output`] - JSON output envelope types

pub mod catalog;
pub mod config;
pub mod cursor;
pub mod driver;
pub mod dump;
pub mod error;
pub mod format;
pub mod graph;
pub mod import;
pub mod output;

// Re-export commonly used types for convenience
pub use config::{
    load_with_precedence, resolve_profile, save_profile, ConfigLocation, DumpOptions, ErrorMode,
    ImportOptions, ProfileRegistry, RunProfile,
};
pub use driver::scripted::ScriptedDriver;
pub use driver::{ConnectionConfig, Driver, FieldInfo, RecordSet};
pub use dump::{export_rows, run_dump, DumpContext, DumpReport, DumpScope, DumpSink, Subject};
pub use error::{FerryError, Result};
pub use format::{DelimitedFormatter, InsertFormat, SqlFormatter};
pub use graph::{DependencyGraph, ObjectKind, ObjectNode};
pub use import::{ImportReport, ImportRunner, ImportScope, ImportSession};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};

#[cfg(feature = "postgres")]
pub use driver::postgres::PostgresDriver;
