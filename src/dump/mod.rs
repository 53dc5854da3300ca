//! Dump Engine
//!
//! Reconstructs a restorable SQL script from catalog metadata. Each object
//! kind has a [`Dumper`]; [`dumper_for`] maps the closed [`ObjectKind`] enum
//! to its implementation, and the schema and database orchestrators walk the
//! dependency order and dispatch through it.
//!
//! # Output Units
//! Everything a dumper writes for one object is collected in a pending
//! buffer and reaches the sink only when the dumper succeeds. A dumper whose
//! catalog rows are missing, or whose catalog query fails, leaves no trace in
//! the script; the run records a warning and moves on to the next object.
//! Table data is the one exception: it is streamed straight to the sink once
//! the table definition has been committed.
//!
//! # Deferred Objects
//! Triggers and rules are queued while tables are dumped and flushed after
//! every function of the scope, since trigger definitions name functions
//! that may sort later.

pub mod acl;
mod function;
mod role;
mod schema;
mod sequence;
pub mod table;
mod trigger;
mod types;
mod view;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::io::Write;

use crate::catalog::AttachedMeta;
use crate::config::DumpOptions;
use crate::driver::{quote_literal, Driver};
use crate::error::{FerryError, Result};
use crate::graph::ObjectKind;

pub use function::{AggregateDumper, FunctionDumper};
pub use role::RoleDumper;
pub use schema::{DatabaseDumper, SchemaDumper};
pub use sequence::SequenceDumper;
pub use table::{export_rows, TableDumper};
pub use trigger::{RuleDumper, TriggerDumper};
pub use types::{DomainDumper, TypeDumper};
pub use view::ViewDumper;

/// The object a dumper is asked to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub schema: String,
    pub name: String,
    /// Catalog oid, required by kinds looked up by oid (functions,
    /// aggregates, triggers, rules)
    pub oid: Option<String>,
}

impl Subject {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self { schema: schema.into(), name: name.into(), oid: None }
    }

    #[must_use]
    pub fn with_oid(mut self, oid: impl Into<String>) -> Self {
        self.oid = Some(oid.into());
        self
    }

    /// The oid, or an error naming the object
    pub fn require_oid(&self) -> Result<&str> {
        self.oid
            .as_deref()
            .ok_or_else(|| FerryError::invalid_input(format!("{} needs an oid to be dumped", self)))
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Statements, triggers and rules waiting for the end of the scope
#[derive(Debug, Default)]
pub struct DeferredObjects {
    statements: Vec<String>,
    triggers: Vec<AttachedMeta>,
    rules: Vec<AttachedMeta>,
}

impl DeferredObjects {
    /// A statement that needs objects written later, e.g. `ALTER SEQUENCE ... OWNED BY`
    pub fn queue_statement(&mut self, sql: impl Into<String>) {
        self.statements.push(sql.into());
    }

    pub fn queue_trigger(&mut self, trigger: AttachedMeta) {
        self.triggers.push(trigger);
    }

    pub fn queue_rule(&mut self, rule: AttachedMeta) {
        self.rules.push(rule);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.triggers.is_empty() && self.rules.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len() + self.triggers.len() + self.rules.len()
    }
}

/// Summary of one dump run
#[derive(Debug, Clone, Default, Serialize)]
pub struct DumpReport {
    /// Objects written
    pub objects: usize,
    /// Objects skipped because their catalog rows were missing or unreadable
    pub skipped: usize,
    /// Table rows written
    pub rows: u64,
    pub warnings: Vec<String>,
}

/// State shared by the dumpers of one run
pub struct DumpContext<'a> {
    driver: &'a mut dyn Driver,
    out: &'a mut dyn Write,
    options: DumpOptions,
    version: f64,
    pending: String,
    deferred: DeferredObjects,
    report: DumpReport,
    /// Set by [`DumpContext::missing`] for the object being dumped
    current_missing: bool,
    /// Schemas leave the deferred queue to the database dump
    whole_database: bool,
}

impl<'a> DumpContext<'a> {
    pub fn new(driver: &'a mut dyn Driver, out: &'a mut dyn Write, options: DumpOptions) -> Self {
        let version = driver.server_version();
        Self {
            driver,
            out,
            options,
            version,
            pending: String::new(),
            deferred: DeferredObjects::default(),
            report: DumpReport::default(),
            current_missing: false,
            whole_database: false,
        }
    }

    #[must_use]
    pub fn options(&self) -> &DumpOptions {
        &self.options
    }

    #[must_use]
    pub const fn version(&self) -> f64 {
        self.version
    }

    pub fn driver(&mut self) -> &mut dyn Driver {
        &mut *self.driver
    }

    #[must_use]
    pub fn deferred(&self) -> &DeferredObjects {
        &self.deferred
    }

    #[must_use]
    pub fn report(&self) -> &DumpReport {
        &self.report
    }

    #[must_use]
    pub fn into_report(self) -> DumpReport {
        self.report
    }

    /// Append to the current object's output
    pub fn write(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    /// `DROP <kind> IF EXISTS <target> CASCADE;` when cleaning
    pub fn write_drop(&mut self, kind: &str, target: &str) {
        if self.options.clean {
            self.pending.push_str(&format!("DROP {kind} IF EXISTS {target} CASCADE;\n"));
        }
    }

    /// `COMMENT ON <object> IS '...';` when comments are requested
    pub fn write_comment(&mut self, object: &str, comment: Option<&str>) {
        if let Some(comment) = comment.filter(|_| self.options.include_comments) {
            self.pending.push_str(&format!("COMMENT ON {object} IS {};\n", quote_literal(comment)));
        }
    }

    pub fn write_privileges(&mut self, object: &str, owner: &str, acl: Option<&str>) {
        let sql = acl::privilege_statements(object, owner, acl);
        self.pending.push_str(&sql);
    }

    /// `IF NOT EXISTS ` when requested and the server has it since `since`
    #[must_use]
    pub fn if_not_exists(&self, since: f64) -> &'static str {
        if self.options.if_not_exists && self.version >= since {
            "IF NOT EXISTS "
        } else {
            ""
        }
    }

    /// Move the pending output to the sink
    pub fn commit(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            self.out.write_all(self.pending.as_bytes())?;
            self.pending.clear();
        }
        Ok(())
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.report.warnings.push(message);
    }

    /// Record that `subject` has no catalog rows; nothing is written for it
    pub fn missing(&mut self, kind: ObjectKind, subject: &Subject) {
        self.pending.clear();
        self.current_missing = true;
        self.report.skipped += 1;
        self.warn(format!("{kind} {subject} not found in the catalog, skipped"));
    }

    /// Run the dumper for `kind` as one output unit
    ///
    /// Catalog and driver failures become warnings; only a failing sink
    /// stops the run.
    pub fn dump_object(&mut self, kind: ObjectKind, subject: &Subject) -> Result<()> {
        self.pending.clear();
        let outer = std::mem::replace(&mut self.current_missing, false);
        tracing::debug!(%kind, object = %subject, "dumping object");

        let result = dumper_for(kind).dump(self, subject);
        let missing = std::mem::replace(&mut self.current_missing, outer);
        match result {
            Ok(()) => {
                if !missing {
                    self.report.objects += 1;
                }
                self.commit()
            }
            Err(FerryError::Io(e)) => Err(FerryError::Io(e)),
            Err(e) => {
                self.pending.clear();
                self.report.skipped += 1;
                self.warn(format!("failed to dump {kind} {subject}: {}", e.message()));
                Ok(())
            }
        }
    }

    /// Write the queued statements, then the triggers, then the rules
    pub fn flush_deferred(&mut self) -> Result<()> {
        let deferred = std::mem::take(&mut self.deferred);
        if !deferred.is_empty() {
            tracing::debug!(objects = deferred.len(), "flushing deferred objects");
        }
        if !deferred.statements.is_empty() {
            self.pending.clear();
            self.pending.push('\n');
            for sql in &deferred.statements {
                self.pending.push_str(sql);
            }
            self.commit()?;
        }
        for item in &deferred.triggers {
            self.pending.clear();
            trigger::write_trigger(self, item);
            self.report.objects += 1;
            self.commit()?;
        }
        for item in &deferred.rules {
            self.pending.clear();
            trigger::write_rule(self, item);
            self.report.objects += 1;
            self.commit()?;
        }
        Ok(())
    }

    pub(crate) fn add_rows(&mut self, rows: u64) {
        self.report.rows += rows;
    }

    pub(crate) fn deferred_mut(&mut self) -> &mut DeferredObjects {
        &mut self.deferred
    }
}

/// Writes one object kind
pub trait Dumper {
    fn dump(&self, ctx: &mut DumpContext<'_>, subject: &Subject) -> Result<()>;
}

/// The dumper for `kind`
#[must_use]
pub fn dumper_for(kind: ObjectKind) -> &'static dyn Dumper {
    match kind {
        ObjectKind::Schema => &SchemaDumper,
        ObjectKind::Table => &TableDumper,
        ObjectKind::View => &ViewDumper,
        ObjectKind::Function => &FunctionDumper,
        ObjectKind::Aggregate => &AggregateDumper,
        ObjectKind::Sequence => &SequenceDumper,
        ObjectKind::Type => &TypeDumper,
        ObjectKind::Domain => &DomainDumper,
        ObjectKind::Role => &RoleDumper,
        ObjectKind::Trigger => &TriggerDumper,
        ObjectKind::Rule => &RuleDumper,
    }
}

/// What a run dumps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpScope {
    /// Preamble, optional roles and every non-system schema
    Database,
    /// One schema
    Schema(String),
    /// One object; queued triggers and rules follow it
    Object(ObjectKind, Subject),
}

/// Dump `scope` into `out`
pub fn run_dump(
    driver: &mut dyn Driver,
    out: &mut dyn Write,
    options: DumpOptions,
    scope: &DumpScope,
) -> Result<DumpReport> {
    if options.data_only && options.structure_only {
        return Err(FerryError::invalid_input("data_only and structure_only exclude each other"));
    }

    let mut ctx = DumpContext::new(driver, out, options);
    tracing::info!(version = ctx.version(), ?scope, "dump started");

    match scope {
        DumpScope::Database => DatabaseDumper.dump_database(&mut ctx)?,
        DumpScope::Schema(name) => ctx.dump_object(ObjectKind::Schema, &Subject::new(name.as_str(), name.as_str()))?,
        DumpScope::Object(kind, subject) => {
            ctx.dump_object(*kind, subject)?;
            ctx.flush_deferred()?;
        }
    }
    ctx.out.flush()?;

    let report = ctx.into_report();
    tracing::info!(
        objects = report.objects,
        skipped = report.skipped,
        rows = report.rows,
        warnings = report.warnings.len(),
        "dump finished"
    );
    Ok(report)
}

/// Output stream of a dump, optionally gzip-compressed
pub enum DumpSink<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> DumpSink<W> {
    pub fn new(inner: W, gzip: bool) -> Self {
        if gzip {
            Self::Gzip(GzEncoder::new(inner, Compression::default()))
        } else {
            Self::Plain(inner)
        }
    }

    /// Write the gzip trailer (if any) and give back the inner writer
    pub fn finish(self) -> Result<W> {
        match self {
            Self::Plain(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            Self::Gzip(encoder) => Ok(encoder.finish()?),
        }
    }
}

impl<W: Write> Write for DumpSink<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(inner) => inner.write(buf),
            Self::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(inner) => inner.flush(),
            Self::Gzip(encoder) => encoder.flush(),
        }
    }
}
