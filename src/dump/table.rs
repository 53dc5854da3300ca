//! Table dumper
//!
//! Order of output for one table: definition, per-column settings, comments
//! and privileges, then the data, then the constraints and indexes (adding
//! them after the data keeps the load fast and lets foreign keys see their
//! rows). Triggers and rules are queued for the end of the scope.

use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Write;

use super::{DumpContext, Dumper, Subject};
use crate::catalog::{self, ColumnMeta, ConstraintMeta, IndexMeta, TableMeta};
use crate::cursor::{chunk_size_for_width, CursorReader};
use crate::driver::{qualified, quote_ident, quote_literal, Driver};
use crate::error::{FerryError, Result};
use crate::format::{FormatMetadata, RowFormatter, SqlFormatter};
use crate::graph::ObjectKind;

static NEXTVAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^nextval\('((?:[^']|'')+)'::regclass\)$").unwrap());
static CREATE_INDEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^CREATE (UNIQUE )?INDEX ").unwrap());

pub struct TableDumper;

impl Dumper for TableDumper {
    fn dump(&self, ctx: &mut DumpContext<'_>, subject: &Subject) -> Result<()> {
        let Some(meta) = catalog::table_meta(ctx.driver(), &subject.schema, &subject.name)? else {
            ctx.missing(ObjectKind::Table, subject);
            return Ok(());
        };
        let target = qualified(&subject.schema, &subject.name);
        let with_structure = ctx.options().with_structure();
        let with_data = ctx.options().with_data() && !meta.partitioned;

        let columns = catalog::table_columns(ctx.driver(), &meta.oid)?;
        let mut constraints = Vec::new();
        let mut indexes = Vec::new();
        let mut triggers = Vec::new();
        let mut rules = Vec::new();
        if with_structure {
            constraints = catalog::table_constraints(ctx.driver(), &meta.oid)?;
            indexes = catalog::table_indexes(ctx.driver(), &meta.oid)?;
            triggers = catalog::table_triggers(ctx.driver(), &meta.oid)?;
            rules = catalog::table_rules(ctx.driver(), &meta.oid)?;
        }

        ctx.write(&format!("\n-- Table: {target}\n\n"));
        if with_structure {
            write_definition(ctx, subject, &target, &meta, &columns)?;
        }
        if with_data {
            ctx.commit()?;
            write_data(ctx, subject, &target, &meta, &columns)?;
        }
        if with_structure {
            write_constraints(ctx, &target, &mut constraints);
            write_indexes(ctx, &subject.schema, &indexes);

            let deferred = ctx.deferred_mut();
            for trigger in triggers {
                deferred.queue_trigger(trigger);
            }
            for rule in rules {
                deferred.queue_rule(rule);
            }
        }
        Ok(())
    }
}

fn write_definition(
    ctx: &mut DumpContext<'_>,
    subject: &Subject,
    target: &str,
    meta: &TableMeta,
    columns: &[ColumnMeta],
) -> Result<()> {
    ctx.write_drop("TABLE", target);

    let mut lines = Vec::with_capacity(columns.len());
    for column in columns {
        lines.push(column_definition(ctx, &subject.schema, column)?);
    }
    let if_not_exists = ctx.if_not_exists(9.5);
    let create = if lines.is_empty() {
        format!("CREATE TABLE {if_not_exists}{target} ();\n")
    } else {
        format!("CREATE TABLE {if_not_exists}{target} (\n{}\n);\n", lines.join(",\n"))
    };
    ctx.write(&create);

    for column in columns {
        let name = quote_ident(&column.name);
        if column.statistics >= 0 {
            ctx.write(&format!(
                "ALTER TABLE ONLY {target} ALTER COLUMN {name} SET STATISTICS {};\n",
                column.statistics
            ));
        }
        if column.storage != column.type_storage {
            match storage_name(column.storage) {
                Some(storage) => {
                    ctx.write(&format!("ALTER TABLE ONLY {target} ALTER COLUMN {name} SET STORAGE {storage};\n"));
                }
                None => tracing::debug!(column = %column.name, storage = %column.storage, "unknown column storage"),
            }
        }
    }

    if !meta.reloptions.is_empty() {
        ctx.write(&format!("ALTER TABLE ONLY {target} SET ({});\n", meta.reloptions.join(", ")));
    }

    ctx.write_comment(&format!("TABLE {target}"), meta.comment.as_deref());
    for column in columns {
        ctx.write_comment(&format!("COLUMN {target}.{}", quote_ident(&column.name)), column.comment.as_deref());
    }
    ctx.write_privileges(&format!("TABLE {target}"), &meta.owner, meta.acl.as_deref());
    Ok(())
}

fn column_definition(ctx: &mut DumpContext<'_>, schema: &str, column: &ColumnMeta) -> Result<String> {
    let name = quote_ident(&column.name);
    if let Some(serial) = serial_type(column, schema) {
        return Ok(format!("    {name} {serial}"));
    }

    let mut def = format!("    {name} {}", column.type_name);
    match column.identity {
        Some('a') => def.push_str(" GENERATED ALWAYS AS IDENTITY"),
        Some('d') => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
        _ => {}
    }
    if column.not_null {
        def.push_str(" NOT NULL");
    }
    if let (None, Some(default)) = (column.identity, column.default.as_deref()) {
        def.push_str(" DEFAULT ");
        def.push_str(&qualify_nextval(ctx.driver(), schema, default)?);
    }
    Ok(def)
}

/// `SERIAL` and friends for a `nextval` default on the column's own sequence
///
/// An owned sequence always lives in its table's schema, so a default that
/// names another schema is not the column's own sequence.
fn serial_type(column: &ColumnMeta, schema: &str) -> Option<&'static str> {
    let owned = column.owned_sequence.as_deref()?;
    let caps = NEXTVAL.captures(column.default.as_deref()?)?;
    let (sequence_schema, sequence) = split_sequence_name(&caps[1].replace("''", "'"));
    if sequence != owned || sequence_schema.is_some_and(|s| s != schema) {
        return None;
    }
    match column.type_name.as_str() {
        "integer" => Some("SERIAL"),
        "bigint" => Some("BIGSERIAL"),
        "smallint" => Some("SMALLSERIAL"),
        _ => None,
    }
}

/// Split a regclass name into (schema, name), removing identifier quotes
fn split_sequence_name(text: &str) -> (Option<String>, String) {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);
    let name = parts.pop().unwrap_or_default();
    (parts.pop(), name)
}

/// Schema-qualify an unqualified `nextval('seq'::regclass)` default
///
/// Restores often run with an empty `search_path`, where the bare name would
/// not resolve.
fn qualify_nextval(driver: &mut dyn Driver, schema: &str, default: &str) -> Result<String> {
    let Some(caps) = NEXTVAL.captures(default) else {
        return Ok(default.to_string());
    };
    let (sequence_schema, sequence) = split_sequence_name(&caps[1].replace("''", "'"));
    if sequence_schema.is_some() {
        return Ok(default.to_string());
    }
    match catalog::sequence_schema(driver, &sequence, schema)? {
        Some(found) => Ok(format!("nextval({}::regclass)", quote_literal(&qualified(&found, &sequence)))),
        None => Ok(default.to_string()),
    }
}

fn storage_name(code: char) -> Option<&'static str> {
    match code {
        'p' => Some("PLAIN"),
        'e' => Some("EXTERNAL"),
        'm' => Some("MAIN"),
        'x' => Some("EXTENDED"),
        _ => None,
    }
}

fn write_data(
    ctx: &mut DumpContext<'_>,
    subject: &Subject,
    target: &str,
    meta: &TableMeta,
    columns: &[ColumnMeta],
) -> Result<()> {
    ctx.out.write_all(format!("\n-- Data for table {target}\n").as_bytes())?;

    let chunk = ctx
        .options
        .chunk_size
        .unwrap_or_else(|| chunk_size_for_width(catalog::estimated_row_width(meta.relpages, meta.reltuples)));
    let format_meta = FormatMetadata::new(target, ctx.options.batch_size);
    let mut formatter = SqlFormatter::new(&mut *ctx.out, ctx.options.insert_format);
    let result = CursorReader::new(&mut *ctx.driver, format!("SELECT * FROM {target}"))
        .with_chunk_size(chunk)
        .read_into(&mut formatter, &format_meta);
    let rows = match result {
        Ok(rows) => rows,
        Err(FerryError::Io(e)) => return Err(FerryError::Io(e)),
        Err(e) => {
            // the block is closed; keep the rest of the table so the script restores
            let rows = formatter.rows_written();
            ctx.add_rows(rows);
            ctx.warn(format!("data for table {subject} is incomplete after {rows} rows: {}", e.message()));
            return Ok(());
        }
    };
    ctx.add_rows(rows);
    tracing::debug!(table = %subject, rows, chunk, "table data written");

    for column in columns.iter().filter(|c| c.identity.is_some() || serial_type(c, &subject.schema).is_some()) {
        if let Some((last_value, is_called)) = catalog::column_sequence_state(ctx.driver(), target, &column.name)? {
            ctx.write(&format!(
                "SELECT pg_catalog.setval(pg_catalog.pg_get_serial_sequence({}, {}), {last_value}, {is_called});\n",
                quote_literal(target),
                quote_literal(&column.name)
            ));
        }
    }
    Ok(())
}

fn write_constraints(ctx: &mut DumpContext<'_>, target: &str, constraints: &mut [ConstraintMeta]) {
    if constraints.is_empty() {
        return;
    }
    constraints.sort_by_key(|c| c.kind == 'f');

    ctx.write("\n");
    for constraint in constraints.iter() {
        let name = quote_ident(&constraint.name);
        ctx.write(&format!("ALTER TABLE ONLY {target} ADD CONSTRAINT {name} {};\n", constraint.definition));
        ctx.write_comment(&format!("CONSTRAINT {name} ON {target}"), constraint.comment.as_deref());
    }
}

fn write_indexes(ctx: &mut DumpContext<'_>, schema: &str, indexes: &[IndexMeta]) {
    if indexes.is_empty() {
        return;
    }
    let if_not_exists = ctx.if_not_exists(9.5);

    ctx.write("\n");
    for index in indexes {
        let definition = if if_not_exists.is_empty() {
            index.definition.clone()
        } else {
            CREATE_INDEX.replace(&index.definition, "CREATE ${1}INDEX IF NOT EXISTS ").into_owned()
        };
        ctx.write(&format!("{definition};\n"));
        ctx.write_comment(&format!("INDEX {}", qualified(schema, &index.name)), index.comment.as_deref());
    }
}

/// Stream the rows of one table into `formatter` (CSV/TSV exports)
pub fn export_rows(
    driver: &mut dyn Driver,
    schema: &str,
    table: &str,
    chunk_size: Option<usize>,
    formatter: &mut dyn RowFormatter,
) -> Result<u64> {
    let meta = catalog::table_meta(driver, schema, table)?
        .ok_or_else(|| FerryError::catalog(format!("table {schema}.{table} not found")))?;
    let target = qualified(schema, table);
    let chunk =
        chunk_size.unwrap_or_else(|| chunk_size_for_width(catalog::estimated_row_width(meta.relpages, meta.reltuples)));

    CursorReader::new(driver, format!("SELECT * FROM {target}"))
        .with_chunk_size(chunk)
        .read_into(formatter, &FormatMetadata::new(target, 1))
}
