//! Catalog Queries
//!
//! Typed reads of `pg_catalog` metadata for the dumpers. Each function issues
//! its query through [`Driver::select_set`] and maps the text rows into a
//! plain struct, so dumpers never touch column names directly.
//!
//! # Conventions
//! - Object names are passed as escaped literals, never interpolated raw
//! - A missing object is `Ok(None)`, not an error
//! - Version-dependent columns are selected as constants on older servers so
//!   every query returns the same shape

use crate::driver::{quote_literal, Driver, RowRef};
use crate::error::Result;
use crate::graph::ObjectKind;

/// Object listed in a schema, before its details are read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogObject {
    pub oid: String,
    pub kind: ObjectKind,
    pub schema: String,
    pub name: String,
}

/// `pg_class` row of a table
#[derive(Debug, Clone, Default)]
pub struct TableMeta {
    pub oid: String,
    pub owner: String,
    pub partitioned: bool,
    pub comment: Option<String>,
    pub acl: Option<String>,
    /// Storage parameters as `name=value` (`fillfactor=70`, `autovacuum_enabled=false`)
    pub reloptions: Vec<String>,
    pub relpages: i64,
    pub reltuples: f64,
}

/// One column of a table
#[derive(Debug, Clone, Default)]
pub struct ColumnMeta {
    pub name: String,
    /// `format_type` output (`integer`, `character varying(20)`)
    pub type_name: String,
    pub not_null: bool,
    pub default: Option<String>,
    /// `a` for ALWAYS, `d` for BY DEFAULT
    pub identity: Option<char>,
    /// `attstattarget`; -1 is the default target
    pub statistics: i64,
    pub storage: char,
    pub type_storage: char,
    pub comment: Option<String>,
    /// Sequence owned by this column (`OWNED BY`), unqualified
    pub owned_sequence: Option<String>,
}

/// Table constraint other than NOT NULL
#[derive(Debug, Clone)]
pub struct ConstraintMeta {
    pub name: String,
    /// `p`, `u`, `c`, `f`, `x`
    pub kind: char,
    pub definition: String,
    pub comment: Option<String>,
}

/// Index not backing a constraint
#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub name: String,
    pub definition: String,
    pub comment: Option<String>,
}

/// Trigger or rule attached to a relation
#[derive(Debug, Clone)]
pub struct AttachedMeta {
    pub oid: String,
    pub name: String,
    pub schema: String,
    pub table: String,
    pub definition: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ViewMeta {
    pub oid: String,
    pub owner: String,
    pub materialized: bool,
    pub definition: String,
    pub comment: Option<String>,
    pub acl: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FunctionMeta {
    pub oid: String,
    pub name: String,
    pub owner: String,
    /// `pg_get_function_identity_arguments`
    pub identity_args: String,
    /// `pg_get_functiondef`, a complete `CREATE OR REPLACE` statement
    pub definition: String,
    pub procedure: bool,
    pub comment: Option<String>,
    pub acl: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SequenceMeta {
    pub oid: String,
    pub owner: String,
    /// Declared type on 10+, `bigint` before
    pub data_type: String,
    pub start: String,
    pub increment: String,
    pub min: String,
    pub max: String,
    pub cache: String,
    pub cycle: bool,
    pub last_value: String,
    pub is_called: bool,
    /// (table, column) that owns the sequence
    pub owned_by: Option<(String, String)>,
    pub comment: Option<String>,
    pub acl: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TypeMeta {
    pub oid: String,
    pub owner: String,
    /// `typtype`: `b`, `c`, `e`, `r`, `p`, ...
    pub kind: char,
    pub input: String,
    pub output: String,
    pub internal_length: i64,
    pub alignment: char,
    pub storage: char,
    pub enum_labels: Vec<String>,
    /// Composite attributes as (name, formatted type)
    pub attributes: Vec<(String, String)>,
    pub range_subtype: Option<String>,
    pub comment: Option<String>,
    pub acl: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DomainMeta {
    pub oid: String,
    pub owner: String,
    pub base_type: String,
    pub default: Option<String>,
    pub not_null: bool,
    /// Named check constraints as (name, definition)
    pub constraints: Vec<(String, String)>,
    pub comment: Option<String>,
    pub acl: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AggregateMeta {
    pub oid: String,
    pub owner: String,
    /// Identity arguments; `None` for an aggregate over `*`
    pub args: Option<String>,
    pub sfunc: String,
    pub stype: String,
    /// `-` when the aggregate has no final function
    pub finalfunc: String,
    pub initcond: Option<String>,
    pub sortop: Option<String>,
    pub comment: Option<String>,
    pub acl: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RoleMeta {
    pub name: String,
    pub superuser: bool,
    pub inherit: bool,
    pub createrole: bool,
    pub createdb: bool,
    pub login: bool,
    pub replication: bool,
    pub bypassrls: bool,
    pub connection_limit: i64,
    pub valid_until: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMembership {
    pub role: String,
    pub member: String,
    pub admin_option: bool,
}

fn opt(row: &RowRef<'_>, name: &str) -> Option<String> {
    row.get(name).filter(|v| !v.is_empty()).map(str::to_string)
}

fn first_char(row: &RowRef<'_>, name: &str) -> char {
    row.text(name).chars().next().unwrap_or(' ')
}

/// Split a text array (`{a,b}`) into its elements, removing quoting
#[must_use]
pub fn parse_text_array(text: &str) -> Vec<String> {
    let inner = text.trim().trim_start_matches('{').trim_end_matches('}');
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = inner.chars();
    let mut had_item = false;

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                had_item = true;
            }
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ',' if !in_quotes => {
                items.push(std::mem::take(&mut current));
                had_item = false;
            }
            _ => {
                current.push(ch);
                had_item = true;
            }
        }
    }
    if had_item || !current.is_empty() {
        items.push(current);
    }
    items
}

/// Non-system schemas in name order
pub fn list_schemas(driver: &mut dyn Driver) -> Result<Vec<String>> {
    let set = driver.select_set(
        "SELECT nspname FROM pg_catalog.pg_namespace \
         WHERE nspname !~ '^pg_' AND nspname <> 'information_schema' \
         ORDER BY nspname",
    )?;
    Ok(set.rows().map(|row| row.text("nspname").to_string()).collect())
}

/// Owner and comment of a schema
pub fn schema_meta(driver: &mut dyn Driver, schema: &str) -> Result<Option<(String, Option<String>, Option<String>)>> {
    let set = driver.select_set(&format!(
        "SELECT pg_catalog.pg_get_userbyid(n.nspowner) AS owner, n.nspacl::text AS acl, \
         pg_catalog.obj_description(n.oid, 'pg_namespace') AS comment \
         FROM pg_catalog.pg_namespace n WHERE n.nspname = {}",
        quote_literal(schema)
    ))?;
    Ok(set
        .first()
        .map(|row| (row.text("owner").to_string(), opt(&row, "acl"), opt(&row, "comment"))))
}

/// Every dumpable object of a schema
///
/// Identity sequences and the sequences behind `serial` columns are not
/// listed; they are created and restored with their table. Any other
/// column-owned sequence is listed like a free one.
pub fn schema_objects(driver: &mut dyn Driver, schema: &str) -> Result<Vec<CatalogObject>> {
    let version = driver.server_version();
    let nsp = quote_literal(schema);
    // same shape the table dumper writes as SERIAL: integer column whose
    // default is nextval() of the sequence it owns
    let serial_owner = "SELECT 1 FROM pg_catalog.pg_depend d \
         JOIN pg_catalog.pg_attribute a ON a.attrelid = d.refobjid AND a.attnum = d.refobjsubid \
         JOIN pg_catalog.pg_attrdef ad ON ad.adrelid = a.attrelid AND ad.adnum = a.attnum \
         WHERE d.classid = 'pg_catalog.pg_class'::regclass AND d.objid = c.oid AND d.deptype = 'a' \
         AND a.atttypid IN ('pg_catalog.int2'::regtype, 'pg_catalog.int4'::regtype, 'pg_catalog.int8'::regtype) \
         AND pg_catalog.pg_get_expr(ad.adbin, ad.adrelid) = \
         'nextval(' || pg_catalog.quote_literal(c.oid::regclass::text) || '::regclass)'";
    let not_aggregate =
        if version >= 11.0 { "p.prokind IN ('f', 'p')" } else { "NOT p.proisagg" };
    let is_aggregate = if version >= 11.0 { "p.prokind = 'a'" } else { "p.proisagg" };

    let queries = [
        (
            ObjectKind::Type,
            format!(
                "SELECT t.oid::text AS oid, t.typname AS name FROM pg_catalog.pg_type t \
                 JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace \
                 LEFT JOIN pg_catalog.pg_class c ON c.oid = t.typrelid \
                 WHERE n.nspname = {nsp} AND t.typtype IN ('b', 'c', 'e', 'r') \
                 AND (t.typrelid = 0 OR c.relkind = 'c') \
                 AND NOT EXISTS (SELECT 1 FROM pg_catalog.pg_type el WHERE el.typarray = t.oid) \
                 ORDER BY t.typname"
            ),
        ),
        (
            ObjectKind::Domain,
            format!(
                "SELECT t.oid::text AS oid, t.typname AS name FROM pg_catalog.pg_type t \
                 JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace \
                 WHERE n.nspname = {nsp} AND t.typtype = 'd' ORDER BY t.typname"
            ),
        ),
        (
            ObjectKind::Sequence,
            format!(
                "SELECT c.oid::text AS oid, c.relname AS name FROM pg_catalog.pg_class c \
                 JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = {nsp} AND c.relkind = 'S' \
                 AND NOT EXISTS (SELECT 1 FROM pg_catalog.pg_depend d \
                 WHERE d.classid = 'pg_catalog.pg_class'::regclass AND d.objid = c.oid \
                 AND d.refobjsubid > 0 AND d.deptype = 'i') \
                 AND NOT EXISTS ({serial_owner}) \
                 ORDER BY c.relname"
            ),
        ),
        (
            ObjectKind::Function,
            format!(
                "SELECT p.oid::text AS oid, p.proname AS name FROM pg_catalog.pg_proc p \
                 JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace \
                 WHERE n.nspname = {nsp} AND {not_aggregate} ORDER BY p.proname, p.oid"
            ),
        ),
        (
            ObjectKind::Aggregate,
            format!(
                "SELECT p.oid::text AS oid, p.proname AS name FROM pg_catalog.pg_proc p \
                 JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace \
                 WHERE n.nspname = {nsp} AND {is_aggregate} ORDER BY p.proname, p.oid"
            ),
        ),
        (
            ObjectKind::Table,
            format!(
                "SELECT c.oid::text AS oid, c.relname AS name FROM pg_catalog.pg_class c \
                 JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = {nsp} AND c.relkind IN ('r', 'p') ORDER BY c.relname"
            ),
        ),
        (
            ObjectKind::View,
            format!(
                "SELECT c.oid::text AS oid, c.relname AS name FROM pg_catalog.pg_class c \
                 JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = {nsp} AND c.relkind IN ('v', 'm') ORDER BY c.relname"
            ),
        ),
    ];

    let mut objects = Vec::new();
    for (kind, sql) in queries {
        let set = driver.select_set(&sql)?;
        objects.extend(set.rows().map(|row| CatalogObject {
            oid: row.text("oid").to_string(),
            kind,
            schema: schema.to_string(),
            name: row.text("name").to_string(),
        }));
    }
    Ok(objects)
}

/// "depends on" pairs `(dependent, referenced)` from `pg_depend`
///
/// Rewrite rules are folded into their view, column defaults into their table
/// and constraints into their table or domain. Array types are folded into
/// their element type. The caller keeps only pairs whose ends are both part
/// of the graph.
pub fn object_dependencies(driver: &mut dyn Driver) -> Result<Vec<(String, String)>> {
    let set = driver.select_set(
        "SELECT DISTINCT \
           CASE d.classid \
             WHEN 'pg_catalog.pg_rewrite'::regclass THEN (SELECT r.ev_class FROM pg_catalog.pg_rewrite r WHERE r.oid = d.objid) \
             WHEN 'pg_catalog.pg_attrdef'::regclass THEN (SELECT a.adrelid FROM pg_catalog.pg_attrdef a WHERE a.oid = d.objid) \
             WHEN 'pg_catalog.pg_constraint'::regclass THEN (SELECT COALESCE(NULLIF(c.conrelid, 0), c.contypid) FROM pg_catalog.pg_constraint c WHERE c.oid = d.objid) \
             ELSE d.objid END::text AS objid, \
           COALESCE((SELECT el.oid FROM pg_catalog.pg_type el WHERE el.typarray = d.refobjid), d.refobjid)::text AS refobjid \
         FROM pg_catalog.pg_depend d WHERE d.deptype = 'n'",
    )?;
    Ok(set
        .rows()
        .filter_map(|row| Some((row.get("objid")?.to_string(), row.get("refobjid")?.to_string())))
        .filter(|(a, b)| a != b)
        .collect())
}

/// `(last_value, is_called)` of the sequence behind a serial or identity column
///
/// The sequence is found by the server, so it may live in any schema.
pub fn column_sequence_state(driver: &mut dyn Driver, table: &str, column: &str) -> Result<Option<(String, bool)>> {
    let set = driver.select_set(&format!(
        "SELECT pg_catalog.pg_get_serial_sequence({}, {}) AS sequence",
        quote_literal(table),
        quote_literal(column)
    ))?;
    let Some(sequence) = set.first().and_then(|row| opt(&row, "sequence")) else {
        return Ok(None);
    };
    let state = driver.select_set(&format!("SELECT s.last_value, s.is_called FROM {sequence} s"))?;
    Ok(state.first().map(|row| (row.text("last_value").to_string(), row.flag("is_called"))))
}

pub fn table_meta(driver: &mut dyn Driver, schema: &str, table: &str) -> Result<Option<TableMeta>> {
    let set = driver.select_set(&format!(
        "SELECT c.oid::text AS oid, pg_catalog.pg_get_userbyid(c.relowner) AS owner, \
         c.relkind, c.relacl::text AS acl, c.reloptions::text AS reloptions, \
         c.relpages, c.reltuples, pg_catalog.obj_description(c.oid, 'pg_class') AS comment \
         FROM pg_catalog.pg_class c JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = {} AND c.relname = {} AND c.relkind IN ('r', 'p')",
        quote_literal(schema),
        quote_literal(table)
    ))?;
    Ok(set.first().map(|row| TableMeta {
        oid: row.text("oid").to_string(),
        owner: row.text("owner").to_string(),
        partitioned: row.text("relkind") == "p",
        comment: opt(&row, "comment"),
        acl: opt(&row, "acl"),
        reloptions: row.get("reloptions").map(parse_text_array).unwrap_or_default(),
        relpages: row.int("relpages").unwrap_or(0),
        reltuples: row.get("reltuples").and_then(|v| v.parse().ok()).unwrap_or(0.0),
    }))
}

pub fn table_columns(driver: &mut dyn Driver, table_oid: &str) -> Result<Vec<ColumnMeta>> {
    let identity = if driver.server_version() >= 10.0 { "a.attidentity" } else { "''::\"char\"" };
    let set = driver.select_set(&format!(
        "SELECT a.attname, pg_catalog.format_type(a.atttypid, a.atttypmod) AS type_name, \
         a.attnotnull, pg_catalog.pg_get_expr(ad.adbin, ad.adrelid) AS default_expr, \
         {identity} AS attidentity, COALESCE(a.attstattarget, -1) AS attstattarget, \
         a.attstorage, t.typstorage, pg_catalog.col_description(a.attrelid, a.attnum) AS comment, \
         (SELECT s.relname FROM pg_catalog.pg_depend d \
          JOIN pg_catalog.pg_class s ON s.oid = d.objid AND s.relkind = 'S' \
          WHERE d.classid = 'pg_catalog.pg_class'::regclass AND d.refobjid = a.attrelid \
          AND d.refobjsubid = a.attnum AND d.deptype = 'a' LIMIT 1) AS owned_sequence \
         FROM pg_catalog.pg_attribute a \
         JOIN pg_catalog.pg_type t ON t.oid = a.atttypid \
         LEFT JOIN pg_catalog.pg_attrdef ad ON ad.adrelid = a.attrelid AND ad.adnum = a.attnum \
         WHERE a.attrelid = {table_oid} AND a.attnum > 0 AND NOT a.attisdropped \
         ORDER BY a.attnum",
        table_oid = quote_literal(table_oid)
    ))?;
    Ok(set
        .rows()
        .map(|row| ColumnMeta {
            name: row.text("attname").to_string(),
            type_name: row.text("type_name").to_string(),
            not_null: row.flag("attnotnull"),
            default: opt(&row, "default_expr"),
            identity: row.get("attidentity").and_then(|v| v.chars().next()),
            statistics: row.int("attstattarget").unwrap_or(-1),
            storage: first_char(&row, "attstorage"),
            type_storage: first_char(&row, "typstorage"),
            comment: opt(&row, "comment"),
            owned_sequence: opt(&row, "owned_sequence"),
        })
        .collect())
}

/// Constraints other than NOT NULL; foreign keys sort last
pub fn table_constraints(driver: &mut dyn Driver, table_oid: &str) -> Result<Vec<ConstraintMeta>> {
    let set = driver.select_set(&format!(
        "SELECT c.conname, c.contype, pg_catalog.pg_get_constraintdef(c.oid, true) AS definition, \
         pg_catalog.obj_description(c.oid, 'pg_constraint') AS comment \
         FROM pg_catalog.pg_constraint c \
         WHERE c.conrelid = {} AND c.contype <> 'n' \
         ORDER BY c.contype = 'f', c.conname",
        quote_literal(table_oid)
    ))?;
    Ok(set
        .rows()
        .map(|row| ConstraintMeta {
            name: row.text("conname").to_string(),
            kind: first_char(&row, "contype"),
            definition: row.text("definition").to_string(),
            comment: opt(&row, "comment"),
        })
        .collect())
}

/// Indexes that do not back a constraint
pub fn table_indexes(driver: &mut dyn Driver, table_oid: &str) -> Result<Vec<IndexMeta>> {
    let set = driver.select_set(&format!(
        "SELECT ic.relname AS name, pg_catalog.pg_get_indexdef(i.indexrelid) AS definition, \
         pg_catalog.obj_description(i.indexrelid, 'pg_class') AS comment \
         FROM pg_catalog.pg_index i JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid \
         WHERE i.indrelid = {} \
         AND NOT EXISTS (SELECT 1 FROM pg_catalog.pg_constraint c WHERE c.conindid = i.indexrelid) \
         ORDER BY ic.relname",
        quote_literal(table_oid)
    ))?;
    Ok(set
        .rows()
        .map(|row| IndexMeta {
            name: row.text("name").to_string(),
            definition: row.text("definition").to_string(),
            comment: opt(&row, "comment"),
        })
        .collect())
}

fn attached(row: &RowRef<'_>) -> AttachedMeta {
    AttachedMeta {
        oid: row.text("oid").to_string(),
        name: row.text("name").to_string(),
        schema: row.text("nspname").to_string(),
        table: row.text("relname").to_string(),
        definition: row.text("definition").to_string(),
        comment: opt(row, "comment"),
    }
}

/// User triggers of a table; internal (constraint) triggers excluded
pub fn table_triggers(driver: &mut dyn Driver, table_oid: &str) -> Result<Vec<AttachedMeta>> {
    let set = driver.select_set(&format!(
        "SELECT t.oid::text AS oid, t.tgname AS name, n.nspname, c.relname, \
         pg_catalog.pg_get_triggerdef(t.oid, true) AS definition, \
         pg_catalog.obj_description(t.oid, 'pg_trigger') AS comment \
         FROM pg_catalog.pg_trigger t JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid \
         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
         WHERE t.tgrelid = {} AND NOT t.tgisinternal ORDER BY t.tgname",
        quote_literal(table_oid)
    ))?;
    Ok(set.rows().map(|row| attached(&row)).collect())
}

/// Rules of a relation; the `_RETURN` rule of a view is excluded
pub fn table_rules(driver: &mut dyn Driver, table_oid: &str) -> Result<Vec<AttachedMeta>> {
    let set = driver.select_set(&format!(
        "SELECT r.oid::text AS oid, r.rulename AS name, n.nspname, c.relname, \
         pg_catalog.pg_get_ruledef(r.oid, true) AS definition, \
         pg_catalog.obj_description(r.oid, 'pg_rewrite') AS comment \
         FROM pg_catalog.pg_rewrite r JOIN pg_catalog.pg_class c ON c.oid = r.ev_class \
         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
         WHERE r.ev_class = {} AND r.rulename <> '_RETURN' ORDER BY r.rulename",
        quote_literal(table_oid)
    ))?;
    Ok(set.rows().map(|row| attached(&row)).collect())
}

pub fn trigger_meta(driver: &mut dyn Driver, oid: &str) -> Result<Option<AttachedMeta>> {
    let set = driver.select_set(&format!(
        "SELECT t.oid::text AS oid, t.tgname AS name, n.nspname, c.relname, \
         pg_catalog.pg_get_triggerdef(t.oid, true) AS definition, \
         pg_catalog.obj_description(t.oid, 'pg_trigger') AS comment \
         FROM pg_catalog.pg_trigger t JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid \
         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
         WHERE t.oid = {}",
        quote_literal(oid)
    ))?;
    Ok(set.first().map(|row| attached(&row)))
}

pub fn rule_meta(driver: &mut dyn Driver, oid: &str) -> Result<Option<AttachedMeta>> {
    let set = driver.select_set(&format!(
        "SELECT r.oid::text AS oid, r.rulename AS name, n.nspname, c.relname, \
         pg_catalog.pg_get_ruledef(r.oid, true) AS definition, \
         pg_catalog.obj_description(r.oid, 'pg_rewrite') AS comment \
         FROM pg_catalog.pg_rewrite r JOIN pg_catalog.pg_class c ON c.oid = r.ev_class \
         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
         WHERE r.oid = {}",
        quote_literal(oid)
    ))?;
    Ok(set.first().map(|row| attached(&row)))
}

/// Schema of the sequence an unqualified `nextval` default points at
///
/// Prefers a sequence in `preferred_schema` when several share the name.
pub fn sequence_schema(driver: &mut dyn Driver, sequence: &str, preferred_schema: &str) -> Result<Option<String>> {
    let set = driver.select_set(&format!(
        "SELECT n.nspname FROM pg_catalog.pg_class c \
         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
         WHERE c.relkind = 'S' AND c.relname = {} \
         ORDER BY n.nspname = {} DESC, n.nspname LIMIT 1",
        quote_literal(sequence),
        quote_literal(preferred_schema)
    ))?;
    Ok(set.first().map(|row| row.text("nspname").to_string()))
}

pub fn view_meta(driver: &mut dyn Driver, schema: &str, view: &str) -> Result<Option<ViewMeta>> {
    let set = driver.select_set(&format!(
        "SELECT c.oid::text AS oid, pg_catalog.pg_get_userbyid(c.relowner) AS owner, c.relkind, \
         pg_catalog.pg_get_viewdef(c.oid, true) AS definition, c.relacl::text AS acl, \
         pg_catalog.obj_description(c.oid, 'pg_class') AS comment \
         FROM pg_catalog.pg_class c JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = {} AND c.relname = {} AND c.relkind IN ('v', 'm')",
        quote_literal(schema),
        quote_literal(view)
    ))?;
    Ok(set.first().map(|row| ViewMeta {
        oid: row.text("oid").to_string(),
        owner: row.text("owner").to_string(),
        materialized: row.text("relkind") == "m",
        definition: row.text("definition").trim().trim_end_matches(';').to_string(),
        comment: opt(&row, "comment"),
        acl: opt(&row, "acl"),
    }))
}

pub fn function_meta(driver: &mut dyn Driver, oid: &str) -> Result<Option<FunctionMeta>> {
    let procedure = if driver.server_version() >= 11.0 { "p.prokind = 'p'" } else { "false" };
    let set = driver.select_set(&format!(
        "SELECT p.oid::text AS oid, p.proname, pg_catalog.pg_get_userbyid(p.proowner) AS owner, \
         pg_catalog.pg_get_function_identity_arguments(p.oid) AS identity_args, \
         pg_catalog.pg_get_functiondef(p.oid) AS definition, {procedure} AS is_procedure, \
         p.proacl::text AS acl, pg_catalog.obj_description(p.oid, 'pg_proc') AS comment \
         FROM pg_catalog.pg_proc p WHERE p.oid = {}",
        quote_literal(oid)
    ))?;
    Ok(set.first().map(|row| FunctionMeta {
        oid: row.text("oid").to_string(),
        name: row.text("proname").to_string(),
        owner: row.text("owner").to_string(),
        identity_args: row.text("identity_args").to_string(),
        definition: row.text("definition").trim_end().to_string(),
        procedure: row.flag("is_procedure"),
        comment: opt(&row, "comment"),
        acl: opt(&row, "acl"),
    }))
}

/// Sequence parameters and its current state, read in one statement
pub fn sequence_meta(driver: &mut dyn Driver, schema: &str, sequence: &str) -> Result<Option<SequenceMeta>> {
    let qualified = crate::driver::qualified(schema, sequence);
    let regclass = quote_literal(&qualified);
    let params = if driver.server_version() >= 10.0 {
        format!(
            "pg_catalog.format_type(p.seqtypid, NULL) AS data_type, p.seqstart AS start_value, \
             p.seqincrement AS increment_by, p.seqmin AS min_value, p.seqmax AS max_value, \
             p.seqcache AS cache_value, p.seqcycle AS is_cycled \
             FROM {qualified} s, pg_catalog.pg_sequence p WHERE p.seqrelid = {regclass}::regclass"
        )
    } else {
        format!(
            "'bigint' AS data_type, s.start_value, s.increment_by, s.min_value, s.max_value, \
             s.cache_value, s.is_cycled FROM {qualified} s"
        )
    };
    let set = driver.select_set(&format!(
        "SELECT s.last_value, s.is_called, {params}"
    ))?;
    let Some(state) = set.first() else {
        return Ok(None);
    };

    let meta = driver.select_set(&format!(
        "SELECT c.oid::text AS oid, pg_catalog.pg_get_userbyid(c.relowner) AS owner, \
         c.relacl::text AS acl, pg_catalog.obj_description(c.oid, 'pg_class') AS comment, \
         (SELECT t.relname FROM pg_catalog.pg_depend d JOIN pg_catalog.pg_class t ON t.oid = d.refobjid \
          WHERE d.objid = c.oid AND d.classid = 'pg_catalog.pg_class'::regclass \
          AND d.refobjsubid > 0 AND d.deptype = 'a' LIMIT 1) AS owner_table, \
         (SELECT a.attname FROM pg_catalog.pg_depend d JOIN pg_catalog.pg_attribute a \
          ON a.attrelid = d.refobjid AND a.attnum = d.refobjsubid \
          WHERE d.objid = c.oid AND d.classid = 'pg_catalog.pg_class'::regclass \
          AND d.refobjsubid > 0 AND d.deptype = 'a' LIMIT 1) AS owner_column \
         FROM pg_catalog.pg_class c WHERE c.oid = {regclass}::regclass"
    ))?;
    let Some(meta) = meta.first() else {
        return Ok(None);
    };

    let owned_by = match (opt(&meta, "owner_table"), opt(&meta, "owner_column")) {
        (Some(table), Some(column)) => Some((table, column)),
        _ => None,
    };

    Ok(Some(SequenceMeta {
        oid: meta.text("oid").to_string(),
        owner: meta.text("owner").to_string(),
        data_type: state.text("data_type").to_string(),
        start: state.text("start_value").to_string(),
        increment: state.text("increment_by").to_string(),
        min: state.text("min_value").to_string(),
        max: state.text("max_value").to_string(),
        cache: state.text("cache_value").to_string(),
        cycle: state.flag("is_cycled"),
        last_value: state.text("last_value").to_string(),
        is_called: state.flag("is_called"),
        owned_by,
        comment: opt(&meta, "comment"),
        acl: opt(&meta, "acl"),
    }))
}

pub fn type_meta(driver: &mut dyn Driver, schema: &str, name: &str) -> Result<Option<TypeMeta>> {
    let set = driver.select_set(&format!(
        "SELECT t.oid::text AS oid, pg_catalog.pg_get_userbyid(t.typowner) AS owner, t.typtype, \
         t.typinput::text AS typinput, t.typoutput::text AS typoutput, t.typlen, t.typalign, \
         t.typstorage, t.typrelid::text AS typrelid, t.typacl::text AS acl, \
         pg_catalog.obj_description(t.oid, 'pg_type') AS comment \
         FROM pg_catalog.pg_type t JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace \
         WHERE n.nspname = {} AND t.typname = {}",
        quote_literal(schema),
        quote_literal(name)
    ))?;
    let Some(row) = set.first() else {
        return Ok(None);
    };

    let mut meta = TypeMeta {
        oid: row.text("oid").to_string(),
        owner: row.text("owner").to_string(),
        kind: first_char(&row, "typtype"),
        input: row.text("typinput").to_string(),
        output: row.text("typoutput").to_string(),
        internal_length: row.int("typlen").unwrap_or(-1),
        alignment: first_char(&row, "typalign"),
        storage: first_char(&row, "typstorage"),
        comment: opt(&row, "comment"),
        acl: opt(&row, "acl"),
        ..TypeMeta::default()
    };
    let typrelid = row.text("typrelid").to_string();

    match meta.kind {
        'e' => {
            let labels = driver.select_set(&format!(
                "SELECT e.enumlabel FROM pg_catalog.pg_enum e WHERE e.enumtypid = {} ORDER BY e.enumsortorder",
                quote_literal(&meta.oid)
            ))?;
            meta.enum_labels = labels.rows().map(|r| r.text("enumlabel").to_string()).collect();
        }
        'c' => {
            let attributes = driver.select_set(&format!(
                "SELECT a.attname, pg_catalog.format_type(a.atttypid, a.atttypmod) AS type_name \
                 FROM pg_catalog.pg_attribute a \
                 WHERE a.attrelid = {} AND a.attnum > 0 AND NOT a.attisdropped ORDER BY a.attnum",
                quote_literal(&typrelid)
            ))?;
            meta.attributes = attributes
                .rows()
                .map(|r| (r.text("attname").to_string(), r.text("type_name").to_string()))
                .collect();
        }
        'r' => {
            let range = driver.select_set(&format!(
                "SELECT pg_catalog.format_type(r.rngsubtype, NULL) AS subtype \
                 FROM pg_catalog.pg_range r WHERE r.rngtypid = {}",
                quote_literal(&meta.oid)
            ))?;
            meta.range_subtype = range.first().map(|r| r.text("subtype").to_string());
        }
        _ => {}
    }
    Ok(Some(meta))
}

pub fn domain_meta(driver: &mut dyn Driver, schema: &str, name: &str) -> Result<Option<DomainMeta>> {
    let set = driver.select_set(&format!(
        "SELECT t.oid::text AS oid, pg_catalog.pg_get_userbyid(t.typowner) AS owner, \
         pg_catalog.format_type(t.typbasetype, t.typtypmod) AS base_type, t.typdefault, \
         t.typnotnull, t.typacl::text AS acl, pg_catalog.obj_description(t.oid, 'pg_type') AS comment \
         FROM pg_catalog.pg_type t JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace \
         WHERE n.nspname = {} AND t.typname = {} AND t.typtype = 'd'",
        quote_literal(schema),
        quote_literal(name)
    ))?;
    let Some(row) = set.first() else {
        return Ok(None);
    };
    let oid = row.text("oid").to_string();

    let constraints = driver.select_set(&format!(
        "SELECT c.conname, pg_catalog.pg_get_constraintdef(c.oid, true) AS definition \
         FROM pg_catalog.pg_constraint c WHERE c.contypid = {} AND c.contype = 'c' ORDER BY c.conname",
        quote_literal(&oid)
    ))?;

    Ok(Some(DomainMeta {
        oid,
        owner: row.text("owner").to_string(),
        base_type: row.text("base_type").to_string(),
        default: opt(&row, "typdefault"),
        not_null: row.flag("typnotnull"),
        constraints: constraints
            .rows()
            .map(|r| (r.text("conname").to_string(), r.text("definition").to_string()))
            .collect(),
        comment: opt(&row, "comment"),
        acl: opt(&row, "acl"),
    }))
}

pub fn aggregate_meta(driver: &mut dyn Driver, oid: &str) -> Result<Option<AggregateMeta>> {
    let set = driver.select_set(&format!(
        "SELECT p.oid::text AS oid, pg_catalog.pg_get_userbyid(p.proowner) AS owner, \
         CASE WHEN p.pronargs = 0 THEN NULL ELSE pg_catalog.pg_get_function_identity_arguments(p.oid) END AS args, \
         a.aggtransfn::text AS sfunc, pg_catalog.format_type(a.aggtranstype, NULL) AS stype, \
         a.aggfinalfn::text AS finalfunc, a.agginitval AS initcond, \
         CASE WHEN a.aggsortop = 0 THEN NULL ELSE a.aggsortop::regoperator::text END AS sortop, \
         p.proacl::text AS acl, pg_catalog.obj_description(p.oid, 'pg_proc') AS comment \
         FROM pg_catalog.pg_aggregate a JOIN pg_catalog.pg_proc p ON p.oid = a.aggfnoid \
         WHERE p.oid = {}",
        quote_literal(oid)
    ))?;
    Ok(set.first().map(|row| AggregateMeta {
        oid: row.text("oid").to_string(),
        owner: row.text("owner").to_string(),
        args: opt(&row, "args"),
        sfunc: row.text("sfunc").to_string(),
        stype: row.text("stype").to_string(),
        finalfunc: row.get("finalfunc").unwrap_or("-").to_string(),
        initcond: row.get("initcond").map(str::to_string),
        sortop: opt(&row, "sortop").map(|op| op.split('(').next().unwrap_or_default().to_string()),
        comment: opt(&row, "comment"),
        acl: opt(&row, "acl"),
    }))
}

pub fn list_roles(driver: &mut dyn Driver) -> Result<Vec<RoleMeta>> {
    let bypassrls = if driver.server_version() >= 9.5 { "r.rolbypassrls" } else { "false" };
    let set = driver.select_set(&format!(
        "SELECT r.rolname, r.rolsuper, r.rolinherit, r.rolcreaterole, r.rolcreatedb, \
         r.rolcanlogin, r.rolreplication, {bypassrls} AS rolbypassrls, r.rolconnlimit, \
         r.rolvaliduntil::text AS rolvaliduntil \
         FROM pg_catalog.pg_roles r ORDER BY r.rolname"
    ))?;
    Ok(set
        .rows()
        .map(|row| RoleMeta {
            name: row.text("rolname").to_string(),
            superuser: row.flag("rolsuper"),
            inherit: row.flag("rolinherit"),
            createrole: row.flag("rolcreaterole"),
            createdb: row.flag("rolcreatedb"),
            login: row.flag("rolcanlogin"),
            replication: row.flag("rolreplication"),
            bypassrls: row.flag("rolbypassrls"),
            connection_limit: row.int("rolconnlimit").unwrap_or(-1),
            valid_until: opt(&row, "rolvaliduntil").filter(|v| v != "infinity"),
        })
        .collect())
}

pub fn role_memberships(driver: &mut dyn Driver) -> Result<Vec<RoleMembership>> {
    let set = driver.select_set(
        "SELECT r.rolname AS role, m.rolname AS member, am.admin_option \
         FROM pg_catalog.pg_auth_members am \
         JOIN pg_catalog.pg_roles r ON r.oid = am.roleid \
         JOIN pg_catalog.pg_roles m ON m.oid = am.member \
         ORDER BY r.rolname, m.rolname",
    )?;
    Ok(set
        .rows()
        .map(|row| RoleMembership {
            role: row.text("role").to_string(),
            member: row.text("member").to_string(),
            admin_option: row.flag("admin_option"),
        })
        .collect())
}

/// Estimated average row width in bytes from `relpages`/`reltuples`
#[must_use]
pub fn estimated_row_width(relpages: i64, reltuples: f64) -> Option<u64> {
    if relpages <= 0 || reltuples < 1.0 {
        return None;
    }
    let width = (relpages as f64 * 8192.0) / reltuples;
    Some(width.max(1.0) as u64)
}
