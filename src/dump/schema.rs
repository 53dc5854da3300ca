//! Schema and database orchestrators
//!
//! A schema dump lists the schema's objects, orders them with the
//! [`DependencyGraph`] and dispatches each one through the registry.
//! Functions that would reference an object written after them (only
//! possible inside a dependency cycle) move to the end of the schema.
//! Queued triggers and rules are written last, after the whole database
//! when the schema is part of a database dump.

use super::{DumpContext, Dumper, Subject};
use crate::catalog;
use crate::driver::quote_ident;
use crate::error::Result;
use crate::graph::{DependencyGraph, ObjectKind, ObjectNode};

pub struct SchemaDumper;

impl Dumper for SchemaDumper {
    fn dump(&self, ctx: &mut DumpContext<'_>, subject: &Subject) -> Result<()> {
        let schema = subject.name.as_str();
        let Some((owner, acl, comment)) = catalog::schema_meta(ctx.driver(), schema)? else {
            ctx.missing(ObjectKind::Schema, subject);
            return Ok(());
        };

        if ctx.options().with_structure() {
            let target = quote_ident(schema);
            ctx.write(&format!("\n--\n-- Schema: {target}\n--\n\n"));
            ctx.write_drop("SCHEMA", &target);
            let create = format!("CREATE SCHEMA {}{target};\n", ctx.if_not_exists(9.3));
            ctx.write(&create);
            ctx.write_comment(&format!("SCHEMA {target}"), comment.as_deref());
            ctx.write_privileges(&format!("SCHEMA {target}"), &owner, acl.as_deref());
        }
        ctx.commit()?;

        let mut graph = build_graph(ctx, schema)?;
        let order: Vec<ObjectNode> = graph.topological_sort().into_iter().cloned().collect();
        let cyclic: Vec<String> = graph.circular_nodes().iter().map(|node| node.to_string()).collect();
        for node in cyclic {
            ctx.warn(format!("circular dependency, written in discovery order: {node}"));
        }

        let mut late_functions = Vec::new();
        for node in &order {
            let must_wait = node.kind == ObjectKind::Function
                && node.dependencies.iter().any(|dep| graph.should_defer(&node.oid, dep));
            if must_wait {
                tracing::debug!(function = %node.qualified_name(), "function deferred to the end of the schema");
                late_functions.push(node);
                continue;
            }
            ctx.dump_object(node.kind, &subject_for(node))?;
        }
        for node in late_functions {
            ctx.dump_object(node.kind, &subject_for(node))?;
        }

        if !ctx.whole_database {
            ctx.flush_deferred()?;
        }
        Ok(())
    }
}

fn subject_for(node: &ObjectNode) -> Subject {
    Subject::new(node.schema.as_str(), node.name.as_str()).with_oid(node.oid.as_str())
}

/// Nodes for every listed object, edges for dependencies inside the schema
fn build_graph(ctx: &mut DumpContext<'_>, schema: &str) -> Result<DependencyGraph> {
    let mut graph = DependencyGraph::new();
    for object in catalog::schema_objects(ctx.driver(), schema)? {
        let node = ObjectNode::new(object.oid, object.kind, object.name, object.schema);
        if let Err(e) = graph.add_node(node) {
            ctx.warn(e.message());
        }
    }

    let mut edges = 0usize;
    for (dependent, referenced) in catalog::object_dependencies(ctx.driver())? {
        if graph.node(&dependent).is_some() && graph.node(&referenced).is_some() {
            graph.add_edge(&dependent, &referenced)?;
            edges += 1;
        }
    }
    tracing::debug!(schema, nodes = graph.len(), edges, "dependency graph built");
    Ok(graph)
}

/// Script preamble, optional roles, then every non-system schema
pub struct DatabaseDumper;

impl DatabaseDumper {
    pub fn dump_database(&self, ctx: &mut DumpContext<'_>) -> Result<()> {
        let preamble = format!(
            "--\n-- PostgreSQL database dump\n-- Server version: {}\n--\n\n\
             SET client_encoding = 'UTF8';\n\
             SET standard_conforming_strings = on;\n\
             SET check_function_bodies = false;\n\
             SET client_min_messages = warning;\n\
             SET search_path = public, pg_catalog;\n",
            ctx.version()
        );
        ctx.write(&preamble);
        ctx.commit()?;

        if ctx.options().roles {
            ctx.dump_object(ObjectKind::Role, &Subject::new("", ""))?;
        }

        ctx.whole_database = true;
        let schemas = catalog::list_schemas(ctx.driver())?;
        tracing::info!(schemas = schemas.len(), "dumping database");
        for schema in &schemas {
            ctx.dump_object(ObjectKind::Schema, &Subject::new(schema.as_str(), schema.as_str()))?;
        }
        ctx.whole_database = false;

        ctx.flush_deferred()
    }
}
