//! Function, procedure and aggregate dumpers
//!
//! Both are looked up by oid, since overloads share a name.

use super::{DumpContext, Dumper, Subject};
use crate::catalog;
use crate::driver::{qualified, quote_literal};
use crate::error::Result;
use crate::graph::ObjectKind;

pub struct FunctionDumper;

impl Dumper for FunctionDumper {
    fn dump(&self, ctx: &mut DumpContext<'_>, subject: &Subject) -> Result<()> {
        let oid = subject.require_oid()?;
        if !ctx.options().with_structure() {
            return Ok(());
        }
        let Some(function) = catalog::function_meta(ctx.driver(), oid)? else {
            ctx.missing(ObjectKind::Function, subject);
            return Ok(());
        };

        let kind = if function.procedure { "PROCEDURE" } else { "FUNCTION" };
        let signature = format!("{}({})", qualified(&subject.schema, &function.name), function.identity_args);

        ctx.write(&format!("\n-- {}: {signature}\n\n", if function.procedure { "Procedure" } else { "Function" }));
        ctx.write_drop(kind, &signature);
        ctx.write(&format!("{};\n", function.definition));
        ctx.write_comment(&format!("{kind} {signature}"), function.comment.as_deref());
        ctx.write_privileges(&format!("{kind} {signature}"), &function.owner, function.acl.as_deref());
        Ok(())
    }
}

pub struct AggregateDumper;

impl Dumper for AggregateDumper {
    fn dump(&self, ctx: &mut DumpContext<'_>, subject: &Subject) -> Result<()> {
        let oid = subject.require_oid()?;
        if !ctx.options().with_structure() {
            return Ok(());
        }
        let Some(aggregate) = catalog::aggregate_meta(ctx.driver(), oid)? else {
            ctx.missing(ObjectKind::Aggregate, subject);
            return Ok(());
        };

        let args = aggregate.args.as_deref().unwrap_or("*");
        let signature = format!("{}({args})", qualified(&subject.schema, &subject.name));

        let mut params = vec![format!("SFUNC = {}", aggregate.sfunc), format!("STYPE = {}", aggregate.stype)];
        if aggregate.finalfunc != "-" {
            params.push(format!("FINALFUNC = {}", aggregate.finalfunc));
        }
        if let Some(initcond) = &aggregate.initcond {
            params.push(format!("INITCOND = {}", quote_literal(initcond)));
        }
        if let Some(sortop) = &aggregate.sortop {
            params.push(format!("SORTOP = {sortop}"));
        }

        ctx.write(&format!("\n-- Aggregate: {signature}\n\n"));
        ctx.write_drop("AGGREGATE", &signature);
        ctx.write(&format!("CREATE AGGREGATE {signature} (\n    {}\n);\n", params.join(",\n    ")));
        ctx.write_comment(&format!("AGGREGATE {signature}"), aggregate.comment.as_deref());
        if aggregate.args.is_some() {
            ctx.write_privileges(&format!("FUNCTION {signature}"), &aggregate.owner, aggregate.acl.as_deref());
        }
        Ok(())
    }
}
