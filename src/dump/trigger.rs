//! Trigger and rule dumpers
//!
//! Table dumps queue their triggers and rules; the orchestrator writes them
//! with [`write_trigger`] and [`write_rule`] once every function is in
//! place. The dumpers here serve single-object dumps looked up by oid.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{DumpContext, Dumper, Subject};
use crate::catalog::{self, AttachedMeta};
use crate::driver::{qualified, quote_ident};
use crate::error::Result;
use crate::graph::ObjectKind;

static CREATE_TRIGGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^CREATE (CONSTRAINT )?TRIGGER ").unwrap());
static CREATE_RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^CREATE RULE ").unwrap());

fn definition(item: &AttachedMeta) -> &str {
    item.definition.trim().trim_end_matches(';').trim_end()
}

/// `"name" ON "schema"."table"`
fn attached_target(item: &AttachedMeta) -> String {
    format!("{} ON {}", quote_ident(&item.name), qualified(&item.schema, &item.table))
}

pub(crate) fn write_trigger(ctx: &mut DumpContext<'_>, trigger: &AttachedMeta) {
    let target = attached_target(trigger);
    let or_replace = ctx.options().if_not_exists && ctx.version() >= 14.0;
    let sql = if or_replace {
        CREATE_TRIGGER.replace(definition(trigger), "CREATE OR REPLACE ${1}TRIGGER ").into_owned()
    } else {
        definition(trigger).to_string()
    };

    ctx.write(&format!("\n-- Trigger: {target}\n\n"));
    ctx.write_drop("TRIGGER", &target);
    ctx.write(&format!("{sql};\n"));
    ctx.write_comment(&format!("TRIGGER {target}"), trigger.comment.as_deref());
}

pub(crate) fn write_rule(ctx: &mut DumpContext<'_>, rule: &AttachedMeta) {
    let target = attached_target(rule);
    let sql = CREATE_RULE.replace(definition(rule), "CREATE OR REPLACE RULE ");

    ctx.write(&format!("\n-- Rule: {target}\n\n"));
    ctx.write_drop("RULE", &target);
    ctx.write(&format!("{sql};\n"));
    ctx.write_comment(&format!("RULE {target}"), rule.comment.as_deref());
}

pub struct TriggerDumper;

impl Dumper for TriggerDumper {
    fn dump(&self, ctx: &mut DumpContext<'_>, subject: &Subject) -> Result<()> {
        let oid = subject.require_oid()?;
        if !ctx.options().with_structure() {
            return Ok(());
        }
        match catalog::trigger_meta(ctx.driver(), oid)? {
            Some(trigger) => write_trigger(ctx, &trigger),
            None => ctx.missing(ObjectKind::Trigger, subject),
        }
        Ok(())
    }
}

pub struct RuleDumper;

impl Dumper for RuleDumper {
    fn dump(&self, ctx: &mut DumpContext<'_>, subject: &Subject) -> Result<()> {
        let oid = subject.require_oid()?;
        if !ctx.options().with_structure() {
            return Ok(());
        }
        match catalog::rule_meta(ctx.driver(), oid)? {
            Some(rule) => write_rule(ctx, &rule),
            None => ctx.missing(ObjectKind::Rule, subject),
        }
        Ok(())
    }
}
