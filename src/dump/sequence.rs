//! Sequence dumper
//!
//! The sequence parameters and its `last_value`/`is_called` pair come from
//! one catalog read, so the `setval` call restores the position the
//! definition was read at. The definition is structure, `setval` is data.
//! `OWNED BY` waits with the deferred objects until the owning table exists.
//! Identity and `serial` sequences are not dumped here; the table dumper
//! restores their position.

use super::{DumpContext, Dumper, Subject};
use crate::catalog;
use crate::driver::{qualified, quote_ident, quote_literal};
use crate::error::Result;
use crate::graph::ObjectKind;

pub struct SequenceDumper;

impl Dumper for SequenceDumper {
    fn dump(&self, ctx: &mut DumpContext<'_>, subject: &Subject) -> Result<()> {
        let Some(sequence) = catalog::sequence_meta(ctx.driver(), &subject.schema, &subject.name)? else {
            ctx.missing(ObjectKind::Sequence, subject);
            return Ok(());
        };
        let target = qualified(&subject.schema, &subject.name);

        ctx.write(&format!("\n-- Sequence: {target}\n\n"));
        if ctx.options().with_structure() {
            ctx.write_drop("SEQUENCE", &target);

            let mut create = format!("CREATE SEQUENCE {}{target}\n", ctx.if_not_exists(9.5));
            if ctx.version() >= 10.0 {
                create.push_str(&format!("    AS {}\n", sequence.data_type));
            }
            create.push_str(&format!(
                "    START WITH {}\n    INCREMENT BY {}\n    MINVALUE {}\n    MAXVALUE {}\n    CACHE {}",
                sequence.start, sequence.increment, sequence.min, sequence.max, sequence.cache
            ));
            if sequence.cycle {
                create.push_str("\n    CYCLE");
            }
            create.push_str(";\n");
            ctx.write(&create);
        }

        if ctx.options().with_data() && !sequence.last_value.is_empty() {
            ctx.write(&format!(
                "SELECT pg_catalog.setval({}, {}, {});\n",
                quote_literal(&target),
                sequence.last_value,
                sequence.is_called
            ));
        }

        if ctx.options().with_structure() {
            // the owning table may sort after the sequence it defaults to
            if let Some((table, column)) = &sequence.owned_by {
                ctx.deferred_mut().queue_statement(format!(
                    "ALTER SEQUENCE {target} OWNED BY {}.{};\n",
                    qualified(&subject.schema, table),
                    quote_ident(column)
                ));
            }
            ctx.write_comment(&format!("SEQUENCE {target}"), sequence.comment.as_deref());
            ctx.write_privileges(&format!("SEQUENCE {target}"), &sequence.owner, sequence.acl.as_deref());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DumpOptions;
    use crate::driver::scripted::ScriptedDriver;
    use crate::driver::RecordSet;
    use pretty_assertions::assert_eq;

    fn scripted(version: f64) -> ScriptedDriver {
        let mut driver = ScriptedDriver::new(version);
        driver
            .respond(
                "s.last_value",
                RecordSet::from_rows(
                    &[
                        "last_value",
                        "is_called",
                        "data_type",
                        "start_value",
                        "increment_by",
                        "min_value",
                        "max_value",
                        "cache_value",
                        "is_cycled",
                    ],
                    vec![vec![
                        Some("42"),
                        Some("t"),
                        Some("integer"),
                        Some("1"),
                        Some("1"),
                        Some("1"),
                        Some("2147483647"),
                        Some("1"),
                        Some("f"),
                    ]],
                ),
            )
            .respond(
                "owner_table",
                RecordSet::from_rows(&["oid", "owner", "acl", "comment", "owner_table", "owner_column"], vec![vec![
                    Some("900"),
                    Some("app"),
                    None,
                    None,
                    Some("orders"),
                    Some("number"),
                ]]),
            );
        driver
    }

    fn dump(driver: &mut ScriptedDriver, options: DumpOptions) -> String {
        let mut out = Vec::new();
        let mut ctx = DumpContext::new(driver, &mut out, options);
        ctx.dump_object(ObjectKind::Sequence, &Subject::new("public", "order_no")).unwrap();
        ctx.flush_deferred().unwrap();
        drop(ctx);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_sequence_with_state_and_owner() {
        let mut driver = scripted(14.0);
        let options = DumpOptions { if_not_exists: true, ..DumpOptions::default() };
        assert_eq!(
            dump(&mut driver, options),
            "\n-- Sequence: \"public\".\"order_no\"\n\n\
             CREATE SEQUENCE IF NOT EXISTS \"public\".\"order_no\"\n    AS integer\n    START WITH 1\n    INCREMENT BY 1\n    MINVALUE 1\n    MAXVALUE 2147483647\n    CACHE 1;\n\
             SELECT pg_catalog.setval('\"public\".\"order_no\"', 42, true);\n\
             \nALTER SEQUENCE \"public\".\"order_no\" OWNED BY \"public\".\"orders\".\"number\";\n"
        );
    }

    #[test]
    fn test_old_server_has_no_as_clause() {
        let mut driver = scripted(9.4);
        let options = DumpOptions { if_not_exists: true, ..DumpOptions::default() };
        let text = dump(&mut driver, options);
        assert!(text.contains("CREATE SEQUENCE \"public\".\"order_no\"\n    START WITH 1"));
    }

    #[test]
    fn test_structure_only_skips_setval() {
        let mut driver = scripted(14.0);
        let options = DumpOptions { structure_only: true, ..DumpOptions::default() };
        assert!(!dump(&mut driver, options).contains("setval"));
    }
}
