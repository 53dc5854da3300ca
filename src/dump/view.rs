//! View and materialized view dumper

use super::{DumpContext, Dumper, Subject};
use crate::catalog;
use crate::driver::qualified;
use crate::error::Result;
use crate::graph::ObjectKind;

pub struct ViewDumper;

impl Dumper for ViewDumper {
    fn dump(&self, ctx: &mut DumpContext<'_>, subject: &Subject) -> Result<()> {
        let Some(view) = catalog::view_meta(ctx.driver(), &subject.schema, &subject.name)? else {
            ctx.missing(ObjectKind::View, subject);
            return Ok(());
        };
        if !ctx.options().with_structure() {
            return Ok(());
        }
        let target = qualified(&subject.schema, &subject.name);
        let kind = if view.materialized { "MATERIALIZED VIEW" } else { "VIEW" };

        ctx.write(&format!("\n-- View: {target}\n\n"));
        ctx.write_drop(kind, &target);
        if view.materialized {
            let data = if ctx.options().structure_only { "WITH NO DATA" } else { "WITH DATA" };
            ctx.write(&format!("CREATE MATERIALIZED VIEW {target} AS\n{}\n{data};\n", view.definition));
        } else {
            ctx.write(&format!("CREATE OR REPLACE VIEW {target} AS\n{};\n", view.definition));
        }

        ctx.write_comment(&format!("{kind} {target}"), view.comment.as_deref());
        // GRANT has no MATERIALIZED VIEW object type; both are tables to it
        ctx.write_privileges(&format!("TABLE {target}"), &view.owner, view.acl.as_deref());
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

    fn view_row(relkind: &'static str) -> RecordSet {
        RecordSet::from_rows(&["oid", "owner", "relkind", "definition", "acl", "comment"], vec![vec![
            Some("500"),
            Some("app"),
            Some(relkind),
            Some(" SELECT users.id\n   FROM users"),
            None,
            Some("active users"),
        ]])
    }

    fn dump(driver: &mut ScriptedDriver, options: DumpOptions) -> String {
        let mut out = Vec::new();
        let mut ctx = DumpContext::new(driver, &mut out, options);
        ctx.dump_object(ObjectKind::View, &Subject::new("public", "active")).unwrap();
        drop(ctx);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_plain_view() {
        let mut driver = ScriptedDriver::new(14.0);
        driver.respond("pg_get_viewdef", view_row("v"));
        assert_eq!(
            dump(&mut driver, DumpOptions::default()),
            "\n-- View: \"public\".\"active\"\n\n\
             CREATE OR REPLACE VIEW \"public\".\"active\" AS\nSELECT users.id\n   FROM users;\n\
             COMMENT ON VIEW \"public\".\"active\" IS 'active users';\n"
        );
    }

    #[test]
    fn test_materialized_view_without_data() {
        let mut driver = ScriptedDriver::new(14.0);
        driver.respond("pg_get_viewdef", view_row("m"));
        let options = DumpOptions { structure_only: true, clean: true, ..DumpOptions::default() };
        let text = dump(&mut driver, options);
        assert!(text.contains("DROP MATERIALIZED VIEW IF EXISTS \"public\".\"active\" CASCADE;"));
        assert!(text.contains("WITH NO DATA;"));
    }

    #[test]
    fn test_data_only_writes_nothing() {
        let mut driver = ScriptedDriver::new(14.0);
        driver.respond("pg_get_viewdef", view_row("v"));
        let options = DumpOptions { data_only: true, ..DumpOptions::default() };
        assert_eq!(dump(&mut driver, options), "");
    }
}
