//! Role dumper
//!
//! An empty subject name dumps every role, a name dumps that role only.
//! Memberships follow the `CREATE ROLE` statements so both sides exist.

use super::{DumpContext, Dumper, Subject};
use crate::catalog::{self, RoleMeta};
use crate::driver::{quote_ident, quote_literal};
use crate::error::Result;
use crate::graph::ObjectKind;

pub struct RoleDumper;

/// `postgres` and the predefined `pg_*` roles exist on every server
fn is_system_role(name: &str) -> bool {
    name == "postgres" || name.starts_with("pg_")
}

fn create_role(role: &RoleMeta) -> String {
    let flag = |on: bool, yes: &str, no: &str| if on { yes.to_string() } else { no.to_string() };
    let mut attributes = vec![
        flag(role.superuser, "SUPERUSER", "NOSUPERUSER"),
        flag(role.inherit, "INHERIT", "NOINHERIT"),
        flag(role.createrole, "CREATEROLE", "NOCREATEROLE"),
        flag(role.createdb, "CREATEDB", "NOCREATEDB"),
        flag(role.login, "LOGIN", "NOLOGIN"),
    ];
    if role.replication {
        attributes.push("REPLICATION".to_string());
    }
    if role.bypassrls {
        attributes.push("BYPASSRLS".to_string());
    }
    if role.connection_limit != -1 {
        attributes.push(format!("CONNECTION LIMIT {}", role.connection_limit));
    }
    if let Some(valid_until) = &role.valid_until {
        attributes.push(format!("VALID UNTIL {}", quote_literal(valid_until)));
    }
    format!("CREATE ROLE {} WITH {};\n", quote_ident(&role.name), attributes.join(" "))
}

impl Dumper for RoleDumper {
    fn dump(&self, ctx: &mut DumpContext<'_>, subject: &Subject) -> Result<()> {
        if !ctx.options().with_structure() {
            return Ok(());
        }
        let single = (!subject.name.is_empty()).then_some(subject.name.as_str());
        let all_roles = ctx.options().all_roles;

        let roles: Vec<RoleMeta> = catalog::list_roles(ctx.driver())?
            .into_iter()
            .filter(|r| single.map_or(true, |name| r.name == name))
            .collect();
        if roles.is_empty() && single.is_some() {
            ctx.missing(ObjectKind::Role, subject);
            return Ok(());
        }
        let memberships = catalog::role_memberships(ctx.driver())?;

        ctx.write("\n-- Roles\n\n");
        for role in &roles {
            if !all_roles && is_system_role(&role.name) {
                tracing::debug!(role = %role.name, "system role skipped");
                continue;
            }
            if ctx.options().clean {
                ctx.write(&format!("DROP ROLE IF EXISTS {};\n", quote_ident(&role.name)));
            }
            ctx.write(&create_role(role));
        }

        for membership in memberships
            .iter()
            .filter(|m| single.map_or(true, |name| m.role == name || m.member == name))
        {
            let admin = if membership.admin_option { " WITH ADMIN OPTION" } else { "" };
            ctx.write(&format!(
                "GRANT {} TO {}{admin};\n",
                quote_ident(&membership.role),
                quote_ident(&membership.member)
            ));
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

    fn scripted() -> ScriptedDriver {
        let mut driver = ScriptedDriver::new(14.0);
        driver
            .respond(
                "pg_roles r ORDER BY",
                RecordSet::from_rows(
                    &[
                        "rolname",
                        "rolsuper",
                        "rolinherit",
                        "rolcreaterole",
                        "rolcreatedb",
                        "rolcanlogin",
                        "rolreplication",
                        "rolbypassrls",
                        "rolconnlimit",
                        "rolvaliduntil",
                    ],
                    vec![
                        vec![Some("app"), Some("f"), Some("t"), Some("f"), Some("f"), Some("t"), Some("f"), Some("f"), Some("5"), None],
                        vec![Some("postgres"), Some("t"), Some("t"), Some("t"), Some("t"), Some("t"), Some("t"), Some("t"), Some("-1"), None],
                        vec![Some("readers"), Some("f"), Some("t"), Some("f"), Some("f"), Some("f"), Some("f"), Some("f"), Some("-1"), None],
                    ],
                ),
            )
            .respond(
                "pg_auth_members",
                RecordSet::from_rows(&["role", "member", "admin_option"], vec![vec![
                    Some("readers"),
                    Some("app"),
                    Some("t"),
                ]]),
            );
        driver
    }

    fn dump(driver: &mut ScriptedDriver, options: DumpOptions, name: &str) -> String {
        let mut out = Vec::new();
        let mut ctx = DumpContext::new(driver, &mut out, options);
        ctx.dump_object(ObjectKind::Role, &Subject::new("", name)).unwrap();
        drop(ctx);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_all_roles_without_system_roles() {
        let mut driver = scripted();
        assert_eq!(
            dump(&mut driver, DumpOptions::default(), ""),
            "\n-- Roles\n\n\
             CREATE ROLE \"app\" WITH NOSUPERUSER INHERIT NOCREATEROLE NOCREATEDB LOGIN CONNECTION LIMIT 5;\n\
             CREATE ROLE \"readers\" WITH NOSUPERUSER INHERIT NOCREATEROLE NOCREATEDB NOLOGIN;\n\
             GRANT \"readers\" TO \"app\" WITH ADMIN OPTION;\n"
        );
    }

    #[test]
    fn test_system_roles_on_request() {
        let mut driver = scripted();
        let options = DumpOptions { all_roles: true, ..DumpOptions::default() };
        let text = dump(&mut driver, options, "");
        assert!(text.contains(
            "CREATE ROLE \"postgres\" WITH SUPERUSER INHERIT CREATEROLE CREATEDB LOGIN REPLICATION BYPASSRLS;"
        ));
    }

    #[test]
    fn test_single_role() {
        let mut driver = scripted();
        let options = DumpOptions { clean: true, ..DumpOptions::default() };
        let text = dump(&mut driver, options, "readers");
        assert!(text.contains("DROP ROLE IF EXISTS \"readers\";\n"));
        assert!(!text.contains("CREATE ROLE \"app\""));
        assert!(text.contains("GRANT \"readers\" TO \"app\""));

        let mut driver = scripted();
        assert_eq!(dump(&mut driver, DumpOptions::default(), "ghost"), "");
    }
}
