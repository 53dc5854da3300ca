//! Type and domain dumpers

use super::{DumpContext, Dumper, Subject};
use crate::catalog::{self, TypeMeta};
use crate::driver::{qualified, quote_ident, quote_literal};
use crate::error::Result;
use crate::graph::ObjectKind;

pub struct TypeDumper;

impl Dumper for TypeDumper {
    fn dump(&self, ctx: &mut DumpContext<'_>, subject: &Subject) -> Result<()> {
        if !ctx.options().with_structure() {
            return Ok(());
        }
        let Some(meta) = catalog::type_meta(ctx.driver(), &subject.schema, &subject.name)? else {
            ctx.missing(ObjectKind::Type, subject);
            return Ok(());
        };
        let target = qualified(&subject.schema, &subject.name);
        let Some(create) = create_type(&target, &meta) else {
            tracing::debug!(object = %subject, kind = %meta.kind, "type kind is not dumped");
            return Ok(());
        };

        ctx.write(&format!("\n-- Type: {target}\n\n"));
        ctx.write_drop("TYPE", &target);
        ctx.write(&create);
        ctx.write_comment(&format!("TYPE {target}"), meta.comment.as_deref());
        ctx.write_privileges(&format!("TYPE {target}"), &meta.owner, meta.acl.as_deref());
        Ok(())
    }
}

/// `CREATE TYPE` for enum, composite, range and base types
fn create_type(target: &str, meta: &TypeMeta) -> Option<String> {
    let sql = match meta.kind {
        'e' => {
            let labels: Vec<String> = meta.enum_labels.iter().map(|l| quote_literal(l)).collect();
            format!("CREATE TYPE {target} AS ENUM ({});\n", labels.join(", "))
        }
        'c' => {
            let attributes: Vec<String> = meta
                .attributes
                .iter()
                .map(|(name, type_name)| format!("    {} {type_name}", quote_ident(name)))
                .collect();
            format!("CREATE TYPE {target} AS (\n{}\n);\n", attributes.join(",\n"))
        }
        'r' => format!("CREATE TYPE {target} AS RANGE (\n    SUBTYPE = {}\n);\n", meta.range_subtype.as_deref()?),
        'b' => {
            let mut params = vec![format!("INPUT = {}", meta.input), format!("OUTPUT = {}", meta.output)];
            if meta.internal_length != -1 {
                params.push(format!("INTERNALLENGTH = {}", meta.internal_length));
            }
            if let Some(alignment) = alignment_name(meta.alignment) {
                params.push(format!("ALIGNMENT = {alignment}"));
            }
            if let Some(storage) = storage_name(meta.storage) {
                params.push(format!("STORAGE = {storage}"));
            }
            format!("CREATE TYPE {target} (\n    {}\n);\n", params.join(",\n    "))
        }
        _ => return None,
    };
    Some(sql)
}

fn alignment_name(code: char) -> Option<&'static str> {
    match code {
        'c' => Some("char"),
        's' => Some("int2"),
        'i' => Some("int4"),
        'd' => Some("double"),
        _ => None,
    }
}

fn storage_name(code: char) -> Option<&'static str> {
    match code {
        'p' => Some("plain"),
        'e' => Some("external"),
        'm' => Some("main"),
        'x' => Some("extended"),
        _ => None,
    }
}

pub struct DomainDumper;

impl Dumper for DomainDumper {
    fn dump(&self, ctx: &mut DumpContext<'_>, subject: &Subject) -> Result<()> {
        if !ctx.options().with_structure() {
            return Ok(());
        }
        let Some(domain) = catalog::domain_meta(ctx.driver(), &subject.schema, &subject.name)? else {
            ctx.missing(ObjectKind::Domain, subject);
            return Ok(());
        };
        let target = qualified(&subject.schema, &subject.name);

        let mut create = format!("CREATE DOMAIN {target} AS {}", domain.base_type);
        if let Some(default) = &domain.default {
            create.push_str(&format!("\n    DEFAULT {default}"));
        }
        if domain.not_null {
            create.push_str("\n    NOT NULL");
        }
        for (name, definition) in &domain.constraints {
            create.push_str(&format!("\n    CONSTRAINT {} {definition}", quote_ident(name)));
        }
        create.push_str(";\n");

        ctx.write(&format!("\n-- Domain: {target}\n\n"));
        ctx.write_drop("DOMAIN", &target);
        ctx.write(&create);
        ctx.write_comment(&format!("DOMAIN {target}"), domain.comment.as_deref());
        ctx.write_privileges(&format!("DOMAIN {target}"), &domain.owner, domain.acl.as_deref());
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

    #[test]
    fn test_enum_and_composite() {
        let status = TypeMeta {
            kind: 'e',
            enum_labels: vec!["new".to_string(), "won't fix".to_string()],
            ..TypeMeta::default()
        };
        assert_eq!(
            create_type("\"public\".\"status\"", &status).unwrap(),
            "CREATE TYPE \"public\".\"status\" AS ENUM ('new', 'won''t fix');\n"
        );

        let point = TypeMeta {
            kind: 'c',
            attributes: vec![("x".to_string(), "double precision".to_string()), ("y".to_string(), "double precision".to_string())],
            ..TypeMeta::default()
        };
        assert_eq!(
            create_type("\"public\".\"point2\"", &point).unwrap(),
            "CREATE TYPE \"public\".\"point2\" AS (\n    \"x\" double precision,\n    \"y\" double precision\n);\n"
        );
    }

    #[test]
    fn test_base_and_range_types() {
        let base = TypeMeta {
            kind: 'b',
            input: "tag_in".to_string(),
            output: "tag_out".to_string(),
            internal_length: 16,
            alignment: 'i',
            storage: 'p',
            ..TypeMeta::default()
        };
        assert_eq!(
            create_type("\"public\".\"tag\"", &base).unwrap(),
            "CREATE TYPE \"public\".\"tag\" (\n    INPUT = tag_in,\n    OUTPUT = tag_out,\n    INTERNALLENGTH = 16,\n    ALIGNMENT = int4,\n    STORAGE = plain\n);\n"
        );

        let range = TypeMeta { kind: 'r', range_subtype: Some("numeric".to_string()), ..TypeMeta::default() };
        assert_eq!(
            create_type("\"public\".\"span\"", &range).unwrap(),
            "CREATE TYPE \"public\".\"span\" AS RANGE (\n    SUBTYPE = numeric\n);\n"
        );
    }

    #[test]
    fn test_pseudo_types_are_skipped() {
        let pseudo = TypeMeta { kind: 'p', ..TypeMeta::default() };
        assert!(create_type("\"public\".\"x\"", &pseudo).is_none());
    }

    #[test]
    fn test_domain_with_checks() {
        let mut driver = ScriptedDriver::new(14.0);
        driver
            .respond(
                "typbasetype",
                RecordSet::from_rows(&["oid", "owner", "base_type", "typdefault", "typnotnull", "acl", "comment"], vec![
                    vec![Some("600"), Some("app"), Some("text"), Some("''::text"), Some("t"), None, None],
                ]),
            )
            .respond(
                "c.contypid",
                RecordSet::from_rows(&["conname", "definition"], vec![vec![
                    Some("email_check"),
                    Some("CHECK (VALUE ~ '@'::text)"),
                ]]),
            );

        let mut out = Vec::new();
        let mut ctx = DumpContext::new(&mut driver, &mut out, DumpOptions::default());
        ctx.dump_object(ObjectKind::Domain, &Subject::new("public", "email")).unwrap();
        drop(ctx);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\n-- Domain: \"public\".\"email\"\n\n\
             CREATE DOMAIN \"public\".\"email\" AS text\n    DEFAULT ''::text\n    NOT NULL\n    CONSTRAINT \"email_check\" CHECK (VALUE ~ '@'::text);\n"
        );
    }
}
