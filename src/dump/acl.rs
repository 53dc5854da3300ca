//! Privilege Reconstruction
//!
//! Turns an `aclitem[]` value (`{owner=arwdDxt/owner,reader=r/owner}`) back
//! into `GRANT` statements. The owner's own entry is implicit in `CREATE` and
//! is never written. Grants made by someone other than the owner are wrapped
//! in `SET SESSION AUTHORIZATION` so the restored grantor matches.

use crate::catalog::parse_text_array;
use crate::driver::quote_ident;

/// One parsed `aclitem`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclItem {
    /// Role name; `None` for PUBLIC
    pub grantee: Option<String>,
    pub grantor: String,
    /// Privileges granted without grant option
    pub privileges: Vec<&'static str>,
    /// Privileges granted with grant option
    pub grantable: Vec<&'static str>,
}

fn privilege_name(code: char) -> Option<&'static str> {
    let name = match code {
        'r' => "SELECT",
        'a' => "INSERT",
        'w' => "UPDATE",
        'd' => "DELETE",
        'D' => "TRUNCATE",
        'x' => "REFERENCES",
        't' => "TRIGGER",
        'X' => "EXECUTE",
        'U' => "USAGE",
        'C' => "CREATE",
        'c' => "CONNECT",
        'T' => "TEMPORARY",
        'm' => "MAINTAIN",
        's' => "SET",
        'A' => "ALTER SYSTEM",
        _ => return None,
    };
    Some(name)
}

/// Role name inside an aclitem, which is double-quoted when it needs to be
fn unquote_role(text: &str) -> String {
    match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(inner) => inner.replace("\"\"", "\""),
        None => text.to_string(),
    }
}

/// Split `grantee=privs/grantor` at the first `=` outside quotes
fn split_item(item: &str) -> Option<(&str, &str, &str)> {
    let mut in_quotes = false;
    let mut eq = None;
    for (idx, ch) in item.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '=' if !in_quotes => {
                eq = Some(idx);
                break;
            }
            _ => {}
        }
    }
    let eq = eq?;
    let (privs, grantor) = item[eq + 1..].split_once('/')?;
    Some((&item[..eq], privs, grantor))
}

/// Parse a single `aclitem`; malformed items yield `None`
#[must_use]
pub fn parse_acl_item(item: &str) -> Option<AclItem> {
    let (grantee, codes, grantor) = split_item(item.trim())?;

    let mut privileges = Vec::new();
    let mut grantable = Vec::new();
    let mut chars = codes.chars().peekable();
    while let Some(code) = chars.next() {
        let name = privilege_name(code)?;
        if chars.peek() == Some(&'*') {
            chars.next();
            grantable.push(name);
        } else {
            privileges.push(name);
        }
    }

    Some(AclItem {
        grantee: (!grantee.is_empty()).then(|| unquote_role(grantee)),
        grantor: unquote_role(grantor),
        privileges,
        grantable,
    })
}

/// Parse an `aclitem[]` text value, skipping malformed items
#[must_use]
pub fn parse_acl(acl: &str) -> Vec<AclItem> {
    parse_text_array(acl).iter().filter_map(|item| parse_acl_item(item)).collect()
}

fn grantee_sql(grantee: Option<&str>) -> String {
    grantee.map_or_else(|| "PUBLIC".to_string(), quote_ident)
}

/// `REVOKE`/`GRANT` statements restoring `acl` on `object` (`TABLE "s"."t"`)
///
/// Returns an empty string when the object has default privileges
/// (`acl` is `None`).
#[must_use]
pub fn privilege_statements(object: &str, owner: &str, acl: Option<&str>) -> String {
    let Some(acl) = acl else {
        return String::new();
    };

    let mut out = format!("REVOKE ALL ON {object} FROM PUBLIC;\n");
    for item in parse_acl(acl) {
        if item.grantee.as_deref() == Some(owner) {
            continue;
        }
        if item.privileges.is_empty() && item.grantable.is_empty() {
            continue;
        }

        let foreign_grantor = item.grantor != owner;
        if foreign_grantor {
            out.push_str(&format!("SET SESSION AUTHORIZATION {};\n", quote_ident(&item.grantor)));
        }

        let grantee = grantee_sql(item.grantee.as_deref());
        if !item.privileges.is_empty() {
            out.push_str(&format!("GRANT {} ON {object} TO {grantee};\n", item.privileges.join(", ")));
        }
        if !item.grantable.is_empty() {
            out.push_str(&format!(
                "GRANT {} ON {object} TO {grantee} WITH GRANT OPTION;\n",
                item.grantable.join(", ")
            ));
        }

        if foreign_grantor {
            out.push_str("RESET SESSION AUTHORIZATION;\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_item_with_grant_option() {
        let item = parse_acl_item("reader=r*w/postgres").unwrap();
        assert_eq!(item.grantee.as_deref(), Some("reader"));
        assert_eq!(item.grantor, "postgres");
        assert_eq!(item.privileges, vec!["UPDATE"]);
        assert_eq!(item.grantable, vec!["SELECT"]);
    }

    #[test]
    fn test_public_and_quoted_roles() {
        let items = parse_acl(r#"{=X/owner,"\"odd role\"=U/owner"}"#);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].grantee, None);
        assert_eq!(items[1].grantee.as_deref(), Some("odd role"));
    }

    #[test]
    fn test_unknown_code_is_malformed() {
        assert!(parse_acl_item("reader=r?/postgres").is_none());
        assert!(parse_acl_item("no-equals-sign").is_none());
    }

    #[test]
    fn test_owner_entry_is_implicit() {
        let sql = privilege_statements(
            "TABLE \"public\".\"users\"",
            "app",
            Some("{app=arwdDxt/app,reader=r/app}"),
        );
        assert_eq!(
            sql,
            "REVOKE ALL ON TABLE \"public\".\"users\" FROM PUBLIC;\n\
             GRANT SELECT ON TABLE \"public\".\"users\" TO \"reader\";\n"
        );
    }

    #[test]
    fn test_foreign_grantor_switches_session() {
        let sql = privilege_statements("SEQUENCE \"s\".\"q\"", "app", Some("{writer=U*/admin}"));
        assert_eq!(
            sql,
            "REVOKE ALL ON SEQUENCE \"s\".\"q\" FROM PUBLIC;\n\
             SET SESSION AUTHORIZATION \"admin\";\n\
             GRANT USAGE ON SEQUENCE \"s\".\"q\" TO \"writer\" WITH GRANT OPTION;\n\
             RESET SESSION AUTHORIZATION;\n"
        );
    }

    #[test]
    fn test_default_privileges_write_nothing() {
        assert_eq!(privilege_statements("TABLE \"t\"", "app", None), "");
    }
}
