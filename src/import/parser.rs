//! Incremental SQL Splitter
//!
//! Splits a SQL script into top-level statements and `COPY ... FROM stdin`
//! data blocks while the script arrives in arbitrary chunks. This is not a
//! SQL parser: it only tracks enough lexical state to know whether a `;`
//! ends a statement.
//!
//! # Lexical States
//! - single-quoted strings (backslash escapes inside `E'...'`)
//! - double-quoted identifiers
//! - dollar-quoted bodies (`$$`, `$tag$`)
//! - `--` line comments and nested `/* */` block comments
//! - `COPY` data, which runs until a line that is exactly `\.`
//!
//! # Byte Exactness
//! Leading whitespace and comments belong to the statement that follows
//! them; a statement extends over the blanks after its `;` through the line
//! break. Concatenating every item plus the final remainder reproduces the
//! input exactly, no matter where the chunks were cut.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::classify::skip_leading_noise;

/// `COPY <table> [(<columns>)] FROM stdin`; a parenthesised query is never a data block
static COPY_FROM_STDIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)^COPY\s+(?:"(?:[^"]|"")*"|[^\s"(;])+\s*(?:\((?:"(?:[^"]|"")*"|[^)"])*\)\s*)?FROM\s+STDIN\b"#)
        .unwrap()
});

/// What an item holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A `;`-terminated statement
    Statement,
    /// `COPY ... FROM stdin;` with its data lines and `\.` terminator
    Copy,
}

/// One unit of work cut from the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlItem {
    pub kind: ItemKind,
    /// Exact source text, including leading whitespace and comments
    pub content: String,
}

impl SqlItem {
    /// Both kinds are executed as a single statement
    #[must_use]
    pub fn is_statement(&self) -> bool {
        matches!(self.kind, ItemKind::Statement | ItemKind::Copy)
    }

    #[must_use]
    pub fn is_copy(&self) -> bool {
        self.kind == ItemKind::Copy
    }

    /// Content without leading comments and surrounding whitespace
    #[must_use]
    pub fn sql(&self) -> &str {
        skip_leading_noise(&self.content).trim_end()
    }
}

/// Items completed by a chunk, and the text still pending
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutput {
    pub items: Vec<SqlItem>,
    /// Input not yet part of a complete item
    pub remainder: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lex {
    Normal,
    Quoted { escapes: bool },
    Ident,
    Dollar(String),
    LineComment,
    BlockComment(u32),
    /// Blanks after a `;` up to the line break
    AfterStatement,
    /// Inside COPY data; the value is the offset of the current line
    CopyData(usize),
}

/// Resumable splitter state
#[derive(Debug, Clone)]
pub struct SqlParser {
    pending: String,
    pos: usize,
    state: Lex,
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlParser {
    #[must_use]
    pub fn new() -> Self {
        Self { pending: String::new(), pos: 0, state: Lex::Normal }
    }

    /// Split a complete script in one call
    #[must_use]
    pub fn parse_str(input: &str) -> ParseOutput {
        let mut parser = Self::new();
        parser.pending.push_str(input);
        let items = parser.scan(true);
        ParseOutput { items, remainder: parser.pending }
    }

    /// Feed the next chunk of input
    pub fn parse(&mut self, chunk: &str) -> ParseOutput {
        self.pending.push_str(chunk);
        let items = self.scan(false);
        ParseOutput { items, remainder: self.pending.clone() }
    }

    /// Signal end of input; completes what can only be decided at the end
    ///
    /// The remainder is an unterminated tail (a last statement without `;`
    /// or a COPY block missing its terminator), left for the caller to judge.
    pub fn finish(&mut self) -> ParseOutput {
        let items = self.scan(true);
        let remainder = std::mem::take(&mut self.pending);
        self.pos = 0;
        self.state = Lex::Normal;
        ParseOutput { items, remainder }
    }

    /// Bytes buffered but not yet returned as an item
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    fn emit(&mut self, end: usize, kind: ItemKind, items: &mut Vec<SqlItem>) {
        let content: String = self.pending.drain(..end).collect();
        items.push(SqlItem { kind, content });
        self.pos = 0;
        self.state = Lex::Normal;
    }

    /// Statement text ended at `end`: either emit it or enter COPY data
    fn close_statement(&mut self, end: usize, items: &mut Vec<SqlItem>) {
        let head = skip_leading_noise(&self.pending[..end]);
        if COPY_FROM_STDIN.is_match(head) {
            self.pos = end;
            self.state = Lex::CopyData(end);
        } else {
            self.emit(end, ItemKind::Statement, items);
        }
    }

    fn scan(&mut self, eof: bool) -> Vec<SqlItem> {
        let mut items = Vec::new();

        loop {
            let bytes = self.pending.as_bytes();
            let len = bytes.len();
            let pos = self.pos;

            if let Lex::CopyData(line_start) = self.state {
                match self.pending[line_start..].find('\n') {
                    Some(offset) => {
                        let nl = line_start + offset;
                        let line = self.pending[line_start..nl].trim_end_matches('\r');
                        if line == "\\." {
                            self.emit(nl + 1, ItemKind::Copy, &mut items);
                        } else {
                            self.state = Lex::CopyData(nl + 1);
                            self.pos = nl + 1;
                        }
                        continue;
                    }
                    None => {
                        if eof && &self.pending[line_start..] == "\\." {
                            self.emit(len, ItemKind::Copy, &mut items);
                        } else {
                            self.pos = len;
                        }
                        break;
                    }
                }
            }

            if pos >= len {
                if eof && self.state == Lex::AfterStatement {
                    self.close_statement(len, &mut items);
                    continue;
                }
                break;
            }

            let c = bytes[pos];
            let next = bytes.get(pos + 1).copied();
            // A two-byte token may be cut by the chunk boundary
            let need_more = next.is_none() && !eof;

            match self.state.clone() {
                Lex::Normal => match c {
                    b'\'' => {
                        let escapes = pos > 0
                            && matches!(bytes[pos - 1], b'E' | b'e')
                            && (pos < 2 || !is_ident_byte(bytes[pos - 2]));
                        self.state = Lex::Quoted { escapes };
                        self.pos += 1;
                    }
                    b'"' => {
                        self.state = Lex::Ident;
                        self.pos += 1;
                    }
                    b'-' | b'/' if need_more => break,
                    b'-' if next == Some(b'-') => {
                        self.state = Lex::LineComment;
                        self.pos += 2;
                    }
                    b'/' if next == Some(b'*') => {
                        self.state = Lex::BlockComment(1);
                        self.pos += 2;
                    }
                    b'$' => match dollar_tag(&bytes[pos..]) {
                        DollarTag::Tag(tag_len) => {
                            let tag = self.pending[pos..pos + tag_len].to_string();
                            self.state = Lex::Dollar(tag);
                            self.pos += tag_len;
                        }
                        DollarTag::Incomplete if !eof => break,
                        _ => self.pos += 1,
                    },
                    b';' => {
                        self.state = Lex::AfterStatement;
                        self.pos += 1;
                    }
                    _ => self.pos += 1,
                },
                Lex::Quoted { escapes } => match c {
                    b'\\' if escapes => {
                        if need_more {
                            break;
                        }
                        self.pos += 2;
                    }
                    b'\'' => {
                        if need_more {
                            break;
                        }
                        if next == Some(b'\'') {
                            self.pos += 2;
                        } else {
                            self.state = Lex::Normal;
                            self.pos += 1;
                        }
                    }
                    _ => self.pos += 1,
                },
                Lex::Ident => {
                    if c == b'"' {
                        self.state = Lex::Normal;
                    }
                    self.pos += 1;
                }
                Lex::Dollar(tag) => match self.pending[pos..].find(tag.as_str()) {
                    Some(offset) => {
                        self.state = Lex::Normal;
                        self.pos = pos + offset + tag.len();
                    }
                    None => {
                        // keep the last bytes in case the closing tag is split
                        let keep = tag.len().saturating_sub(1);
                        let mut resume = len.saturating_sub(keep).max(pos);
                        while !self.pending.is_char_boundary(resume) {
                            resume -= 1;
                        }
                        self.pos = resume;
                        break;
                    }
                },
                Lex::LineComment => match self.pending[pos..].find('\n') {
                    Some(offset) => {
                        self.state = Lex::Normal;
                        self.pos = pos + offset + 1;
                    }
                    None => {
                        self.pos = len;
                        break;
                    }
                },
                Lex::BlockComment(depth) => {
                    if (c == b'/' || c == b'*') && need_more {
                        break;
                    }
                    if c == b'/' && next == Some(b'*') {
                        self.state = Lex::BlockComment(depth + 1);
                        self.pos += 2;
                    } else if c == b'*' && next == Some(b'/') {
                        self.state = if depth <= 1 { Lex::Normal } else { Lex::BlockComment(depth - 1) };
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                    }
                }
                Lex::AfterStatement => match c {
                    b' ' | b'\t' => self.pos += 1,
                    b'\n' => self.close_statement(pos + 1, &mut items),
                    b'\r' if need_more => break,
                    b'\r' if next == Some(b'\n') => self.close_statement(pos + 2, &mut items),
                    _ => self.close_statement(pos, &mut items),
                },
                Lex::CopyData(_) => break,
            }
        }

        items
    }
}

enum DollarTag {
    Tag(usize),
    Incomplete,
    NotATag,
}

/// Recognise `$$` or `$name$` at the start of `bytes`
fn dollar_tag(bytes: &[u8]) -> DollarTag {
    for (idx, &b) in bytes.iter().enumerate().skip(1) {
        if b == b'$' {
            return DollarTag::Tag(idx + 1);
        }
        let valid = if idx == 1 { b.is_ascii_alphabetic() || b == b'_' || b >= 0x80 } else { is_ident_byte(b) };
        if !valid {
            return DollarTag::NotATag;
        }
    }
    DollarTag::Incomplete
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn contents(output: &ParseOutput) -> Vec<&str> {
        output.items.iter().map(|i| i.content.as_str()).collect()
    }

    #[test]
    fn test_single_chunk_copy_is_one_item() {
        let sql = "COPY public.t (id) FROM stdin;\n1\n\\.\n";
        let out = SqlParser::parse_str(sql);
        assert_eq!(out.remainder, "");
        assert_eq!(out.items.len(), 1);
        assert!(out.items[0].is_statement());
        assert!(out.items[0].is_copy());
        assert_eq!(out.items[0].content, sql);
    }

    #[test]
    fn test_copy_without_terminator_stays_pending() {
        let sql = "COPY public.t (id) FROM stdin;\n1\n";
        let out = SqlParser::parse_str(sql);
        assert!(out.items.is_empty());
        assert_eq!(out.remainder, sql);
    }

    #[test]
    fn test_multiple_copy_blocks_in_one_chunk() {
        let sql = "COPY a FROM stdin;\n1\n\\.\nCOPY b FROM stdin;\n2\n\\.\n";
        let out = SqlParser::parse_str(sql);
        assert_eq!(out.remainder, "");
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.items[0].content.clone() + &out.items[1].content, sql);
    }

    #[test]
    fn test_copy_query_to_stdout_is_a_statement() {
        let sql = "COPY (SELECT 'x FROM stdin') TO STDOUT;\nSELECT 1;\n";
        let out = SqlParser::parse_str(sql);
        assert_eq!(out.remainder, "");
        assert_eq!(out.items.len(), 2);
        assert!(out.items.iter().all(|item| item.kind == ItemKind::Statement));
    }

    #[test]
    fn test_copy_target_shapes() {
        for head in [
            "COPY t FROM stdin",
            "COPY \"Sales\".\"Orders (2024)\" (\"id\", \"a)b\") FROM STDIN",
            "copy public.t(id) from stdin with (format csv)",
        ] {
            assert!(COPY_FROM_STDIN.is_match(head), "{head}");
        }
        assert!(!COPY_FROM_STDIN.is_match("COPY t TO stdout"));
        assert!(!COPY_FROM_STDIN.is_match("COPY t FROM '/tmp/data.csv'"));
    }

    #[test]
    fn test_copy_after_statement() {
        let sql = "CREATE TABLE t(id int);\nCOPY t (id) FROM stdin;\n1\n\\.\n";
        let out = SqlParser::parse_str(sql);
        assert_eq!(out.remainder, "");
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.items[0].kind, ItemKind::Statement);
        assert_eq!(out.items[0].content.trim(), "CREATE TABLE t(id int);");
        assert_eq!(out.items[1].content, "COPY t (id) FROM stdin;\n1\n\\.\n");
    }

    #[test]
    fn test_semicolons_inside_quotes_and_bodies() {
        let sql = "INSERT INTO t VALUES ('a;b', E'c\\';d');\n\
                   CREATE FUNCTION f() RETURNS int AS $body$ SELECT 1; $body$ LANGUAGE sql;\n\
                   SELECT \"we;ird\" FROM x; -- trailing; comment\n\
                   /* outer /* nested; */ still; */ SELECT 2;\n";
        let out = SqlParser::parse_str(sql);
        assert_eq!(out.remainder, "");
        assert_eq!(out.items.len(), 4);
        assert_eq!(out.items[3].sql(), "SELECT 2;");
        assert!(out.items[3].content.contains("-- trailing; comment"));
    }

    #[test]
    fn test_doubled_quote_in_escape_string() {
        let out = SqlParser::parse_str("SELECT E'it''s; fine\\n';\nSELECT 2;\n");
        assert_eq!(out.items.len(), 2);
    }

    #[test]
    fn test_positional_parameter_is_not_a_dollar_tag() {
        let out = SqlParser::parse_str("PREPARE p AS SELECT $1;\nSELECT 2;\n");
        assert_eq!(out.items.len(), 2);
    }

    #[test]
    fn test_last_statement_without_newline() {
        let out = SqlParser::parse_str("SELECT 1;");
        assert_eq!(contents(&out), vec!["SELECT 1;"]);

        let mut parser = SqlParser::new();
        assert!(parser.parse("SELECT 1;").items.is_empty());
        let done = parser.finish();
        assert_eq!(contents(&done), vec!["SELECT 1;"]);
        assert_eq!(done.remainder, "");
    }

    #[test]
    fn test_unterminated_tail_is_remainder() {
        let mut parser = SqlParser::new();
        let out = parser.parse("SELECT 1;\nSELECT 2");
        assert_eq!(contents(&out), vec!["SELECT 1;\n"]);
        assert_eq!(parser.finish().remainder, "SELECT 2");
    }

    #[test]
    fn test_crlf_line_endings() {
        let sql = "SET x = 1;\r\nCOPY t FROM stdin;\r\n1\r\n\\.\r\n";
        let out = SqlParser::parse_str(sql);
        assert_eq!(contents(&out), vec!["SET x = 1;\r\n", "COPY t FROM stdin;\r\n1\r\n\\.\r\n"]);
    }

    #[test]
    fn test_copy_terminator_at_end_of_input() {
        let out = SqlParser::parse_str("COPY t FROM stdin;\n1\n\\.");
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn test_copy_data_looks_like_sql() {
        let sql = "COPY t FROM stdin;\nx;y\t'quote\n\\.x\n\\.\nSELECT 1;\n";
        let out = SqlParser::parse_str(sql);
        assert_eq!(out.items.len(), 2);
        assert!(out.items[0].is_copy());
        assert_eq!(out.items[1].content, "SELECT 1;\n");
    }

    #[test]
    fn test_round_trip_across_every_split() {
        let sql = "-- header\nSET search_path = public;\n\
                   CREATE TABLE \"a;b\" (v text DEFAULT 'x;y');\n\
                   COPY \"a;b\" (v) FROM stdin;\nline;1\n\\.\n\
                   CREATE FUNCTION g() RETURNS text AS $f$ SELECT ';' $f$ LANGUAGE sql;\n\
                   /* tail */";
        let whole = SqlParser::parse_str(sql);

        for split in 1..sql.len() {
            if !sql.is_char_boundary(split) {
                continue;
            }
            let mut parser = SqlParser::new();
            let mut items = parser.parse(&sql[..split]).items;
            items.extend(parser.parse(&sql[split..]).items);
            let done = parser.finish();
            items.extend(done.items);

            let mut rebuilt: String = items.iter().map(|i| i.content.as_str()).collect();
            rebuilt.push_str(&done.remainder);
            assert_eq!(rebuilt, sql, "split at {split}");
            assert_eq!(items, whole.items, "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let sql = "SELECT 'a';\nCOPY t FROM stdin;\n1\n\\.\nSELECT $$;$$;\n";
        let mut parser = SqlParser::new();
        let mut items = Vec::new();
        for ch in sql.chars() {
            items.extend(parser.parse(&ch.to_string()).items);
        }
        items.extend(parser.finish().items);
        assert_eq!(items.len(), 3);
        assert!(items[1].is_copy());
    }
}
