//! SQL data formatter: `COPY` blocks and `INSERT` statements

use std::fmt::Write as _;
use std::io::Write;

use super::{decode_bytea, EscapeMode, FormatMetadata, InsertFormat, RowFormatter};
use crate::driver::{quote_ident, quote_literal, Cell, FieldInfo};
use crate::error::Result;

/// Writes table rows as SQL that restores them
///
/// A multi-row `INSERT` is opened lazily by its first row, so an empty table
/// produces no statement at all. `COPY` output always has both the command
/// line and the `\.` terminator.
pub struct SqlFormatter<W: Write> {
    out: W,
    format: InsertFormat,
    table: String,
    columns: String,
    modes: Vec<EscapeMode>,
    batch_size: usize,
    in_batch: usize,
    rows: u64,
}

impl<W: Write> SqlFormatter<W> {
    pub fn new(out: W, format: InsertFormat) -> Self {
        Self {
            out,
            format,
            table: String::new(),
            columns: String::new(),
            modes: Vec::new(),
            batch_size: 1,
            in_batch: 0,
            rows: 0,
        }
    }

    /// Give back the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }

    fn insert_begin(&self) -> String {
        format!("INSERT INTO {} ({}) VALUES", self.table, self.columns)
    }

    fn copy_row(&self, row: &[Cell]) -> String {
        let mut line = String::new();
        for (idx, cell) in row.iter().enumerate() {
            if idx > 0 {
                line.push('\t');
            }
            match (cell, self.mode(idx)) {
                (None, _) => line.push_str("\\N"),
                (Some(value), EscapeMode::Bytea) => {
                    for byte in decode_bytea(value) {
                        let _ = write!(line, "\\\\{byte:03o}");
                    }
                }
                (Some(value), _) => line.push_str(&copy_escape(value)),
            }
        }
        line.push('\n');
        line
    }

    fn values_tuple(&self, row: &[Cell]) -> String {
        let values: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(idx, cell)| match cell {
                None => "NULL".to_string(),
                Some(value) => sql_value(value, self.mode(idx)),
            })
            .collect();
        format!("({})", values.join(","))
    }

    fn mode(&self, idx: usize) -> EscapeMode {
        self.modes.get(idx).copied().unwrap_or(EscapeMode::Literal)
    }
}

impl<W: Write> RowFormatter for SqlFormatter<W> {
    fn write_header(&mut self, fields: &[FieldInfo], meta: &FormatMetadata) -> Result<()> {
        self.table = meta.table.clone();
        self.batch_size = meta.batch_size.max(1);
        self.columns = fields.iter().map(|f| quote_ident(&f.name)).collect::<Vec<_>>().join(", ");
        self.modes = fields.iter().map(|f| EscapeMode::for_type(&f.type_name)).collect();
        self.in_batch = 0;
        self.rows = 0;

        if self.format == InsertFormat::Copy {
            writeln!(self.out, "COPY {} ({}) FROM stdin;", self.table, self.columns)?;
        }
        Ok(())
    }

    fn write_row(&mut self, row: &[Cell]) -> Result<()> {
        match self.format {
            InsertFormat::Copy => {
                let line = self.copy_row(row);
                self.out.write_all(line.as_bytes())?;
            }
            InsertFormat::Single => {
                let stmt = format!("{} {};\n", self.insert_begin(), self.values_tuple(row));
                self.out.write_all(stmt.as_bytes())?;
            }
            InsertFormat::Multi => {
                if self.in_batch == self.batch_size {
                    self.out.write_all(b";\n\n")?;
                    self.in_batch = 0;
                }
                let prefix = if self.in_batch == 0 { format!("{}\n", self.insert_begin()) } else { ",\n".to_string() };
                self.out.write_all(prefix.as_bytes())?;
                self.out.write_all(self.values_tuple(row).as_bytes())?;
                self.in_batch += 1;
            }
        }
        self.rows += 1;
        Ok(())
    }

    fn write_footer(&mut self) -> Result<()> {
        match self.format {
            InsertFormat::Copy => self.out.write_all(b"\\.\n")?,
            InsertFormat::Multi if self.in_batch > 0 => self.out.write_all(b";\n")?,
            _ => {}
        }
        self.in_batch = 0;
        self.out.flush()?;
        Ok(())
    }

    fn rows_written(&self) -> u64 {
        self.rows
    }
}

/// Backslash-escape a text value for `COPY` text format
#[must_use]
pub fn copy_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '\0' => escaped.push_str("\\000"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Render a non-NULL value as a SQL expression
#[must_use]
pub fn sql_value(value: &str, mode: EscapeMode) -> String {
    match mode {
        EscapeMode::Numeric => match value {
            "NaN" | "Infinity" | "-Infinity" => format!("'{value}'"),
            _ => value.to_string(),
        },
        EscapeMode::Boolean => match value {
            "t" | "true" => "true".to_string(),
            "f" | "false" => "false".to_string(),
            other => quote_literal(other),
        },
        EscapeMode::Bytea => format!("'\\x{}'", hex::encode(decode_bytea(value))),
        EscapeMode::Literal => quote_literal(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fields() -> Vec<FieldInfo> {
        vec![FieldInfo::new("id", "int4"), FieldInfo::new("name", "text")]
    }

    fn row(id: &str, name: Option<&str>) -> Vec<Cell> {
        vec![Some(id.to_string()), name.map(str::to_string)]
    }

    fn render(format: InsertFormat, batch: usize, rows: &[Vec<Cell>]) -> String {
        let mut formatter = SqlFormatter::new(Vec::new(), format);
        formatter.write_header(&fields(), &FormatMetadata::new("\"public\".\"t\"", batch)).unwrap();
        for r in rows {
            formatter.write_row(r).unwrap();
        }
        formatter.write_footer().unwrap();
        String::from_utf8(formatter.into_inner()).unwrap()
    }

    #[test]
    fn test_copy_output() {
        let out = render(InsertFormat::Copy, 100, &[row("1", Some("a\tb\\c\nd")), row("2", None)]);
        assert_eq!(
            out,
            "COPY \"public\".\"t\" (\"id\", \"name\") FROM stdin;\n1\ta\\tb\\\\c\\nd\n2\t\\N\n\\.\n"
        );
    }

    #[test]
    fn test_copy_empty_table_still_terminated() {
        let out = render(InsertFormat::Copy, 100, &[]);
        assert_eq!(out, "COPY \"public\".\"t\" (\"id\", \"name\") FROM stdin;\n\\.\n");
    }

    #[test]
    fn test_copy_bytea_octal() {
        let mut formatter = SqlFormatter::new(Vec::new(), InsertFormat::Copy);
        formatter
            .write_header(&[FieldInfo::new("data", "bytea")], &FormatMetadata::new("t", 10))
            .unwrap();
        formatter.write_row(&[Some("\\x00ff".to_string())]).unwrap();
        let out = String::from_utf8(formatter.into_inner()).unwrap();
        assert!(out.ends_with("\\\\000\\\\377\n"));
    }

    #[test]
    fn test_single_inserts() {
        let out = render(InsertFormat::Single, 100, &[row("1", Some("it's")), row("2", None)]);
        assert_eq!(
            out,
            "INSERT INTO \"public\".\"t\" (\"id\", \"name\") VALUES (1,'it''s');\n\
             INSERT INTO \"public\".\"t\" (\"id\", \"name\") VALUES (2,NULL);\n"
        );
    }

    #[test]
    fn test_multi_insert_batch_boundaries() {
        let rows = [row("1", Some("a")), row("2", Some("b")), row("3", Some("c"))];
        let out = render(InsertFormat::Multi, 2, &rows);
        assert_eq!(
            out,
            "INSERT INTO \"public\".\"t\" (\"id\", \"name\") VALUES\n(1,'a'),\n(2,'b');\n\n\
             INSERT INTO \"public\".\"t\" (\"id\", \"name\") VALUES\n(3,'c');\n"
        );
    }

    #[test]
    fn test_multi_insert_exact_batch() {
        let out = render(InsertFormat::Multi, 2, &[row("1", None), row("2", None)]);
        assert_eq!(out, "INSERT INTO \"public\".\"t\" (\"id\", \"name\") VALUES\n(1,NULL),\n(2,NULL);\n");
    }

    #[test]
    fn test_multi_insert_empty_table() {
        assert_eq!(render(InsertFormat::Multi, 2, &[]), "");
    }

    #[test]
    fn test_sql_value_modes() {
        assert_eq!(sql_value("42", EscapeMode::Numeric), "42");
        assert_eq!(sql_value("NaN", EscapeMode::Numeric), "'NaN'");
        assert_eq!(sql_value("t", EscapeMode::Boolean), "true");
        assert_eq!(sql_value("\\x0102", EscapeMode::Bytea), "'\\x0102'");
        assert_eq!(sql_value("C:\\tmp", EscapeMode::Literal), "E'C:\\\\tmp'");
    }

    #[test]
    fn test_rows_written() {
        let mut formatter = SqlFormatter::new(Vec::new(), InsertFormat::Single);
        formatter.write_header(&fields(), &FormatMetadata::new("t", 1)).unwrap();
        formatter.write_row(&row("1", None)).unwrap();
        formatter.write_row(&row("2", None)).unwrap();
        assert_eq!(formatter.rows_written(), 2);
    }
}
