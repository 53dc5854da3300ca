//! CSV and TSV formatter built on the `csv` crate

use std::io::Write;

use super::{FormatMetadata, RowFormatter};
use crate::driver::{Cell, FieldInfo};
use crate::error::Result;

/// Field separator of a delimited export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Tab,
}

impl Delimiter {
    const fn byte(self) -> u8 {
        match self {
            Self::Comma => b',',
            Self::Tab => b'\t',
        }
    }
}

/// Writes a header row of column names, then one record per row
///
/// NULL becomes an empty field; bytea keeps its `\x` hex text.
pub struct DelimitedFormatter<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl<W: Write> DelimitedFormatter<W> {
    pub fn new(out: W, delimiter: Delimiter) -> Self {
        let writer = csv::WriterBuilder::new().delimiter(delimiter.byte()).from_writer(out);
        Self { writer, rows: 0 }
    }

    pub fn csv(out: W) -> Self {
        Self::new(out, Delimiter::Comma)
    }

    pub fn tsv(out: W) -> Self {
        Self::new(out, Delimiter::Tab)
    }

    /// Flush and give back the underlying writer
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| crate::error::FerryError::Io(e.into_error()))
    }
}

impl<W: Write> RowFormatter for DelimitedFormatter<W> {
    fn write_header(&mut self, fields: &[FieldInfo], _meta: &FormatMetadata) -> Result<()> {
        self.rows = 0;
        self.writer.write_record(fields.iter().map(|f| f.name.as_str()))?;
        Ok(())
    }

    fn write_row(&mut self, row: &[Cell]) -> Result<()> {
        self.writer.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
        self.rows += 1;
        Ok(())
    }

    fn write_footer(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn rows_written(&self) -> u64 {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn export(mut formatter: DelimitedFormatter<Vec<u8>>) -> String {
        let fields = vec![FieldInfo::new("id", "int4"), FieldInfo::new("note", "text")];
        formatter.write_header(&fields, &FormatMetadata::new("t", 1)).unwrap();
        formatter.write_row(&[Some("1".into()), Some("hello, world".into())]).unwrap();
        formatter.write_row(&[Some("2".into()), None]).unwrap();
        formatter.write_footer().unwrap();
        assert_eq!(formatter.rows_written(), 2);
        String::from_utf8(formatter.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn test_csv_quotes_embedded_commas() {
        let out = export(DelimitedFormatter::csv(Vec::new()));
        assert_eq!(out, "id,note\n1,\"hello, world\"\n2,\n");
    }

    #[test]
    fn test_tsv() {
        let out = export(DelimitedFormatter::tsv(Vec::new()));
        assert_eq!(out, "id\tnote\n1\thello, world\n2\t\n");
    }
}
