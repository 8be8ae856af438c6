//! Delimited text codec for `Table` (TSV ledgers, CSV presence tables).
//!
//! Header row first, one line per row. A field is quoted only when it
//! contains the delimiter, a double quote, or a line break; embedded quotes
//! are doubled. Parsing keeps text exactly as written (see
//! `MetricValue::parse_lossless`), so parse → render is byte-stable.

use thiserror::Error;

use crate::record::MetricValue;
use crate::table::Table;

pub const TAB: char = '\t';
pub const COMMA: char = ',';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("table has no header row")]
    MissingHeader,
    #[error("duplicate column `{0}` in header")]
    DuplicateColumn(String),
    #[error("line {line}: expected {expected} fields, found {found}")]
    RaggedRow {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: unterminated quoted field")]
    UnterminatedQuote { line: usize },
    #[error("required column `{0}` is missing")]
    MissingColumn(String),
}

fn needs_quotes(field: &str, delimiter: char) -> bool {
    field.contains(delimiter) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn push_field(out: &mut String, field: &str, delimiter: char) {
    if needs_quotes(field, delimiter) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

fn push_line<S: AsRef<str>>(out: &mut String, fields: impl IntoIterator<Item = S>, delimiter: char) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(delimiter);
        }
        push_field(out, field.as_ref(), delimiter);
    }
    out.push('\n');
}

/// Render a table; every line (header included) ends with `\n`.
pub fn render(table: &Table, delimiter: char) -> String {
    let mut out = String::new();
    push_line(&mut out, table.columns(), delimiter);
    for row in table.rows() {
        push_line(&mut out, row.iter().map(MetricValue::render), delimiter);
    }
    out
}

/// Split text into records of raw fields, honoring quotes across lines.
fn split_records(text: &str, delimiter: char) -> Result<Vec<(usize, Vec<String>)>, TableError> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1usize;
    let mut record_line = 1usize;
    let mut chars = text.chars().peekable();
    // Tracks whether the current record has any content (to skip blank lines).
    let mut dirty = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => {
                in_quotes = true;
                dirty = true;
            }
            c if c == delimiter => {
                fields.push(std::mem::take(&mut field));
                dirty = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                if dirty || !field.is_empty() {
                    fields.push(std::mem::take(&mut field));
                    records.push((record_line, std::mem::take(&mut fields)));
                }
                dirty = false;
                line += 1;
                record_line = line;
            }
            _ => {
                field.push(c);
                dirty = true;
            }
        }
    }
    if in_quotes {
        return Err(TableError::UnterminatedQuote { line: record_line });
    }
    if dirty || !field.is_empty() {
        fields.push(field);
        records.push((record_line, fields));
    }
    Ok(records)
}

pub fn parse(text: &str, delimiter: char) -> Result<Table, TableError> {
    let mut records = split_records(text, delimiter)?.into_iter();
    let (_, header) = records.next().ok_or(TableError::MissingHeader)?;

    let mut table = Table::new(Vec::<String>::new());
    for name in &header {
        if table.has_column(name) {
            return Err(TableError::DuplicateColumn(name.clone()));
        }
        table.ensure_column(name);
    }

    for (line, fields) in records {
        if fields.len() != header.len() {
            return Err(TableError::RaggedRow {
                line,
                expected: header.len(),
                found: fields.len(),
            });
        }
        table.push_row(fields.iter().map(|f| MetricValue::parse_lossless(f)).collect());
    }
    Ok(table)
}
