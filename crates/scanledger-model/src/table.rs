//! Column-ordered in-memory table shared by snapshots, ledgers and the
//! presence audit.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::record::{MetricRecord, MetricValue};
use crate::{FILE_NAME_COLUMN, IDENTIFIER_COLUMNS, PARTICIPANT_ID_COLUMN, SOURCE_COLUMN};

/// Rows are always as wide as `columns`; missing cells are `MetricValue::Missing`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<MetricValue>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        let mut table = Table::default();
        for c in columns {
            let c: String = c.into();
            table.ensure_column(&c);
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<MetricValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Index of `name`, appending an all-missing column if absent.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(MetricValue::Missing);
        }
        self.columns.len() - 1
    }

    /// Append a row given in column order; short rows are padded.
    pub fn push_row(&mut self, mut row: Vec<MetricValue>) {
        row.resize(self.columns.len(), MetricValue::Missing);
        self.rows.push(row);
    }

    /// Append a row given as (column, value) pairs, adding unseen columns.
    pub fn push_named<'a>(&mut self, cells: impl IntoIterator<Item = (&'a str, MetricValue)>) {
        let mut row = vec![MetricValue::Missing; self.columns.len()];
        for (name, value) in cells {
            let idx = self.ensure_column(name);
            if idx >= row.len() {
                row.resize(idx + 1, MetricValue::Missing);
            }
            row[idx] = value;
        }
        self.push_row(row);
    }

    /// Replace a whole column, appending it if absent. `values` holds one
    /// entry per row; extra entries are ignored.
    pub fn set_column(&mut self, name: &str, values: Vec<MetricValue>) {
        let idx = self.ensure_column(name);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&MetricValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Values of one column, top to bottom.
    pub fn column_values(&self, column: &str) -> Option<Vec<&MetricValue>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Rows for which `keep` returns true, with the same columns.
    pub fn filter_rows(&self, mut keep: impl FnMut(&Table, usize) -> bool) -> Table {
        let rows = (0..self.rows.len())
            .filter(|&i| keep(self, i))
            .map(|i| self.rows[i].clone())
            .collect();
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Append every row of `other`, unioning columns (ours first, then new
    /// ones in `other`'s order).
    pub fn append(&mut self, other: &Table) {
        let mapping: Vec<usize> = other.columns.iter().map(|c| self.ensure_column(c)).collect();
        for src in &other.rows {
            let mut row = vec![MetricValue::Missing; self.columns.len()];
            for (value, &dst) in src.iter().zip(&mapping) {
                row[dst] = value.clone();
            }
            self.rows.push(row);
        }
    }

    /// Stable sort by the rendered text of `keys`; missing key cells sort last.
    pub fn sort_by_columns(&mut self, keys: &[&str]) {
        let idx: Vec<usize> = keys.iter().filter_map(|k| self.column_index(k)).collect();
        if idx.is_empty() {
            return;
        }
        self.rows.sort_by(|a, b| {
            for &i in &idx {
                let ord = match (a[i].is_missing(), b[i].is_missing()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => a[i].render().cmp(&b[i].render()),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    /// Keep only the last row for each distinct key, preserving the position
    /// of that last occurrence.
    pub fn dedup_keep_last(&mut self, keys: &[&str]) {
        let idx: Vec<usize> = keys.iter().filter_map(|k| self.column_index(k)).collect();
        let key_of = |row: &Vec<MetricValue>| -> Vec<String> {
            idx.iter().map(|&i| row[i].render()).collect()
        };
        let mut last: HashMap<Vec<String>, usize> = HashMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            last.insert(key_of(row), i);
        }
        let mut i = 0;
        self.rows.retain(|row| {
            let keep = last.get(&key_of(row)) == Some(&i);
            i += 1;
            keep
        });
    }

    /// Build a metric table: identifier columns first, then metric columns in
    /// first-seen order across records. Identifier cells are written last, so
    /// a metric with an identifier's name cannot replace the row's identity.
    pub fn from_records(records: &[MetricRecord]) -> Table {
        let mut table = Table::new(IDENTIFIER_COLUMNS);
        for record in records {
            let mut cells: Vec<(&str, MetricValue)> = record
                .metrics
                .iter()
                .map(|(k, v)| (k.as_str(), v.clone()))
                .collect();
            cells.push((
                PARTICIPANT_ID_COLUMN,
                MetricValue::text(record.subject.label()),
            ));
            cells.push((FILE_NAME_COLUMN, MetricValue::text(record.source_file.clone())));
            cells.push((
                SOURCE_COLUMN,
                MetricValue::text(record.provenance.to_string_lossy()),
            ));
            table.push_named(cells);
        }
        table
    }
}
