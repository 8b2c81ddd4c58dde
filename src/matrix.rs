//! Delimited-text tables held in memory.

use std::borrow::Cow;
use std::collections::HashSet;
use std::io::{self, BufRead, BufReader, Read, Write};

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{MUTATION_CASE_ID_COLUMN, RowArity, VALUE_DELIMITER};
use crate::error::ImportError;

/// Header-derived column names plus rows of cells aligned with them by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMatrix {
    column_names: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatrixSummary {
    pub columns: usize,
    pub rows: usize,
    pub column_names: Vec<String>,
}

impl DataMatrix {
    pub fn new(column_names: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { column_names, rows }
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|column| column == name)
    }

    /// Values of column `name` in row order. Rows too short to reach the
    /// column are skipped.
    pub fn column(&self, name: &str) -> Result<Vec<&str>, ImportError> {
        let index = self
            .column_index(name)
            .ok_or_else(|| ImportError::MissingColumn(name.to_string()))?;
        Ok(self
            .rows
            .iter()
            .filter_map(|row| row.get(index).map(String::as_str))
            .collect())
    }

    /// Case identifiers: distinct values of the tumor sample column for
    /// mutation tables, otherwise every header column after the first.
    pub fn case_ids(&self) -> Vec<&str> {
        match self.column_index(MUTATION_CASE_ID_COLUMN) {
            Some(index) => {
                let mut seen = HashSet::new();
                self.rows
                    .iter()
                    .filter_map(|row| row.get(index).map(String::as_str))
                    .filter(|id| !id.is_empty() && seen.insert(*id))
                    .collect()
            }
            None => self
                .column_names
                .iter()
                .skip(1)
                .map(String::as_str)
                .collect(),
        }
    }

    pub fn summary(&self) -> MatrixSummary {
        MatrixSummary {
            columns: self.column_names.len(),
            rows: self.rows.len(),
            column_names: self.column_names.clone(),
        }
    }

    /// Writes header and rows back out, tab-delimited, one record per line.
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let delimiter = VALUE_DELIMITER.to_string();
        writeln!(writer, "{}", self.column_names.join(&delimiter))?;
        for row in &self.rows {
            writeln!(writer, "{}", row.join(&delimiter))?;
        }
        writer.flush()
    }
}

/// Keys admitted by a correlation filter, taken from one column of a
/// companion matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationSet {
    keys: HashSet<String>,
}

impl CorrelationSet {
    pub fn from_matrix(matrix: &DataMatrix, column: &str) -> Result<Self, ImportError> {
        let keys = matrix
            .column(column)?
            .into_iter()
            .map(str::to_string)
            .collect();
        Ok(Self { keys })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for CorrelationSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixBuilder {
    arity: RowArity,
}

impl MatrixBuilder {
    pub fn new(arity: RowArity) -> Self {
        Self { arity }
    }

    /// Reads a delimited table. Returns `Ok(None)` when no data row survives:
    /// empty input, a header alone, or every row rejected by `correlation`.
    /// Invalid UTF-8 is replaced with U+FFFD and reported in one warning.
    pub fn build<R: Read>(
        &self,
        reader: R,
        correlation: Option<&CorrelationSet>,
    ) -> Result<Option<DataMatrix>, ImportError> {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut line_no = 0usize;
        let mut column_names: Option<Vec<String>> = None;
        let mut rows = Vec::new();
        let mut mismatched = 0usize;
        let mut replaced = 0usize;

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|err| ImportError::UnreadableSource(err.to_string()))?;
            if read == 0 {
                break;
            }
            line_no += 1;
            let line = String::from_utf8_lossy(trim_line_end(&buf));
            if matches!(line, Cow::Owned(_)) {
                replaced += 1;
            }

            if column_names.is_none() {
                column_names = Some(split_fields(&line));
                continue;
            }
            let expected = column_names.as_ref().map_or(0, Vec::len);
            if line.is_empty() {
                continue;
            }

            let mut row = split_fields(&line);
            if let Some(correlation) = correlation {
                if !row.first().is_some_and(|key| correlation.contains(key)) {
                    continue;
                }
            }
            if row.len() != expected {
                match self.arity {
                    RowArity::Tolerate => mismatched += 1,
                    RowArity::Normalize => row.resize(expected, String::new()),
                    RowArity::Reject => {
                        return Err(ImportError::RowArity {
                            line: line_no,
                            expected,
                            actual: row.len(),
                        });
                    }
                }
            }
            rows.push(row);
        }

        if replaced > 0 {
            warn!(
                lines = replaced,
                "lines with invalid UTF-8 were read with U+FFFD replacement characters"
            );
        }
        if mismatched > 0 {
            warn!(
                rows = mismatched,
                "rows with a field count different from the header were kept as-is"
            );
        }

        match column_names {
            Some(column_names) if !rows.is_empty() => {
                info!(rows = rows.len(), columns = column_names.len(), "built data matrix");
                Ok(Some(DataMatrix::new(column_names, rows)))
            }
            _ => {
                info!("no data rows found, returning no matrix");
                Ok(None)
            }
        }
    }
}

fn split_fields(line: &str) -> Vec<String> {
    line.split(VALUE_DELIMITER).map(str::to_string).collect()
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
