//! In-memory CSV table: the uploaded survey as rows of optional cells.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};

use crate::error::{ClusterError, Result};

/// Token that replaces missing cells in the work matrix.
pub const MISSING: &str = "Missing";

/// Cell values treated as missing, besides empty or blank cells.
const NA_TOKENS: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

pub fn is_missing(cell: &str) -> bool {
    let trimmed = cell.trim();
    trimmed.is_empty() || NA_TOKENS.contains(&trimmed)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ClusterError::io(path, e))?;
        Self::from_reader(file, path)
    }

    /// Parse CSV with a header row. `source` only labels errors.
    pub fn from_reader<R: Read>(reader: R, source: &Path) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let raw_headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        if raw_headers.is_empty() || raw_headers.iter().all(|h| h.trim().is_empty()) {
            return Err(ClusterError::invalid_table(source, "no header row"));
        }
        let headers = dedupe_headers(raw_headers);
        let width = headers.len();

        let mut rows = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            if record.len() > width {
                return Err(ClusterError::invalid_table(
                    source,
                    format!(
                        "data row {} has {} fields, header has {width}",
                        line + 1,
                        record.len()
                    ),
                ));
            }
            let mut row: Vec<Option<String>> = record
                .iter()
                .map(|cell| (!is_missing(cell)).then(|| cell.to_string()))
                .collect();
            row.resize(width, None);
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Project onto `columns` as text, missing cells replaced by [`MISSING`].
    pub fn project(&self, columns: &[&str]) -> Result<Vec<Vec<String>>> {
        let indices: Vec<usize> = columns
            .iter()
            .map(|c| {
                self.column_index(c)
                    .ok_or_else(|| ClusterError::InvalidParameter(format!("no column named '{c}'")))
            })
            .collect::<Result<_>>()?;

        Ok(self
            .rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|&i| row[i].clone().unwrap_or_else(|| MISSING.to_string()))
                    .collect()
            })
            .collect())
    }

    /// Copy of the rows at `indices`, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            headers: self.headers.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    /// Copy with an integer column set from `labels`, one per row. An
    /// existing column of that name is overwritten in place.
    pub fn with_labels(&self, column: &str, labels: &[usize]) -> Result<Self> {
        if labels.len() != self.rows.len() {
            return Err(ClusterError::InvalidParameter(format!(
                "{} labels for {} rows",
                labels.len(),
                self.rows.len()
            )));
        }
        let mut out = self.clone();
        let idx = match out.column_index(column) {
            Some(i) => i,
            None => {
                out.headers.push(column.to_string());
                for row in &mut out.rows {
                    row.push(None);
                }
                out.headers.len() - 1
            }
        };
        for (row, label) in out.rows.iter_mut().zip(labels) {
            row[idx] = Some(label.to_string());
        }
        Ok(out)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = WriterBuilder::new().from_path(path)?;
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
        }
        wtr.flush().map_err(|e| ClusterError::io(path, e))?;
        Ok(())
    }
}

/// Rename repeated headers to `name.1`, `name.2`, ...
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(headers.len());
    for h in headers {
        let count = seen.entry(h.clone()).or_insert(0);
        if *count == 0 {
            out.push(h);
        } else {
            out.push(format!("{h}.{count}"));
        }
        *count += 1;
    }
    out
}
