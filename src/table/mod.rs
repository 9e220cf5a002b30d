// src/table/mod.rs

pub mod date_parser;
pub mod utils;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::HashMap, fs, path::Path};
use tracing::debug;

/// A free-form table: whatever headers the source claims, every cell as text.
/// Converted and combined data live in this shape until a cleaner maps them
/// onto a typed record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    /// One entry per data row, always `headers.len()` cells wide.
    pub rows: Vec<Vec<String>>,
}

/// Comparison key for a header: lowercase ASCII alphanumerics only, so
/// `"Office Location"`, `"OfficeLocation"` and `"office_location"` match.
pub fn header_key(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl RawTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Append a row, padding or truncating it to the header width.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first header matching any alias (in alias order).
    pub fn find_column(&self, aliases: &[&str]) -> Option<usize> {
        let keys: Vec<String> = self.headers.iter().map(|h| header_key(h)).collect();
        aliases.iter().find_map(|alias| {
            let wanted = header_key(alias);
            keys.iter().position(|k| *k == wanted)
        })
    }

    /// Add a column filled with `value`, or overwrite it if the header
    /// already exists.
    pub fn set_column(&mut self, header: &str, value: &str) {
        match self.find_column(&[header]) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = value.to_string();
                }
            }
            None => {
                self.headers.push(header.to_string());
                for row in &mut self.rows {
                    row.push(value.to_string());
                }
            }
        }
    }

    /// Values of column `idx`, one per row.
    pub fn column(&self, idx: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |r| r[idx].as_str())
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let headers: Vec<String> = rdr
            .headers()
            .with_context(|| format!("reading header of {}", path.display()))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();
        let mut table = RawTable::new(headers);
        for (idx, rec) in rdr.records().enumerate() {
            let rec = rec.with_context(|| format!("CSV parse error in {} at record {}", path.display(), idx))?;
            table.push_row(rec.iter().map(str::to_string).collect());
        }
        debug!(file = %path.display(), rows = table.len(), "read table");
        Ok(table)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        let mut wtr = WriterBuilder::new()
            .from_path(path)
            .with_context(|| format!("creating {}", path.display()))?;
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()
            .with_context(|| format!("flushing {}", path.display()))?;
        Ok(())
    }

    /// Stack tables vertically. Columns are the union of all headers in
    /// first-appearance order (matched by `header_key`); absent cells are
    /// empty.
    pub fn concat(tables: Vec<RawTable>) -> RawTable {
        let mut headers: Vec<String> = Vec::new();
        let mut slot: HashMap<String, usize> = HashMap::new();
        for t in &tables {
            for h in &t.headers {
                let key = header_key(h);
                if !slot.contains_key(&key) {
                    slot.insert(key, headers.len());
                    headers.push(h.clone());
                }
            }
        }

        let mut out = RawTable::new(headers);
        for t in tables {
            let map: Vec<usize> = t.headers.iter().map(|h| slot[&header_key(h)]).collect();
            for row in t.rows {
                let mut wide = vec![String::new(); out.headers.len()];
                for (src, cell) in row.into_iter().enumerate() {
                    if let Some(&dst) = map.get(src) {
                        wide[dst] = cell;
                    }
                }
                out.rows.push(wide);
            }
        }
        out
    }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Read a typed table written by an earlier stage.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, rec) in rdr.deserialize().enumerate() {
        let rec: T =
            rec.with_context(|| format!("decoding {} at record {}", path.display(), idx))?;
        out.push(rec);
    }
    debug!(file = %path.display(), rows = out.len(), "read records");
    Ok(out)
}

/// Write a typed table, replacing any previous file. `headers` is written
/// explicitly so an empty table still carries its schema.
pub fn write_records<T: Serialize>(path: &Path, headers: &[&str], rows: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    wtr.write_record(headers)?;
    for row in rows {
        wtr.serialize(row)
            .with_context(|| format!("writing row to {}", path.display()))?;
    }
    wtr.flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    debug!(file = %path.display(), rows = rows.len(), "wrote records");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        let mut t = RawTable::new(headers.iter().map(|s| s.to_string()).collect());
        for r in rows {
            t.push_row(r.iter().map(|s| s.to_string()).collect());
        }
        t
    }

    #[test]
    fn find_column_is_spelling_insensitive() {
        let t = table(&["Office Location", "LogonDate"], &[]);
        assert_eq!(t.find_column(&["OfficeLocation"]), Some(0));
        assert_eq!(t.find_column(&["logon_date"]), Some(1));
        assert_eq!(t.find_column(&["Username", "User"]), None);
    }

    #[test]
    fn concat_unions_columns() {
        let a = table(&["A", "B"], &[&["1", "2"]]);
        let b = table(&["b", "C"], &[&["3", "4"], &["5", "6"]]);
        let c = RawTable::concat(vec![a, b]);
        assert_eq!(c.headers, vec!["A", "B", "C"]);
        assert_eq!(
            c.rows,
            vec![
                vec!["1", "2", ""],
                vec!["", "3", "4"],
                vec!["", "5", "6"],
            ]
        );
    }

    #[test]
    fn csv_roundtrip_pads_short_rows() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("nested").join("t.csv");
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(&path, "X,Y,Z\n1,2\n\"a, b\",c,d\n")?;
        let t = RawTable::read_csv(&path)?;
        assert_eq!(t.rows[0], vec!["1", "2", ""]);
        assert_eq!(t.rows[1][0], "a, b");

        let out = tmp.path().join("out").join("t.csv");
        t.write_csv(&out)?;
        assert_eq!(RawTable::read_csv(&out)?, t);
        Ok(())
    }

    #[test]
    fn set_column_adds_then_overwrites() {
        let mut t = table(&["A"], &[&["1"], &["2"]]);
        t.set_column("period_year", "2025");
        assert_eq!(t.headers, vec!["A", "period_year"]);
        t.set_column("Period Year", "2024");
        assert_eq!(t.rows[1], vec!["2", "2024"]);
    }
}
