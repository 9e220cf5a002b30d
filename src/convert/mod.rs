// src/convert/mod.rs
//
// Stage 1: raw spreadsheets → one CSV per category per month.

pub mod naming;
pub mod xlsx;

use anyhow::{Context, Result};
use glob::{glob_with, MatchOptions};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use crate::config::{Category, Layout};
use crate::period::Period;
use crate::table::{date_parser::parse_date, RawTable};
use naming::{classify_source, converted_file_name, SourceFormat};

/// Columns consulted, in order, when the filename does not carry a period.
pub const PERIOD_DATE_COLUMNS: &[&str] = &["Date", "LogonDate", "SnapshotDate"];

pub const PERIOD_YEAR_COLUMN: &str = "period_year";
pub const PERIOD_MONTH_COLUMN: &str = "period_month";

/// A spreadsheet found under the inputs tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub category: Category,
    pub format: SourceFormat,
    /// Period inferred from the path alone.
    pub period_hint: Option<Period>,
}

#[derive(Debug, Default)]
pub struct ConversionReport {
    pub converted: Vec<PathBuf>,
    /// (source file, reason)
    pub failures: Vec<(PathBuf, String)>,
}

impl ConversionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Locate `<inputs>/<Category>/` matching the category name case-insensitively.
fn category_dir(inputs: &Path, category: Category) -> Option<PathBuf> {
    let exact = inputs.join(category.as_str());
    if exact.is_dir() {
        return Some(exact);
    }
    fs::read_dir(inputs)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .find(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.parse::<Category>().ok())
                    == Some(category)
        })
}

/// All `.xlsx` files for a category, sorted by path. The extension matches
/// case-insensitively; Excel lock files (`~$…`) are ignored.
pub fn discover_sources(inputs: &Path, category: Category) -> Result<Vec<SourceFile>> {
    let Some(dir) = category_dir(inputs, category) else {
        return Ok(Vec::new());
    };
    let pattern = format!("{}/**/*.xlsx", glob::Pattern::escape(&dir.to_string_lossy()));
    let options = MatchOptions {
        case_sensitive: false,
        ..Default::default()
    };
    let mut paths: Vec<PathBuf> = glob_with(&pattern, options)
        .with_context(|| format!("Failed to read glob pattern '{}'", pattern))?
        .filter_map(|entry| entry.ok())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with("~$"))
        })
        .collect();
    paths.sort();

    Ok(paths
        .into_iter()
        .map(|path| {
            let (format, period_hint) = classify_source(&path, category);
            SourceFile {
                path,
                category,
                format,
                period_hint,
            }
        })
        .collect())
}

/// Latest parseable date in the first recognised date column.
pub fn period_from_table(table: &RawTable) -> Option<Period> {
    PERIOD_DATE_COLUMNS.iter().find_map(|col| {
        let idx = table.find_column(&[*col])?;
        table.column(idx).filter_map(parse_date).max().map(Period::of)
    })
}

/// Convert a single spreadsheet. Returns the CSV written.
#[tracing::instrument(level = "debug", skip(source, out_dir), fields(file = %source.path.display()))]
pub fn convert_file(source: &SourceFile, out_dir: &Path) -> Result<PathBuf> {
    let mut table = xlsx::read_first_sheet(&source.path)?;

    let period = match source.period_hint {
        Some(p) => p,
        None => period_from_table(&table).with_context(|| {
            format!(
                "no year/month in file name and no parseable {:?} column",
                PERIOD_DATE_COLUMNS
            )
        })?,
    };

    table.set_column(PERIOD_YEAR_COLUMN, &period.year.to_string());
    table.set_column(PERIOD_MONTH_COLUMN, &period.month.to_string());

    let out = out_dir.join(converted_file_name(source.category, period, source.format));
    if out.exists() {
        warn!(output = %out.display(), "overwriting previously converted period");
    }
    table.write_csv(&out)?;
    info!(
        source = %source.path.display(),
        output = %out.display(),
        rows = table.len(),
        format = source.format.as_str(),
        "converted"
    );
    Ok(out)
}

/// Stage 1. Every discoverable spreadsheet is converted independently; a bad
/// file is logged and recorded in the report, never fatal.
#[tracing::instrument(skip(layout))]
pub fn convert_all(layout: &Layout) -> Result<ConversionReport> {
    let inputs = layout.inputs_dir();
    let mut report = ConversionReport::default();

    for category in Category::ALL {
        let out_dir = layout.converted_dir(category);
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("creating {}", out_dir.display()))?;

        let sources = discover_sources(&inputs, category)?;
        info!(%category, files = sources.len(), "discovered spreadsheets");

        for source in &sources {
            match convert_file(source, &out_dir) {
                Ok(out) => report.converted.push(out),
                Err(e) => {
                    warn!(file = %source.path.display(), error = %format!("{e:#}"), "conversion failed, skipping");
                    report.failures.push((source.path.clone(), format!("{e:#}")));
                }
            }
        }
    }

    if report.is_clean() {
        info!(converted = report.converted.len(), "conversion finished without errors");
    } else {
        warn!(
            converted = report.converted.len(),
            failed = report.failures.len(),
            "conversion finished with failures"
        );
        for (path, reason) in &report.failures {
            warn!("  - {}: {}", path.display(), reason);
        }
    }
    Ok(report)
}
