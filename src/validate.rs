// src/validate.rs
//
// Data-quality report over the finished tables. Reads facts, dimensions and
// cleaned data; writes only under the report directory.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};
use tracing::{info, warn};

use crate::clean::{CleanDeskcount, CleanOccupancy};
use crate::config::{Category, Layout};
use crate::dims::{self, DimLocation};
use crate::facts::{self, FactOccupancy, FactOccupancyAggregated};
use crate::table::{read_records, write_records};

pub const SUMMARY_FILE: &str = "validation_summary.txt";
pub const MERGE_ISSUES_FILE: &str = "deskcount_merge_issues.csv";
pub const OVER_CAPACITY_FILE: &str = "over_capacity_days.csv";
pub const BY_LOCATION_FILE: &str = "by_location_summary.csv";

const MERGE_ISSUE_HEADERS: &[&str] = &[
    "date",
    "office_location",
    "line_of_business",
    "attendance_count",
    "deskcount",
];
const OVER_CAPACITY_HEADERS: &[&str] = &[
    "date",
    "office_location",
    "line_of_business",
    "attendance_count",
    "deskcount",
    "occupancy_rate",
];
const BY_LOCATION_HEADERS: &[&str] = &[
    "office_location",
    "rows",
    "mean_occupancy_rate",
    "merge_issues",
    "over_capacity_days",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeIssue {
    pub date: NaiveDate,
    pub office_location: String,
    pub line_of_business: String,
    pub attendance_count: u64,
    pub deskcount: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverCapacity {
    pub date: NaiveDate,
    pub office_location: String,
    pub line_of_business: String,
    pub attendance_count: u64,
    pub deskcount: Option<u64>,
    pub occupancy_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSummary {
    pub office_location: String,
    pub rows: usize,
    pub mean_occupancy_rate: Option<f64>,
    pub merge_issues: usize,
    pub over_capacity_days: usize,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub summary: Vec<String>,
    pub merge_issues: Vec<MergeIssue>,
    pub over_capacity: Vec<OverCapacity>,
    pub by_location: Vec<LocationSummary>,
}

/// People showed up but no desk capacity was joined.
pub fn is_merge_issue(attendance: u64, deskcount: Option<u64>) -> bool {
    attendance > 0 && deskcount.unwrap_or(0) == 0
}

pub fn is_over_capacity(rate: Option<f64>) -> bool {
    rate.is_some_and(|r| r > 1.0)
}

fn pct(n: usize, d: usize) -> String {
    if d == 0 {
        "n/a".to_string()
    } else {
        format!("{:.1}%", n as f64 / d as f64 * 100.0)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn fmt_mean(m: Option<f64>) -> String {
    m.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "n/a".into())
}

fn date_range(dates: impl Iterator<Item = NaiveDate> + Clone) -> String {
    match (dates.clone().min(), dates.max()) {
        (Some(a), Some(b)) => format!("{} to {}", a, b),
        _ => "n/a".to_string(),
    }
}

/// Pure analysis; `validate` does the I/O.
pub fn analyze(
    fact: &[FactOccupancy],
    agg: &[FactOccupancyAggregated],
    locations: &[DimLocation],
    occupancy: &[CleanOccupancy],
    desk: &[CleanDeskcount],
) -> ValidationReport {
    let mut lines = vec!["== Summary ==".to_string()];
    lines.push(format!("Fact rows: {}; Agg rows: {}", fact.len(), agg.len()));
    lines.push(format!(
        "Fact date range: {}",
        date_range(fact.iter().map(|r| r.date))
    ));
    lines.push(format!(
        "Agg date range: {}",
        date_range(agg.iter().map(|r| r.date))
    ));
    let fact_locations: BTreeSet<&str> = fact.iter().map(|r| r.office_location.as_str()).collect();
    lines.push(format!(
        "Locations: {} (dim: {})",
        fact_locations.len(),
        locations.len()
    ));
    let fact_lobs: BTreeSet<&str> = fact.iter().map(|r| r.line_of_business.as_str()).collect();
    lines.push(format!("LOBs: {} (in fact)", fact_lobs.len()));

    let weekday = mean(fact.iter().filter(|r| !r.is_weekend).filter_map(|r| r.occupancy_rate));
    let weekend = mean(fact.iter().filter(|r| r.is_weekend).filter_map(|r| r.occupancy_rate));
    lines.push(format!(
        "Mean occupancy (weekday): {}; (weekend): {}",
        fmt_mean(weekday),
        fmt_mean(weekend)
    ));

    let mut merge_issues: Vec<MergeIssue> = fact
        .iter()
        .filter(|r| is_merge_issue(r.attendance_count, r.deskcount))
        .map(|r| MergeIssue {
            date: r.date,
            office_location: r.office_location.clone(),
            line_of_business: r.line_of_business.clone(),
            attendance_count: r.attendance_count,
            deskcount: r.deskcount,
        })
        .collect();
    merge_issues.sort_by(|a, b| {
        (&a.office_location, a.date, &a.line_of_business)
            .cmp(&(&b.office_location, b.date, &b.line_of_business))
    });

    let mut over_capacity: Vec<OverCapacity> = fact
        .iter()
        .filter_map(|r| {
            let rate = r.occupancy_rate.filter(|x| *x > 1.0)?;
            Some(OverCapacity {
                date: r.date,
                office_location: r.office_location.clone(),
                line_of_business: r.line_of_business.clone(),
                attendance_count: r.attendance_count,
                deskcount: r.deskcount,
                occupancy_rate: rate,
            })
        })
        .collect();
    over_capacity.sort_by(|a, b| {
        (&a.office_location, a.date, &a.line_of_business)
            .cmp(&(&b.office_location, b.date, &b.line_of_business))
    });

    let agg_merge = agg
        .iter()
        .filter(|r| is_merge_issue(r.attendance_count, r.deskcount))
        .count();
    let agg_over = agg.iter().filter(|r| is_over_capacity(r.occupancy_rate)).count();
    lines.push(format!(
        "Rows with attendance>0 and no deskcount: {} ({}); aggregated: {} ({})",
        merge_issues.len(),
        pct(merge_issues.len(), fact.len()),
        agg_merge,
        pct(agg_merge, agg.len())
    ));
    lines.push(format!(
        "Rows with occupancy_rate > 1.0: {} ({}); aggregated: {} ({})",
        over_capacity.len(),
        pct(over_capacity.len(), fact.len()),
        agg_over,
        pct(agg_over, agg.len())
    ));

    let unmatched_date = fact.iter().filter(|r| r.date_key.is_none()).count();
    let unmatched_loc = fact.iter().filter(|r| r.location_key.is_none()).count();
    let unmatched_lob = fact.iter().filter(|r| r.lob_key.is_none()).count();
    let unmatched_agg = agg
        .iter()
        .filter(|r| r.date_key.is_none() || r.location_key.is_none())
        .count();
    lines.push(format!(
        "Unmatched keys: date {}, location {}, lob {}; aggregated rows {}",
        unmatched_date, unmatched_loc, unmatched_lob, unmatched_agg
    ));

    let latest_occ = occupancy.iter().map(|r| r.logon_date).max();
    let latest_desk = desk.iter().map(|r| r.date).max();
    lines.push(match (latest_occ, latest_desk) {
        (Some(o), Some(d)) => format!(
            "Latest occupancy: {}, latest deskcount: {}, gap: {} days",
            o,
            d,
            (o - d).num_days()
        ),
        (o, d) => format!(
            "Latest occupancy: {}, latest deskcount: {}",
            o.map(|x| x.to_string()).unwrap_or_else(|| "n/a".into()),
            d.map(|x| x.to_string()).unwrap_or_else(|| "n/a".into())
        ),
    });

    ValidationReport {
        summary: lines,
        merge_issues,
        over_capacity,
        by_location: by_location(fact),
    }
}

/// Weekday rows of the detailed fact, per office.
fn by_location(fact: &[FactOccupancy]) -> Vec<LocationSummary> {
    let mut groups: BTreeMap<&str, Vec<&FactOccupancy>> = BTreeMap::new();
    for r in fact.iter().filter(|r| !r.is_weekend) {
        groups.entry(r.office_location.as_str()).or_default().push(r);
    }

    let mut out: Vec<LocationSummary> = groups
        .into_iter()
        .map(|(loc, rows)| LocationSummary {
            office_location: loc.to_string(),
            rows: rows.len(),
            mean_occupancy_rate: mean(rows.iter().filter_map(|r| r.occupancy_rate))
                .map(|m| (m * 10_000.0).round() / 10_000.0),
            merge_issues: rows
                .iter()
                .filter(|r| is_merge_issue(r.attendance_count, r.deskcount))
                .count(),
            over_capacity_days: rows
                .iter()
                .filter(|r| is_over_capacity(r.occupancy_rate))
                .count(),
        })
        .collect();

    out.sort_by(|a, b| {
        b.merge_issues
            .cmp(&a.merge_issues)
            .then(b.over_capacity_days.cmp(&a.over_capacity_days))
            .then(match (a.mean_occupancy_rate, b.mean_occupancy_rate) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
    });
    out
}

fn require(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("missing required file: {}", path.display());
    }
    Ok(())
}

/// Load every input, analyze, and write the report files into `out_dir`.
#[tracing::instrument(skip(layout))]
pub fn validate(layout: &Layout, out_dir: &Path) -> Result<ValidationReport> {
    let inputs = [
        layout.fact_file(facts::occupancy::TABLE),
        layout.fact_file(facts::aggregated::TABLE),
        layout.dimension_file(dims::date::TABLE),
        layout.dimension_file(dims::location::TABLE),
        layout.cleaned_file(Category::Occupancy),
        layout.cleaned_file(Category::Deskcount),
    ];
    for path in &inputs {
        require(path)?;
    }

    let fact = facts::occupancy::load(layout)?;
    let agg = facts::aggregated::load(layout)?;
    let locations = dims::location::load(layout)?;
    let occupancy: Vec<CleanOccupancy> = read_records(&layout.cleaned_file(Category::Occupancy))?;
    let desk: Vec<CleanDeskcount> = read_records(&layout.cleaned_file(Category::Deskcount))?;

    let report = analyze(&fact, &agg, &locations, &occupancy, &desk);

    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating report directory {}", out_dir.display()))?;
    write_records(
        &out_dir.join(MERGE_ISSUES_FILE),
        MERGE_ISSUE_HEADERS,
        &report.merge_issues,
    )?;
    write_records(
        &out_dir.join(OVER_CAPACITY_FILE),
        OVER_CAPACITY_HEADERS,
        &report.over_capacity,
    )?;
    write_records(
        &out_dir.join(BY_LOCATION_FILE),
        BY_LOCATION_HEADERS,
        &report.by_location,
    )?;
    let summary_path = out_dir.join(SUMMARY_FILE);
    fs::write(&summary_path, report.summary.join("\n") + "\n")
        .with_context(|| format!("writing {}", summary_path.display()))?;

    for line in &report.summary {
        info!("{}", line);
    }
    if !report.merge_issues.is_empty() {
        warn!(rows = report.merge_issues.len(), "attendance without desk capacity");
    }
    if !report.over_capacity.is_empty() {
        warn!(rows = report.over_capacity.len(), "occupancy above capacity");
    }
    info!(reports = %out_dir.display(), "validation report written");
    Ok(report)
}
