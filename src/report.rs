// src/report.rs
//
// Office roll-up over the detailed fact: year-to-date weekday attendance and
// the line-of-business mix on full-office days. Read-only over the facts.

use anyhow::{bail, Result};
use chrono::{Datelike, NaiveDate};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};
use tracing::info;

use crate::config::Layout;
use crate::facts::{self, FactOccupancy};
use crate::table::RawTable;

pub const LOB_MIX_FILE: &str = "office_lob_ytd_5day.csv";

#[derive(Debug, Clone, PartialEq)]
pub struct OfficeMix {
    pub office_location: String,
    /// Mean daily attendance over the year's weekdays, one decimal.
    pub ytd_avg_attendance: f64,
    /// Percent of non-hybrid weekday attendance per line of business. `None`
    /// when the office had no attendance on those days.
    pub lob_pct: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LobMix {
    pub year: i32,
    pub through: NaiveDate,
    pub lobs: Vec<String>,
    pub offices: Vec<OfficeMix>,
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// The year runs from Jan 1 to the latest date with any attendance (or the
/// latest date at all when every row is zero).
pub fn lob_mix(fact: &[FactOccupancy]) -> Option<LobMix> {
    let through = fact
        .iter()
        .filter(|r| r.attendance_count > 0)
        .map(|r| r.date)
        .max()
        .or_else(|| fact.iter().map(|r| r.date).max())?;
    let year = through.year();

    let ytd: Vec<&FactOccupancy> = fact
        .iter()
        .filter(|r| r.date.year() == year && r.date <= through && !r.is_weekend)
        .collect();

    let mut daily: BTreeMap<(&str, NaiveDate), u64> = BTreeMap::new();
    for r in &ytd {
        *daily.entry((r.office_location.as_str(), r.date)).or_default() += r.attendance_count;
    }
    let mut per_office: BTreeMap<&str, (u64, usize)> = BTreeMap::new();
    for ((office, _), total) in &daily {
        let slot = per_office.entry(*office).or_default();
        slot.0 += total;
        slot.1 += 1;
    }

    // full-office days only
    let mut lob_sums: BTreeMap<&str, BTreeMap<&str, u64>> = BTreeMap::new();
    for r in ytd.iter().filter(|r| !r.is_hybrid_day) {
        *lob_sums
            .entry(r.office_location.as_str())
            .or_default()
            .entry(r.line_of_business.as_str())
            .or_default() += r.attendance_count;
    }
    let lobs: BTreeSet<&str> = lob_sums.values().flat_map(|m| m.keys().copied()).collect();

    let offices = per_office
        .into_iter()
        .map(|(office, (sum, days))| {
            let sums = lob_sums.get(office);
            let office_total: u64 = sums.map(|m| m.values().sum()).unwrap_or(0);
            let lob_pct = lobs
                .iter()
                .map(|lob| {
                    let pct = sums
                        .and_then(|m| m.get(lob))
                        .filter(|_| office_total > 0)
                        .map(|n| round1(*n as f64 / office_total as f64 * 100.0));
                    (lob.to_string(), pct)
                })
                .collect();
            OfficeMix {
                office_location: office.to_string(),
                ytd_avg_attendance: round1(sum as f64 / days as f64),
                lob_pct,
            }
        })
        .collect();

    Some(LobMix {
        year,
        through,
        lobs: lobs.into_iter().map(str::to_string).collect(),
        offices,
    })
}

pub fn lob_mix_table(mix: &LobMix) -> RawTable {
    let mut headers = vec![
        "office_location".to_string(),
        "ytd_avg_attendance_count".to_string(),
    ];
    headers.extend(mix.lobs.iter().map(|lob| format!("{} (5-day %)", lob)));

    let mut table = RawTable::new(headers);
    for office in &mix.offices {
        let mut row = vec![
            office.office_location.clone(),
            format!("{:.1}", office.ytd_avg_attendance),
        ];
        row.extend(mix.lobs.iter().map(|lob| {
            office
                .lob_pct
                .get(lob)
                .copied()
                .flatten()
                .map(|p| format!("{:.1}", p))
                .unwrap_or_default()
        }));
        table.push_row(row);
    }
    table
}

/// Write `office_lob_ytd_5day.csv` into `out_dir` from the detailed fact.
#[tracing::instrument(skip(layout))]
pub fn report(layout: &Layout, out_dir: &Path) -> Result<PathBuf> {
    let fact_path = layout.fact_file(facts::occupancy::TABLE);
    if !fact_path.is_file() {
        bail!("missing required file: {}", fact_path.display());
    }
    let fact = facts::occupancy::load(layout)?;
    let Some(mix) = lob_mix(&fact) else {
        bail!("{} has no rows", fact_path.display());
    };

    let out = out_dir.join(LOB_MIX_FILE);
    lob_mix_table(&mix).write_csv(&out)?;
    info!(
        year = mix.year,
        through = %mix.through,
        offices = mix.offices.len(),
        lobs = mix.lobs.len(),
        output = %out.display(),
        "office LOB report written"
    );
    Ok(out)
}
