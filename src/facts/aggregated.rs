use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    fill_window, hybrid::hybrid_days, occupancy_rate, window_days, CapacityLookup, DimensionKeys,
    FactStats,
};
use crate::clean::{CleanDeskcount, CleanOccupancy};
use crate::config::{Layout, PipelineConfig};
use crate::dims::{date::is_weekend, DimDate, DimLocation};
use crate::table::{read_records, write_records};

pub const TABLE: &str = "FactOccupancyAggregated";
pub const HEADERS: &[&str] = &[
    "date_key",
    "location_key",
    "date",
    "office_location",
    "year",
    "month",
    "is_weekend",
    "attendance_count",
    "deskcount",
    "occupancy_rate",
    "is_hybrid_day",
];

/// Attendance per day and office, all lines of business together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactOccupancyAggregated {
    pub date_key: Option<u32>,
    pub location_key: Option<u32>,
    pub date: NaiveDate,
    pub office_location: String,
    pub year: i32,
    pub month: u32,
    pub is_weekend: bool,
    pub attendance_count: u64,
    pub deskcount: Option<u64>,
    pub occupancy_rate: Option<f64>,
    pub is_hybrid_day: bool,
}

/// Attendance is summed over lines of business before the rate is taken, so
/// the rate here is the office rate, not a sum of per-line rates.
pub fn build(
    occupancy: &[CleanOccupancy],
    desk: &[CleanDeskcount],
    dates: &[DimDate],
    locations: &[DimLocation],
    fill_missing_days: bool,
) -> Vec<FactOccupancyAggregated> {
    let keys = DimensionKeys::new(dates, locations, &[]);
    let capacity = CapacityLookup::new(desk);

    let mut grain: BTreeMap<(NaiveDate, String), u64> = BTreeMap::new();
    for r in occupancy {
        *grain
            .entry((r.logon_date, r.office_location.clone()))
            .or_default() += r.attendance_count;
    }

    if fill_missing_days {
        if let Some(window) = fill_window(occupancy, &capacity) {
            for date in window_days(window) {
                for loc in locations {
                    grain.entry((date, loc.office_location.clone())).or_insert(0);
                }
            }
        }
    }

    let daily: BTreeMap<(String, NaiveDate), u64> = grain
        .iter()
        .map(|((date, loc), n)| ((loc.clone(), *date), *n))
        .collect();
    let hybrid = hybrid_days(&daily, true);

    grain
        .into_iter()
        .map(|((date, office_location), attendance_count)| {
            let deskcount = capacity.get(&office_location, date);
            let is_hybrid_day = hybrid.contains(&(office_location.clone(), date));
            FactOccupancyAggregated {
                date_key: keys.date(date),
                location_key: keys.location(&office_location),
                date,
                year: date.year(),
                month: date.month(),
                is_weekend: is_weekend(date),
                attendance_count,
                deskcount,
                occupancy_rate: occupancy_rate(attendance_count, deskcount),
                is_hybrid_day,
                office_location,
            }
        })
        .collect()
}

/// Stage 9.
#[tracing::instrument(skip(layout, cfg))]
pub fn create_fact_occupancy_aggregated(
    layout: &Layout,
    cfg: &PipelineConfig,
) -> Result<Vec<FactOccupancyAggregated>> {
    let occupancy = crate::clean::occupancy::load(layout)?;
    let desk = crate::clean::deskcount::load(layout)?;
    let dates = crate::dims::date::load(layout)?;
    let locations = crate::dims::location::load(layout)?;

    let rows = build(&occupancy, &desk, &dates, &locations, cfg.fill_missing_days);
    let out = layout.fact_file(TABLE);
    write_records(&out, HEADERS, &rows)?;

    let mut stats = FactStats::default();
    for r in &rows {
        stats.rows += 1;
        stats.attendance += r.attendance_count;
        stats.with_capacity += r.deskcount.is_some() as usize;
        stats.unmatched_keys += (r.date_key.is_none() || r.location_key.is_none()) as usize;
        stats.hybrid_rows += r.is_hybrid_day as usize;
    }
    stats.log(TABLE, &out);
    Ok(rows)
}

pub fn load(layout: &Layout) -> Result<Vec<FactOccupancyAggregated>> {
    read_records(&layout.fact_file(TABLE))
}
