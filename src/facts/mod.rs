// src/facts/mod.rs
//
// Stages 8 and 9: join cleaned occupancy against the dimensions and the
// desk-capacity snapshots.

pub mod aggregated;
pub mod hybrid;
pub mod occupancy;

pub use aggregated::{create_fact_occupancy_aggregated, FactOccupancyAggregated};
pub use occupancy::{create_fact_occupancy, FactOccupancy};

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::clean::{CleanDeskcount, CleanOccupancy};
use crate::dims::{date::date_key, DimDate, DimLineOfBusiness, DimLocation};
use crate::period::Period;

/// Desk capacity per office, as a dated series of snapshots. A fact date
/// takes the latest snapshot on or before it.
#[derive(Debug, Default)]
pub struct CapacityLookup {
    snapshots: HashMap<String, BTreeMap<NaiveDate, Option<u64>>>,
}

impl CapacityLookup {
    /// Two snapshots for the same office and date keep the larger count.
    pub fn new(desk: &[CleanDeskcount]) -> Self {
        let mut snapshots: HashMap<String, BTreeMap<NaiveDate, Option<u64>>> = HashMap::new();
        for r in desk {
            let series = snapshots.entry(r.office_location.clone()).or_default();
            let slot = series.entry(r.date).or_insert(r.deskcount);
            if r.deskcount > *slot {
                *slot = r.deskcount;
            }
        }
        Self { snapshots }
    }

    /// Null before an office's first snapshot, and when the matched
    /// snapshot itself carries no count.
    pub fn get(&self, location: &str, date: NaiveDate) -> Option<u64> {
        self.snapshots
            .get(location)?
            .range(..=date)
            .next_back()
            .and_then(|(_, count)| *count)
    }

    pub fn latest_month(&self) -> Option<Period> {
        self.snapshots
            .values()
            .filter_map(|series| series.keys().next_back())
            .max()
            .map(|d| Period::of(*d))
    }
}

/// Natural key → surrogate key lookups over the dimension tables.
#[derive(Debug, Default)]
pub struct DimensionKeys {
    dates: HashSet<u32>,
    locations: HashMap<String, u32>,
    lobs: HashMap<String, u32>,
}

impl DimensionKeys {
    pub fn new(dates: &[DimDate], locations: &[DimLocation], lobs: &[DimLineOfBusiness]) -> Self {
        Self {
            dates: dates.iter().map(|d| d.date_key).collect(),
            locations: locations
                .iter()
                .map(|l| (l.office_location.clone(), l.location_key))
                .collect(),
            lobs: lobs
                .iter()
                .map(|l| (l.line_of_business.clone(), l.lob_key))
                .collect(),
        }
    }

    pub fn date(&self, date: NaiveDate) -> Option<u32> {
        let key = date_key(date);
        self.dates.contains(&key).then_some(key)
    }

    pub fn location(&self, name: &str) -> Option<u32> {
        self.locations.get(name).copied()
    }

    pub fn lob(&self, name: &str) -> Option<u32> {
        self.lobs.get(name).copied()
    }
}

/// `attendance / deskcount`, undefined without a positive capacity.
pub fn occupancy_rate(attendance: u64, deskcount: Option<u64>) -> Option<f64> {
    match deskcount {
        Some(d) if d > 0 => Some(attendance as f64 / d as f64),
        _ => None,
    }
}

/// Dates that get zero-attendance rows when densifying: from the first
/// observed logon to the last one, but never past the end of the newest
/// desk-capacity month.
pub fn fill_window(
    occupancy: &[CleanOccupancy],
    capacity: &CapacityLookup,
) -> Option<(NaiveDate, NaiveDate)> {
    let first = occupancy.iter().map(|r| r.logon_date).min()?;
    let mut last = occupancy.iter().map(|r| r.logon_date).max()?;
    if let Some(end) = capacity.latest_month().and_then(|p| p.last_day()) {
        last = last.min(end);
    }
    (first <= last).then_some((first, last))
}

pub fn window_days((first, last): (NaiveDate, NaiveDate)) -> impl Iterator<Item = NaiveDate> {
    first.iter_days().take_while(move |d| *d <= last)
}

/// Running totals logged after a fact table is written.
#[derive(Debug, Default)]
pub(crate) struct FactStats {
    pub rows: usize,
    pub attendance: u64,
    pub with_capacity: usize,
    pub unmatched_keys: usize,
    pub hybrid_rows: usize,
}

impl FactStats {
    pub fn log(&self, table: &str, out: &Path) {
        info!(
            table,
            rows = self.rows,
            attendance = self.attendance,
            with_capacity = self.with_capacity,
            unmatched_keys = self.unmatched_keys,
            hybrid_rows = self.hybrid_rows,
            output = %out.display(),
            "wrote fact table"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn snap(loc: &str, date: NaiveDate, desks: Option<u64>) -> CleanDeskcount {
        CleanDeskcount {
            date,
            year: 0,
            month: 0,
            office_location: loc.into(),
            deskcount: desks,
            rsf: None,
        }
    }

    #[test]
    fn capacity_carries_the_last_snapshot_forward() {
        let lookup = CapacityLookup::new(&[
            snap("A", d(2025, 1, 1), Some(10)),
            snap("A", d(2025, 3, 1), Some(12)),
            snap("B", d(2025, 1, 1), None),
        ]);
        assert_eq!(lookup.get("A", d(2025, 2, 3)), Some(10));
        assert_eq!(lookup.get("A", d(2025, 1, 1)), Some(10));
        assert_eq!(lookup.get("A", d(2025, 3, 1)), Some(12));
        assert_eq!(lookup.get("A", d(2025, 6, 30)), Some(12));
        assert_eq!(lookup.get("A", d(2024, 12, 31)), None);
        assert_eq!(lookup.get("B", d(2025, 1, 2)), None);
        assert_eq!(lookup.get("C", d(2025, 1, 2)), None);
        assert_eq!(lookup.latest_month(), Period::new(2025, 3));
    }

    #[test]
    fn mid_month_snapshot_only_applies_from_its_date() {
        let lookup = CapacityLookup::new(&[
            snap("A", d(2025, 1, 1), Some(10)),
            snap("A", d(2025, 1, 15), Some(12)),
            snap("A", d(2025, 1, 15), Some(11)),
            snap("D", d(2025, 1, 15), Some(8)),
        ]);
        assert_eq!(lookup.get("A", d(2025, 1, 14)), Some(10));
        assert_eq!(lookup.get("A", d(2025, 1, 15)), Some(12));
        assert_eq!(lookup.get("D", d(2025, 1, 2)), None);
    }

    #[test]
    fn rate_needs_positive_capacity() {
        assert_eq!(occupancy_rate(2, Some(10)), Some(0.2));
        assert_eq!(occupancy_rate(5, Some(0)), None);
        assert_eq!(occupancy_rate(5, None), None);
        assert_eq!(occupancy_rate(0, Some(4)), Some(0.0));
    }

    #[test]
    fn window_stops_at_latest_capacity_month() {
        let occ = |date| CleanOccupancy {
            logon_date: date,
            year: 2025,
            month: 1,
            week_in_month: 1,
            day_of_week: String::new(),
            office_location: "A".into(),
            city_state_country_region: String::new(),
            line_of_business: "X".into(),
            attendance_count: 1,
        };
        let rows = vec![occ(d(2025, 1, 20)), occ(d(2025, 2, 10)), occ(d(2025, 1, 6))];

        let capacity = CapacityLookup::new(&[snap("A", d(2025, 1, 1), Some(5))]);
        assert_eq!(
            fill_window(&rows, &capacity),
            Some((d(2025, 1, 6), d(2025, 1, 31)))
        );
        assert_eq!(
            fill_window(&rows, &CapacityLookup::default()),
            Some((d(2025, 1, 6), d(2025, 2, 10)))
        );
        assert_eq!(window_days((d(2025, 1, 30), d(2025, 2, 1))).count(), 3);
        assert_eq!(fill_window(&[], &capacity), None);
    }
}
