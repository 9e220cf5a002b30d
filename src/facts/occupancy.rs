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
use crate::dims::{date::is_weekend, DimDate, DimLineOfBusiness, DimLocation};
use crate::table::{read_records, write_records};

pub const TABLE: &str = "FactOccupancy";
pub const HEADERS: &[&str] = &[
    "date_key",
    "location_key",
    "lob_key",
    "date",
    "office_location",
    "line_of_business",
    "year",
    "month",
    "is_weekend",
    "attendance_count",
    "deskcount",
    "occupancy_rate",
    "is_hybrid_day",
];

/// Attendance per day, office and line of business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactOccupancy {
    pub date_key: Option<u32>,
    pub location_key: Option<u32>,
    pub lob_key: Option<u32>,
    pub date: NaiveDate,
    pub office_location: String,
    pub line_of_business: String,
    pub year: i32,
    pub month: u32,
    pub is_weekend: bool,
    pub attendance_count: u64,
    pub deskcount: Option<u64>,
    pub occupancy_rate: Option<f64>,
    pub is_hybrid_day: bool,
}

pub fn build(
    occupancy: &[CleanOccupancy],
    desk: &[CleanDeskcount],
    dates: &[DimDate],
    locations: &[DimLocation],
    lobs: &[DimLineOfBusiness],
    fill_missing_days: bool,
) -> Vec<FactOccupancy> {
    let keys = DimensionKeys::new(dates, locations, lobs);
    let capacity = CapacityLookup::new(desk);

    // cleaned rows are split by city/state too; the fact grain is not
    let mut grain: BTreeMap<(NaiveDate, String, String), u64> = BTreeMap::new();
    for r in occupancy {
        *grain
            .entry((r.logon_date, r.office_location.clone(), r.line_of_business.clone()))
            .or_default() += r.attendance_count;
    }

    if fill_missing_days {
        if let Some(window) = fill_window(occupancy, &capacity) {
            for date in window_days(window) {
                for loc in locations {
                    for lob in lobs {
                        grain
                            .entry((date, loc.office_location.clone(), lob.line_of_business.clone()))
                            .or_insert(0);
                    }
                }
            }
        }
    }

    let mut daily: BTreeMap<(String, NaiveDate), u64> = BTreeMap::new();
    for ((date, loc, _), n) in &grain {
        *daily.entry((loc.clone(), *date)).or_default() += n;
    }
    let hybrid = hybrid_days(&daily, false);

    grain
        .into_iter()
        .map(|((date, office_location, line_of_business), attendance_count)| {
            let deskcount = capacity.get(&office_location, date);
            let is_hybrid_day = hybrid.contains(&(office_location.clone(), date));
            FactOccupancy {
                date_key: keys.date(date),
                location_key: keys.location(&office_location),
                lob_key: keys.lob(&line_of_business),
                date,
                year: date.year(),
                month: date.month(),
                is_weekend: is_weekend(date),
                attendance_count,
                deskcount,
                occupancy_rate: occupancy_rate(attendance_count, deskcount),
                is_hybrid_day,
                office_location,
                line_of_business,
            }
        })
        .collect()
}

/// Stage 8.
#[tracing::instrument(skip(layout, cfg))]
pub fn create_fact_occupancy(layout: &Layout, cfg: &PipelineConfig) -> Result<Vec<FactOccupancy>> {
    let occupancy = crate::clean::occupancy::load(layout)?;
    let desk = crate::clean::deskcount::load(layout)?;
    let dates = crate::dims::date::load(layout)?;
    let locations = crate::dims::location::load(layout)?;
    let lobs = crate::dims::lob::load(layout)?;

    let rows = build(
        &occupancy,
        &desk,
        &dates,
        &locations,
        &lobs,
        cfg.fill_missing_days,
    );
    let out = layout.fact_file(TABLE);
    write_records(&out, HEADERS, &rows)?;

    let mut stats = FactStats::default();
    for r in &rows {
        stats.rows += 1;
        stats.attendance += r.attendance_count;
        stats.with_capacity += r.deskcount.is_some() as usize;
        stats.unmatched_keys +=
            (r.date_key.is_none() || r.location_key.is_none() || r.lob_key.is_none()) as usize;
        stats.hybrid_rows += r.is_hybrid_day as usize;
    }
    stats.log(TABLE, &out);
    Ok(rows)
}

pub fn load(layout: &Layout) -> Result<Vec<FactOccupancy>> {
    read_records(&layout.fact_file(TABLE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dims::date::calendar;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn occ(day: u32, loc: &str, lob: &str, city: &str, n: u64) -> CleanOccupancy {
        let date = d(day);
        CleanOccupancy {
            logon_date: date,
            year: 2025,
            month: 1,
            week_in_month: 1,
            day_of_week: date.format("%A").to_string(),
            office_location: loc.into(),
            city_state_country_region: city.into(),
            line_of_business: lob.into(),
            attendance_count: n,
        }
    }

    fn desk(loc: &str, n: Option<u64>) -> CleanDeskcount {
        CleanDeskcount {
            date: d(1),
            year: 2025,
            month: 1,
            office_location: loc.into(),
            deskcount: n,
            rsf: None,
        }
    }

    fn locs(names: &[&str]) -> Vec<DimLocation> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| DimLocation {
                location_key: i as u32 + 1,
                office_location: n.to_string(),
                rsf: 0,
            })
            .collect()
    }

    fn lobs(names: &[&str]) -> Vec<DimLineOfBusiness> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| DimLineOfBusiness {
                lob_key: i as u32 + 1,
                line_of_business: n.to_string(),
            })
            .collect()
    }

    #[test]
    fn joins_capacity_and_keys() {
        let dates = calendar(d(1), d(31));
        let rows = build(
            &[
                occ(2, "A", "X", "Austin, TX", 1),
                occ(2, "A", "X", "Round Rock, TX", 1),
                occ(2, "A", "Y", "", 1),
                occ(2, "Z", "X", "", 3),
                occ(3, "B", "X", "", 5),
            ],
            &[desk("A", Some(10)), desk("B", Some(0))],
            &dates,
            &locs(&["A", "B"]),
            &lobs(&["X", "Y"]),
            false,
        );
        assert_eq!(rows.len(), 4);

        let ax = &rows[0];
        assert_eq!((ax.office_location.as_str(), ax.line_of_business.as_str()), ("A", "X"));
        assert_eq!(ax.date_key, Some(20250102));
        assert_eq!(ax.location_key, Some(1));
        assert_eq!(ax.lob_key, Some(1));
        assert_eq!(ax.attendance_count, 2);
        assert_eq!(ax.deskcount, Some(10));
        assert_eq!(ax.occupancy_rate, Some(0.2));
        assert_eq!(rows[1].occupancy_rate, Some(0.1));

        // unknown office keeps its row with null key and capacity
        let z = &rows[2];
        assert_eq!(z.office_location, "Z");
        assert_eq!(z.location_key, None);
        assert_eq!(z.deskcount, None);
        assert_eq!(z.occupancy_rate, None);

        let b = &rows[3];
        assert_eq!(b.deskcount, Some(0));
        assert_eq!(b.occupancy_rate, None);
    }

    #[test]
    fn dates_outside_calendar_have_no_key() {
        let rows = build(&[occ(2, "A", "X", "", 1)], &[], &[], &locs(&["A"]), &lobs(&["X"]), false);
        assert_eq!(rows[0].date_key, None);
        assert_eq!(rows[0].location_key, Some(1));
        assert!(!rows[0].is_weekend);
    }

    #[test]
    fn densify_fills_every_office_and_line() {
        let dates = calendar(d(1), d(31));
        let rows = build(
            &[occ(6, "A", "X", "", 2), occ(8, "A", "X", "", 1)],
            &[desk("A", Some(4)), desk("B", Some(4))],
            &dates,
            &locs(&["A", "B"]),
            &lobs(&["X", "Y"]),
            true,
        );
        // 3 days x 2 offices x 2 lines
        assert_eq!(rows.len(), 12);
        assert_eq!(rows.iter().map(|r| r.attendance_count).sum::<u64>(), 3);
        let filler = rows
            .iter()
            .find(|r| r.office_location == "B" && r.line_of_business == "Y")
            .unwrap();
        assert_eq!(filler.attendance_count, 0);
        assert_eq!(filler.occupancy_rate, Some(0.0));
        assert!(!filler.is_hybrid_day);
    }

    #[test]
    fn hybrid_flag_applies_to_every_line_on_the_day() {
        let rows = build(
            &[
                occ(27, "A", "X", "", 1),
                occ(27, "A", "Y", "", 1),
                occ(28, "A", "X", "", 5),
                occ(29, "A", "X", "", 4),
                occ(30, "A", "X", "", 1),
            ],
            &[],
            &[],
            &locs(&["A"]),
            &lobs(&["X", "Y"]),
            false,
        );
        let flagged: Vec<(u32, &str)> = rows
            .iter()
            .filter(|r| r.is_hybrid_day)
            .map(|r| (r.date.day(), r.line_of_business.as_str()))
            .collect();
        assert_eq!(flagged, vec![(27, "X"), (27, "Y"), (28, "X"), (29, "X")]);
    }

    #[test]
    fn capacity_comes_from_the_last_snapshot_before_the_day() {
        let mut feb = occ(1, "A", "X", "", 5);
        feb.logon_date = NaiveDate::from_ymd_opt(2025, 2, 3).unwrap();
        feb.month = 2;
        let mar = CleanDeskcount {
            date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            month: 3,
            ..desk("A", Some(12))
        };
        let rows = build(
            &[feb],
            &[desk("A", Some(10)), mar],
            &[],
            &locs(&["A"]),
            &lobs(&["X"]),
            false,
        );
        assert_eq!(rows[0].deskcount, Some(10));
        assert_eq!(rows[0].occupancy_rate, Some(0.5));
    }
}
