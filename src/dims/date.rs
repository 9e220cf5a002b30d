use anyhow::Result;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clean::occupancy::week_in_month;
use crate::config::Layout;
use crate::table::{read_records, write_records};

pub const TABLE: &str = "DimDate";

/// Calendar coverage. Fixed; independent of the data.
pub const FIRST_DAY: (i32, u32, u32) = (2024, 1, 1);
pub const LAST_DAY: (i32, u32, u32) = (2027, 12, 31);

pub const HEADERS: &[&str] = &[
    "date_key",
    "date",
    "date_string",
    "year",
    "quarter",
    "month",
    "month_name",
    "week_of_year",
    "week_in_month",
    "day",
    "day_of_week",
    "day_name",
    "day_of_year",
    "is_weekend",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimDate {
    /// `YYYYMMDD`
    pub date_key: u32,
    pub date: NaiveDate,
    pub date_string: String,
    pub year: i32,
    pub quarter: u32,
    pub month: u32,
    pub month_name: String,
    /// ISO week number
    pub week_of_year: u32,
    pub week_in_month: u32,
    pub day: u32,
    /// 1 = Monday … 7 = Sunday
    pub day_of_week: u32,
    pub day_name: String,
    pub day_of_year: u32,
    pub is_weekend: bool,
}

pub fn date_key(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

impl DimDate {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            date_key: date_key(date),
            date,
            date_string: date.format("%Y-%m-%d").to_string(),
            year: date.year(),
            quarter: (date.month() - 1) / 3 + 1,
            month: date.month(),
            month_name: date.format("%B").to_string(),
            week_of_year: date.iso_week().week(),
            week_in_month: week_in_month(date),
            day: date.day(),
            day_of_week: date.weekday().number_from_monday(),
            day_name: date.format("%A").to_string(),
            day_of_year: date.ordinal(),
            is_weekend: is_weekend(date),
        }
    }
}

/// Every calendar day in `[first, last]`, one row each.
pub fn calendar(first: NaiveDate, last: NaiveDate) -> Vec<DimDate> {
    first
        .iter_days()
        .take_while(|d| *d <= last)
        .map(DimDate::from_date)
        .collect()
}

fn bound((y, m, d): (i32, u32, u32)) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

pub fn default_calendar() -> Vec<DimDate> {
    calendar(bound(FIRST_DAY), bound(LAST_DAY))
}

/// Stage 5.
#[tracing::instrument(skip(layout))]
pub fn create_dim_date(layout: &Layout) -> Result<Vec<DimDate>> {
    let rows = default_calendar();
    let out = layout.dimension_file(TABLE);
    write_records(&out, HEADERS, &rows)?;
    info!(
        days = rows.len(),
        first = %bound(FIRST_DAY),
        last = %bound(LAST_DAY),
        output = %out.display(),
        "wrote DimDate"
    );
    Ok(rows)
}

pub fn load(layout: &Layout) -> Result<Vec<DimDate>> {
    read_records(&layout.dimension_file(TABLE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use tempfile::tempdir;

    #[test]
    fn covers_every_day_once() {
        let rows = default_calendar();
        // 2024 is a leap year
        assert_eq!(rows.len(), 366 + 365 + 365 + 365);
        assert_eq!(rows.first().unwrap().date_key, 20240101);
        assert_eq!(rows.last().unwrap().date_key, 20271231);
        for pair in rows.windows(2) {
            assert_eq!(pair[0].date.succ_opt(), Some(pair[1].date));
        }
    }

    #[test]
    fn attributes() {
        let d = DimDate::from_date(NaiveDate::from_ymd_opt(2025, 1, 4).unwrap());
        assert_eq!(d.date_key, 20250104);
        assert_eq!(d.quarter, 1);
        assert_eq!(d.month_name, "January");
        assert_eq!(d.day_name, "Saturday");
        assert_eq!(d.day_of_week, 6);
        assert!(d.is_weekend);
        assert_eq!(d.week_of_year, 1);
        assert_eq!(d.day_of_year, 4);

        let d = DimDate::from_date(NaiveDate::from_ymd_opt(2027, 12, 29).unwrap());
        assert_eq!(d.quarter, 4);
        assert_eq!(d.week_in_month, 5);
        assert!(!d.is_weekend);
    }

    #[test]
    fn written_table_reloads() -> Result<()> {
        let tmp = tempdir()?;
        let layout = PipelineConfig::rooted(tmp.path()).layout();
        let rows = create_dim_date(&layout)?;
        assert_eq!(load(&layout)?, rows);
        Ok(())
    }
}
