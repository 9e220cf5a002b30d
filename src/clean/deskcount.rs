use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Category, Layout};
use crate::convert::{PERIOD_MONTH_COLUMN, PERIOD_YEAR_COLUMN};
use crate::period::Period;
use crate::table::{
    date_parser::parse_date,
    read_records,
    utils::{clean_str, normalize_location, parse_count},
    write_records, RawTable,
};

pub const LOCATION_ALIASES: &[&str] = &["OfficeLocation", "Location", "Office"];
pub const DESKCOUNT_ALIASES: &[&str] = &["Deskcount", "DeskCount", "Desks", "Capacity"];
pub const DATE_ALIASES: &[&str] = &["Date", "SnapshotDate"];
pub const RSF_ALIASES: &[&str] = &["RSF", "RentableSquareFeet"];

pub const HEADERS: &[&str] = &["date", "year", "month", "office_location", "deskcount", "RSF"];

/// One row of `Deskcount_cleaned.csv`: a desk-capacity snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CleanDeskcount {
    pub date: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub office_location: String,
    pub deskcount: Option<u64>,
    #[serde(rename = "RSF")]
    pub rsf: Option<u64>,
}

/// Floor area, rounded to whole square feet.
fn parse_area(raw: &str) -> Option<u64> {
    let s = clean_str(raw).replace(',', "");
    let f: f64 = s.parse().ok()?;
    (f.is_finite() && f >= 0.0).then(|| f.round() as u64)
}

/// Snapshot date of a row: its own date column, else the first day of the
/// period the converter tagged it with.
fn row_date(row: &[String], date_idx: Option<usize>, period_idx: Option<(usize, usize)>) -> Option<NaiveDate> {
    if let Some(d) = date_idx.and_then(|i| parse_date(&row[i])) {
        return Some(d);
    }
    let (yi, mi) = period_idx?;
    let year = clean_str(&row[yi]).parse().ok()?;
    let month = clean_str(&row[mi]).parse().ok()?;
    Period::new(year, month)?.first_day()
}

pub fn clean_table(table: &RawTable) -> Result<Vec<CleanDeskcount>> {
    let loc_idx = table
        .find_column(LOCATION_ALIASES)
        .with_context(|| format!("deskcount data has none of the columns {:?}", LOCATION_ALIASES))?;
    let desk_idx = table
        .find_column(DESKCOUNT_ALIASES)
        .with_context(|| format!("deskcount data has none of the columns {:?}", DESKCOUNT_ALIASES))?;
    let date_idx = table.find_column(DATE_ALIASES);
    let rsf_idx = table.find_column(RSF_ALIASES);
    let period_idx = table
        .find_column(&[PERIOD_YEAR_COLUMN])
        .zip(table.find_column(&[PERIOD_MONTH_COLUMN]));

    let mut undated = 0usize;
    let mut bad_counts = 0usize;
    let mut out: Vec<CleanDeskcount> = Vec::with_capacity(table.len());
    for row in &table.rows {
        let Some(date) = row_date(row, date_idx, period_idx) else {
            undated += 1;
            continue;
        };
        let raw_count = &row[desk_idx];
        let deskcount = parse_count(raw_count);
        if deskcount.is_none() && !clean_str(raw_count).is_empty() {
            bad_counts += 1;
        }
        out.push(CleanDeskcount {
            date,
            year: date.year(),
            month: date.month(),
            office_location: normalize_location(&row[loc_idx]),
            deskcount,
            rsf: rsf_idx.and_then(|i| parse_area(&row[i])),
        });
    }
    if undated > 0 {
        warn!(rows = undated, "dropped deskcount rows without a usable date");
    }
    if bad_counts > 0 {
        warn!(rows = bad_counts, "deskcount values that are not whole numbers were left empty");
    }

    out.sort();
    out.dedup();
    Ok(out)
}

/// Stage 4.
#[tracing::instrument(skip(layout))]
pub fn clean_deskcount(layout: &Layout) -> Result<Vec<CleanDeskcount>> {
    let input = layout.combined_file(Category::Deskcount);
    let table = RawTable::read_csv(&input)?;
    info!(rows = table.len(), columns = table.headers.len(), "loaded combined deskcount");

    let cleaned = clean_table(&table)?;
    let out = layout.cleaned_file(Category::Deskcount);
    write_records(&out, HEADERS, &cleaned)?;

    let nulls = cleaned.iter().filter(|r| r.deskcount.is_none()).count();
    info!(
        rows = cleaned.len(),
        null_deskcount = nulls,
        output = %out.display(),
        "cleaned deskcount"
    );
    Ok(cleaned)
}

pub fn load(layout: &Layout) -> Result<Vec<CleanDeskcount>> {
    read_records(&layout.cleaned_file(Category::Deskcount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::test_util::write_csv;
    use tempfile::tempdir;

    #[test]
    fn normalizes_and_dedups() -> Result<()> {
        let tmp = tempdir()?;
        let layout = PipelineConfig::rooted(tmp.path()).layout();
        write_csv(
            &layout.combined_file(Category::Deskcount),
            &[
                "OfficeLocation,Deskcount,Date,RSF,Notes,period_year,period_month",
                "Austin ,\"1,200\",2025-01-31,\"25,000.4\",x,2025,1",
                "Austin,1200.0,2025-01-31,25000,y,2025,1",
                "Boston,n/a,2025-01-31,,z,2025,1",
                // no snapshot date: first day of the tagged period
                "Chicago,40,,,w,2025,2",
                "Denver,5,,,w,,",
            ],
        )?;
        let rows = clean_deskcount(&layout)?;
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].office_location, "Austin");
        assert_eq!(rows[0].deskcount, Some(1200));
        assert_eq!(rows[0].rsf, Some(25000));
        assert_eq!(rows[1].office_location, "Boston");
        assert_eq!(rows[1].deskcount, None);
        assert_eq!(rows[2].office_location, "Chicago");
        assert_eq!(rows[2].date, NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());

        assert_eq!(load(&layout)?, rows);
        Ok(())
    }

    #[test]
    fn missing_deskcount_column_is_fatal() {
        let mut t = RawTable::new(vec!["OfficeLocation".into(), "Date".into()]);
        t.push_row(vec!["A".into(), "2025-01-01".into()]);
        assert!(clean_table(&t).is_err());
    }
}
