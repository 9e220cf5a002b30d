use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::config::{Category, Layout, PipelineConfig};
use crate::table::{
    date_parser::parse_date, read_records, utils::clean_str, utils::normalize_location,
    write_records, RawTable,
};

pub const USERNAME_ALIASES: &[&str] = &["Username", "User", "UserName", "Email"];
pub const LOCATION_ALIASES: &[&str] = &["OfficeLocation", "Location", "Office"];
pub const LOB_ALIASES: &[&str] = &["LineOfBusiness", "LOB"];
pub const CITY_ALIASES: &[&str] = &["OfficeLocationCityState", "CityStateCountryRegion"];
pub const LOGON_DATE_ALIASES: &[&str] = &["LogonDate", "Date"];

pub const HEADERS: &[&str] = &[
    "logon_date",
    "year",
    "month",
    "week_in_month",
    "day_of_week",
    "office_location",
    "city_state_country_region",
    "line_of_business",
    "attendance_count",
];

/// One row of `Occupancy_cleaned.csv`: how many distinct people badged into
/// an office on a day, per line of business.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CleanOccupancy {
    pub logon_date: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub week_in_month: u32,
    pub day_of_week: String,
    pub office_location: String,
    pub city_state_country_region: String,
    pub line_of_business: String,
    pub attendance_count: u64,
}

/// 1-based week of the month, week 1 starting on the 1st.
pub fn week_in_month(date: NaiveDate) -> u32 {
    (date.day() - 1) / 7 + 1
}

/// A single normalized raw observation. Field order is the sort order used
/// to make de-duplication independent of input row order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Observation {
    date: NaiveDate,
    location: String,
    lob: String,
    city: String,
    user: String,
}

/// Clean a combined occupancy table.
///
/// With a username column each person counts once per (day, office); without
/// one only exact-duplicate rows are dropped. Usernames never leave this
/// function.
pub fn clean_table(table: &RawTable, cfg: &PipelineConfig) -> Result<Vec<CleanOccupancy>> {
    let loc_idx = table
        .find_column(LOCATION_ALIASES)
        .with_context(|| format!("occupancy data has none of the columns {:?}", LOCATION_ALIASES))?;
    let date_idx = table
        .find_column(LOGON_DATE_ALIASES)
        .with_context(|| format!("occupancy data has none of the columns {:?}", LOGON_DATE_ALIASES))?;
    let user_idx = table.find_column(USERNAME_ALIASES);
    let lob_idx = table.find_column(LOB_ALIASES);
    let city_idx = table.find_column(CITY_ALIASES);
    if user_idx.is_none() {
        warn!("no username column; every non-duplicate row counts as one attendance");
    }

    let cell = |row: &[String], idx: Option<usize>| -> String {
        idx.map(|i| clean_str(&row[i])).unwrap_or_default()
    };

    let mut bad_dates = 0usize;
    let mut obs: Vec<Observation> = Vec::with_capacity(table.len());
    for row in &table.rows {
        let row = row.as_slice();
        let Some(date) = parse_date(&row[date_idx]) else {
            bad_dates += 1;
            continue;
        };
        obs.push(Observation {
            date,
            location: normalize_location(&row[loc_idx]),
            lob: cfg.canonical_lob(&cell(row, lob_idx)),
            city: cell(row, city_idx),
            user: cell(row, user_idx).to_lowercase(),
        });
    }
    if bad_dates > 0 {
        warn!(rows = bad_dates, "dropped occupancy rows with unparseable logon date");
    }

    let before = obs.len();
    obs.sort();
    obs.dedup();

    // one attendance per person per office per day
    let mut seen: BTreeSet<(String, NaiveDate, String)> = BTreeSet::new();
    obs.retain(|o| {
        o.user.is_empty() || seen.insert((o.user.clone(), o.date, o.location.clone()))
    });
    info!(before, after = obs.len(), "removed duplicate attendance rows");

    let mut counts: BTreeMap<(NaiveDate, String, String, String), u64> = BTreeMap::new();
    for o in obs {
        *counts.entry((o.date, o.location, o.lob, o.city)).or_default() += 1;
    }

    Ok(counts
        .into_iter()
        .map(|((date, location, lob, city), n)| CleanOccupancy {
            logon_date: date,
            year: date.year(),
            month: date.month(),
            week_in_month: week_in_month(date),
            day_of_week: date.format("%A").to_string(),
            office_location: location,
            city_state_country_region: city,
            line_of_business: lob,
            attendance_count: n,
        })
        .collect())
}

/// Stage 3.
#[tracing::instrument(skip(layout, cfg))]
pub fn clean_occupancy(layout: &Layout, cfg: &PipelineConfig) -> Result<Vec<CleanOccupancy>> {
    let input = layout.combined_file(Category::Occupancy);
    let table = RawTable::read_csv(&input)?;
    info!(rows = table.len(), columns = table.headers.len(), "loaded combined occupancy");

    let cleaned = clean_table(&table, cfg)?;
    let out = layout.cleaned_file(Category::Occupancy);
    write_records(&out, HEADERS, &cleaned)?;

    let lobs: BTreeSet<&str> = cleaned.iter().map(|r| r.line_of_business.as_str()).collect();
    info!(
        rows = cleaned.len(),
        lines_of_business = lobs.len(),
        output = %out.display(),
        "cleaned occupancy"
    );
    Ok(cleaned)
}

pub fn load(layout: &Layout) -> Result<Vec<CleanOccupancy>> {
    read_records(&layout.cleaned_file(Category::Occupancy))
}
