use chrono::{Duration, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::table::utils::clean_str;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%b-%Y", "%d %b %Y", "%b %d, %Y"];

// US exports with a two-digit year, e.g. `1/2/25`
const SHORT_YEAR_DATE_FORMATS: &[&str] = &["%m/%d/%y"];
const SHORT_YEAR_DATETIME_FORMATS: &[&str] = &[
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
    "%m/%d/%y %I:%M:%S %p",
    "%m/%d/%y %I:%M %p",
];

// chrono's `%Y` takes any digit count, so the four-digit formats only run
// when a standalone four-digit group is present.
static FOUR_DIGIT_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)\d{4}(?:\D|$)").expect("static regex"));

/// Excel's day zero for the 1900 date system (with the leap-year bug folded in).
fn excel_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default()
}

/// Convert an Excel serial day number (e.g. `45659`) to a date. Only values
/// in a sane window (1954..2119) are accepted so plain counts are not
/// mistaken for dates.
pub fn from_excel_serial(serial: f64) -> Option<NaiveDate> {
    if !(20_000.0..80_000.0).contains(&serial) {
        return None;
    }
    excel_epoch().checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// Best-effort parse of the date formats seen in occupancy/deskcount sheets:
/// ISO dates and timestamps, US `m/d/Y` and `m/d/y`, `d-Mon-Y`, and Excel
/// serials.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = clean_str(raw);
    if s.is_empty() {
        return None;
    }
    let (dates, datetimes) = if FOUR_DIGIT_YEAR.is_match(&s) {
        (DATE_FORMATS, DATETIME_FORMATS)
    } else {
        (SHORT_YEAR_DATE_FORMATS, SHORT_YEAR_DATETIME_FORMATS)
    };
    for fmt in dates {
        if let Ok(d) = NaiveDate::parse_from_str(&s, fmt) {
            return Some(d);
        }
    }
    for fmt in datetimes {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(dt.date());
        }
    }
    // "2025-01-02 00:00:00+00:00" and friends
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(&s) {
        return Some(dt.date_naive());
    }
    if let Ok(serial) = s.parse::<f64>() {
        return from_excel_serial(serial);
    }
    None
}
