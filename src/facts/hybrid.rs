//! Hybrid-day flags.
//!
//! Offices run a three-day in-office week. Per office and Monday-start week
//! the three busiest eligible days are flagged. A weekday is eligible when
//! its month owns at least three weekdays of that week, so a week straddling
//! a month boundary only counts towards the month holding most of it.

use chrono::{Datelike, Days, NaiveDate};
use std::collections::{BTreeMap, HashSet};

use crate::dims::date::is_weekend;

pub const DAYS_PER_WEEK: usize = 3;
const MIN_WEEKDAYS_IN_MONTH: usize = 3;

pub fn week_start(date: NaiveDate) -> NaiveDate {
    let back = u64::from(date.weekday().num_days_from_monday());
    date.checked_sub_days(Days::new(back)).unwrap_or(date)
}

pub fn is_eligible(date: NaiveDate) -> bool {
    if is_weekend(date) {
        return false;
    }
    let start = week_start(date);
    let owned = (0..5u64)
        .filter_map(|i| start.checked_add_days(Days::new(i)))
        .filter(|d| d.month() == date.month())
        .count();
    owned >= MIN_WEEKDAYS_IN_MONTH
}

/// Flag the top days per (office, week) from daily office totals. Ties go to
/// the earlier date. With `include_empty` false, zero-attendance days are
/// never ranked.
pub fn hybrid_days(
    daily: &BTreeMap<(String, NaiveDate), u64>,
    include_empty: bool,
) -> HashSet<(String, NaiveDate)> {
    let mut weeks: BTreeMap<(&str, NaiveDate), Vec<(NaiveDate, u64)>> = BTreeMap::new();
    for ((location, date), total) in daily {
        if !is_eligible(*date) || (!include_empty && *total == 0) {
            continue;
        }
        weeks
            .entry((location.as_str(), week_start(*date)))
            .or_default()
            .push((*date, *total));
    }

    let mut flagged = HashSet::new();
    for ((location, _), mut days) in weeks {
        days.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        for (date, _) in days.into_iter().take(DAYS_PER_WEEK) {
            flagged.insert((location.to_string(), date));
        }
    }
    flagged
}
