use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::config::Category;
use crate::period::Period;

/// `2025_01_occupancy.xlsx`
static FLAT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{4})_(\d{2})_([a-z]+)\.xlsx$").expect("static regex")
});

/// `2025-03` / `2025_03` anywhere in a legacy stem.
static STEM_YEAR_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)(\d{4})[-_](\d{2})(?:\D|$)").expect("static regex"));

static YEAR_DIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").expect("static regex"));

/// `2025-01_Occupancy.csv` / `2025-01_Occupancy_legacy.csv`
static CONVERTED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{4})-(\d{2})_([a-z]+?)(_legacy)?\.csv$").expect("static regex")
});

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Which naming convention a source spreadsheet follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceFormat {
    /// `<YYYY>_<MM>_<category>.xlsx`
    Flat,
    /// `<category>/<YYYY>/<anything>.xlsx`
    Legacy,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Flat => "flat",
            SourceFormat::Legacy => "legacy",
        }
    }
}

/// Classify a source file and, when the name allows it, infer its period.
/// A `None` period means the converter has to look inside the sheet.
pub fn classify_source(path: &Path, category: Category) -> (SourceFormat, Option<Period>) {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if let Some(caps) = FLAT_NAME.captures(&file_name) {
        if caps[3].parse::<Category>().ok() == Some(category) {
            let period = caps[1]
                .parse()
                .ok()
                .zip(caps[2].parse().ok())
                .and_then(|(y, m)| Period::new(y, m));
            if period.is_some() {
                return (SourceFormat::Flat, period);
            }
        }
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    if let Some(p) = year_month_in_stem(&stem) {
        return (SourceFormat::Legacy, Some(p));
    }

    let folder_year = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| YEAR_DIR.is_match(n))
        .and_then(|n| n.parse::<i32>().ok());

    let period = folder_year
        .zip(month_in_stem(&stem))
        .and_then(|(y, m)| Period::new(y, m));
    (SourceFormat::Legacy, period)
}

fn year_month_in_stem(stem: &str) -> Option<Period> {
    let caps = STEM_YEAR_MONTH.captures(stem)?;
    Period::new(caps[1].parse().ok()?, caps[2].parse().ok()?)
}

/// Month from an English month name (full or three-letter) in the stem,
/// e.g. `"March Deskcount"` or `"occupancy sept"`.
fn month_in_stem(stem: &str) -> Option<u32> {
    stem.split(|c: char| !c.is_ascii_alphabetic())
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_ascii_lowercase())
        .find_map(|token| {
            MONTHS
                .iter()
                .position(|m| *m == token || (token.len() >= 3 && m.starts_with(token.as_str())))
                .map(|i| i as u32 + 1)
        })
}

/// Output file name for a converted sheet.
pub fn converted_file_name(category: Category, period: Period, format: SourceFormat) -> String {
    match format {
        SourceFormat::Flat => format!("{}_{}.csv", period, category),
        SourceFormat::Legacy => format!("{}_{}_legacy.csv", period, category),
    }
}

/// Inverse of [`converted_file_name`]; `None` for anything else in the folder.
pub fn parse_converted_name(file_name: &str, category: Category) -> Option<(Period, SourceFormat)> {
    let caps = CONVERTED_NAME.captures(file_name)?;
    if caps[3].parse::<Category>().ok() != Some(category) {
        return None;
    }
    let period = Period::new(caps[1].parse().ok()?, caps[2].parse().ok()?)?;
    let format = if caps.get(4).is_some() {
        SourceFormat::Legacy
    } else {
        SourceFormat::Flat
    };
    Some((period, format))
}
