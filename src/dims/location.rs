use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};
use tracing::{info, warn};

use crate::clean::{CleanDeskcount, CleanOccupancy};
use crate::config::{Layout, PipelineConfig};
use crate::table::{
    read_records,
    utils::{clean_str, normalize_location},
    write_records, RawTable,
};

pub const TABLE: &str = "DimLocation";
pub const HEADERS: &[&str] = &["location_key", "office_location", "RSF"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimLocation {
    pub location_key: u32,
    pub office_location: String,
    #[serde(rename = "RSF")]
    pub rsf: u64,
}

/// Floor area per location from an `office_location,RSF` reference CSV.
pub fn load_rsf_reference(path: &Path) -> Result<BTreeMap<String, u64>> {
    let table = RawTable::read_csv(path)?;
    let loc = table
        .find_column(&["OfficeLocation", "Location"])
        .with_context(|| format!("{} has no office_location column", path.display()))?;
    let rsf = table
        .find_column(&["RSF", "RentableSquareFeet"])
        .with_context(|| format!("{} has no RSF column", path.display()))?;

    let mut out = BTreeMap::new();
    for row in &table.rows {
        let name = normalize_location(&row[loc]);
        let area = clean_str(&row[rsf]).replace(',', "").parse::<f64>().ok();
        match area {
            Some(a) if !name.is_empty() && a.is_finite() && a >= 0.0 => {
                out.insert(name, a.round() as u64);
            }
            _ => warn!(file = %path.display(), location = %name, "skipping unusable RSF reference row"),
        }
    }
    Ok(out)
}

/// Latest non-null RSF per location in the deskcount snapshots.
pub fn rsf_from_deskcount(desk: &[CleanDeskcount]) -> BTreeMap<String, u64> {
    let mut latest: BTreeMap<String, (chrono::NaiveDate, u64)> = BTreeMap::new();
    for r in desk {
        let Some(area) = r.rsf else { continue };
        let entry = latest
            .entry(r.office_location.clone())
            .or_insert((r.date, area));
        if r.date >= entry.0 {
            *entry = (r.date, area);
        }
    }
    latest.into_iter().map(|(k, (_, v))| (k, v)).collect()
}

/// Distinct locations across both cleaned tables, alphabetical, keyed 1..n.
/// Locations absent from `rsf` get an area of 0.
pub fn build(
    occupancy: &[CleanOccupancy],
    desk: &[CleanDeskcount],
    rsf: &BTreeMap<String, u64>,
) -> Vec<DimLocation> {
    let names: BTreeSet<&str> = occupancy
        .iter()
        .map(|r| r.office_location.as_str())
        .chain(desk.iter().map(|r| r.office_location.as_str()))
        .filter(|s| !s.is_empty())
        .collect();

    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| DimLocation {
            location_key: i as u32 + 1,
            office_location: name.to_string(),
            rsf: rsf.get(name).copied().unwrap_or(0),
        })
        .collect()
}

/// Stage 6.
#[tracing::instrument(skip(layout, cfg))]
pub fn create_dim_location(layout: &Layout, cfg: &PipelineConfig) -> Result<Vec<DimLocation>> {
    let occupancy = crate::clean::occupancy::load(layout)?;
    let desk = crate::clean::deskcount::load(layout)?;

    let rsf = match &cfg.rsf_reference {
        Some(p) => {
            let path = cfg.resolve(p);
            info!(reference = %path.display(), "using RSF reference table");
            load_rsf_reference(&path)?
        }
        None => rsf_from_deskcount(&desk),
    };

    let rows = build(&occupancy, &desk, &rsf);
    let missing = rows.iter().filter(|r| !rsf.contains_key(&r.office_location)).count();
    if missing > 0 {
        warn!(locations = missing, "locations without RSF data default to 0");
    }

    let out = layout.dimension_file(TABLE);
    write_records(&out, HEADERS, &rows)?;
    info!(
        locations = rows.len(),
        total_rsf = rows.iter().map(|r| r.rsf).sum::<u64>(),
        output = %out.display(),
        "wrote DimLocation"
    );
    Ok(rows)
}

pub fn load(layout: &Layout) -> Result<Vec<DimLocation>> {
    read_records(&layout.dimension_file(TABLE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::write_csv;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn desk(loc: &str, date: (i32, u32, u32), rsf: Option<u64>) -> CleanDeskcount {
        let d = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        CleanDeskcount {
            date: d,
            year: date.0,
            month: date.1,
            office_location: loc.to_string(),
            deskcount: Some(10),
            rsf,
        }
    }

    fn occ(loc: &str) -> CleanOccupancy {
        let d = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        CleanOccupancy {
            logon_date: d,
            year: 2025,
            month: 1,
            week_in_month: 1,
            day_of_week: "Thursday".into(),
            office_location: loc.to_string(),
            city_state_country_region: String::new(),
            line_of_business: "X".into(),
            attendance_count: 1,
        }
    }

    #[test]
    fn union_of_locations_with_unique_keys() {
        let o = vec![occ("Boston"), occ("Austin"), occ("Austin"), occ("")];
        let d = vec![
            desk("Chicago", (2025, 1, 1), Some(100)),
            desk("Austin", (2025, 1, 1), Some(500)),
            desk("Austin", (2025, 2, 1), Some(550)),
            desk("Austin", (2024, 12, 1), Some(450)),
        ];
        let rsf = rsf_from_deskcount(&d);
        let dim = build(&o, &d, &rsf);
        let names: Vec<&str> = dim.iter().map(|r| r.office_location.as_str()).collect();
        assert_eq!(names, vec!["Austin", "Boston", "Chicago"]);
        let keys: Vec<u32> = dim.iter().map(|r| r.location_key).collect();
        assert_eq!(keys, vec![1, 2, 3]);
        assert_eq!(dim[0].rsf, 550);
        assert_eq!(dim[1].rsf, 0);
        assert_eq!(dim[2].rsf, 100);
    }

    #[test]
    fn reference_file_overrides_deskcount_rsf() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("rsf.csv");
        write_csv(&path, &["Office Location,RSF", "Austin.,\"12,000\"", "Nowhere,abc"])?;
        let rsf = load_rsf_reference(&path)?;
        assert_eq!(rsf.get("Austin"), Some(&12000));
        assert_eq!(rsf.len(), 1);
        Ok(())
    }
}
