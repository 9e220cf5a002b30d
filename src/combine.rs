// src/combine.rs
//
// Stage 2: per-month converted CSVs → one combined table per category.

use anyhow::{bail, Context, Result};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::config::{Category, Layout};
use crate::convert::naming::{parse_converted_name, SourceFormat};
use crate::period::Period;
use crate::table::RawTable;

/// The converted files available for one period.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeriodFiles {
    pub flat: Option<PathBuf>,
    pub legacy: Option<PathBuf>,
}

impl PeriodFiles {
    /// New-format output wins; the legacy file is excluded, not merged.
    pub fn chosen(&self) -> Option<&Path> {
        self.flat.as_deref().or(self.legacy.as_deref())
    }
}

/// Group a category's converted files by period, ascending.
pub fn select_files(dir: &Path, category: Category) -> Result<BTreeMap<Period, PeriodFiles>> {
    let mut by_period: BTreeMap<Period, PeriodFiles> = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(by_period);
    }
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    for path in entries {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match parse_converted_name(&name, category) {
            Some((period, SourceFormat::Flat)) => {
                by_period.entry(period).or_default().flat = Some(path);
            }
            Some((period, SourceFormat::Legacy)) => {
                by_period.entry(period).or_default().legacy = Some(path);
            }
            None => debug!(file = %path.display(), "not a converted file, ignoring"),
        }
    }
    Ok(by_period)
}

/// Combine one category. Fails when there is nothing to combine.
#[tracing::instrument(skip(layout))]
pub fn combine_category(layout: &Layout, category: Category) -> Result<RawTable> {
    let dir = layout.converted_dir(category);
    let groups = select_files(&dir, category)?;
    if groups.is_empty() {
        bail!("No converted CSV files found for {} in {}", category, dir.display());
    }

    let mut tables = Vec::with_capacity(groups.len());
    for (period, files) in &groups {
        if let (Some(flat), Some(legacy)) = (&files.flat, &files.legacy) {
            info!(
                %period,
                kept = %flat.display(),
                dropped = %legacy.display(),
                "new-format file supersedes legacy file"
            );
        }
        let Some(path) = files.chosen() else { continue };
        let t = RawTable::read_csv(path)?;
        if t.is_empty() {
            warn!(file = %path.display(), "converted file has no rows");
        }
        tables.push(t);
    }

    let combined = RawTable::concat(tables);
    let out = layout.combined_file(category);
    combined.write_csv(&out)?;
    info!(
        %category,
        periods = groups.len(),
        rows = combined.len(),
        output = %out.display(),
        "combined"
    );
    Ok(combined)
}

/// Stage 2 for every category.
pub fn combine_all(layout: &Layout) -> Result<()> {
    for category in Category::ALL {
        combine_category(layout, category)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::test_util::write_csv;
    use tempfile::tempdir;

    #[test]
    fn new_format_wins_and_periods_are_ordered() -> Result<()> {
        let tmp = tempdir()?;
        let layout = PipelineConfig::rooted(tmp.path()).layout();
        let dir = layout.converted_dir(Category::Occupancy);

        write_csv(&dir.join("2025-02_Occupancy.csv"), &["OfficeLocation,n", "Feb,1"])?;
        write_csv(
            &dir.join("2025-01_Occupancy_legacy.csv"),
            &["OfficeLocation,n", "JanOld,1", "JanOld,2"],
        )?;
        write_csv(&dir.join("2025-01_Occupancy.csv"), &["OfficeLocation,n", "JanNew,9"])?;
        write_csv(
            &dir.join("2024-12_Occupancy_legacy.csv"),
            &["OfficeLocation,n,extra", "Dec,3,x"],
        )?;
        write_csv(&dir.join("README.csv"), &["ignored", "yes"])?;

        let combined = combine_category(&layout, Category::Occupancy)?;
        assert_eq!(combined.headers, vec!["OfficeLocation", "n", "extra"]);
        let locs: Vec<&str> = combined.column(0).collect();
        assert_eq!(locs, vec!["Dec", "JanNew", "Feb"]);

        let on_disk = RawTable::read_csv(&layout.combined_file(Category::Occupancy))?;
        assert_eq!(on_disk, combined);
        Ok(())
    }

    #[test]
    fn period_with_both_equals_new_file_alone() -> Result<()> {
        let tmp = tempdir()?;
        let layout = PipelineConfig::rooted(tmp.path()).layout();
        let dir = layout.converted_dir(Category::Deskcount);
        write_csv(&dir.join("2025-03_Deskcount.csv"), &["OfficeLocation,Deskcount", "A,10", "B,5"])?;
        write_csv(&dir.join("2025-03_Deskcount_legacy.csv"), &["OfficeLocation,Deskcount", "A,99"])?;

        let combined = combine_category(&layout, Category::Deskcount)?;
        let alone = RawTable::read_csv(&dir.join("2025-03_Deskcount.csv"))?;
        assert_eq!(combined, alone);
        Ok(())
    }

    #[test]
    fn empty_category_is_fatal() -> Result<()> {
        let tmp = tempdir()?;
        let layout = PipelineConfig::rooted(tmp.path()).layout();
        assert!(combine_category(&layout, Category::Deskcount).is_err());
        Ok(())
    }
}
