// src/pipeline.rs
//
// Stage registry, plan selection and the sequential runner.

use anyhow::{bail, Context, Result};
use std::{fs, path::Path, time::Instant};
use tracing::{error, info, warn};

use crate::config::{Category, Layout, PipelineConfig};
use crate::{clean, combine, convert, dims, facts};

pub const FIRST_STAGE: u8 = 1;
pub const LAST_STAGE: u8 = 9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stage {
    pub number: u8,
    pub name: &'static str,
}

pub const STAGES: [Stage; 9] = [
    Stage { number: 1, name: "convert spreadsheets" },
    Stage { number: 2, name: "combine converted files" },
    Stage { number: 3, name: "clean occupancy" },
    Stage { number: 4, name: "clean deskcount" },
    Stage { number: 5, name: "build DimDate" },
    Stage { number: 6, name: "build DimLocation" },
    Stage { number: 7, name: "build DimLineOfBusiness" },
    Stage { number: 8, name: "build FactOccupancy" },
    Stage { number: 9, name: "build FactOccupancyAggregated" },
];

pub fn stage(number: u8) -> Option<Stage> {
    STAGES.iter().copied().find(|s| s.number == number)
}

/// Which stages to run. `only`, when non-empty, replaces the range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub from: u8,
    pub to: u8,
    pub only: Vec<u8>,
    pub skip: Vec<u8>,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            from: FIRST_STAGE,
            to: LAST_STAGE,
            only: Vec::new(),
            skip: Vec::new(),
        }
    }
}

impl Selection {
    /// Stage numbers to run, ascending.
    pub fn plan(&self) -> Result<Vec<u8>> {
        let all = [self.from, self.to]
            .into_iter()
            .chain(self.only.iter().copied())
            .chain(self.skip.iter().copied());
        for n in all {
            if stage(n).is_none() {
                bail!("no stage {} (stages are {}..={})", n, FIRST_STAGE, LAST_STAGE);
            }
        }
        if self.from > self.to {
            bail!("--from {} is after --to {}", self.from, self.to);
        }

        let mut plan: Vec<u8> = if self.only.is_empty() {
            (self.from..=self.to).collect()
        } else {
            self.only.clone()
        };
        plan.sort_unstable();
        plan.dedup();
        plan.retain(|n| !self.skip.contains(n));
        Ok(plan)
    }
}

fn has_files_with_extension(dir: &Path, ext: &str) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries.filter_map(Result::ok).any(|e| {
                e.path()
                    .extension()
                    .and_then(|x| x.to_str())
                    .is_some_and(|x| x.eq_ignore_ascii_case(ext))
            })
        })
        .unwrap_or(false)
}

fn require_file(missing: &mut Vec<String>, path: &Path) {
    if !path.is_file() {
        missing.push(path.display().to_string());
    }
}

/// What stage `number` still needs on disk. Empty means ready to run.
pub fn missing_prerequisites(cfg: &PipelineConfig, layout: &Layout, number: u8) -> Vec<String> {
    let mut missing = Vec::new();
    let cleaned_occ = layout.cleaned_file(Category::Occupancy);
    let cleaned_desk = layout.cleaned_file(Category::Deskcount);
    match number {
        1 => {
            let inputs = layout.inputs_dir();
            if !inputs.is_dir() {
                missing.push(format!("{} (inputs directory)", inputs.display()));
            } else {
                for category in Category::ALL {
                    let found = convert::discover_sources(&inputs, category)
                        .map(|s| !s.is_empty())
                        .unwrap_or(false);
                    if !found {
                        missing.push(format!("{}/{}/**/*.xlsx", inputs.display(), category));
                    }
                }
            }
        }
        2 => {
            for category in Category::ALL {
                let dir = layout.converted_dir(category);
                if !has_files_with_extension(&dir, "csv") {
                    missing.push(format!("{}/*.csv", dir.display()));
                }
            }
        }
        3 => require_file(&mut missing, &layout.combined_file(Category::Occupancy)),
        4 => require_file(&mut missing, &layout.combined_file(Category::Deskcount)),
        5 => {}
        6 => {
            require_file(&mut missing, &cleaned_occ);
            require_file(&mut missing, &cleaned_desk);
            if let Some(reference) = &cfg.rsf_reference {
                require_file(&mut missing, &cfg.resolve(reference));
            }
        }
        7 => require_file(&mut missing, &cleaned_occ),
        8 => {
            require_file(&mut missing, &cleaned_occ);
            require_file(&mut missing, &cleaned_desk);
            require_file(&mut missing, &layout.dimension_file(dims::date::TABLE));
            require_file(&mut missing, &layout.dimension_file(dims::location::TABLE));
            require_file(&mut missing, &layout.dimension_file(dims::lob::TABLE));
        }
        9 => {
            require_file(&mut missing, &cleaned_occ);
            require_file(&mut missing, &cleaned_desk);
            require_file(&mut missing, &layout.dimension_file(dims::date::TABLE));
            require_file(&mut missing, &layout.dimension_file(dims::location::TABLE));
        }
        _ => missing.push(format!("unknown stage {}", number)),
    }
    missing
}

/// Run one stage, assuming its prerequisites hold.
pub fn run_stage(cfg: &PipelineConfig, layout: &Layout, number: u8) -> Result<()> {
    match number {
        1 => {
            let report = convert::convert_all(layout)?;
            if report.converted.is_empty() {
                warn!("no spreadsheet could be converted");
            }
        }
        2 => combine::combine_all(layout)?,
        3 => {
            clean::clean_occupancy(layout, cfg)?;
        }
        4 => {
            clean::clean_deskcount(layout)?;
        }
        5 => {
            dims::create_dim_date(layout)?;
        }
        6 => {
            dims::create_dim_location(layout, cfg)?;
        }
        7 => {
            dims::create_dim_line_of_business(layout)?;
        }
        8 => {
            facts::create_fact_occupancy(layout, cfg)?;
        }
        9 => {
            facts::create_fact_occupancy_aggregated(layout, cfg)?;
        }
        n => bail!("no stage {}", n),
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Dry run: the stages that would have run.
    Planned(Vec<u8>),
    Completed(Vec<u8>),
    /// Stopped before `stage` because its inputs are missing.
    Blocked { stage: u8, missing: Vec<String> },
}

/// Run `plan` in order, stopping at the first stage whose inputs are missing.
/// A stage that fails returns the error; earlier outputs stay on disk.
#[tracing::instrument(skip(cfg))]
pub fn run(cfg: &PipelineConfig, plan: &[u8], dry_run: bool) -> Result<RunOutcome> {
    let layout = cfg.layout();
    for &n in plan {
        if stage(n).is_none() {
            bail!("no stage {}", n);
        }
    }

    if dry_run {
        for s in plan.iter().filter_map(|n| stage(*n)) {
            info!(stage = s.number, name = s.name, "would run");
        }
        return Ok(RunOutcome::Planned(plan.to_vec()));
    }

    let started = Instant::now();
    let mut done = Vec::with_capacity(plan.len());
    for s in plan.iter().filter_map(|n| stage(*n)) {
        let missing = missing_prerequisites(cfg, &layout, s.number);
        if !missing.is_empty() {
            error!(stage = s.number, name = s.name, ?missing, "prerequisites missing; stopping");
            return Ok(RunOutcome::Blocked {
                stage: s.number,
                missing,
            });
        }

        info!(stage = s.number, name = s.name, "starting stage");
        let t0 = Instant::now();
        run_stage(cfg, &layout, s.number)
            .with_context(|| format!("stage {} ({}) failed", s.number, s.name))?;
        info!(
            stage = s.number,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "stage finished"
        );
        done.push(s.number);
    }
    info!(
        stages = done.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "pipeline finished"
    );
    Ok(RunOutcome::Completed(done))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{FactOccupancy, FactOccupancyAggregated};
    use crate::test_util::write_xlsx;
    use crate::validate;
    use tempfile::tempdir;

    #[test]
    fn plan_selection() -> Result<()> {
        assert_eq!(Selection::default().plan()?, (1..=9).collect::<Vec<u8>>());

        let range = Selection { from: 3, to: 6, ..Selection::default() };
        assert_eq!(range.plan()?, vec![3, 4, 5, 6]);

        let skipping = Selection { skip: vec![5, 7], ..Selection::default() };
        assert_eq!(skipping.plan()?, vec![1, 2, 3, 4, 6, 8, 9]);

        let only = Selection {
            only: vec![8, 2, 8],
            skip: vec![2],
            ..Selection::default()
        };
        assert_eq!(only.plan()?, vec![8]);

        assert!(Selection { from: 7, to: 2, ..Selection::default() }.plan().is_err());
        assert!(Selection { only: vec![10], ..Selection::default() }.plan().is_err());
        Ok(())
    }

    #[test]
    fn missing_inputs_block_the_run() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = PipelineConfig::rooted(tmp.path());

        let outcome = run(&cfg, &[1, 2], false)?;
        match outcome {
            RunOutcome::Blocked { stage, missing } => {
                assert_eq!(stage, 1);
                assert!(!missing.is_empty());
            }
            other => panic!("expected blocked run, got {:?}", other),
        }

        // stage 5 has no inputs, stage 8 needs the others
        let outcome = run(&cfg, &[5, 8], false)?;
        assert!(matches!(outcome, RunOutcome::Blocked { stage: 8, .. }));
        assert!(cfg.layout().dimension_file(dims::date::TABLE).is_file());
        Ok(())
    }

    #[test]
    fn dry_run_touches_nothing() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = PipelineConfig::rooted(tmp.path());
        let outcome = run(&cfg, &[5], true)?;
        assert_eq!(outcome, RunOutcome::Planned(vec![5]));
        assert!(!cfg.layout().dimension_file(dims::date::TABLE).exists());
        Ok(())
    }

    #[test]
    fn end_to_end_single_office() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = PipelineConfig::rooted(tmp.path());
        let layout = cfg.layout();
        let inputs = layout.inputs_dir();

        write_xlsx(
            &inputs.join("Deskcount/2025_01_deskcount.xlsx"),
            &["OfficeLocation", "Deskcount"],
            &[vec!["A", "10"]],
        )?;
        write_xlsx(
            &inputs.join("Occupancy/2025_01_occupancy.xlsx"),
            &["Username", "OfficeLocation", "LineOfBusiness", "LogonDate"],
            &[
                vec!["u1", "A", "X", "2025-01-02"],
                vec!["u2", "A", "X", "2025-01-02"],
                vec!["u3", "A", "Y", "2025-01-02"],
            ],
        )?;

        let plan = Selection::default().plan()?;
        assert_eq!(run(&cfg, &plan, false)?, RunOutcome::Completed(plan.clone()));

        let detail: Vec<FactOccupancy> = facts::occupancy::load(&layout)?;
        let got: Vec<(&str, u64, Option<u64>, Option<f64>)> = detail
            .iter()
            .map(|r| {
                (
                    r.line_of_business.as_str(),
                    r.attendance_count,
                    r.deskcount,
                    r.occupancy_rate,
                )
            })
            .collect();
        assert_eq!(
            got,
            vec![("X", 2, Some(10), Some(0.2)), ("Y", 1, Some(10), Some(0.1))]
        );
        assert!(detail.iter().all(|r| r.date_key == Some(20250102)));
        assert!(detail.iter().all(|r| r.location_key == Some(1)));

        let agg: Vec<FactOccupancyAggregated> = facts::aggregated::load(&layout)?;
        assert_eq!(agg.len(), 1);
        assert_eq!(agg[0].attendance_count, 3);
        assert_eq!(agg[0].occupancy_rate, Some(0.3));

        let reports = tmp.path().join("reports");
        let report = validate::validate(&layout, &reports)?;
        assert!(report.merge_issues.is_empty());
        assert!(report.over_capacity.is_empty());
        let merge_csv = fs::read_to_string(reports.join(validate::MERGE_ISSUES_FILE))?;
        assert_eq!(
            merge_csv.trim_end(),
            "date,office_location,line_of_business,attendance_count,deskcount"
        );
        assert!(reports.join(validate::SUMMARY_FILE).is_file());
        assert!(reports.join(validate::BY_LOCATION_FILE).is_file());
        Ok(())
    }
}
