use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

use crate::clean::CleanOccupancy;
use crate::config::Layout;
use crate::table::{read_records, write_records};

pub const TABLE: &str = "DimLineOfBusiness";
pub const HEADERS: &[&str] = &["lob_key", "line_of_business"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimLineOfBusiness {
    pub lob_key: u32,
    pub line_of_business: String,
}

pub fn build(occupancy: &[CleanOccupancy]) -> Vec<DimLineOfBusiness> {
    occupancy
        .iter()
        .map(|r| r.line_of_business.as_str())
        .filter(|s| !s.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(i, lob)| DimLineOfBusiness {
            lob_key: i as u32 + 1,
            line_of_business: lob.to_string(),
        })
        .collect()
}

/// Stage 7.
#[tracing::instrument(skip(layout))]
pub fn create_dim_line_of_business(layout: &Layout) -> Result<Vec<DimLineOfBusiness>> {
    let occupancy = crate::clean::occupancy::load(layout)?;
    let rows = build(&occupancy);
    let out = layout.dimension_file(TABLE);
    write_records(&out, HEADERS, &rows)?;
    for r in &rows {
        info!(key = r.lob_key, line_of_business = %r.line_of_business, "line of business");
    }
    info!(count = rows.len(), output = %out.display(), "wrote DimLineOfBusiness");
    Ok(rows)
}

pub fn load(layout: &Layout) -> Result<Vec<DimLineOfBusiness>> {
    read_records(&layout.dimension_file(TABLE))
}
