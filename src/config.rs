// src/config.rs

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::info;

/// Default config file picked up from the working directory when no
/// `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "occupancy.yaml";

/// The two spreadsheet families the pipeline ingests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Occupancy,
    Deskcount,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Occupancy, Category::Deskcount];

    /// Directory / file stem spelling, e.g. `Occupancy`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Occupancy => "Occupancy",
            Category::Deskcount => "Deskcount",
        }
    }
}

/// Case-insensitive, surrounding whitespace ignored.
impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "occupancy" => Ok(Category::Occupancy),
            "deskcount" => Ok(Category::Deskcount),
            _ => Err(anyhow!("unknown category '{}'", s)),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline settings, read from YAML. Every field has a default so an empty
/// (or missing) file is a valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root that every stage folder hangs off.
    pub data_dir: PathBuf,
    /// Raw spreadsheet tree, relative to `data_dir` unless absolute.
    pub inputs_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub publish_dir: PathBuf,
    /// Optional `office_location,RSF` CSV. Falls back to the RSF column of the
    /// cleaned deskcount data when unset.
    pub rsf_reference: Option<PathBuf>,
    pub default_line_of_business: String,
    pub line_of_business_aliases: BTreeMap<String, String>,
    /// Densify facts with zero-attendance rows (see `facts::densify`).
    pub fill_missing_days: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert("Pending".to_string(), "Corporate".to_string());
        aliases.insert(
            "Development & Construction".to_string(),
            "Development and Construction".to_string(),
        );
        Self {
            data_dir: PathBuf::from("."),
            inputs_dir: PathBuf::from("Inputs"),
            reports_dir: PathBuf::from("reports"),
            publish_dir: PathBuf::from("published"),
            rsf_reference: None,
            default_line_of_business: "Corporate".to_string(),
            line_of_business_aliases: aliases,
            fill_missing_days: false,
        }
    }
}

impl PipelineConfig {
    /// Parse a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Explicit file wins; otherwise `occupancy.yaml` in the working directory
    /// if present; otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                info!(config = %path.display(), "loading config");
                Self::from_file(path)
            }
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    info!(config = %fallback.display(), "loading config");
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Config rooted at `data_dir`, everything else default. Used by tests and
    /// by callers that only care about the folder.
    pub fn rooted(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn layout(&self) -> Layout {
        Layout {
            root: self.data_dir.clone(),
            inputs: self.inputs_dir.clone(),
        }
    }

    /// Resolve a configured path against `data_dir`.
    pub fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.data_dir.join(p)
        }
    }

    /// Canonical line-of-business for a raw value.
    pub fn canonical_lob(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return self.default_line_of_business.clone();
        }
        self.line_of_business_aliases
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }
}

/// Where every stage reads and writes. Each stage owns exactly one of these
/// output locations.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    inputs: PathBuf,
}

impl Layout {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn inputs_dir(&self) -> PathBuf {
        if self.inputs.is_absolute() {
            self.inputs.clone()
        } else {
            self.root.join(&self.inputs)
        }
    }

    pub fn converted_dir(&self, category: Category) -> PathBuf {
        self.root.join("converted_data").join(category.as_str())
    }

    pub fn combined_file(&self, category: Category) -> PathBuf {
        self.root
            .join("combined_data")
            .join(format!("{}.csv", category.as_str()))
    }

    pub fn cleaned_file(&self, category: Category) -> PathBuf {
        self.root
            .join("cleaned_data")
            .join(format!("{}_cleaned.csv", category.as_str()))
    }

    pub fn dimension_file(&self, name: &str) -> PathBuf {
        self.root.join("dimensions").join(format!("{}.csv", name))
    }

    pub fn fact_file(&self, name: &str) -> PathBuf {
        self.root.join("facts").join(format!("{}.csv", name))
    }
}
