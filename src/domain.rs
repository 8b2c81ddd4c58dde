use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ImportError;

/// Field delimiter shared by every tabular file the importer reads or writes.
pub const VALUE_DELIMITER: char = '\t';

/// Header of the MAF column carrying tumor sample identifiers.
pub const MUTATION_CASE_ID_COLUMN: &str = "Tumor_Sample_Barcode";

/// Correlate-file column holding methylation probe identifiers.
pub const CORRELATE_PROBE_COLUMN: &str = "Meth_Probe";

pub const FILE_URL_PREFIX: &str = "file://";

pub const MAF_FILE_EXT: &str = "maf";

pub const TUMOR_TYPE_TAG: &str = "<TUMOR_TYPE>";
pub const TUMOR_TYPE_NAME_TAG: &str = "<TUMOR_TYPE_NAME>";
pub const CANCER_STUDY_TAG: &str = "<CANCER_STUDY>";
pub const NUM_GENES_TAG: &str = "<NUM_GENES>";
pub const NUM_CASES_TAG: &str = "<NUM_CASES>";

static OLDER_BUILD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)36|^hg18$").expect("static regex"));
static NEWER_BUILD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)37|^hg19$").expect("static regex"));

/// Reference genome build named by the build column of a mutation file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenomeBuild {
    Hg18,
    Hg19,
    Unknown(String),
}

impl GenomeBuild {
    pub fn from_token(token: &str) -> Self {
        let token = token.trim();
        if OLDER_BUILD.is_match(token) {
            GenomeBuild::Hg18
        } else if NEWER_BUILD.is_match(token) {
            GenomeBuild::Hg19
        } else {
            GenomeBuild::Unknown(token.to_string())
        }
    }

    pub fn needs_liftover(&self) -> bool {
        matches!(self, GenomeBuild::Hg18)
    }
}

impl fmt::Display for GenomeBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenomeBuild::Hg18 => write!(f, "hg18"),
            GenomeBuild::Hg19 => write!(f, "hg19"),
            GenomeBuild::Unknown(token) if token.is_empty() => write!(f, "unknown"),
            GenomeBuild::Unknown(token) => write!(f, "unknown ({token})"),
        }
    }
}

/// A source file given either as a plain path or as a `file://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocation(PathBuf);

impl FileLocation {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn to_url(&self) -> String {
        format!("{FILE_URL_PREFIX}{}", self.0.display())
    }
}

impl From<&Path> for FileLocation {
    fn from(path: &Path) -> Self {
        Self(path.to_path_buf())
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl FromStr for FileLocation {
    type Err = ImportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let path = match trimmed.strip_prefix("file:") {
            Some(rest) => {
                let rest = rest.strip_prefix("//").unwrap_or(rest);
                // file://localhost/path and file:///path both name /path
                let rest = rest.strip_prefix("localhost").unwrap_or(rest);
                if !rest.starts_with('/') {
                    return Err(ImportError::InvalidLocation(value.to_string()));
                }
                rest
            }
            None => trimmed,
        };
        if path.is_empty() {
            return Err(ImportError::InvalidLocation(value.to_string()));
        }
        Ok(Self(PathBuf::from(path)))
    }
}

/// Name of the logical data file wanted out of a source, possibly carrying
/// the `<TUMOR_TYPE>` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFilename(String);

impl DataFilename {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn resolve(&self, tumor_type_label: Option<&str>) -> String {
        match tumor_type_label {
            Some(label) if self.0.contains(TUMOR_TYPE_TAG) => self.0.replace(TUMOR_TYPE_TAG, label),
            _ => self.0.clone(),
        }
    }
}

impl fmt::Display for DataFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cancer study identifier in `tumor/center` form, e.g. `brca/tcga`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudyId(String);

impl StudyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative directory of the study inside staging and override areas.
    pub fn study_path(&self) -> &str {
        &self.0
    }

    /// Identifier written into metadata files (`brca_tcga`).
    pub fn stable_identifier(&self) -> String {
        self.0.replace('/', "_")
    }

    pub fn tumor_type(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for StudyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stable_identifier())
    }
}

impl FromStr for StudyId {
    type Err = ImportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let parts = normalized.split('/').collect::<Vec<_>>();
        let is_valid = parts.len() >= 2
            && parts.iter().all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
            });
        if !is_valid {
            return Err(ImportError::InvalidStudyId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RowArity {
    /// Keep rows whose field count differs from the header, unchanged.
    #[default]
    Tolerate,
    /// Pad short rows with empty cells and truncate long ones.
    Normalize,
    /// Fail the build on the first mismatched row.
    Reject,
}

impl fmt::Display for RowArity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowArity::Tolerate => write!(f, "tolerate"),
            RowArity::Normalize => write!(f, "normalize"),
            RowArity::Reject => write!(f, "reject"),
        }
    }
}
