use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{CORRELATE_PROBE_COLUMN, RowArity};
use crate::error::ImportError;
use crate::pipeline::PipelineSettings;
use crate::tools::LiftoverSettings;

pub const CONFIG_FILE_NAME: &str = "staging-importer.json";

/// Column of the first data row that carries the genome build in MAF files
/// (`NCBI_Build`).
pub const DEFAULT_BUILD_COLUMN: usize = 3;

pub const DEFAULT_NORMALIZER: &str = "normalize-expression-levels";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub override_dir: Option<PathBuf>,
    #[serde(default)]
    pub build_column: Option<usize>,
    #[serde(default)]
    pub row_arity: Option<RowArity>,
    #[serde(default)]
    pub correlate_column: Option<String>,
    #[serde(default)]
    pub liftover: Option<LiftoverEntry>,
    #[serde(default)]
    pub annotator: Option<ToolEntry>,
    #[serde(default)]
    pub scorer: Option<ToolEntry>,
    #[serde(default)]
    pub normalizer: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiftoverEntry {
    pub program: String,
    pub binary: PathBuf,
    pub chain: PathBuf,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolEntry {
    Shorthand(String),
    Detailed(ToolEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ToolEntryObject {
    pub program: String,
    #[serde(default)]
    pub flags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub staging_dir: Option<PathBuf>,
    pub override_dir: Option<PathBuf>,
    pub row_arity: RowArity,
    pub correlate_column: String,
    pub liftover_program: Option<String>,
    pub annotator: ToolCommand,
    pub scorer: ToolCommand,
    pub normalizer: ToolCommand,
    pub pipeline: PipelineSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `staging-importer.json` from the working directory
    /// and then from the user config directory.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ImportError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => default_config_path().ok_or(ImportError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ImportError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ImportError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    /// Like [`ConfigLoader::resolve`], but falls back to built-in defaults
    /// when no config file exists and none was asked for.
    pub fn resolve_or_default(path: Option<&str>) -> Result<ResolvedConfig, ImportError> {
        match Self::resolve(path) {
            Err(ImportError::MissingConfig) => Self::resolve_config(Config::default()),
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ImportError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let annotator = resolve_tool(config.annotator, "oncotator", default_annotator_flags);
        let scorer = resolve_tool(config.scorer, "mutation-assessor", default_scorer_flags);
        let normalizer = ToolCommand {
            program: config
                .normalizer
                .unwrap_or_else(|| DEFAULT_NORMALIZER.to_string()),
            flags: Vec::new(),
        };

        let (liftover_program, liftover) = match config.liftover {
            Some(entry) => (
                Some(entry.program),
                Some(LiftoverSettings {
                    binary: entry.binary,
                    chain: entry.chain,
                }),
            ),
            None => (None, None),
        };

        let pipeline = PipelineSettings {
            temp_dir: config.temp_dir.unwrap_or_else(std::env::temp_dir),
            build_column: config.build_column.unwrap_or(DEFAULT_BUILD_COLUMN),
            liftover,
            annotator_flags: annotator.flags.clone(),
            scorer_flags: scorer.flags.clone(),
        };

        Ok(ResolvedConfig {
            schema_version,
            staging_dir: config.staging_dir,
            override_dir: config.override_dir,
            row_arity: config.row_arity.unwrap_or_default(),
            correlate_column: config
                .correlate_column
                .unwrap_or_else(|| CORRELATE_PROBE_COLUMN.to_string()),
            liftover_program,
            annotator,
            scorer,
            normalizer,
            pipeline,
        })
    }
}

fn resolve_tool(
    entry: Option<ToolEntry>,
    default_program: &str,
    default_flags: fn() -> Vec<String>,
) -> ToolCommand {
    match entry {
        None => ToolCommand {
            program: default_program.to_string(),
            flags: default_flags(),
        },
        Some(ToolEntry::Shorthand(program)) => ToolCommand {
            program,
            flags: default_flags(),
        },
        Some(ToolEntry::Detailed(obj)) => ToolCommand {
            program: obj.program,
            flags: obj.flags.unwrap_or_else(default_flags),
        },
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    ProjectDirs::from("", "", "staging-importer")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

pub fn default_annotator_flags() -> Vec<String> {
    vec![
        "--use-cache".to_string(),
        "--sort-columns".to_string(),
        "--add-missing-columns".to_string(),
    ]
}

pub fn default_scorer_flags() -> Vec<String> {
    vec![
        "--add-missing-columns".to_string(),
        "--use-cache".to_string(),
    ]
}
