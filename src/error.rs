use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::pipeline::PipelineState;

#[derive(Debug, Error, Diagnostic)]
pub enum ImportError {
    #[error("invalid cancer study identifier: {0}")]
    InvalidStudyId(String),

    #[error("invalid file location: {0}")]
    InvalidLocation(String),

    #[error("missing config file staging-importer.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("unreadable source: {0}")]
    #[diagnostic(help("check that the file exists and that its extension matches its compression"))]
    UnreadableSource(String),

    #[error("pipeline output is the same file as its input: {0}")]
    #[diagnostic(help("write the scored file to a different path"))]
    OutputIsInput(String),

    #[error("no usable data in {0}")]
    NoData(String),

    #[error("column not found in matrix header: {0}")]
    MissingColumn(String),

    #[error("line {line} has {actual} fields, header has {expected}")]
    RowArity {
        line: usize,
        expected: usize,
        actual: usize,
    },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("liftover is not configured (liftover.program, liftover.binary, liftover.chain)")]
    LiftoverNotConfigured,

    #[error("{stage} stage failed: {message}")]
    ToolFailed {
        stage: PipelineState,
        message: String,
    },
}
