use std::io::{self, Write};

use serde::Serialize;

use crate::app::{BatchResult, MutationStagingResult};
use crate::matrix::MatrixSummary;
use crate::pipeline::PipelineReport;
use crate::staging::StagedFile;
use crate::tools::ToolInfo;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_matrix(summary: &MatrixSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_staged(result: &StagedFile) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_mutation_staged(result: &MutationStagingResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_report(report: &PipelineReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_batch(result: &BatchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_tools(info: &ToolInfo) -> io::Result<()> {
        Self::print_json(info)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
