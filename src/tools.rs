use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use tracing::debug;

use crate::config::ToolCommand;
use crate::error::ImportError;
use crate::pipeline::PipelineState;

/// Locations the liftover tool needs besides its input and output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiftoverSettings {
    pub binary: PathBuf,
    pub chain: PathBuf,
}

/// Rewrites genomic coordinates of `input` from the older build into `output`.
pub trait LiftoverTool {
    fn lift_over(
        &self,
        input: &Path,
        output: &Path,
        settings: &LiftoverSettings,
    ) -> Result<(), ImportError>;
}

/// Adds functional-annotation columns to a mutation file.
pub trait AnnotationTool {
    fn annotate(&self, input: &Path, output: &Path, flags: &[String]) -> Result<(), ImportError>;
}

/// Adds pathogenicity-assessment columns to an annotated mutation file.
pub trait ScoringTool {
    fn score(&self, input: &Path, output: &Path, flags: &[String]) -> Result<(), ImportError>;
}

/// Derives expression z-scores against copy-number calls into `output`.
pub trait NormalizationTool {
    fn normalize(&self, cna: &Path, expression: &Path, output: &Path) -> Result<(), ImportError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub liftover: Option<String>,
    pub annotator: Option<String>,
    pub scorer: Option<String>,
    pub normalizer: Option<String>,
}

/// An external executable run to completion with a fixed argument layout.
#[derive(Debug, Clone)]
pub struct SystemTool {
    name: String,
    program: Option<PathBuf>,
}

impl SystemTool {
    pub fn new(command: &ToolCommand) -> Self {
        Self {
            name: command.program.clone(),
            program: locate_program(&command.program),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_available(&self) -> bool {
        self.program.is_some()
    }

    pub fn version(&self) -> Option<String> {
        self.program
            .as_ref()
            .and_then(|path| tool_version(path, &["--version"]))
    }

    fn run(&self, stage: PipelineState, args: &[String]) -> Result<(), ImportError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| ImportError::MissingTool(self.name.clone()))?;
        debug!(program = %program.display(), ?args, "running external tool");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| ImportError::ToolFailed {
                stage,
                message: format!("{}: {err}", program.display()),
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {} ({})", program.display(), output.status)
        } else {
            stderr
        };
        Err(ImportError::ToolFailed { stage, message })
    }
}

impl LiftoverTool for SystemTool {
    fn lift_over(
        &self,
        input: &Path,
        output: &Path,
        settings: &LiftoverSettings,
    ) -> Result<(), ImportError> {
        let args = vec![
            path_arg(input),
            path_arg(output),
            path_arg(&settings.binary),
            path_arg(&settings.chain),
        ];
        self.run(PipelineState::LiftoverDone, &args)
    }
}

impl AnnotationTool for SystemTool {
    fn annotate(&self, input: &Path, output: &Path, flags: &[String]) -> Result<(), ImportError> {
        self.run(PipelineState::Annotated, &flagged_args(flags, input, output))
    }
}

impl ScoringTool for SystemTool {
    fn score(&self, input: &Path, output: &Path, flags: &[String]) -> Result<(), ImportError> {
        self.run(PipelineState::Scored, &flagged_args(flags, input, output))
    }
}

impl NormalizationTool for SystemTool {
    fn normalize(&self, cna: &Path, expression: &Path, output: &Path) -> Result<(), ImportError> {
        let args = vec![path_arg(cna), path_arg(expression), path_arg(output)];
        self.run(PipelineState::Normalized, &args)
    }
}

/// The process-backed tools named by the configuration.
#[derive(Debug, Clone)]
pub struct SystemTools {
    pub liftover: SystemTool,
    pub annotator: SystemTool,
    pub scorer: SystemTool,
    pub normalizer: SystemTool,
}

impl SystemTools {
    pub fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            liftover: self.liftover.version(),
            annotator: self.annotator.version(),
            scorer: self.scorer.version(),
            normalizer: self.normalizer.version(),
        }
    }
}

fn flagged_args(flags: &[String], input: &Path, output: &Path) -> Vec<String> {
    let mut args = flags.to_vec();
    args.push(path_arg(input));
    args.push(path_arg(output));
    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Resolves a bare program name through `PATH`; paths with a directory
/// component are taken as given when they exist.
fn locate_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.exists().then(|| candidate.to_path_buf());
    }
    find_in_path(program)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        None
    } else {
        Some(stdout)
    }
}
