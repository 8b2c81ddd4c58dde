//! Mutation-file annotation: build detection, optional liftover, functional
//! annotation and pathogenicity scoring, run in that fixed order.
//!
//! Every intermediate file lives in `PipelineSettings::temp_dir` under a
//! random name and is removed when the run ends, whether it succeeded or not.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempPath;
use tracing::{info, warn};

use crate::domain::{GenomeBuild, VALUE_DELIMITER};
use crate::error::ImportError;
use crate::tools::{AnnotationTool, LiftoverSettings, LiftoverTool, ScoringTool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Start,
    BuildDetected,
    LiftoverDone,
    Annotated,
    Scored,
    Normalized,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Start => write!(f, "start"),
            PipelineState::BuildDetected => write!(f, "build detection"),
            PipelineState::LiftoverDone => write!(f, "liftover"),
            PipelineState::Annotated => write!(f, "annotation"),
            PipelineState::Scored => write!(f, "scoring"),
            PipelineState::Normalized => write!(f, "normalization"),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub temp_dir: PathBuf,
    pub build_column: usize,
    pub liftover: Option<LiftoverSettings>,
    pub annotator_flags: Vec<String>,
    pub scorer_flags: Vec<String>,
}

/// The mutation file a run starts from.
#[derive(Debug)]
pub enum PipelineInput {
    /// A caller-owned file; left in place after the run.
    Source(PathBuf),
    /// A file synthesized for this run; removed once the run ends.
    Temporary(TempPath),
}

impl PipelineInput {
    pub fn path(&self) -> &Path {
        match self {
            PipelineInput::Source(path) => path.as_path(),
            PipelineInput::Temporary(path) => &**path,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub input: String,
    pub output: String,
    pub build: GenomeBuild,
    pub stages: Vec<PipelineState>,
}

pub struct AnnotationPipeline<L: LiftoverTool, A: AnnotationTool, S: ScoringTool> {
    settings: PipelineSettings,
    liftover: L,
    annotator: A,
    scorer: S,
}

impl<L: LiftoverTool, A: AnnotationTool, S: ScoringTool> AnnotationPipeline<L, A, S> {
    pub fn new(settings: PipelineSettings, liftover: L, annotator: A, scorer: S) -> Self {
        Self {
            settings,
            liftover,
            annotator,
            scorer,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs `input` through every stage and leaves the scored file at `output`.
    ///
    /// Any stage failure aborts the run; temporary artifacts (including a
    /// [`PipelineInput::Temporary`] input) are removed before the error is
    /// returned, and `output` is removed if scoring had started.
    pub fn run(&self, input: PipelineInput, output: &Path) -> Result<PipelineReport, ImportError> {
        let mut report = PipelineReport {
            input: input.path().display().to_string(),
            output: output.display().to_string(),
            build: GenomeBuild::Unknown(String::new()),
            stages: vec![PipelineState::Start],
        };
        info!(input = %report.input, output = %report.output, "annotating mutation file");

        let result = self.run_stages(input.path(), output, &mut report);

        if let PipelineInput::Temporary(path) = input {
            remove_artifact(path);
        }

        match result {
            Ok(()) => {
                report.stages.push(PipelineState::Done);
                info!(output = %report.output, build = %report.build, "mutation file annotated");
                Ok(report)
            }
            Err(err) => {
                report.stages.push(PipelineState::Failed);
                warn!(stages = ?report.stages, error = %err, "annotation pipeline failed");
                Err(err)
            }
        }
    }

    fn run_stages(
        &self,
        input: &Path,
        output: &Path,
        report: &mut PipelineReport,
    ) -> Result<(), ImportError> {
        // A failed scoring stage removes the output, which must never be the
        // caller's input.
        if is_same_file(input, output) {
            return Err(ImportError::OutputIsInput(output.display().to_string()));
        }
        let build = detect_build(input, self.settings.build_column)?;
        info!(build = %build, "detected genome build");
        report.build = build;
        report.stages.push(PipelineState::BuildDetected);

        if report.build.needs_liftover() {
            self.lift_over(input)?;
            report.stages.push(PipelineState::LiftoverDone);
        }

        let annotated = self.temp_artifact("annotated")?;
        info!("calling annotation tool");
        self.annotator
            .annotate(input, &annotated, &self.settings.annotator_flags)
            .map_err(in_stage(PipelineState::Annotated))?;
        report.stages.push(PipelineState::Annotated);

        prepare_output(output)?;
        info!("calling scoring tool");
        let scored = self
            .scorer
            .score(&annotated, output, &self.settings.scorer_flags)
            .map_err(in_stage(PipelineState::Scored));
        remove_artifact(annotated);
        if let Err(err) = scored {
            if let Err(remove_err) = fs::remove_file(output) {
                warn!(path = %output.display(), error = %remove_err, "failed to remove partial output");
            }
            return Err(err);
        }
        report.stages.push(PipelineState::Scored);
        Ok(())
    }

    /// Copies `input` aside and lets the liftover tool rewrite `input` in
    /// place from the copy. A failed liftover puts the copy back.
    fn lift_over(&self, input: &Path) -> Result<(), ImportError> {
        let settings = self
            .settings
            .liftover
            .as_ref()
            .ok_or(ImportError::LiftoverNotConfigured)?;
        let copy = self.temp_artifact("liftover-input")?;
        fs::copy(input, &copy).map_err(|err| {
            ImportError::Filesystem(format!("copy {} for liftover: {err}", input.display()))
        })?;

        info!("calling liftover tool");
        let result = self
            .liftover
            .lift_over(&copy, input, settings)
            .map_err(in_stage(PipelineState::LiftoverDone));
        if result.is_err() {
            if let Err(err) = fs::copy(&copy, input) {
                warn!(path = %input.display(), error = %err, "failed to restore input after liftover");
            }
        }
        remove_artifact(copy);
        result
    }

    fn temp_artifact(&self, prefix: &str) -> Result<TempPath, ImportError> {
        fs::create_dir_all(&self.settings.temp_dir)
            .map_err(|err| ImportError::Filesystem(err.to_string()))?;
        let file = tempfile::Builder::new()
            .prefix(&format!("{prefix}-"))
            .suffix(".maf")
            .tempfile_in(&self.settings.temp_dir)
            .map_err(|err| ImportError::Filesystem(err.to_string()))?;
        Ok(file.into_temp_path())
    }
}

/// Reads the build token from the first data row. Leading `#` comment lines
/// are skipped before the header. A missing row or column yields
/// [`GenomeBuild::Unknown`].
pub fn detect_build(input: &Path, column: usize) -> Result<GenomeBuild, ImportError> {
    let file = File::open(input).map_err(|err| {
        ImportError::UnreadableSource(format!("open {}: {err}", input.display()))
    })?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut seen_header = false;
    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).map_err(|err| {
            ImportError::UnreadableSource(format!("read {}: {err}", input.display()))
        })?;
        if read == 0 {
            return Ok(GenomeBuild::Unknown(String::new()));
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']);
        if !seen_header {
            if !line.starts_with('#') {
                seen_header = true;
            }
            continue;
        }
        let token = line.split(VALUE_DELIMITER).nth(column).unwrap_or_default();
        return Ok(GenomeBuild::from_token(token));
    }
}

fn prepare_output(output: &Path) -> Result<(), ImportError> {
    if let Some(parent) = output.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| ImportError::Filesystem(err.to_string()))?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(output)
        .map_err(|err| {
            ImportError::Filesystem(format!("create {}: {err}", output.display()))
        })?;
    Ok(())
}

fn remove_artifact(path: TempPath) {
    let shown = path.display().to_string();
    if let Err(err) = path.close() {
        warn!(path = %shown, error = %err, "failed to remove temporary artifact");
    }
}

/// True when both paths exist and name the same file.
pub(crate) fn is_same_file(left: &Path, right: &Path) -> bool {
    match (fs::canonicalize(left), fs::canonicalize(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

fn in_stage(stage: PipelineState) -> impl FnOnce(ImportError) -> ImportError {
    move |err| match err {
        ImportError::ToolFailed { .. } | ImportError::MissingTool(_) => err,
        other => ImportError::ToolFailed {
            stage,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_maf(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("input.maf");
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn detects_older_build_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_maf(dir.path(), "a\tb\tc\tNCBI_Build\nx\ty\tz\t36\n");
        assert_eq!(detect_build(&path, 3).unwrap(), GenomeBuild::Hg18);

        let path = write_maf(dir.path(), "a\tb\tc\tNCBI_Build\nx\ty\tz\thg18\n");
        assert_eq!(detect_build(&path, 3).unwrap(), GenomeBuild::Hg18);
    }

    #[test]
    fn skips_comment_lines_before_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_maf(
            dir.path(),
            "#version 2.4\nHugo\tEntrez\tCenter\tNCBI_Build\nTP53\t7157\tbroad\t37\n",
        );
        assert_eq!(detect_build(&path, 3).unwrap(), GenomeBuild::Hg19);
    }

    #[test]
    fn missing_token_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_maf(dir.path(), "TumorID\tPos\tBuild\nS1\t100\t37\n");
        let build = detect_build(&path, 3).unwrap();
        assert!(!build.needs_liftover());

        let path = write_maf(dir.path(), "TumorID\tPos\tBuild\n");
        assert_eq!(
            detect_build(&path, 3).unwrap(),
            GenomeBuild::Unknown(String::new())
        );
    }
}
