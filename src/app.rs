use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::archive;
use crate::config::{ResolvedConfig, ToolCommand};
use crate::domain::{DataFilename, FileLocation, GenomeBuild, MAF_FILE_EXT, StudyId};
use crate::error::ImportError;
use crate::matrix::{CorrelationSet, DataMatrix, MatrixBuilder};
use crate::pipeline::{AnnotationPipeline, PipelineInput, PipelineReport, is_same_file};
use crate::staging::{DatatypeDescriptor, StagedFile, StagingArea, walk_dir};
use crate::tools::{AnnotationTool, LiftoverTool, ScoringTool, SystemTool, SystemTools};

/// Where to find one logical data file.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub location: FileLocation,
    pub data_filename: DataFilename,
    pub tumor_type_label: Option<String>,
}

impl SourceRequest {
    pub fn logical_filename(&self) -> String {
        self.data_filename.resolve(self.tumor_type_label.as_deref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MutationStagingResult {
    pub staged: StagedFile,
    pub pipeline: PipelineReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub items: Vec<BatchItem>,
}

impl BatchResult {
    pub fn failed(&self) -> usize {
        self.items.iter().filter(|item| item.error.is_some()).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub path: String,
    pub action: String,
    pub build: Option<GenomeBuild>,
    pub error: Option<String>,
}

pub struct Importer<L: LiftoverTool, A: AnnotationTool, S: ScoringTool> {
    builder: MatrixBuilder,
    pipeline: AnnotationPipeline<L, A, S>,
}

impl Importer<SystemTool, SystemTool, SystemTool> {
    /// Importer backed by the external executables named in `config`.
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let tools = system_tools(config);
        let pipeline = AnnotationPipeline::new(
            config.pipeline.clone(),
            tools.liftover,
            tools.annotator,
            tools.scorer,
        );
        Self::new(MatrixBuilder::new(config.row_arity), pipeline)
    }
}

pub fn system_tools(config: &ResolvedConfig) -> SystemTools {
    let liftover = ToolCommand {
        program: config
            .liftover_program
            .clone()
            .unwrap_or_else(|| "hg18-to-hg19".to_string()),
        flags: Vec::new(),
    };
    SystemTools {
        liftover: SystemTool::new(&liftover),
        annotator: SystemTool::new(&config.annotator),
        scorer: SystemTool::new(&config.scorer),
        normalizer: SystemTool::new(&config.normalizer),
    }
}

impl<L: LiftoverTool, A: AnnotationTool, S: ScoringTool> Importer<L, A, S> {
    pub fn new(builder: MatrixBuilder, pipeline: AnnotationPipeline<L, A, S>) -> Self {
        Self { builder, pipeline }
    }

    pub fn pipeline(&self) -> &AnnotationPipeline<L, A, S> {
        &self.pipeline
    }

    /// Resolves the request's logical file and parses it. `Ok(None)` means
    /// the source holds no usable data.
    pub fn load_matrix(
        &self,
        request: &SourceRequest,
        correlation: Option<&CorrelationSet>,
    ) -> Result<Option<DataMatrix>, ImportError> {
        let logical = request.logical_filename();
        info!(source = %request.location, file = %logical, "loading file contents");
        let Some(stream) = archive::resolve(request.location.as_path(), &logical)? else {
            info!(file = %logical, "no archive entry matches, no data");
            return Ok(None);
        };
        self.builder.build(stream, correlation)
    }

    /// Loads a companion table and keeps the values of `column` as the
    /// admission keys for a correlated load.
    pub fn load_correlation(
        &self,
        request: &SourceRequest,
        column: &str,
    ) -> Result<Option<CorrelationSet>, ImportError> {
        let Some(matrix) = self.load_matrix(request, None)? else {
            return Ok(None);
        };
        let set = CorrelationSet::from_matrix(&matrix, column)?;
        info!(keys = set.len(), column, "built correlation set");
        Ok(Some(set))
    }

    /// Annotates `input` into `output`. When both name the same file the
    /// file is annotated in place and replaced only on success.
    pub fn annotate_file(&self, input: &Path, output: &Path) -> Result<PipelineReport, ImportError> {
        if is_same_file(input, output) {
            return self.annotate_in_place(input);
        }
        self.pipeline
            .run(PipelineInput::Source(input.to_path_buf()), output)
    }

    /// Dumps `matrix` to a temporary file and runs it through the annotation
    /// pipeline straight into the datatype's staging file.
    pub fn write_mutation_staging_file(
        &self,
        staging: &StagingArea,
        study: &StudyId,
        datatype: &DatatypeDescriptor,
        matrix: &DataMatrix,
    ) -> Result<MutationStagingResult, ImportError> {
        let temp_dir = &self.pipeline.settings().temp_dir;
        fs::create_dir_all(temp_dir).map_err(|err| ImportError::Filesystem(err.to_string()))?;
        let mut dump = tempfile::Builder::new()
            .prefix("annotation-input-")
            .suffix(".maf")
            .tempfile_in(temp_dir)
            .map_err(|err| ImportError::Filesystem(err.to_string()))?;
        matrix
            .write_to(dump.as_file_mut())
            .map_err(|err| ImportError::Filesystem(err.to_string()))?;
        let input = PipelineInput::Temporary(dump.into_temp_path());

        staging.ensure_study_dir(study)?;
        let path = staging.staging_file_path(study, datatype);
        info!(path = %path, "writing mutation staging file");
        let report = self.pipeline.run(input, path.as_std_path())?;
        let staged = staging.finish_staging(study, datatype, Some(matrix), path, matrix.row_count())?;
        Ok(MutationStagingResult {
            staged,
            pipeline: report,
        })
    }

    /// Annotates every `.maf` file under `dir` in place. A file that fails is
    /// logged and left untouched; the rest of the batch still runs.
    pub fn annotate_all(&self, dir: &Path) -> Result<BatchResult, ImportError> {
        let mut mafs = walk_dir(dir)?
            .into_iter()
            .filter(|path| path.is_file())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(MAF_FILE_EXT))
            })
            .collect::<Vec<_>>();
        mafs.sort();

        let mut items = Vec::new();
        for maf in mafs {
            let item = match self.annotate_in_place(&maf) {
                Ok(report) => BatchItem {
                    path: maf.display().to_string(),
                    action: "annotated".to_string(),
                    build: Some(report.build),
                    error: None,
                },
                Err(err) => {
                    warn!(path = %maf.display(), error = %err, "skipping mutation file");
                    BatchItem {
                        path: maf.display().to_string(),
                        action: "skipped".to_string(),
                        build: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            items.push(item);
        }
        Ok(BatchResult { items })
    }

    fn annotate_in_place(&self, maf: &Path) -> Result<PipelineReport, ImportError> {
        let temp_dir = &self.pipeline.settings().temp_dir;
        fs::create_dir_all(temp_dir).map_err(|err| ImportError::Filesystem(err.to_string()))?;
        let input = tempfile::Builder::new()
            .prefix("annotation-input-")
            .suffix(".maf")
            .tempfile_in(temp_dir)
            .map_err(|err| ImportError::Filesystem(err.to_string()))?
            .into_temp_path();
        fs::copy(maf, &input).map_err(|err| ImportError::Filesystem(err.to_string()))?;

        // Scored output lands next to the original and replaces it only once
        // the whole run succeeded.
        let parent = maf
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let output = tempfile::Builder::new()
            .prefix(".annotated-")
            .tempfile_in(parent)
            .map_err(|err| ImportError::Filesystem(err.to_string()))?
            .into_temp_path();

        let report = self
            .pipeline
            .run(PipelineInput::Temporary(input), &output)?;
        output
            .persist(maf)
            .map_err(|err| ImportError::Filesystem(err.to_string()))?;
        Ok(report)
    }
}
