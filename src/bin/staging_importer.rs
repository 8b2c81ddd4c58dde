use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::EnvFilter;

use staging_importer::app::{Importer, SourceRequest, system_tools};
use staging_importer::config::{ConfigLoader, ResolvedConfig};
use staging_importer::domain::{DataFilename, FileLocation, RowArity, StudyId};
use staging_importer::error::ImportError;
use staging_importer::matrix::CorrelationSet;
use staging_importer::output::JsonOutput;
use staging_importer::staging::{CancerStudyDescriptor, DatatypeDescriptor, StagingArea};
use staging_importer::tools::SystemTool;

#[derive(Parser)]
#[command(name = "staging-importer")]
#[command(about = "Resolve, annotate and stage genomic data files for a portal loader")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Read a data file (through any archive wrapper) and summarize it")]
    Matrix(MatrixArgs),
    #[command(about = "Write a data file into the staging area")]
    Stage(StageArgs),
    #[command(about = "Write the study-level metadata file")]
    StudyMeta(StudyMetaArgs),
    #[command(about = "Derive the z-score staging file from staged copy-number and expression files")]
    Zscores(ZscoresArgs),
    #[command(about = "Run one mutation file through liftover, annotation and scoring")]
    Annotate(AnnotateArgs),
    #[command(about = "Annotate every .maf file under a directory in place")]
    AnnotateAll(AnnotateAllArgs),
    #[command(about = "Show the external tools that were found")]
    Tools,
}

#[derive(Args, Clone)]
struct SourceArgs {
    #[arg(long)]
    source: String,

    #[arg(long)]
    data_file: String,

    #[arg(long)]
    tumor_type: Option<String>,

    #[arg(long, requires = "correlate_file")]
    correlate: Option<String>,

    #[arg(long)]
    correlate_file: Option<String>,

    #[arg(long)]
    correlate_column: Option<String>,

    #[arg(long)]
    row_arity: Option<RowArity>,
}

#[derive(Args)]
struct MatrixArgs {
    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Args)]
struct StageArgs {
    #[arg(long)]
    study: String,

    #[arg(long)]
    datatype: PathBuf,

    #[arg(long)]
    staging_dir: Option<PathBuf>,

    #[arg(long)]
    mutation: bool,

    #[arg(long)]
    override_file: Option<String>,

    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Args)]
struct StudyMetaArgs {
    #[arg(long)]
    study: String,

    #[arg(long)]
    descriptor: PathBuf,

    #[arg(long, default_value_t = 0)]
    num_cases: usize,

    #[arg(long)]
    staging_dir: Option<PathBuf>,
}

#[derive(Args)]
struct ZscoresArgs {
    #[arg(long)]
    study: String,

    #[arg(long)]
    datatype: PathBuf,

    #[arg(long)]
    cna_datatype: PathBuf,

    #[arg(long)]
    expression_datatype: PathBuf,

    #[arg(long)]
    staging_dir: Option<PathBuf>,
}

#[derive(Args)]
struct AnnotateArgs {
    input: String,
    output: String,
}

#[derive(Args)]
struct AnnotateAllArgs {
    dir: PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<ImportError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ImportError) -> u8 {
    match error {
        ImportError::NoData(_)
        | ImportError::MissingConfig
        | ImportError::ConfigRead(_)
        | ImportError::ConfigParse(_) => 2,
        ImportError::MissingTool(_)
        | ImportError::LiftoverNotConfigured
        | ImportError::ToolFailed { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Matrix(args) => {
            let config = ConfigLoader::resolve_or_default(config_path)?;
            run_matrix(args, config)
        }
        Commands::Stage(args) => {
            let config = if args.mutation {
                ConfigLoader::resolve(config_path)?
            } else {
                ConfigLoader::resolve_or_default(config_path)?
            };
            run_stage(args, config)
        }
        Commands::StudyMeta(args) => {
            let config = ConfigLoader::resolve_or_default(config_path)?;
            let study: StudyId = args.study.parse()?;
            let descriptor: CancerStudyDescriptor = read_descriptor(&args.descriptor)?;
            let staging = staging_area(args.staging_dir.clone(), &config)?;
            let path =
                staging.write_cancer_study_metadata_file(&study, &descriptor, args.num_cases)?;
            info!(path = %path, "cancer study metadata written");
            Ok(())
        }
        Commands::Zscores(args) => {
            let config = ConfigLoader::resolve_or_default(config_path)?;
            let study: StudyId = args.study.parse()?;
            let datatype: DatatypeDescriptor = read_descriptor(&args.datatype)?;
            let cna: DatatypeDescriptor = read_descriptor(&args.cna_datatype)?;
            let expression: DatatypeDescriptor = read_descriptor(&args.expression_datatype)?;
            let staging = staging_area(args.staging_dir.clone(), &config)?;
            let normalizer = system_tools(&config).normalizer;
            let staged = staging.write_zscores_staging_file(
                &study,
                &datatype,
                &cna,
                &expression,
                &normalizer,
            )?;
            match staged {
                Some(staged) => JsonOutput::print_staged(&staged).into_diagnostic(),
                None => Err(ImportError::NoData(format!(
                    "{study}: copy-number or expression staging file missing"
                ))
                .into()),
            }
        }
        Commands::Annotate(args) => {
            let config = ConfigLoader::resolve(config_path)?;
            let importer = Importer::from_config(&config);
            let input: FileLocation = args.input.parse()?;
            let output: FileLocation = args.output.parse()?;
            let report = importer.annotate_file(input.as_path(), output.as_path())?;
            JsonOutput::print_report(&report).into_diagnostic()
        }
        Commands::AnnotateAll(args) => {
            let config = ConfigLoader::resolve(config_path)?;
            let importer = Importer::from_config(&config);
            let result = importer.annotate_all(&args.dir)?;
            info!(
                files = result.items.len(),
                failed = result.failed(),
                "batch annotation finished"
            );
            JsonOutput::print_batch(&result).into_diagnostic()
        }
        Commands::Tools => {
            let config = ConfigLoader::resolve_or_default(config_path)?;
            let tools = system_tools(&config);
            for tool in [&tools.liftover, &tools.annotator, &tools.scorer, &tools.normalizer] {
                report_tool(tool);
            }
            JsonOutput::print_tools(&tools.tool_info()).into_diagnostic()
        }
    }
}

fn report_tool(tool: &SystemTool) {
    if tool.is_available() {
        info!(tool = tool.name(), "found");
    } else {
        info!(tool = tool.name(), "not found");
    }
}

fn run_matrix(args: MatrixArgs, mut config: ResolvedConfig) -> miette::Result<()> {
    if let Some(arity) = args.source.row_arity {
        config.row_arity = arity;
    }
    let importer = Importer::from_config(&config);
    let matrix = load_source(&importer, &args.source, &config)?;
    JsonOutput::print_matrix(&matrix.summary()).into_diagnostic()
}

fn run_stage(args: StageArgs, mut config: ResolvedConfig) -> miette::Result<()> {
    if let Some(arity) = args.source.row_arity {
        config.row_arity = arity;
    }
    let study: StudyId = args.study.parse()?;
    let datatype: DatatypeDescriptor = read_descriptor(&args.datatype)?;
    let staging = staging_area(args.staging_dir.clone(), &config)?;

    if let Some(override_file) = args.override_file.as_deref() {
        let staging_file = staging.staging_file_path(&study, &datatype);
        let staging_name = staging_file.file_name().unwrap_or(datatype.staging_filename.as_str());
        if staging.apply_override(&study, override_file, staging_name)? {
            info!(study = %study, file = override_file, "override applied, source not read");
            return Ok(());
        }
    }

    let importer = Importer::from_config(&config);
    let matrix = load_source(&importer, &args.source, &config)?;
    if args.mutation {
        let result = importer.write_mutation_staging_file(&staging, &study, &datatype, &matrix)?;
        JsonOutput::print_mutation_staged(&result).into_diagnostic()
    } else {
        let staged = staging.write_staging_file(&study, &datatype, &matrix)?;
        JsonOutput::print_staged(&staged).into_diagnostic()
    }
}

fn load_source(
    importer: &Importer<SystemTool, SystemTool, SystemTool>,
    args: &SourceArgs,
    config: &ResolvedConfig,
) -> miette::Result<staging_importer::matrix::DataMatrix> {
    let correlation = match (&args.correlate, &args.correlate_file) {
        (Some(location), Some(file)) => {
            let request = SourceRequest {
                location: location.parse()?,
                data_filename: DataFilename::new(file.clone()),
                tumor_type_label: args.tumor_type.clone(),
            };
            let column = args
                .correlate_column
                .as_deref()
                .unwrap_or(&config.correlate_column);
            let set = importer.load_correlation(&request, column)?;
            Some(set.unwrap_or_else(CorrelationSet::default))
        }
        _ => None,
    };

    let request = SourceRequest {
        location: args.source.parse()?,
        data_filename: DataFilename::new(args.data_file.clone()),
        tumor_type_label: args.tumor_type.clone(),
    };
    importer
        .load_matrix(&request, correlation.as_ref())?
        .ok_or_else(|| ImportError::NoData(request.location.to_string()).into())
}

fn staging_area(
    staging_dir: Option<PathBuf>,
    config: &ResolvedConfig,
) -> miette::Result<StagingArea> {
    let staging_dir = staging_dir
        .or_else(|| config.staging_dir.clone())
        .ok_or_else(|| {
            miette::Report::msg("staging directory required (--staging-dir or staging_dir in config)")
        })?;
    Ok(StagingArea::from_paths(
        &staging_dir,
        config.override_dir.as_deref(),
    )?)
}

fn read_descriptor<T: DeserializeOwned>(path: &Path) -> miette::Result<T> {
    let content =
        fs::read_to_string(path).map_err(|_| ImportError::ConfigRead(path.to_path_buf()))?;
    let descriptor = serde_json::from_str(&content)
        .map_err(|err| ImportError::ConfigParse(err.to_string()))?;
    Ok(descriptor)
}
