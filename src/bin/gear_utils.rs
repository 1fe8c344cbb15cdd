use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use gear_utils::classify::{ClassifierRules, IgnorePrecedence};
use gear_utils::config::{ConfigLoader, LogLevel, ResolvedConfig};
use gear_utils::domain::Subject;
use gear_utils::downloader::{BidsDownloadOptions, Downloader};
use gear_utils::error::GearError;
use gear_utils::layout::{VersionPosition, WorkLayout, create_bids_dir, create_deriv_dir};
use gear_utils::license::{freesurfer_home, install_freesurfer_license};
use gear_utils::metadata::update_subject_tags;
use gear_utils::output::{JsonOutput, TracingOutput};
use gear_utils::platform::{
    PlatformClient, PlatformHttpClient, check_run_level, get_project, get_subject,
};
use gear_utils::resources::{determine_max_mem, determine_n_cpus};
use gear_utils::results::{
    ResultQuery, download_attachment, download_previous_result, download_specific_result,
};

#[derive(Parser)]
#[command(name = "gear-utils")]
#[command(about = "BIDS and DICOM download helpers for neuroimaging gears")]
#[command(version, author)]
struct Cli {
    /// Gear config file (defaults to ./config.json)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Gear manifest file (defaults to ./manifest.json)
    #[arg(long, global = true)]
    manifest: Option<String>,

    #[arg(long, global = true, default_value = "work")]
    work_dir: PathBuf,

    /// Report what would be fetched without downloading
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download BIDS files by modality folder")]
    Bids(BidsArgs),
    #[command(about = "Download BIDS files whose name matches a pattern")]
    Files(FilesArgs),
    #[command(about = "Download the DICOM series behind named BIDS files")]
    Series(SeriesArgs),
    #[command(about = "Download every DICOM series of the subject")]
    AllSeries(AllSeriesArgs),
    #[command(about = "Download an output of the latest run of a gear")]
    PreviousResult(PreviousResultArgs),
    #[command(about = "Download an output of a given analysis")]
    AnalysisResult(AnalysisResultArgs),
    #[command(about = "Download a project attachment")]
    Attachment(AttachmentArgs),
    #[command(about = "Install the project's FreeSurfer license")]
    License,
    #[command(about = "Tag the subject with this gear's name and version")]
    TagSubject,
    #[command(about = "Create the BIDS derivative directory for this gear")]
    DerivDir(DerivDirArgs),
    #[command(about = "Verify the destination's container type and run level")]
    CheckLevel(CheckLevelArgs),
    #[command(about = "Report CPU and OpenMP thread allocation")]
    Cpus(CpusArgs),
    #[command(about = "Report the memory limit in GiB")]
    Mem(MemArgs),
}

#[derive(Args)]
struct ClassifierArgs {
    /// Reject files whose BIDS `valid` flag is false or absent
    #[arg(long)]
    check_valid: bool,

    #[arg(long, value_enum, default_value_t = IgnoreArg::Acquisition)]
    ignore_precedence: IgnoreArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum IgnoreArg {
    File,
    Acquisition,
}

#[derive(Args)]
struct BidsArgs {
    /// Falls back to the config's `modalities` option
    #[arg(long, value_delimiter = ',')]
    modalities: Vec<String>,

    /// Fill fieldmap IntendedFor from these modalities after downloading
    #[arg(long, value_delimiter = ',')]
    post_populate: Option<Vec<String>>,

    /// Skip dataset_description.json and README
    #[arg(long)]
    no_description: bool,

    #[command(flatten)]
    classifier: ClassifierArgs,
}

#[derive(Args)]
struct FilesArgs {
    #[arg(long = "pattern", required = true)]
    patterns: Vec<String>,

    #[command(flatten)]
    classifier: ClassifierArgs,
}

#[derive(Args)]
struct SeriesArgs {
    #[arg(long = "target", required = true)]
    targets: Vec<String>,

    #[command(flatten)]
    classifier: ClassifierArgs,
}

#[derive(Args)]
struct AllSeriesArgs {
    #[arg(long, value_delimiter = ',')]
    ignore: Vec<String>,

    #[arg(long, default_value = "dicoms")]
    dicom_dir: String,
}

#[derive(Args)]
struct PreviousResultArgs {
    #[arg(long)]
    gear: String,

    #[arg(long)]
    filename: String,

    #[arg(long, default_value = "")]
    tag: String,

    /// Only consider runs made with gear-export enabled
    #[arg(long)]
    export: bool,
}

#[derive(Args)]
struct AnalysisResultArgs {
    #[arg(long)]
    analysis_id: String,

    #[arg(long)]
    filename: String,
}

#[derive(Args)]
struct AttachmentArgs {
    #[arg(long)]
    pattern: String,
}

#[derive(Args)]
struct DerivDirArgs {
    #[arg(long, value_enum, default_value_t = PositionArg::Second)]
    position: PositionArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum PositionArg {
    First,
    Second,
    Single,
    None,
}

#[derive(Args)]
struct CheckLevelArgs {
    #[arg(long, default_value = "subject")]
    level: String,

    #[arg(long, default_value = "analysis")]
    gear_type: String,
}

#[derive(Args)]
struct CpusArgs {
    #[arg(long)]
    n_cpus: Option<usize>,

    #[arg(long)]
    omp_threads: Option<usize>,
}

#[derive(Args)]
struct MemArgs {
    /// Requested memory in GiB
    #[arg(long)]
    mem_gib: Option<f64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(gear) = report.downcast_ref::<GearError>() {
            return ExitCode::from(map_exit_code(gear));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GearError) -> u8 {
    match error {
        GearError::MissingRequiredFile(_)
        | GearError::NoSuccessfulRuns(_)
        | GearError::NoTaggedRuns { .. }
        | GearError::MissingConfig => 2,
        GearError::PlatformHttp(_)
        | GearError::PlatformStatus { .. }
        | GearError::InvalidApiKey(_) => 3,
        _ => 1,
    }
}

fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

struct Context {
    config: ResolvedConfig,
    layout: WorkLayout,
    dry_run: bool,
    manifest: Option<String>,
}

impl Context {
    fn client(&self) -> Result<PlatformHttpClient, GearError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| GearError::InvalidApiKey("api-key input missing from config".to_string()))?;
        PlatformHttpClient::new(api_key)
    }

    fn destination_id(&self) -> Result<&str, GearError> {
        self.config
            .destination_id
            .as_deref()
            .ok_or_else(|| GearError::InvalidDestination("missing from config".to_string()))
    }

    fn subject(&self, client: &dyn PlatformClient) -> Result<Subject, GearError> {
        get_subject(client, self.destination_id()?, &TracingOutput)
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref());
    init_tracing(
        config
            .as_ref()
            .map(|config| config.log_level)
            .unwrap_or_default(),
    );

    if let Commands::Cpus(args) = &cli.command {
        let allocation = determine_n_cpus(args.n_cpus, args.omp_threads, &TracingOutput)?;
        println!("n_cpus={} omp_threads={}", allocation.n_cpus, allocation.omp_threads);
        return Ok(());
    }
    if let Commands::Mem(args) = &cli.command {
        let mem_gib = determine_max_mem(args.mem_gib, &TracingOutput)?;
        println!("mem_gib={mem_gib}");
        return Ok(());
    }

    let config = config?;
    let context = Context {
        dry_run: cli.dry_run || config.dry_run,
        config,
        layout: WorkLayout::from_path(&cli.work_dir)?,
        manifest: cli.manifest,
    };
    run_command(cli.command, &context)
}

fn run_command(command: Commands, context: &Context) -> miette::Result<()> {
    let sink = TracingOutput;
    let client = context.client()?;
    let work_dir = context.layout.work_dir().as_std_path();

    match command {
        Commands::Bids(args) => {
            let modalities = context.config.list_or_option(args.modalities, "modalities");
            if modalities.is_empty() {
                return Err(GearError::ConfigParse(
                    "no modalities given on the command line or in the config".to_string(),
                )
                .into());
            }
            let post_populate = args
                .post_populate
                .or_else(|| Some(context.config.option_list("gear-post-populate")))
                .filter(|folders| !folders.is_empty());
            let subject = context.subject(&client)?;
            let bids_root = create_bids_dir(
                &client,
                &subject,
                &modalities,
                &context.layout,
                !args.no_description,
                &sink,
            )?;
            let downloader = Downloader::new(client, classifier_rules(&args.classifier));
            let options = BidsDownloadOptions {
                dry_run: context.dry_run,
                post_populate,
            };
            let summary = downloader.download_by_modality(
                &subject,
                &modalities,
                bids_root.as_std_path(),
                &options,
                &sink,
            )?;
            JsonOutput::print(&summary).into_diagnostic()?;
        }
        Commands::Files(args) => {
            let subject = context.subject(&client)?;
            let bids_root = context.layout.bids_root();
            let downloader = Downloader::new(client, classifier_rules(&args.classifier));
            let summary = downloader.download_by_filename(
                &subject,
                &args.patterns,
                bids_root.as_std_path(),
                context.dry_run,
                &sink,
            )?;
            JsonOutput::print(&summary).into_diagnostic()?;
        }
        Commands::Series(args) => {
            let subject = context.subject(&client)?;
            let downloader = Downloader::new(client, classifier_rules(&args.classifier));
            let series = downloader.download_matching_series(
                &subject,
                &args.targets,
                work_dir,
                context.dry_run,
                &sink,
            )?;
            JsonOutput::print(&series).into_diagnostic()?;
        }
        Commands::AllSeries(args) => {
            let subject = context.subject(&client)?;
            let dicom_dir = work_dir.join(&args.dicom_dir);
            let downloader = Downloader::new(client, ClassifierRules::default());
            let series = downloader.download_all_series(
                &subject,
                &args.ignore,
                work_dir,
                &dicom_dir,
                context.dry_run,
                &sink,
            )?;
            JsonOutput::print(&series).into_diagnostic()?;
        }
        Commands::PreviousResult(args) => {
            let subject = context.subject(&client)?;
            let query = ResultQuery {
                gear_name: args.gear,
                filename: args.filename,
                tag: args.tag,
            };
            let path = download_previous_result(
                &client,
                &subject,
                &query,
                work_dir,
                args.export,
                context.dry_run,
                &sink,
            )?;
            println!("{}", path.display());
        }
        Commands::AnalysisResult(args) => {
            let analysis = client.analysis(&args.analysis_id)?;
            let path = download_specific_result(
                &client,
                &analysis,
                &args.filename,
                work_dir,
                context.dry_run,
                &sink,
            )?;
            println!("{}", path.display());
        }
        Commands::Attachment(args) => {
            let project = get_project(&client, context.destination_id()?)?;
            let path =
                download_attachment(&client, &project, &args.pattern, work_dir, context.dry_run, &sink)?;
            println!("{}", path.display());
        }
        Commands::License => {
            let project = get_project(&client, context.destination_id()?)?;
            let home = freesurfer_home()?;
            let path = install_freesurfer_license(&project, &home, &sink)?;
            println!("{}", path.display());
        }
        Commands::TagSubject => {
            let manifest = ConfigLoader::manifest(context.manifest.as_deref())?;
            let subject = context.subject(&client)?;
            update_subject_tags(&client, &subject, &manifest, &sink)?;
        }
        Commands::DerivDir(args) => {
            let manifest = ConfigLoader::manifest(context.manifest.as_deref())?;
            let subject = context.subject(&client)?;
            let position = match args.position {
                PositionArg::First => VersionPosition::First,
                PositionArg::Second => VersionPosition::Second,
                PositionArg::Single => VersionPosition::Single,
                PositionArg::None => VersionPosition::None,
            };
            let deriv_dir =
                create_deriv_dir(&context.layout, &manifest, &subject.label, position, &sink)?;
            println!("{deriv_dir}");
        }
        Commands::CheckLevel(args) => {
            let destination = check_run_level(
                &client,
                context.destination_id()?,
                &args.level,
                &args.gear_type,
                &sink,
            )?;
            JsonOutput::print(&destination).into_diagnostic()?;
        }
        Commands::Cpus(_) | Commands::Mem(_) => {}
    }
    Ok(())
}

fn classifier_rules(args: &ClassifierArgs) -> ClassifierRules {
    ClassifierRules {
        check_valid: args.check_valid,
        acquisition_ignore: match args.ignore_precedence {
            IgnoreArg::File => IgnorePrecedence::FileOnly,
            IgnoreArg::Acquisition => IgnorePrecedence::AcquisitionOverrides,
        },
    }
}
