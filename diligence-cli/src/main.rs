//! Diligence CLI - Command-line interface for due-diligence report runs
//!
//! Plans, runs, resumes and exports section-by-section report generation.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use diligence_core::{
    cancellation_channel, init_logging, timed, CompanyProfile, DiligenceConfig, InputReader,
};
use diligence_engine::{
    build_provider, diligence_registry, new_run_id, CancellableProvider, EngineError,
    ExportFormat, FileRunStateStore, Force, ProgressReporter, ProgressUpdate, ReportEngine,
    ReportExporter, RunRequest,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "diligence")]
#[command(about = "Resumable, dependency-aware due-diligence report generation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args)]
struct Selection {
    /// Company input file name (with or without .json)
    company: String,

    /// Existing run to resume; a new run id is generated when omitted
    #[arg(long)]
    run_id: Option<String>,

    /// Section to produce, repeatable; all sections when omitted
    #[arg(short, long = "section")]
    sections: Vec<String>,

    /// Section to regenerate along with its dependents, repeatable
    #[arg(long, conflicts_with = "force_all")]
    force: Vec<String>,

    /// Regenerate every requested section
    #[arg(long)]
    force_all: bool,
}

impl Selection {
    fn force(&self) -> Force {
        if self.force_all {
            Force::All
        } else {
            Force::sections(self.force.iter().cloned())
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List report sections and their dependencies
    Sections,

    /// List companies available in the input sources directory
    Companies,

    /// Show which sections a run would generate, without generating them
    Plan {
        #[command(flatten)]
        selection: Selection,
    },

    /// Generate (or resume) a report run
    Run {
        #[command(flatten)]
        selection: Selection,

        /// Export section files and the compiled report after a successful run
        #[arg(long)]
        export: bool,
    },

    /// Show completed sections of a run, or list all runs
    Status {
        /// Run to inspect
        run_id: Option<String>,
    },

    /// Compile the completed sections of a run
    Report {
        run_id: String,

        /// Write files here instead of printing to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export format (markdown, json)
        #[arg(short, long, default_value = "markdown")]
        format: ExportFormat,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;

    let mut logging_config = config.logging.clone();
    if cli.verbose {
        logging_config.level = "debug".to_string();
    }
    init_logging(&logging_config).map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting diligence CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Sections => handle_sections(),
        Commands::Companies => handle_companies(&config),
        Commands::Plan { selection } => handle_plan(selection, &config).await,
        Commands::Run { selection, export } => handle_run(selection, export, &config).await,
        Commands::Status { run_id } => handle_status(run_id, &config).await,
        Commands::Report {
            run_id,
            output,
            format,
        } => handle_report(run_id, output, format, &config).await,
        Commands::Config {
            show,
            init,
            validate,
        } => handle_config(show, init, validate, &config),
    }
}

fn load_config(config_path: Option<&PathBuf>) -> Result<DiligenceConfig> {
    if let Some(path) = config_path {
        return DiligenceConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()));
    }

    let default_paths = [
        dirs::config_dir().map(|d| d.join("diligence").join("config.toml")),
        dirs::home_dir().map(|d| d.join(".diligence").join("config.toml")),
        Some(PathBuf::from("diligence.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            return DiligenceConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()));
        }
    }

    Ok(DiligenceConfig::default())
}

fn open_engine(config: &DiligenceConfig) -> Result<ReportEngine> {
    let registry = diligence_registry()?;
    let store = FileRunStateStore::new(config.state_dir());
    Ok(ReportEngine::new(registry, Arc::new(store))?)
}

fn report_exporter(config: &DiligenceConfig, output_dir: PathBuf) -> ReportExporter {
    ReportExporter::new(output_dir)
        .with_title(&config.report.title)
        .with_metadata_header(config.report.include_metadata_header)
}

fn read_company(config: &DiligenceConfig, company: &str) -> Result<CompanyProfile> {
    let reader = InputReader::new(config.sources_dir())?;
    Ok(reader.read_company(company)?)
}

fn handle_sections() -> Result<()> {
    let registry = diligence_registry()?;
    println!("Report sections ({}):", registry.len());
    for (i, spec) in registry.iter().enumerate() {
        let deps = if spec.depends_on.is_empty() {
            "-".to_string()
        } else {
            spec.depends_on.join(", ")
        };
        println!(
            "  {:>2}. {:<24} {:<36} depends on: {}",
            i + 1,
            spec.id,
            spec.display_name,
            deps
        );
    }
    Ok(())
}

fn handle_companies(config: &DiligenceConfig) -> Result<()> {
    let reader = InputReader::new(config.sources_dir())?;
    let companies = reader.list_available_companies()?;
    if companies.is_empty() {
        println!("No company files in {}", reader.sources_dir().display());
    } else {
        println!("Available companies:");
        for company in companies {
            println!("  - {}", company);
        }
    }
    Ok(())
}

async fn handle_plan(selection: Selection, config: &DiligenceConfig) -> Result<()> {
    let profile = read_company(config, &selection.company)?;
    let engine = open_engine(config)?;
    let run_id = selection.run_id.clone().unwrap_or_else(new_run_id);

    let request = RunRequest::new(&run_id, profile.company_id())
        .sections(selection.sections.iter().cloned())
        .force(selection.force());
    let plan = engine.plan(&request).await?;

    if plan.is_empty() {
        println!("Nothing to do: all requested sections of run {} are current", run_id);
        return Ok(());
    }

    println!("Plan for {} (run {}):", profile.company_name, run_id);
    for (i, section_id) in plan.iter().enumerate() {
        let spec = engine.registry().get(section_id)?;
        println!("  {:>2}. {} ({})", i + 1, spec.display_name, section_id);
    }
    Ok(())
}

async fn handle_run(selection: Selection, export: bool, config: &DiligenceConfig) -> Result<()> {
    config.validate()?;
    let profile = read_company(config, &selection.company)?;
    let run_id = selection.run_id.clone().unwrap_or_else(new_run_id);
    let company_id = profile.company_id();

    info!(run_id = %run_id, company = %company_id, "Starting run");

    let progress = ProgressReporter::default();
    let printer = tokio::spawn(print_progress(progress.subscribe()));
    let engine = open_engine(config)?.with_progress(progress);

    // Ctrl-C fails the current section; everything recorded so far is kept
    let (cancel_tx, cancel_rx) = cancellation_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling current section");
            let _ = cancel_tx.send(true);
        }
    });
    let provider = CancellableProvider::new(
        build_provider(&config.provider, &profile, &run_id)?,
        cancel_rx,
    );

    println!("Run {} for {}", run_id, profile.company_name);

    let request = RunRequest::new(&run_id, &company_id)
        .sections(selection.sections.iter().cloned())
        .force(selection.force());
    let result = timed("run", engine.run(&request, &provider)).await;

    let exported = match (&result, export) {
        (Ok(_), true) => {
            let exporter = report_exporter(config, config.output_dir());
            Some(
                engine
                    .export(&run_id, &exporter, ExportFormat::Markdown)
                    .await?,
            )
        }
        _ => None,
    };

    // Closing the last sender lets the printer drain and stop
    drop(engine);
    let _ = printer.await;

    match result {
        Ok(outcome) => {
            if outcome.executed.is_empty() {
                println!("Nothing to do: all requested sections are current");
            } else {
                println!(
                    "Generated {} section(s) in {:.1}s",
                    outcome.executed.len(),
                    outcome.elapsed_ms as f64 / 1000.0
                );
            }
            if let Some(path) = exported {
                println!("Exported to {}", path.display());
            }
            Ok(())
        }
        Err(EngineError::SectionExecution {
            section_id,
            completed,
            message,
            ..
        }) => {
            eprintln!("Section '{}' failed: {}", section_id, message);
            if completed.is_empty() {
                eprintln!("No sections were recorded in this invocation.");
            } else {
                eprintln!("Safely recorded: {}", completed.join(", "));
            }
            eprintln!(
                "Resume with: diligence run {} --run-id {}",
                selection.company, run_id
            );
            bail!("run {} stopped at section '{}'", run_id, section_id)
        }
        Err(e) => Err(e.into()),
    }
}

async fn print_progress(mut updates: tokio::sync::broadcast::Receiver<ProgressUpdate>) {
    loop {
        match updates.recv().await {
            Ok(ProgressUpdate::Started {
                display_name,
                index,
                total,
                ..
            }) => println!("[{}/{}] {}...", index, total, display_name),
            Ok(ProgressUpdate::Completed {
                section_id,
                section_ms,
                eta_ms,
                ..
            }) => match eta_ms {
                Some(eta) if eta > 0 => println!(
                    "      done: {} ({:.1}s, ~{:.0}s remaining)",
                    section_id,
                    section_ms as f64 / 1000.0,
                    eta as f64 / 1000.0
                ),
                _ => println!(
                    "      done: {} ({:.1}s)",
                    section_id,
                    section_ms as f64 / 1000.0
                ),
            },
            Ok(ProgressUpdate::Failed {
                section_id,
                message,
                ..
            }) => println!("      failed: {} ({})", section_id, message),
            Ok(ProgressUpdate::Finished { .. }) => {}
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}

async fn handle_status(run_id: Option<String>, config: &DiligenceConfig) -> Result<()> {
    let engine = open_engine(config)?;

    let Some(run_id) = run_id else {
        let runs = engine.runs().await?;
        if runs.is_empty() {
            println!("No runs in {}", config.state_dir().display());
            return Ok(());
        }
        println!(
            "{:<38} {:<24} {:>9}  {}",
            "RUN", "COMPANY", "SECTIONS", "UPDATED"
        );
        for run in runs {
            println!(
                "{:<38} {:<24} {:>4}/{:<4}  {}",
                run.run_id,
                run.company_id.as_deref().unwrap_or("-"),
                run.completed,
                engine.registry().len(),
                run.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        return Ok(());
    };

    let state = engine.state(&run_id).await?;
    if state.is_empty() {
        println!("Run {} has no recorded sections", run_id);
        return Ok(());
    }

    println!(
        "Run {} ({})",
        run_id,
        state.company_id.as_deref().unwrap_or("unknown company")
    );
    for spec in engine.registry().iter() {
        match state.result(&spec.id) {
            Some(result) => println!(
                "  [x] {:<36} {}",
                spec.display_name,
                result.completed_at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!("  [ ] {}", spec.display_name),
        }
    }
    Ok(())
}

async fn handle_report(
    run_id: String,
    output: Option<PathBuf>,
    format: ExportFormat,
    config: &DiligenceConfig,
) -> Result<()> {
    let engine = open_engine(config)?;
    let state = engine.state(&run_id).await?;
    if state.is_empty() {
        bail!("Run {} has no recorded sections", run_id);
    }

    let Some(output) = output else {
        let report = engine.report(&run_id).await?;
        match format {
            ExportFormat::Markdown => print!("{}", report.to_markdown(&config.report.title)),
            ExportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }
        return Ok(());
    };

    let exporter = report_exporter(config, output);
    let path = engine.export(&run_id, &exporter, format).await?;
    println!("Exported {} report to {}", format, path.display());
    Ok(())
}

fn handle_config(show: bool, init: bool, validate: bool, config: &DiligenceConfig) -> Result<()> {
    if init {
        let config_dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|d| d.join(".config")))
            .ok_or_else(|| anyhow!("Could not determine a configuration directory"))?
            .join("diligence");
        let config_path = config_dir.join("config.toml");

        if config_path.exists() {
            println!("Configuration already exists at: {}", config_path.display());
        } else {
            DiligenceConfig::default().save_to_file(&config_path)?;
            println!("Configuration initialized at: {}", config_path.display());
            println!("Edit provider.command or provider.endpoint before the first run.");
        }
    }

    if show {
        println!("{}", config.to_toml_string()?);
    }

    if validate {
        match config.validate() {
            Ok(()) => println!("Configuration is valid"),
            Err(e) => {
                println!("Configuration validation failed: {}", e);
                return Err(e.into());
            }
        }
    }

    if !(init || show || validate) {
        println!("Nothing to do. Use --show, --init or --validate.");
    }

    Ok(())
}
