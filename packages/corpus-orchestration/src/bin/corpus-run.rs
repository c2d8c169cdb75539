//! Corpus pipeline runner
//!
//! # Usage
//!
//! ```bash
//! # Extract every function definition of every C file in the corpus
//! corpus-run extract corpus/ /usr/bin/clang-12 build/libExtractFuncs.so out/ --log-level 2
//!
//! # Reconstruct missing declarations with PsycheC
//! corpus-run reconstruct corpus/ gcc /opt/psychec out/ --solver-timeout 10
//!
//! # Everything from a YAML file
//! corpus-run run --config corpus.yaml
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use corpus_orchestration::config::{PipelineConfig, RunConfig};
use corpus_orchestration::{CorpusOrchestrator, LogLevel, ReportWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "corpus-run")]
#[command(about = "Run an external-tool pipeline over a corpus of C repositories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// 0: summary only, 1: event log, 2: event log + CSV ledgers + JSON report
    #[arg(long, global = true)]
    log_level: Option<i64>,

    /// Concurrent jobs per repository (default: number of CPUs)
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Create the destination directory if it is missing
    #[arg(long, global = true)]
    create_dest: bool,

    /// Where log and ledger files are written
    #[arg(long, global = true)]
    report_dir: Option<PathBuf>,

    /// Parent directory for per-job scratch directories
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Debug-level diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract function definitions with the clang plugin
    Extract {
        /// Corpus root (one subdirectory per repository)
        corpus: PathBuf,
        /// clang binary
        clang: PathBuf,
        /// Extractor plugin shared library
        plugin: PathBuf,
        /// Destination root
        dest: PathBuf,
    },

    /// Reconstruct missing type declarations with PsycheC
    Reconstruct {
        /// Corpus root (one subdirectory per repository)
        corpus: PathBuf,
        /// Compiler used to verify reconstructed files
        compiler: PathBuf,
        /// PsycheC checkout (holds psychecgen and solver/)
        psychec_dir: PathBuf,
        /// Destination root
        dest: PathBuf,

        /// Solver timeout in seconds
        #[arg(long, default_value = "5")]
        solver_timeout: u64,
    },

    /// Run from a YAML configuration file
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.common.verbose);

    let config = match build_config(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let validated = match config.validate() {
        Ok(validated) => validated,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(validated).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: Cli) -> anyhow::Result<RunConfig> {
    let common = cli.common;

    let mut config = match cli.command {
        Commands::Extract {
            corpus,
            clang,
            plugin,
            dest,
        } => RunConfig::new(
            corpus,
            dest,
            PipelineConfig::Extraction {
                clang,
                plugin,
                plugin_name: None,
            },
        ),
        Commands::Reconstruct {
            corpus,
            compiler,
            psychec_dir,
            dest,
            solver_timeout,
        } => RunConfig::new(
            corpus,
            dest,
            PipelineConfig::Reconstruction {
                compiler,
                psychec_dir,
                solver_command: None,
                solver_timeout_secs: solver_timeout,
            },
        ),
        Commands::Run { config } => RunConfig::from_yaml(&config)
            .with_context(|| format!("loading {}", config.display()))?,
    };

    // flags override the YAML file
    if let Some(level) = common.log_level {
        config = config.log_level(LogLevel::from_level(level)?);
    }
    if let Some(workers) = common.workers {
        config = config.workers(workers);
    }
    if common.create_dest {
        config = config.create_destination(true);
    }
    if let Some(dir) = common.report_dir {
        config = config.report_dir(dir);
    }
    if let Some(dir) = common.scratch_dir {
        config = config.scratch_dir(dir);
    }
    Ok(config)
}

async fn run(config: corpus_orchestration::ValidatedConfig) -> anyhow::Result<()> {
    let pipeline = config.pipeline.clone();
    let writer = ReportWriter::new(
        &config.report_dir,
        config.log_level,
        pipeline.name(),
        pipeline.ledger_prefix(),
    );

    info!("Starting {} over {}", pipeline.name(), config.corpus_root.display());
    let outcome = CorpusOrchestrator::new(&config).run().await?;

    let written = outcome
        .write_reports(&writer)
        .context("writing run reports")?;
    for path in &written {
        info!("Wrote {}", path.display());
    }

    // the event log already ends with the summary
    if outcome.events.level().events_enabled() {
        print!("{}", outcome.events.render());
    } else {
        print!("{}", outcome.report);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    tracing_subscriber::registry()
        .with(build_env_filter(verbose))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();
}

/// `CORPUS_RUN_LOG` > `RUST_LOG` > `--verbose`.
fn build_env_filter(verbose: bool) -> EnvFilter {
    if let Ok(directives) = std::env::var("CORPUS_RUN_LOG") {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if verbose {
        EnvFilter::new("info,corpus_orchestration=debug")
    } else {
        EnvFilter::new("warn")
    }
}
