#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::process;

use oenometrics::config::AnalysisConfig;
use oenometrics::pipeline::{AnalysisError, Stage, WineInputs, run_stages};
use oenometrics::report::{render_text, write_tables};

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Red wine table (semicolon-separated, with header)
    #[arg(long, value_name = "PATH", default_value = "winequality-red.csv")]
    pub red: PathBuf,

    /// White wine table (semicolon-separated, with header)
    #[arg(long, value_name = "PATH", default_value = "winequality-white.csv")]
    pub white: PathBuf,

    /// TOML configuration file; every key is optional
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Seed for every random split and fold assignment
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of random half/half splits per resampled evaluation
    #[arg(long, value_name = "N")]
    pub trials: Option<usize>,

    /// Directory receiving tab-separated copies of the result tables
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Parser)]
#[command(
    name = "oenometrics",
    version,
    about = "Statistical analysis of the wine-quality data sets",
    long_about = "Subset selection, resampled test error, ridge and lasso paths, and \
                 principal component analysis of the red and white wine-quality tables."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage of the analysis
    #[command(about = "Run the full analysis")]
    Run(CommonArgs),

    /// Best-subset, forward and backward selection on each full table
    #[command(about = "Subset selection on the full tables")]
    Subsets(CommonArgs),

    /// Repeated half/half splits scoring every selected model on held-out rows
    #[command(about = "Resampled train and test error of subset selection")]
    Resample(CommonArgs),

    /// Ridge and lasso with cross-validated penalties
    #[command(about = "Ridge and lasso regression")]
    Penalized(CommonArgs),

    /// Principal components of the merged tables and regression on components
    #[command(about = "Principal component analysis")]
    Pca(CommonArgs),
}

impl Commands {
    fn split(self) -> (CommonArgs, &'static [Stage]) {
        match self {
            Commands::Run(args) => (args, &Stage::ALL),
            Commands::Subsets(args) => (args, &[Stage::Subsets]),
            Commands::Resample(args) => (args, &[Stage::Resample]),
            Commands::Penalized(args) => (args, &[Stage::Penalized]),
            Commands::Pca(args) => (args, &[Stage::Structure, Stage::ComponentRegression]),
        }
    }
}

fn run(args: CommonArgs, stages: &[Stage]) -> Result<(), AnalysisError> {
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(trials) = args.trials {
        config.trials = trials;
    }

    let inputs = WineInputs {
        red: args.red,
        white: args.white,
    };
    let report = run_stages(&inputs, &config, stages)?;

    let stdout = io::stdout();
    render_text(&mut stdout.lock(), &report)?;
    if let Some(dir) = &args.output_dir {
        let written = write_tables(dir, &report)?;
        log::info!("{} tables written to {}", written.len(), dir.display());
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let (args, stages) = command.split();
    if let Err(e) = run(args, stages) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
