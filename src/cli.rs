//! Command-line interface for the segmentation pipeline.

use clusterfolio::analytics::ResultFormatter;
use clusterfolio::config::PipelineConfig;
use clusterfolio::data::{load_prices, DataConfig};
use clusterfolio::error::Result;
use clusterfolio::pipeline::{Pipeline, PipelineInput};

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Clusterfolio - segment assets by risk profile, build portfolios, backtest them.
#[derive(Parser)]
#[command(name = "clusterfolio")]
#[command(version)]
#[command(about = "Cluster-based portfolio construction and buy-and-hold backtesting")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline
    Run {
        /// Training prices (long CSV: date,asset_id,adj_close)
        #[arg(long)]
        train: PathBuf,

        /// Held-out prices for the backtest
        #[arg(long)]
        test: PathBuf,

        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        /// Skip malformed CSV rows instead of failing
        #[arg(long)]
        skip_invalid: bool,
    },

    /// Compare inertia and silhouette across cluster counts
    Elbow {
        /// Training prices (long CSV: date,asset_id,adj_close)
        #[arg(long)]
        train: PathBuf,

        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Smallest K to fit
        #[arg(long, default_value = "2")]
        k_min: usize,

        /// Largest K to fit
        #[arg(long, default_value = "10")]
        k_max: usize,

        /// Print the sweep as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "clusterfolio.toml")]
        output: PathBuf,
    },

    /// List the configured risk profiles
    Profiles {
        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("tracing subscriber already installed");
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run {
            train,
            test,
            config,
            json,
            skip_invalid,
        } => run_pipeline(train, test, config.as_ref(), *json, *skip_invalid),
        Commands::Elbow {
            train,
            config,
            k_min,
            k_max,
            json,
        } => run_elbow(train, config.as_ref(), *k_min, *k_max, *json),
        Commands::Init { output } => init_config(output),
        Commands::Profiles { config } => {
            let config = load_config(config.as_ref())?;
            ResultFormatter::print_profiles(&config.profiles);
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => {
            info!("No configuration file given, using defaults");
            Ok(PipelineConfig::default())
        }
    }
}

fn run_pipeline(
    train_path: &PathBuf,
    test_path: &PathBuf,
    config_path: Option<&PathBuf>,
    json: bool,
    skip_invalid: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let data_config = DataConfig {
        skip_invalid,
        ..Default::default()
    };

    let train = load_prices(train_path, &data_config)?;
    let test = load_prices(test_path, &data_config)?;
    let input = PipelineInput::from_series(train, test, &config.benchmark_id)?;

    let pipeline = Pipeline::new(config);
    let mut report = pipeline.run(&input)?;
    report.metadata.track_file(train_path)?;
    report.metadata.track_file(test_path)?;

    if json {
        println!("{}", ResultFormatter::to_json(&report));
    } else {
        ResultFormatter::print_summary(&report);
        for outcome in &report.profiles {
            if let Some(bt) = &outcome.backtest {
                ResultFormatter::print_backtest(bt);
            }
        }
    }
    Ok(())
}

fn run_elbow(
    train_path: &PathBuf,
    config_path: Option<&PathBuf>,
    k_min: usize,
    k_max: usize,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let train = load_prices(train_path, &DataConfig::default())?;
    let sweep = Pipeline::new(config).k_sweep(&train, k_min..=k_max)?;

    if json {
        println!("{}", ResultFormatter::to_json(&sweep));
    } else {
        ResultFormatter::print_k_sweep(&sweep);
    }
    Ok(())
}

fn init_config(output: &PathBuf) -> Result<()> {
    fs::write(output, PipelineConfig::example())?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to customize the run, then:");
    println!(
        "  clusterfolio run --train train.csv --test test.csv -c {}",
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from([
            "clusterfolio",
            "-vv",
            "run",
            "--train",
            "train.csv",
            "--test",
            "test.csv",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run { json, config, .. } => {
                assert!(json);
                assert!(config.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_requires_both_files() {
        assert!(Cli::try_parse_from(["clusterfolio", "run", "--train", "a.csv"]).is_err());
    }

    #[test]
    fn test_init_default_output() {
        let cli = Cli::try_parse_from(["clusterfolio", "init"]).unwrap();
        match cli.command {
            Commands::Init { output } => assert_eq!(output, PathBuf::from("clusterfolio.toml")),
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn test_cli_parse_elbow() {
        let cli = Cli::try_parse_from([
            "clusterfolio",
            "elbow",
            "--train",
            "train.csv",
            "--k-max",
            "6",
        ])
        .unwrap();
        match cli.command {
            Commands::Elbow {
                train,
                k_min,
                k_max,
                json,
                ..
            } => {
                assert_eq!(train, PathBuf::from("train.csv"));
                assert_eq!((k_min, k_max), (2, 6));
                assert!(!json);
            }
            _ => panic!("expected elbow"),
        }
        assert!(Cli::try_parse_from(["clusterfolio", "elbow"]).is_err());
    }

    #[test]
    fn test_profiles_command() {
        let cli = Cli::try_parse_from(["clusterfolio", "profiles"]);
        assert!(cli.is_ok());
    }
}
