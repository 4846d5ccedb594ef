//! floodstack CLI
//!
//! Builds image/label training pairs for every label tile under the
//! configured input directory.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use floodstack::config::CONFIG_TEMPLATE;
use floodstack::io::label::DatePattern;
use floodstack::{BatchDriver, Config, GdalAssetReader, StacClient};

#[derive(Parser)]
#[command(name = "floodstack")]
#[command(about = "Pair flood label tiles with Sentinel-1 and NASADEM composites", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long, default_value = "floodstack.yaml", global = true)]
    config: PathBuf,

    /// Override the rayon thread count
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every label tile (default if no command specified)
    Run,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "floodstack.yaml")]
        output: PathBuf,
    },

    /// Print the acquisition date parsed from each filename
    Date {
        #[arg(required = true)]
        filenames: Vec<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => run_command(cli.config, cli.threads)?,
        Some(Commands::Validate) => validate_command(cli.config)?,
        Some(Commands::GenerateConfig { output }) => generate_config_command(output)?,
        Some(Commands::Date { filenames }) => date_command(cli.config, &filenames)?,
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::from_file(path).with_context(|| format!("loading {}", path.display()))
    } else {
        log::warn!("{} not found, using default configuration", path.display());
        Ok(Config::default())
    }
}

fn run_command(config_path: PathBuf, threads: Option<usize>) -> Result<()> {
    let mut config = load_config(&config_path)?;

    // Apply overrides
    if let Some(t) = threads {
        config.processing.threads = t;
    }
    config.validate()?;

    let catalog = StacClient::new(&config.catalog)?;
    log::info!("Catalog: {}", catalog.search_url());
    let reader = GdalAssetReader::new(config.processing.resampling);

    let driver = BatchDriver::new(config, Box::new(catalog), Box::new(reader))?;
    let report = driver.run().context("batch aborted")?;

    println!(
        "{} written, {} skipped, {} failed of {} tile(s); {} image(s), {} label(s) on disk",
        report.written,
        report.skipped,
        report.failed,
        report.discovered,
        report.images_on_disk,
        report.labels_on_disk
    );
    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    std::fs::write(&output, CONFIG_TEMPLATE)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Generated sample configuration at: {}", output.display());
    Ok(())
}

fn date_command(config_path: PathBuf, filenames: &[String]) -> Result<()> {
    let config = load_config(&config_path)?;
    let pattern = DatePattern::new(&config.input.date_pattern)?;
    for name in filenames {
        match pattern.extract(name) {
            Some(date) => println!("{}\t{}", name, date),
            None => println!("{}\t-", name),
        }
    }
    Ok(())
}
