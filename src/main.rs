//! Reaction-Diffusion - Main Entry Point
//!
//! Loads the model description, hooks the named implementations up to it and
//! runs the coupled simulation.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};

use reaction_diffusion_lib::logging::{self, LoggingConfig};
use reaction_diffusion_lib::{run_simulation, Configuration, Implementations};

#[derive(Parser)]
#[command(name = "reaction-diffusion")]
#[command(version)]
#[command(about = "Coupled reaction-diffusion simulation")]
struct Cli {
    /// Model description (YAML); defaults to config/reaction_diffusion.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a JSON summary of the run here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Default log level
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Log every exchange between submodels
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LoggingConfig::with_level(cli.log_level);
    if cli.verbose {
        log_config = log_config.module("reaction_diffusion_lib", LevelFilter::Trace);
    }
    logging::init(&log_config)?;

    let configuration = match &cli.config {
        Some(path) => Configuration::load(path)?,
        None => Configuration::load_default()?,
    };

    let outcome = run_simulation(&configuration, &Implementations::standard())?;
    let summary = outcome.summary();

    match &cli.output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&summary)?;
            fs::write(path, json)
                .with_context(|| format!("failed to write results to {}", path.display()))?;
            info!("Results written to {}", path.display());
        }
        None => {
            let peak = summary.final_state.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            println!(
                "{}: {} steps to t = {:e}, {} exchanges, peak = {:.6}",
                summary.model, summary.steps, summary.t_end, summary.exchanges, peak
            );
        }
    }

    Ok(())
}
