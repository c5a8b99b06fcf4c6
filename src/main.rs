//! Tandem - implicit coupling of two solvers
//!
//! CLI entry point for running the demo coupling and inspecting configuration.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use tandem::cli::{Cli, Command, OutputFormat};
use tandem::config::Config;
use tandem::demo::{DemoReport, run_demo};

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tandem")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("tandem.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!(
        "Tandem loaded config: first={}, second={}",
        config.coupling.first, config.coupling.second
    );

    match cli.command {
        Some(Command::Run { timesteps, format }) => cmd_run(config, timesteps, format).await,
        Some(Command::Validate) => cmd_validate(&config),
        Some(Command::ShowConfig) => cmd_show_config(&config),
        None => cmd_run(config, None, OutputFormat::Text).await,
    }
}

async fn cmd_run(mut config: Config, timesteps: Option<u32>, format: OutputFormat) -> Result<()> {
    if let Some(timesteps) = timesteps {
        config.coupling.max_timesteps = Some(timesteps);
    }
    let report = run_demo(&config).await.context("Coupling run failed")?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &DemoReport) {
    for p in &report.participants {
        println!("{}", p.name);
        println!("  time:               {:.6}", p.time);
        println!("  windows:            {}", p.metrics.windows_completed());
        println!("  exchanges:          {}", p.metrics.exchanges);
        println!("  sub-cycling steps:  {}", p.metrics.subcycling_steps);
        println!("  avg iterations:     {:.2}", p.metrics.average_iterations());
        if p.metrics.forced_convergences > 0 {
            println!("  forced windows:     {}", p.metrics.forced_convergences);
        }
        for (name, value) in &p.final_values {
            println!("  {:<20}{:.9}", format!("{}:", name), value);
        }
    }
}

fn cmd_validate(config: &Config) -> Result<()> {
    config.validate()?;
    println!(
        "Configuration OK: {} -> {}, {} exchange(s), {} measure(s)",
        config.coupling.first,
        config.coupling.second,
        config.exchanges.len(),
        config.measures.len()
    );
    Ok(())
}

fn cmd_show_config(config: &Config) -> Result<()> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
