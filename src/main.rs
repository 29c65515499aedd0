use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use ens_bundler::engine::RegistrationReport;
use ens_bundler::{
    init_telemetry, register, BundlerConfig, Collaborators, RegistrationRequest, SimConfig,
    SimOutcome, SimulatedNetwork,
};

#[derive(Parser)]
#[command(name = "ens-bundler")]
#[command(about = "Register ENS names through a private bundle relay")]
#[command(long_about = "ens-bundler runs the commit-reveal registration protocol one block \
                       at a time, submitting the commit and register transactions as bundles \
                       to a private relay so the revealed name is never exposed in the \
                       public mempool.")]
struct Cli {
    /// Configuration file (defaults to ens-bundler.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full commit-reveal flow for a name against the simulated network
    Register {
        /// Name label to register, without the .eth suffix
        name: String,
        /// Rental duration in seconds (defaults to the configured duration)
        #[arg(long)]
        duration: Option<u64>,
        /// Minimum commitment age enforced by the simulated registrar
        #[arg(long, default_value = "60")]
        min_commitment_age: u64,
        /// Simulated block interval in milliseconds
        #[arg(long, default_value = "1000")]
        block_interval_ms: u64,
        /// Let the relay drop this many bundles before including any
        #[arg(long, default_value = "0")]
        drop_first: usize,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Write the configuration to this file instead of printing it
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    BundlerConfig::load_env_file()?;
    let config =
        BundlerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Register {
            name,
            duration,
            min_commitment_age,
            block_interval_ms,
            drop_first,
            json,
        } => {
            init_telemetry(&config.observability)?;
            let sim = SimConfig {
                controller: config.registrar.controller_address,
                block_interval: Duration::from_millis(block_interval_ms.max(1)),
                min_commitment_age: Duration::from_secs(min_commitment_age),
                relay_script: vec![SimOutcome::Drop; drop_first],
                ..SimConfig::default()
            };
            let mut request = RegistrationRequest::new(name);
            if let Some(duration) = duration {
                request = request.with_duration(duration);
            }
            tokio::runtime::Runtime::new()?
                .block_on(async { register_command(config, sim, request, json).await })
        }
        Commands::Config { write } => config_command(&config, write),
    }
}

async fn register_command(
    config: BundlerConfig,
    sim: SimConfig,
    request: RegistrationRequest,
    json: bool,
) -> Result<()> {
    let network = SimulatedNetwork::new(sim);
    let collaborators = Collaborators::from_backend(&network);

    let report = register(&collaborators, &config, &request)
        .await
        .with_context(|| format!("Registration of {} failed", request.name.trim()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RegistrationReport) {
    for transition in &report.transitions {
        println!(
            "block {:>10}  {} -> {}",
            transition.block, transition.from, transition.to
        );
    }
    println!();
    println!("Registered {}.eth to {}", report.name, report.owner);
    if let Some(block) = report.commit_block {
        println!("  commit included in block {block}");
    }
    if let Some(block) = report.register_block {
        println!("  register included in block {block}");
    }
    println!(
        "  {} bundle submissions, correlation id {}",
        report.attempts.len(),
        report.correlation_id
    );
}

fn config_command(config: &BundlerConfig, write: Option<PathBuf>) -> Result<()> {
    match write {
        Some(path) => {
            config
                .save_to_file(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote configuration to {}", path.display());
        }
        None => print!("{}", config.to_toml()?),
    }
    Ok(())
}
