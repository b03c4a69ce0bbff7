//! Mesh Simulator - run a mesh of routing nodes over a simulated radio
//!
//! Builds the topology from a TOML file, lets the nodes exchange IAM/ICAN
//! until their host tables settle, then sends a probe across the mesh and
//! prints every node's host table.

use clap::Parser;
use mesh_sim::{config::SimConfig, sim::Simulation, sim::SETTLE_TICKS, Result};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mesh-sim.toml")]
    config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Number of ticks to run before the probe
    #[arg(long)]
    ticks: Option<u64>,

    /// Simulated milliseconds per tick
    #[arg(long)]
    tick_ms: Option<u32>,

    /// Probability of corrupting each delivered frame
    #[arg(long)]
    loss: Option<f64>,

    /// Wall-clock milliseconds between ticks
    #[arg(long)]
    pace_ms: Option<u64>,

    /// Write the default configuration to a file and exit
    #[arg(long)]
    write_default: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    if let Some(path) = args.write_default {
        SimConfig::default().save_to_file(&path)?;
        info!("Default configuration saved to {:?}", path);
        return Ok(());
    }

    let mut config = if args.config.exists() {
        info!("Loading configuration from {:?}", args.config);
        SimConfig::load_from_file(&args.config)?
    } else {
        info!("Configuration file not found, using the default three-node line");
        SimConfig::default()
    };

    // Override config with CLI args if provided
    if let Some(ticks) = args.ticks {
        config.ticks = ticks;
    }
    if let Some(tick_ms) = args.tick_ms {
        config.tick_ms = tick_ms;
    }
    if let Some(loss) = args.loss {
        config.loss = loss;
    }
    if let Some(pace_ms) = args.pace_ms {
        config.pace_ms = pace_ms;
    }

    let ticks = config.ticks;
    let mut sim = Simulation::new(config)?;

    let ran = sim.run(ticks).await?;
    info!(ticks = ran, now_ms = sim.now_ms(), converged = sim.converged(), "Mesh settled");
    if !sim.converged() {
        warn!("Not every node has a route to every other node");
    }

    if sim.config().probe.is_some() {
        match sim.send_probe() {
            Ok(_) => {
                sim.run(SETTLE_TICKS).await?;
                if sim.probe_delivered() {
                    info!("Probe delivered");
                } else {
                    warn!("Probe was not delivered");
                }
            }
            Err(e) => error!("Probe failed: {}", e),
        }
    }

    print!("{}", sim.report());
    Ok(())
}
