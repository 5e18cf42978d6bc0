use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod node_factory;
mod sim_args;
mod sim_ports;
mod simulator;
mod topology;

use sim_args::SimArgs;
use simulator::Simulator;
use topology::TopologyConfig;

fn main() -> Result<()> {
    let args = SimArgs::parse();

    if args.pretty {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty())
            .with(EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().compact())
            .with(EnvFilter::from_default_env())
            .init();
    }

    let topology = TopologyConfig::from_file(&args.config_file)?;
    let mut simulator = Simulator::new(&topology, args.seed)?;
    let duration = Duration::from_secs(args.duration);
    info!(nodes = simulator.nodes().len(), ?duration, seed = args.seed, "starting simulation");

    simulator.run(duration);
    simulator.report()?;

    for node in simulator.nodes_mut() {
        node.batman.shutdown();
    }
    info!(now = ?simulator.now(), "simulation finished");
    Ok(())
}
