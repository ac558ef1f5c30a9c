//! Runnable node demo over the in-process testnet fabric.
//!
//! A real deployment substitutes any [kadnode::Overlay] implementation;
//! the lifecycle, flags, and failure handling stay the same.

use std::sync::Arc;

use clap::Parser;
use tracing::Level;

use kadnode::{config, Config, Orchestrator, Testnet};

#[derive(Parser)]
#[command(name = "kadnode", version, about = "DHT overlay node lifecycle orchestrator")]
struct Cli {
    /// Run as a bootstrap node.
    #[arg(long)]
    bootstrap: bool,

    /// Dialable address of a bootstrap node to connect to
    /// (`<addr>/p2p/<peer-id>`). Required unless --bootstrap is set.
    #[arg(long, required_unless_present = "bootstrap")]
    bootstrap_addr: Option<String>,

    /// Minimum peers before the key/value workflow starts.
    #[arg(long, default_value_t = config::DEFAULT_MIN_PEERS)]
    min_peers: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let config = Config {
        is_bootstrap: cli.bootstrap,
        bootstrap_addr: cli.bootstrap_addr,
        min_peers: cli.min_peers,
        ..Default::default()
    };

    let testnet = Testnet::new();
    let node = testnet.node_with_options(config.overlay.clone());

    let (shutdown_sender, shutdown_receiver) = flume::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_sender.send(());
    })?;

    let mut orchestrator = Orchestrator::new(Arc::new(node), config);
    orchestrator.run(shutdown_receiver)?;

    Ok(())
}
