//! group-daemon: decentralized peer discovery and group membership.
//!
//! Advertises this node on the configured interfaces, keeps the groups
//! from the config file, serves join requests and saves its identity on
//! shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use group_core::NodeId;
use group_daemon::node::{
    attach_interfaces, build_manager, create_groups, log_events, run_join, run_ticker,
    start_searches,
};
use group_daemon::{DaemonConfig, StateStore, channel_server, tcp_relay, udp};

#[derive(Parser, Debug)]
#[command(name = "group-daemon")]
#[command(about = "Peer discovery and group membership daemon")]
struct Args {
    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where node state is saved (default: next to the config)
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// UDP and channel port, overrides the config
    #[arg(short, long)]
    port: Option<u16>,

    /// Node name, overrides the config
    #[arg(long)]
    node_name: Option<String>,

    /// Node ID for a fresh node (generated if not provided)
    #[arg(long)]
    node_id: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,group_daemon=debug"
    } else {
        "info,group_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting group-daemon");

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(name) = args.node_name {
        config.node_name = name;
    }
    let node_id = args
        .node_id
        .as_deref()
        .map(str::parse::<NodeId>)
        .transpose()
        .context("invalid --node-id")?;

    let store = match args.state {
        Some(path) => StateStore::new(path),
        None => StateStore::beside(args.config.as_deref()),
    };
    let saved = store.load()?;
    let manager = Arc::new(build_manager(&config, saved.as_ref(), node_id)?);
    let engine = manager.config();
    info!("Node {} ({}), state at {:?}", manager.node_id(), manager.node_name(), store.path());

    let _events = log_events(&manager);
    let attached = attach_interfaces(&manager, &config, &engine)?;
    create_groups(&manager, &config.groups)?;

    let receiver = udp::bind_receiver(engine.port, &attached.multicast)
        .with_context(|| format!("binding UDP port {}", engine.port))?;
    let channel = channel_server::bind(engine.port)
        .await
        .with_context(|| format!("binding channel port {}", engine.port))?;

    tokio::spawn(udp::run_receiver(receiver, attached.routes.clone(), Arc::clone(&manager)));
    tokio::spawn(channel_server::run_channel_server(channel, Arc::clone(&manager)));
    if let Some(relay) = attached.relay {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.relay_port))
            .await
            .with_context(|| format!("binding relay port {}", config.relay_port))?;
        info!("Relay listener on port {}", config.relay_port);
        tokio::spawn(tcp_relay::run_relay_listener(listener, relay, Arc::clone(&manager)));
    }

    manager.start()?;
    start_searches(&manager, &config.searches);
    for join in config.joins.iter().cloned() {
        tokio::spawn(run_join(Arc::clone(&manager), join));
    }

    info!("Daemon running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = run_ticker(Arc::clone(&manager), Duration::from_secs(1)) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    manager.stop();
    if let Err(e) = store.save(&manager.settings_snapshot()) {
        error!("Failed to save node state: {}", e);
    }
    info!("Shutting down");
    Ok(())
}
