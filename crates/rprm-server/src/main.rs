// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! rprm resource manager daemon
//!
//! Host-side resource manager for remote processors. Each accepted TCP
//! stream stands in for one shared-memory channel to a remote core; the
//! remote firmware (or `rprmctl`) connects, requests resources and adjusts
//! their constraints.
//!
//! # Usage
//!
//! ```bash
//! # Start with the built-in simulated resources on port 7450
//! rprm-server
//!
//! # Custom port and config
//! rprm-server --port 7460 --config rprm.json
//!
//! # Write the default configuration to a file and exit
//! rprm-server --dump-config rprm.json
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod server;

pub use config::ServerConfig;
pub use server::RprmServer;

/// rprm daemon - brokers host resources for remote processors
#[derive(Parser, Debug)]
#[command(name = "rprm-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of open connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or create config
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading config from {:?}", config_path);
        ServerConfig::from_file(config_path)?
    } else {
        ServerConfig::default()
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = &args.bind {
        config.bind_address = bind.parse()?;
    }
    if let Some(max) = args.max_connections {
        config.manager.max_connections = max;
    }

    if let Some(path) = &args.dump_config {
        config.to_file(path)?;
        info!("Configuration written to {:?}", path);
        return Ok(());
    }

    info!("+----------------------------------------------------+");
    info!(
        "|       rprm resource manager v{}                 |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!(
        "|  Bind:      {:37} |",
        format!("{}:{}", config.bind_address, config.port)
    );
    info!("|  Max conn:  {:37} |", config.manager.max_connections);
    info!("|  Msg size:  {:37} |", config.manager.max_message_size);
    for resource in &config.resources {
        info!(
            "|  Resource:  {:37} |",
            format!("{} ({})", resource.name, resource.owner)
        );
    }
    info!("+----------------------------------------------------+");

    // Create and run server
    let server = RprmServer::new(config)?;

    // Handle shutdown signals
    let server_handle = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping server...");
        server_handle.shutdown().await;
    });

    server.run().await?;

    server::log_snapshot(server.manager());
    match server.manager().shutdown() {
        Ok(reports) => info!("Released resources of {} connections", reports.len()),
        Err(e) => warn!("Incomplete shutdown: {}", e),
    }

    info!("Resource manager stopped");
    Ok(())
}
