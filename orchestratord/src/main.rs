// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fleet_orchestrator_core::api::{ws_handler, RestApi};
use fleet_orchestrator_core::config::ConfigLoader;
use fleet_orchestrator_core::orchestrator::Orchestrator;

/// Fleet orchestrator daemon: admin REST API and worker transport.
#[derive(Parser)]
#[command(name = "orchestratord")]
#[command(author = "Fleet Orchestrator Contributors")]
#[command(version)]
#[command(about = "Admin HTTP surface and worker-transport server for the fleet orchestrator", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator HTTP + WebSocket server
    Serve {
        /// Path to an orchestrator.toml configuration file
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { config } => serve(config).await,
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        if cli.verbose {
            eprintln!("\nCaused by:");
            for cause in err.chain().skip(1) {
                eprintln!("  {cause}");
            }
        }
        process::exit(1);
    }
}

async fn serve(config_path: Option<String>) -> anyhow::Result<()> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = config_path {
        loader = loader.with_file(path);
    }
    let config = loader.load()?;
    let port = config.port;

    let orchestrator = Orchestrator::new(config);
    orchestrator.clone().run_background_loops();

    let app = RestApi::router()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(orchestrator);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "orchestratord listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
