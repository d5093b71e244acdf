// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

mod driver;
mod runtime;

use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use driver::{ShellContainerDriver, ShellRepoDriver};
use runtime::{Agent, AgentConfig};

/// Worker-agent node: builds and runs containerized replicas on behalf
/// of the orchestrator.
#[derive(Parser)]
#[command(name = "worker-agent")]
#[command(author = "Fleet Orchestrator Contributors")]
#[command(version)]
#[command(about = "Worker node agent for the fleet orchestrator", long_about = None)]
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
    /// Connect to the orchestrator and start accepting deployments
    Run {
        /// Orchestrator URL, e.g. http://localhost:3000
        #[arg(long, env = "MAIN_SERVER_URL", default_value = "http://localhost:3000")]
        main_server_url: String,

        /// Worker-side working root for deployment directories
        #[arg(long, env = "DEPLOYMENT_PATH", default_value = "./deployments")]
        deployment_path: String,

        /// Worker hostname reported on registration
        #[arg(long, env = "HOSTNAME")]
        hostname: Option<String>,
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
        Commands::Run {
            main_server_url,
            deployment_path,
            hostname,
        } => run(main_server_url, deployment_path, hostname).await,
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

async fn run(main_server_url: String, deployment_path: String, hostname: Option<String>) -> anyhow::Result<()> {
    let hostname = hostname.unwrap_or_else(|| std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-worker".to_string()));

    tokio::fs::create_dir_all(&deployment_path).await.ok();

    let config = AgentConfig {
        hostname,
        main_server_url,
        deployment_path,
    };

    let agent = Agent::new(config, Arc::new(ShellRepoDriver), Arc::new(ShellContainerDriver));
    agent.run_forever().await;
    Ok(())
}
