use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

mod config;
mod logging;
mod node;

use config::NodeConfig;
use node::ValidatorNode;

#[derive(Parser)]
#[command(name = "polv")]
#[command(about = "Proof-of-liquidity coordinator for concentrated-liquidity vaults", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "polv.toml")]
    config: PathBuf,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator
    Start {
        /// Suppress executor-sink emission and on-chain side effects
        #[arg(long)]
        dry_run: bool,

        /// Data directory override
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Write a default configuration file
    Init {
        /// Output directory for the configuration
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Parse and validate the configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output } => {
            let path = output.join("polv.toml");
            NodeConfig::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
        Commands::CheckConfig => {
            let config = NodeConfig::from_file(&cli.config)?;
            println!(
                "Configuration OK: {} job(s), {} miner(s)",
                config.jobs.len(),
                config.miners.len()
            );
            Ok(())
        }
        Commands::Start { dry_run, data_dir } => {
            let mut config = NodeConfig::from_file(&cli.config)
                .with_context(|| "Run `polv init` to generate a starting configuration")?;
            if dry_run {
                config.node.dry_run = true;
            }
            if let Some(data_dir) = data_dir {
                config.node.data_dir = data_dir;
            }
            logging::init_logging(&config.logging, cli.verbose);
            info!(config = %cli.config.display(), "Configuration loaded");

            let node = ValidatorNode::new(config).await?;
            node.run().await
        }
    }
}
