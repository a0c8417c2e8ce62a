// ============================================================================
// CLI ENTRY POINT
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use vantage_engine::config::EngineConfig;
use vantage_engine::engine::AnalyticsEngine;
use vantage_engine::logging::init_logging;
use vantage_engine::store::{MemoryStore, MetricStore};

#[derive(Parser)]
#[command(
    name = "vantage",
    version,
    about = "Telemetry ingestion, aggregation, and analytics engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine until interrupted
    Run {
        /// Path to the TOML configuration file
        #[arg(short, long, env = "VANTAGE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file and exit
    CheckConfig {
        /// Path to the TOML configuration file
        #[arg(short, long, env = "VANTAGE_CONFIG")]
        config: PathBuf,
    },
    /// Print the default configuration as TOML
    PrintConfig,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => {
            let config = load_config(config.as_ref())?;
            init_logging(&config.logging)?;

            let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
            let engine = AnalyticsEngine::new(config, store);
            engine.start().await?;

            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            info!(target: "vantage::main", "Shutdown signal received");
            engine.shutdown().await;
            Ok(())
        }
        Command::CheckConfig { config } => {
            let loaded = load_config(Some(&config))?;
            println!(
                "configuration ok: instance '{}', {} key metrics",
                loaded.general.instance_name,
                loaded.insight.key_metrics.len()
            );
            Ok(())
        }
        Command::PrintConfig => {
            print!("{}", EngineConfig::default_toml());
            Ok(())
        }
    }
}
