use anyhow::Context;
use clap::{Parser, Subcommand};
use simplebinary_rs::{init_logger, log_info, ConfigFile, DeviceManager, LogSink};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "simplebinary-cli")]
#[command(about = "CLI tool for the SimpleBinary fieldbus protocol")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the master engine with a JSON configuration file
    Run {
        #[arg(short, long)]
        config: String,
    },
    /// Parse a configuration file and report what it declares
    CheckConfig {
        #[arg(short, long)]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let text = std::fs::read_to_string(&config)
                .with_context(|| format!("reading {config}"))?;
            let parsed = ConfigFile::from_json(&text)?;

            let mut manager = DeviceManager::from_config(parsed, Arc::new(LogSink)).await?;
            log_info("All channels started, press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            manager.disconnect_all().await;
            log_info("Stopped");
        }
        Commands::CheckConfig { config } => {
            let text = std::fs::read_to_string(&config)
                .with_context(|| format!("reading {config}"))?;
            let parsed = ConfigFile::from_json(&text)?;
            for channel in &parsed.channels {
                log_info(&format!(
                    "Channel: {} ({:?})",
                    channel.name, channel.poll_mode
                ));
            }
            log_info(&format!("Items: {}", parsed.items.len()));
        }
    }

    Ok(())
}
