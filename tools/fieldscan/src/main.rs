//! fieldscan - run field device scan threads from a YAML file
//!
//! ```text
//! fieldscan run --config plant.yaml
//! fieldscan validate --config plant.yaml
//! ```

mod config;
mod logging;
mod runtime;
mod shutdown;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::runtime::Runtime;

#[derive(Parser)]
#[command(name = "fieldscan")]
#[command(about = "Field device scanner for Melsec, Master-K and Temi controllers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every scan thread and run until Ctrl+C or SIGTERM
    Run {
        #[arg(short, long, env = "FIELDSCAN_CONFIG", default_value = "fieldscan.yaml")]
        config: PathBuf,
    },

    /// Check a configuration file without opening any socket
    Validate {
        #[arg(short, long, env = "FIELDSCAN_CONFIG", default_value = "fieldscan.yaml")]
        config: PathBuf,

        /// Print the effective configuration after defaults and overrides
        #[arg(long)]
        print: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::Validate { config, print } => validate(config, print),
    }
}

async fn run(path: PathBuf) -> Result<()> {
    let config = AppConfig::load(&path)?;
    let _guard = logging::init(&config.logging)?;

    info!(
        "[fieldscan] starting {} devices from {}",
        config.devices.len(),
        path.display()
    );
    let mut runtime = Runtime::start(&config)
        .await
        .context("failed to start scan threads")?;

    info!("[fieldscan] {} scan units running", runtime.unit_count());

    shutdown::wait_for_shutdown().await;
    warn!("[fieldscan] shutdown signal received");

    for device in &config.devices {
        if let Some(handle) = runtime.device(&device.name) {
            info!(
                "[{}] {} at shutdown, {} register bytes",
                device.name,
                if handle.status.is_online() { "online" } else { "offline" },
                handle.registers.len_bytes()
            );
        }
    }
    runtime.shutdown().await;
    info!("[fieldscan] stopped");
    Ok(())
}

fn validate(path: PathBuf, print: bool) -> Result<()> {
    let config = AppConfig::load(&path)?;
    println!(
        "{}: {} devices, {} groups, configuration valid",
        path.display(),
        config.devices.len(),
        config.groups.len()
    );
    if print {
        let yaml = serde_yaml::to_string(&config).context("cannot render configuration")?;
        print!("{}", yaml);
    }
    Ok(())
}
