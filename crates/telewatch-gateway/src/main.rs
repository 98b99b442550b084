//! Gateway binary: CLI parsing, logging, context wiring, serve.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use telewatch_gateway::{AppContext, GatewaySettings, run};

/// Observation and test gateway for IEC 60870-5-104 links.
#[derive(Debug, Parser)]
#[command(name = "telewatch-gateway", version, about)]
struct Cli {
    /// Bind address, overriding the settings file.
    #[arg(long)]
    bind: Option<String>,

    /// Settings file (YAML); defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory, overriding the settings file.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut settings = GatewaySettings::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        settings.bind = bind;
    }
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }

    let context = AppContext::build(&settings)?;
    run(context, &settings.bind).await
}
