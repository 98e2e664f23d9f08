use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use varmeta::{config::Config, server};

#[derive(Args)]
pub struct ServeArgs {
    /// Override the configured HTTP port
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the configured metadata database path
    #[arg(long)]
    pub database: Option<PathBuf>,
}

pub async fn execute(config_path: Option<PathBuf>, args: ServeArgs) -> Result<()> {
    let mut config = Config::load_or_default(config_path.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }

    server::run(config).await?;
    Ok(())
}
