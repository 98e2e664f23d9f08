mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{config::ConfigArgs, serve::ServeArgs};

#[derive(Parser)]
#[command(author, version, about = "Variant archive metadata API server")]
struct Cli {
    /// Path to the configuration file. Defaults to the built-in settings.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the metadata API server
    Serve(ServeArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli { config, command } = Cli::parse();

    match command {
        Commands::Serve(args) => commands::serve::execute(config, args).await?,
        Commands::Config(args) => commands::config::execute(config, args)?,
    }

    Ok(())
}
