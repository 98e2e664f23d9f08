use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use varmeta::config::Config;

#[derive(Args)]
pub struct ConfigArgs {
    /// Emit the configuration as TOML instead of the debug form
    #[arg(long)]
    pub toml: bool,
}

pub fn execute(config_path: Option<PathBuf>, args: ConfigArgs) -> Result<()> {
    let config = Config::load_or_default(config_path.as_deref())?;
    if args.toml {
        print!("{}", toml::to_string_pretty(&config)?);
    } else {
        println!("{config:#?}");
    }
    Ok(())
}
