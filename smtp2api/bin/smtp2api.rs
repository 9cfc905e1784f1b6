#[cfg(not(unix))]
compile_error!("Only unix targets are currently supported");

use std::path::PathBuf;

use clap::Parser;
use smtp2api::{Config, Gateway, config};
use smtp2api_common::logging;

/// Accept mail over SMTP and relay it through transactional-email APIs
#[derive(Parser, Debug)]
#[command(name = "smtp2api")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = config::locate(cli.config.as_deref())?;
    let config = Config::load(&path)?;

    if cli.check {
        println!("{}: configuration ok", path.display());
        return Ok(());
    }

    logging::init(&config.log)?;
    Gateway::bind(&config).await?.run().await
}
