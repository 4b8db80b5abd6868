//! # neugraph - trace tooling for the neugraph circuit viewer
//!
//! Packs simulation traces into VTRC files, inspects them, and renders the
//! traces of selected nodes the same way the viewer does.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use neugraph_cli::{config::CliConfig, error::CliResult, NeugraphCli};

#[tokio::main(flavor = "current_thread")]
async fn main() -> CliResult<()> {
    let cli = NeugraphCli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;

    // RUST_LOG wins, then --verbose, then the config file
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(err) = cli.execute(config).await {
        error!("Command failed: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
