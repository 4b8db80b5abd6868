//! CLI command implementations for neugraph

use clap::{Parser, Subcommand};

use crate::config::CliConfig;
use crate::error::CliResult;

pub mod inspect;
pub mod pack;
pub mod plot;

/// neugraph - trace tooling for the circuit viewer
#[derive(Parser, Debug)]
#[command(
    name = "neugraph",
    version,
    about = "Pack, inspect and plot neural circuit simulation traces",
    long_about = "neugraph works with VTRC trace files: one file per simulation direction \
                  (input or output), one section per recorded variable. Pack traces from \
                  JSON or bincode, inspect their layout, and render the traces of selected \
                  nodes to SVG."
)]
pub struct NeugraphCli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a JSON or bincode trace description into a VTRC file
    Pack(pack::PackCommand),

    /// Show the layout of a VTRC file
    Inspect(inspect::InspectCommand),

    /// Render the traces of selected nodes to SVG
    Plot(plot::PlotCommand),
}

impl NeugraphCli {
    /// Execute the CLI command
    pub async fn execute(self, config: CliConfig) -> CliResult<()> {
        match self.command {
            Commands::Pack(cmd) => cmd.execute(&config).await,
            Commands::Inspect(cmd) => cmd.execute(&config).await,
            Commands::Plot(cmd) => cmd.execute(&config).await,
        }
    }
}
