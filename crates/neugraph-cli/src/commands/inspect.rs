//! Trace file inspection

use clap::Args;
use console::style;
use std::path::PathBuf;
use tracing::info;

use neugraph_storage::{OpenMode, TraceFile, DT_ATTR};

use crate::config::CliConfig;
use crate::error::{CliError, CliResult};

/// Show the layout of a VTRC file
#[derive(Args, Debug)]
pub struct InspectCommand {
    /// VTRC file to inspect
    pub file: PathBuf,

    /// List the node ids of every variable
    #[arg(short, long)]
    pub detailed: bool,
}

impl InspectCommand {
    pub async fn execute(self, _config: &CliConfig) -> CliResult<()> {
        if !self.file.exists() {
            return Err(CliError::missing_resource(format!(
                "trace file {}",
                self.file.display()
            )));
        }
        info!("Inspecting {}", self.file.display());

        let file = TraceFile::open(&self.file, OpenMode::ReadOnly)?;
        let header = file.header();

        println!("{}", style(self.file.display()).bold());
        println!(
            "  format:    VTRC v{} ({} sections)",
            header.version, header.section_count
        );
        match file.metadata_attr(DT_ATTR) {
            Some(dt) => println!("  dt:        {}", dt),
            None => println!("  dt:        {}", style("none").yellow()),
        }
        let steps = file.variables().first().map(|v| v.steps());
        match steps {
            Some(nt) => println!("  steps:     {}", nt),
            None => println!("  steps:     {}", style("none").yellow()),
        }
        for (name, value) in file.metadata_attrs().filter(|(name, _)| *name != DT_ATTR) {
            println!("  {}: {}", name, value);
        }

        println!("  variables: {}", file.variables().len());
        for var in file.variables() {
            let marker = match steps {
                Some(nt) if nt != var.steps() => style("!").red(),
                _ => style("-").dim(),
            };
            println!(
                "    {} {} [{} steps x {} nodes]",
                marker,
                style(var.name()).cyan(),
                var.steps(),
                var.columns()
            );
            if self.detailed {
                let ids: Vec<&str> = var.uids().iter().map(|id| id.as_str()).collect();
                println!("        {}", ids.join(", "));
            }
        }

        Ok(())
    }
}
