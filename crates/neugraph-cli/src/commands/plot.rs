//! Render selected node traces to SVG
//!
//! Opens the given trace files the way the viewer does, selects the nodes and
//! runs one refresh pass through [`SelectionController`].
//!
//! Example:
//!   neugraph plot --input input.vtrc --output output.vtrc --nodes lptc_0,lptc_1 -o traces.svg

use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use neugraph_storage::{Direction, OpenMode, StorageError};
use neugraph_widget::{GraphData, SelectionController, SvgRenderer, WidgetError};

use crate::config::CliConfig;
use crate::error::{CliError, CliResult};

/// Render the traces of selected nodes
#[derive(Args, Debug)]
pub struct PlotCommand {
    /// Input trace file (stimuli)
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Output trace file (recorded responses)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Comma-separated node ids to plot
    #[arg(long, value_delimiter = ',', required = true)]
    pub nodes: Vec<String>,

    /// SVG file to write
    #[arg(short = 'o', long = "out")]
    pub out: PathBuf,

    /// Step size, overriding file metadata
    #[arg(long)]
    pub dt: Option<f64>,

    /// Graph JSON (nodes/edges) used to flag ids that are not circuit nodes
    #[arg(long)]
    pub graph: Option<PathBuf>,
}

impl PlotCommand {
    pub async fn execute(self, config: &CliConfig) -> CliResult<()> {
        if self.input.is_none() && self.output.is_none() {
            return Err(CliError::invalid_args(
                "At least one of --input or --output is required",
            ));
        }

        let renderer = SvgRenderer::new(config.render.clone());
        let mut viewer = SelectionController::with_renderer(renderer);

        // Output first so the input picks up its dt
        for (path, direction) in [
            (&self.output, Direction::Output),
            (&self.input, Direction::Input),
        ] {
            if let Some(path) = path {
                open(&mut viewer, path, direction, self.dt, config.default_dt)?;
            }
        }

        if let Some(path) = &self.graph {
            let text = std::fs::read_to_string(path)?;
            let graph: GraphData = serde_json::from_str(&text)
                .with_context(|| format!("Invalid graph file {}", path.display()))?;
            viewer.set_graph(graph);
        }

        viewer.set_selection(self.nodes.iter().map(String::as_str))?;

        if viewer.graph_data_changed() {
            for id in viewer.unknown_selected() {
                warn!("Node {} is not part of the graph", id);
            }
        }

        let artifact = viewer
            .artifact()
            .ok_or_else(|| CliError::Generic(anyhow::anyhow!("no artifact was rendered")))?;
        if let Some(parent) = self.out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.out, &artifact.bytes)?;

        if let Some(report) = viewer.last_report() {
            println!(
                "Plotted {} series for {} nodes ({} missing, {} faults)",
                report.plotted,
                report.selection.len(),
                report.missing,
                report.faults.len()
            );
            for fault in &report.faults {
                println!(
                    "  {}.{}[{}]: {}",
                    fault.direction, fault.variable, fault.node, fault.error
                );
            }
        }
        info!("Wrote {}", self.out.display());
        Ok(())
    }
}

/// Open `path` for `direction`. An explicit `dt` wins over file metadata;
/// `fallback_dt` is used only where the files provide no step size.
fn open(
    viewer: &mut SelectionController,
    path: &Path,
    direction: Direction,
    dt: Option<f64>,
    fallback_dt: Option<f64>,
) -> CliResult<()> {
    if !path.exists() {
        return Err(CliError::missing_resource(format!(
            "{} trace {}",
            direction,
            path.display()
        )));
    }
    let summary = match (dt, fallback_dt) {
        (Some(dt), _) => viewer.open_store_with_dt(path, direction, OpenMode::ReadOnly, dt)?,
        // Input files carry no dt; without an output file the fallback applies
        (None, Some(fallback))
            if direction == Direction::Input && !viewer.store().is_open(Direction::Output) =>
        {
            viewer.open_store_with_dt(path, direction, OpenMode::ReadOnly, fallback)?
        }
        (None, Some(fallback)) => match viewer.open_store(path, direction, OpenMode::ReadOnly) {
            Err(WidgetError::Storage {
                source: StorageError::MissingMetadata { what },
            }) => {
                warn!("{} trace has no {}, using dt={} from config", direction, what, fallback);
                viewer.open_store_with_dt(path, direction, OpenMode::ReadOnly, fallback)?
            }
            other => other?,
        },
        (None, None) => viewer.open_store(path, direction, OpenMode::ReadOnly)?,
    };
    info!(
        "Opened {} trace: {} variables, {} node entries",
        direction, summary.variables, summary.entries
    );
    Ok(())
}
