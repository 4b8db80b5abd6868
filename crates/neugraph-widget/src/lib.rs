//! Viewer-side core of the neugraph circuit viewer
//!
//! The view hands over a graph and a set of selected node ids. This crate
//! pulls the traces of the selected nodes out of a
//! [`TimeSeriesStore`](neugraph_storage::TimeSeriesStore), memoizing each
//! column in a [`TraceCache`], and renders them into an [`Artifact`] the
//! view can display.
//!
//! # Example
//!
//! ```no_run
//! use neugraph_storage::{Direction, OpenMode};
//! use neugraph_widget::SelectionController;
//!
//! # fn main() -> neugraph_widget::Result<()> {
//! let mut viewer = SelectionController::new();
//! viewer.open_store("output.vtrc", Direction::Output, OpenMode::ReadOnly)?;
//! viewer.set_selection(["lptc_0", "lptc_1"])?;
//!
//! if let Some(artifact) = viewer.artifact() {
//!     println!("{} bytes of {}", artifact.bytes.len(), artifact.media_type);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod error;
pub mod graph;
pub mod render;
pub mod selection;

pub use cache::{CacheStats, TraceCache};
pub use error::{Result, WidgetError};
pub use graph::{GraphData, GraphEdge, GraphNode};
pub use render::{
    Artifact, RenderConfig, RenderError, Renderer, SvgRenderer, Trace, SVG_MEDIA_TYPE,
};
pub use selection::{
    RefreshReport, RefreshState, Reentry, SelectionController, SelectionEvent, SelectionHandler,
    TraceFault,
};
