//! Selection-driven refresh cycle
//!
//! [`SelectionController`] owns the store, the trace cache and the renderer.
//! Setting a selection that differs from the one last rendered runs a refresh
//! pass: every selected node is looked up in every variable of every open
//! direction, the series found are rendered, and the artifact is published.
//!
//! Handlers registered with [`SelectionController::on_selection_changed`] see
//! the pass as it happens and may ask for more work through [`Reentry`].
//! Requests made while the pass starts are folded into it; requests made after
//! the traces were fetched run as one more pass once the current pass is done.
//! Passes never overlap.

use neugraph_storage::{
    Direction, NodeId, OpenMode, OpenSummary, StorageError, TimeSeriesStore,
    TraceFile, VariableName,
};

use crate::{
    cache::{CacheStats, TraceCache},
    error::Result,
    graph::GraphData,
    render::{Artifact, Renderer, SvgRenderer, Trace},
};

use std::collections::BTreeSet;
use std::path::Path;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshState {
    /// Waiting for a selection change
    #[default]
    Idle,
    /// A pass is fetching and rendering
    Refreshing,
}

/// Notifications sent to selection handlers during a pass
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionEvent {
    /// A pass began for `selection`; traces have not been fetched yet
    RefreshStarted {
        /// Selection the pass will render
        selection: BTreeSet<NodeId>,
    },
    /// A new artifact was stored
    ArtifactReady {
        /// Generation of the new artifact
        generation: u64,
    },
    /// The controller cleared its "selection changed" flag
    ChangeFlagCleared,
}

/// Requests a handler makes while the controller is busy
#[derive(Debug, Default)]
pub struct Reentry {
    selection: Option<BTreeSet<NodeId>>,
    changed: bool,
}

impl Reentry {
    /// Replace the selection (last write wins)
    pub fn set_selection<I, N>(&mut self, ids: I)
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        self.selection = Some(ids.into_iter().map(Into::into).collect());
    }

    /// Re-assert the "selection changed" flag
    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    fn is_empty(&self) -> bool {
        self.selection.is_none() && !self.changed
    }

    fn merge(&mut self, later: Reentry) {
        if later.selection.is_some() {
            self.selection = later.selection;
        }
        self.changed |= later.changed;
    }
}

/// Callback invoked for every [`SelectionEvent`]
pub type SelectionHandler = Box<dyn FnMut(&SelectionEvent, &mut Reentry)>;

/// A fetch that failed for a reason other than missing data
#[derive(Debug)]
pub struct TraceFault {
    /// Requested node
    pub node: NodeId,
    /// Requested direction
    pub direction: Direction,
    /// Requested variable
    pub variable: VariableName,
    /// Store error
    pub error: StorageError,
}

/// Outcome of one refresh pass
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Pass number, starting at 1
    pub pass: u64,
    /// Selection that was rendered, in order
    pub selection: Vec<NodeId>,
    /// Series handed to the renderer
    pub plotted: usize,
    /// (node, direction, variable) keys with no data
    pub missing: usize,
    /// Keys whose read failed
    pub faults: Vec<TraceFault>,
}

/// Owns the current selection and turns changes into rendered artifacts
pub struct SelectionController<R: Renderer = SvgRenderer> {
    store: TimeSeriesStore,
    cache: TraceCache,
    renderer: R,
    handlers: Vec<SelectionHandler>,

    graph: GraphData,
    graph_data_changed: bool,

    selection: BTreeSet<NodeId>,
    rendered: Option<BTreeSet<NodeId>>,
    changed: bool,
    clearing_own_flag: bool,
    state: RefreshState,

    artifact: Option<Artifact>,
    artifact_updated: bool,
    artifact_generation: u64,
    passes: u64,
    last_report: Option<RefreshReport>,
}

impl SelectionController<SvgRenderer> {
    /// Controller with an empty store and the default SVG renderer
    pub fn new() -> Self {
        Self::with_renderer(SvgRenderer::default())
    }
}

impl Default for SelectionController<SvgRenderer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Renderer> SelectionController<R> {
    /// Controller with an empty store
    pub fn with_renderer(renderer: R) -> Self {
        Self::with_store(TimeSeriesStore::new(), renderer)
    }

    /// Controller over an already populated store
    pub fn with_store(store: TimeSeriesStore, renderer: R) -> Self {
        let mut cache = TraceCache::new();
        for direction in Direction::ALL {
            if store.is_open(direction) {
                cache.register(direction, &store);
            }
        }
        Self {
            store,
            cache,
            renderer,
            handlers: Vec::new(),
            graph: GraphData::default(),
            graph_data_changed: false,
            selection: BTreeSet::new(),
            rendered: None,
            changed: false,
            clearing_own_flag: false,
            state: RefreshState::Idle,
            artifact: None,
            artifact_updated: false,
            artifact_generation: 0,
            passes: 0,
            last_report: None,
        }
    }

    /// Register a handler for refresh events
    pub fn on_selection_changed<F>(&mut self, handler: F)
    where
        F: FnMut(&SelectionEvent, &mut Reentry) + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    /// Open a trace file and rebuild that direction's cache namespace.
    /// Does not start a pass; call [`refresh`](Self::refresh) to redraw.
    pub fn open_store<P: AsRef<Path>>(
        &mut self,
        path: P,
        direction: Direction,
        mode: OpenMode,
    ) -> Result<OpenSummary> {
        let summary = self.store.open(path, direction, mode)?;
        self.cache.register(direction, &self.store);
        Ok(summary)
    }

    /// [`open_store`](Self::open_store) with an explicit step size
    pub fn open_store_with_dt<P: AsRef<Path>>(
        &mut self,
        path: P,
        direction: Direction,
        mode: OpenMode,
        dt: f64,
    ) -> Result<OpenSummary> {
        let summary = self.store.open_with_dt(path, direction, mode, dt)?;
        self.cache.register(direction, &self.store);
        Ok(summary)
    }

    /// Install a parsed trace file for `direction`
    pub fn attach(&mut self, direction: Direction, file: TraceFile) -> Result<OpenSummary> {
        let summary = self.store.attach(direction, file)?;
        self.cache.register(direction, &self.store);
        Ok(summary)
    }

    /// Release the file open for `direction` and its cached series
    pub fn close_store(&mut self, direction: Direction) {
        self.store.close(direction);
        self.cache.register(direction, &self.store);
    }

    /// Replace the selection. Runs a pass if it differs from the selection
    /// last rendered; returns the number of passes that ran.
    pub fn set_selection<I, N>(&mut self, ids: I) -> Result<u64>
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        self.selection = ids.into_iter().map(Into::into).collect();
        self.changed = true;
        self.drive(false)
    }

    /// Raise the "selection changed" flag. Starts a pass only if the
    /// selection has not been rendered yet.
    pub fn mark_changed(&mut self) -> Result<u64> {
        if self.clearing_own_flag {
            log::debug!("Ignoring change flag raised while clearing it");
            return Ok(0);
        }
        self.changed = true;
        self.drive(false)
    }

    /// Run a pass for the current selection even if it was rendered already
    pub fn refresh(&mut self) -> Result<u64> {
        self.drive(true)
    }

    fn drive(&mut self, force: bool) -> Result<u64> {
        if self.state == RefreshState::Refreshing {
            return Ok(0);
        }

        let mut force = force;
        let mut ran = 0;
        loop {
            let unrendered = self.rendered.as_ref() != Some(&self.selection);
            if !force && !(self.changed && unrendered) {
                self.changed = false;
                break;
            }
            force = false;
            self.run_pass()?;
            ran += 1;
        }
        Ok(ran)
    }

    fn run_pass(&mut self) -> Result<()> {
        self.state = RefreshState::Refreshing;
        self.passes += 1;
        let pass = self.passes;

        let mut early = Reentry::default();
        let started = SelectionEvent::RefreshStarted {
            selection: self.selection.clone(),
        };
        self.emit(&started, &mut early);
        if let Some(selection) = early.selection {
            log::debug!("Pass {}: selection replaced before fetch", pass);
            self.selection = selection;
        }

        let selection = self.selection.clone();
        let (traces, report) = self.collect(pass, &selection);
        let time = self.store.time_vector().ok();
        let time: &[f64] = time.as_deref().unwrap_or(&[]);

        let artifact = match self.renderer.render(time, &traces) {
            Ok(artifact) => artifact,
            Err(e) => {
                log::warn!("Pass {}: render failed: {}", pass, e);
                self.changed = false;
                self.state = RefreshState::Idle;
                return Err(e.into());
            }
        };

        self.artifact = Some(artifact);
        self.artifact_updated = true;
        self.artifact_generation += 1;
        self.rendered = Some(selection);
        log::info!(
            "Pass {}: rendered {} series for {} nodes ({} missing, {} faults)",
            pass,
            report.plotted,
            report.selection.len(),
            report.missing,
            report.faults.len()
        );
        self.last_report = Some(report);

        let mut deferred = Reentry::default();
        let ready = SelectionEvent::ArtifactReady {
            generation: self.artifact_generation,
        };
        self.emit(&ready, &mut deferred);

        self.clearing_own_flag = true;
        self.changed = false;
        let mut during_clear = Reentry::default();
        self.emit(&SelectionEvent::ChangeFlagCleared, &mut during_clear);
        if during_clear.changed {
            log::debug!("Pass {}: ignoring change flag raised while clearing it", pass);
            during_clear.changed = false;
        }
        self.clearing_own_flag = false;
        deferred.merge(during_clear);

        self.state = RefreshState::Idle;
        if !deferred.is_empty() {
            if let Some(selection) = deferred.selection {
                self.selection = selection;
            }
            self.changed = true;
        }
        Ok(())
    }

    fn emit(&mut self, event: &SelectionEvent, reentry: &mut Reentry) {
        for handler in self.handlers.iter_mut() {
            handler(event, reentry);
        }
    }

    fn collect(&mut self, pass: u64, selection: &BTreeSet<NodeId>) -> (Vec<Trace>, RefreshReport) {
        let mut report = RefreshReport {
            pass,
            selection: selection.iter().cloned().collect(),
            ..Default::default()
        };
        let variables: Vec<(Direction, Vec<VariableName>)> = Direction::ALL
            .into_iter()
            .filter(|d| self.store.is_open(*d))
            .map(|d| (d, self.store.variables(d)))
            .collect();

        let mut traces = Vec::new();
        for node in selection {
            for (direction, names) in &variables {
                for variable in names {
                    match self.cache.get_or_load(
                        node.as_str(),
                        *direction,
                        variable.as_str(),
                        &self.store,
                    ) {
                        Ok(Some(series)) => traces.push(Trace {
                            node: node.clone(),
                            variable: variable.clone(),
                            direction: *direction,
                            series,
                        }),
                        Ok(None) => {
                            log::debug!("No {}.{} data for node {}", direction, variable, node);
                            report.missing += 1;
                        }
                        Err(e) if e.is_sparsity_miss() => {
                            log::debug!("Skipping {}.{}[{}]: {}", direction, variable, node, e);
                            report.missing += 1;
                        }
                        Err(e) => {
                            log::warn!("Failed to read {}.{}[{}]: {}", direction, variable, node, e);
                            report.faults.push(TraceFault {
                                node: node.clone(),
                                direction: *direction,
                                variable: variable.clone(),
                                error: e,
                            });
                        }
                    }
                }
            }
        }
        report.plotted = traces.len();
        (traces, report)
    }

    /// Current selection
    pub fn selection(&self) -> &BTreeSet<NodeId> {
        &self.selection
    }

    /// Selection of the current artifact
    pub fn rendered_selection(&self) -> Option<&BTreeSet<NodeId>> {
        self.rendered.as_ref()
    }

    /// True while a change is waiting to be rendered
    pub fn selection_changed(&self) -> bool {
        self.changed
    }

    /// Current state
    pub fn state(&self) -> RefreshState {
        self.state
    }

    /// Latest artifact
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    /// True once any pass has produced an artifact
    pub fn artifact_ready(&self) -> bool {
        self.artifact.is_some()
    }

    /// True if an artifact was produced since the last acknowledgement
    pub fn artifact_updated(&self) -> bool {
        self.artifact_updated
    }

    /// Reset the "updated" flag after the artifact was displayed
    pub fn acknowledge_artifact(&mut self) {
        self.artifact_updated = false;
    }

    /// Number of artifacts produced so far
    pub fn artifact_generation(&self) -> u64 {
        self.artifact_generation
    }

    /// Number of passes started so far, failed ones included
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Report of the last successful pass
    pub fn last_report(&self) -> Option<&RefreshReport> {
        self.last_report.as_ref()
    }

    /// Trace cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Underlying store
    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    /// Renderer in use
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Graph handed in by the view
    pub fn graph(&self) -> &GraphData {
        &self.graph
    }

    /// Replace the graph and raise the "graph data changed" flag
    pub fn set_graph(&mut self, graph: GraphData) {
        let dangling = graph.dangling_edges().len();
        if dangling > 0 {
            log::warn!("Graph has {} edges with unknown endpoints", dangling);
        }
        log::debug!(
            "Graph set: {} nodes, {} edges",
            graph.nodes.len(),
            graph.edges.len()
        );
        self.graph = graph;
        self.graph_data_changed = true;
    }

    /// True if the graph changed since the last acknowledgement
    pub fn graph_data_changed(&self) -> bool {
        self.graph_data_changed
    }

    /// Reset the "graph data changed" flag
    pub fn acknowledge_graph(&mut self) {
        self.graph_data_changed = false;
    }

    /// Selected ids that are not nodes of the graph
    pub fn unknown_selected(&self) -> Vec<&NodeId> {
        self.selection
            .iter()
            .filter(|id| !self.graph.contains_node(id.as_str()))
            .collect()
    }
}

impl<R: Renderer> std::fmt::Debug for SelectionController<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionController")
            .field("state", &self.state)
            .field("selection", &self.selection)
            .field("changed", &self.changed)
            .field("handlers", &self.handlers.len())
            .field("artifact_generation", &self.artifact_generation)
            .field("passes", &self.passes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderError;
    use neugraph_storage::TraceFileWriter;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn output_file() -> TraceFile {
        let bytes = TraceFileWriter::new()
            .dt(0.5)
            .variable("V", ["a", "b"], 4, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0])
            .unwrap()
            .to_bytes()
            .unwrap();
        TraceFile::from_bytes(bytes).unwrap()
    }

    type Calls = Rc<RefCell<Vec<Vec<String>>>>;

    /// Renderer that records the nodes of every call
    fn recording() -> (Calls, impl Renderer) {
        let calls: Calls = Rc::default();
        let sink = calls.clone();
        let renderer = move |_: &[f64], traces: &[Trace]| {
            sink.borrow_mut()
                .push(traces.iter().map(|t| t.node.to_string()).collect());
            Ok::<_, RenderError>(Artifact::new(Vec::new(), "test/empty"))
        };
        (calls, renderer)
    }

    #[test]
    fn test_identical_selection_skips_pass() {
        let (calls, renderer) = recording();
        let mut ctl = SelectionController::with_renderer(renderer);
        ctl.attach(Direction::Output, output_file()).unwrap();

        assert_eq!(ctl.set_selection(["a"]).unwrap(), 1);
        assert_eq!(ctl.set_selection(["a"]).unwrap(), 0);
        assert_eq!(ctl.mark_changed().unwrap(), 0);
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(ctl.state(), RefreshState::Idle);
        assert!(!ctl.selection_changed());
    }

    #[test]
    fn test_flags_and_generation() {
        let mut ctl = SelectionController::new();
        ctl.attach(Direction::Output, output_file()).unwrap();
        assert!(!ctl.artifact_ready());

        ctl.set_selection(["a"]).unwrap();
        assert!(ctl.artifact_ready());
        assert!(ctl.artifact_updated());
        assert_eq!(ctl.artifact_generation(), 1);

        ctl.acknowledge_artifact();
        assert!(!ctl.artifact_updated());

        ctl.refresh().unwrap();
        assert!(ctl.artifact_updated());
        assert_eq!(ctl.artifact_generation(), 2);
    }

    #[test]
    fn test_coalesced_request() {
        let (calls, renderer) = recording();
        let mut ctl = SelectionController::with_renderer(renderer);
        ctl.attach(Direction::Output, output_file()).unwrap();
        ctl.on_selection_changed(|event, reentry| {
            if let SelectionEvent::RefreshStarted { selection } = event {
                if selection.len() == 1 {
                    reentry.set_selection(["a", "b"]);
                }
            }
        });

        assert_eq!(ctl.set_selection(["a"]).unwrap(), 1);
        assert_eq!(calls.borrow().as_slice(), &[vec!["a".to_string(), "b".to_string()]]);
        assert_eq!(ctl.selection().len(), 2);
    }

    #[test]
    fn test_render_failure_leaves_selection_unrendered() {
        let fail = Rc::new(RefCell::new(true));
        let flag = fail.clone();
        let renderer = move |_: &[f64], _: &[Trace]| {
            if *flag.borrow() {
                Err(RenderError::failed("backend offline"))
            } else {
                Ok(Artifact::new(vec![1], "test/ok"))
            }
        };
        let mut ctl = SelectionController::with_renderer(renderer);
        ctl.attach(Direction::Output, output_file()).unwrap();

        assert!(ctl.set_selection(["a"]).is_err());
        assert_eq!(ctl.state(), RefreshState::Idle);
        assert!(ctl.rendered_selection().is_none());
        assert!(!ctl.artifact_ready());

        *fail.borrow_mut() = false;
        assert_eq!(ctl.mark_changed().unwrap(), 1);
        assert_eq!(ctl.artifact().unwrap().bytes, vec![1]);
        assert_eq!(ctl.passes(), 2);
    }

    #[test]
    fn test_graph_flags() {
        let mut ctl = SelectionController::new();
        let mut graph = GraphData::new(true);
        graph.add_node("a").add_node("b").add_edge("a", "b");

        ctl.set_graph(graph);
        assert!(ctl.graph_data_changed());
        ctl.acknowledge_graph();
        assert!(!ctl.graph_data_changed());

        ctl.set_selection(["a", "x"]).unwrap();
        assert_eq!(ctl.unknown_selected(), vec![&NodeId::new("x")]);
    }

    #[test]
    fn test_no_store_renders_blank() {
        let mut ctl = SelectionController::new();
        ctl.set_selection(["a"]).unwrap();
        let svg = String::from_utf8(ctl.artifact().unwrap().bytes.clone()).unwrap();
        assert!(svg.contains("no data"));
        assert_eq!(ctl.last_report().unwrap().plotted, 0);
    }
}
