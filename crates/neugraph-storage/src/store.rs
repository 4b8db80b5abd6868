//! Time-series store over one input and one output trace file

use crate::{
    error::{Result, StorageError},
    ids::{Direction, OpenMode, VariableName},
    traits::{CatalogEntry, Series, SeriesSource},
    vtrc::{TraceFile, DT_ATTR},
};

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Step size used for input files when no output file has provided one
pub const DEFAULT_DT: f64 = 1.0;

/// Time-stepping shared by every variable of a store
#[derive(Debug, Clone, PartialEq)]
pub struct TimeMetadata {
    dt: f64,
    steps: usize,
    time: Series,
}

impl TimeMetadata {
    /// Build metadata and its time vector `[0, dt, .., (steps - 1) * dt]`
    pub fn new(dt: f64, steps: usize) -> Self {
        let time: Series = (0..steps).map(|i| i as f64 * dt).collect();
        Self { dt, steps, time }
    }

    /// Step size in seconds
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Number of time steps (Nt)
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Time of every step
    pub fn time_vector(&self) -> &Series {
        &self.time
    }
}

/// What an `open` call registered
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSummary {
    /// Direction that was (re)opened
    pub direction: Direction,
    /// Number of variables found (metadata excluded)
    pub variables: usize,
    /// Number of (node, variable) pairs registered
    pub entries: usize,
    /// Step size in effect after the open
    pub dt: f64,
    /// Established step count, if any variable exists
    pub steps: Option<usize>,
}

/// Owns the input and output trace files and their shared time metadata.
///
/// Re-opening a direction replaces its file wholesale; the old handle (and
/// its mapping) is released immediately. Series handed out earlier stay valid
/// because they are copies.
#[derive(Debug, Default)]
pub struct TimeSeriesStore {
    files: [Option<TraceFile>; 2],
    generations: [u64; 2],
    output_dt: Option<f64>,
    dt_override: Option<f64>,
    metadata: Option<TimeMetadata>,
    reads: AtomicU64,
}

impl TimeSeriesStore {
    /// Create a store with nothing open
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the trace file for `direction`.
    ///
    /// Output files must carry `metadata.dt`, and a plain output open drops
    /// any step size given earlier through [`open_with_dt`](Self::open_with_dt).
    /// Input files use that explicit step size if one is in effect, else the
    /// dt of a prior output open, else [`DEFAULT_DT`].
    pub fn open<P: AsRef<Path>>(
        &mut self,
        path: P,
        direction: Direction,
        mode: OpenMode,
    ) -> Result<OpenSummary> {
        let file = TraceFile::open(path.as_ref(), mode)?;
        log::debug!("Opened {} trace {}", direction, path.as_ref().display());
        self.install(direction, file, None)
    }

    /// [`open`](Self::open) with direction and mode given as strings
    pub fn open_str<P: AsRef<Path>>(
        &mut self,
        path: P,
        direction: &str,
        mode: &str,
    ) -> Result<OpenSummary> {
        let direction: Direction = direction.parse()?;
        let mode: OpenMode = mode.parse()?;
        self.open(path, direction, mode)
    }

    /// Open with an explicit step size that takes precedence over any
    /// metadata, for either direction. The override carries over to later
    /// input opens. It is dropped by a plain output open and once every
    /// direction is closed.
    pub fn open_with_dt<P: AsRef<Path>>(
        &mut self,
        path: P,
        direction: Direction,
        mode: OpenMode,
        dt: f64,
    ) -> Result<OpenSummary> {
        let file = TraceFile::open(path.as_ref(), mode)?;
        self.install(direction, file, Some(dt))
    }

    /// Install an already parsed trace file for `direction`
    pub fn attach(&mut self, direction: Direction, file: TraceFile) -> Result<OpenSummary> {
        self.install(direction, file, None)
    }

    /// [`attach`](Self::attach) with an explicit step size
    pub fn attach_with_dt(
        &mut self,
        direction: Direction,
        file: TraceFile,
        dt: f64,
    ) -> Result<OpenSummary> {
        self.install(direction, file, Some(dt))
    }

    fn install(
        &mut self,
        direction: Direction,
        file: TraceFile,
        dt_override: Option<f64>,
    ) -> Result<OpenSummary> {
        // Everything is validated before the first field is touched, so a
        // failed open leaves the store as it was.
        if let Some(dt) = dt_override {
            validate_dt(dt)?;
        }

        let output_dt = match direction {
            Direction::Output => match file.metadata_attr(DT_ATTR) {
                Some(dt) => {
                    validate_dt(dt)?;
                    Some(dt)
                }
                None if dt_override.is_some() => None,
                None if !file.has_metadata() => {
                    return Err(StorageError::missing_metadata(
                        "output trace has no 'metadata' section",
                    ))
                }
                None => return Err(StorageError::missing_metadata("metadata.dt")),
            },
            Direction::Input => self.output_dt,
        };

        let steps = self.established_steps(direction, &file)?;

        let entries = file.variables().iter().map(|v| v.columns()).sum();
        let variables = file.variables().len();

        if direction == Direction::Output {
            self.output_dt = output_dt;
        }
        if dt_override.is_some() || direction == Direction::Output {
            self.dt_override = dt_override;
        }
        let slot = direction.index();
        if self.files[slot].replace(file).is_some() {
            log::debug!("Released previous {} trace", direction);
        }
        self.generations[slot] += 1;
        self.metadata = steps.map(|nt| TimeMetadata::new(self.dt(), nt));

        let summary = OpenSummary {
            direction,
            variables,
            entries,
            dt: self.dt(),
            steps,
        };
        log::info!(
            "Loaded {} trace: {} variables, {} node entries, Nt={:?}, dt={}",
            direction,
            summary.variables,
            summary.entries,
            summary.steps,
            summary.dt
        );
        Ok(summary)
    }

    /// Step count every variable of `file` must agree with. Taken from the
    /// other direction if it is open, else from the first variable of `file`.
    fn established_steps(&self, direction: Direction, file: &TraceFile) -> Result<Option<usize>> {
        let other = match direction {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        };
        let mut established = self.files[other.index()]
            .as_ref()
            .and_then(|f| f.variables().first())
            .map(|v| v.steps());

        for var in file.variables() {
            match established {
                None => established = Some(var.steps()),
                Some(nt) if nt != var.steps() => {
                    return Err(StorageError::InconsistentLength {
                        variable: format!("{}.{}", direction, var.name()),
                        expected: nt,
                        found: var.steps(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(established)
    }

    /// Release the file open for `direction`
    pub fn close(&mut self, direction: Direction) {
        let slot = direction.index();
        if self.files[slot].take().is_none() {
            return;
        }
        self.generations[slot] += 1;
        if direction == Direction::Output {
            self.output_dt = None;
        }
        if self.files.iter().all(Option::is_none) {
            self.dt_override = None;
        }
        let steps = self.files.iter().flatten().find_map(|f| f.variables().first()).map(|v| v.steps());
        self.metadata = steps.map(|nt| TimeMetadata::new(self.dt(), nt));
        log::debug!("Closed {} trace", direction);
    }

    /// True if a file is open for `direction`
    pub fn is_open(&self, direction: Direction) -> bool {
        self.files[direction.index()].is_some()
    }

    /// Trace file open for `direction`
    pub fn file(&self, direction: Direction) -> Option<&TraceFile> {
        self.files[direction.index()].as_ref()
    }

    /// Step size in effect
    pub fn dt(&self) -> f64 {
        self.dt_override.or(self.output_dt).unwrap_or(DEFAULT_DT)
    }

    /// Shared time metadata
    pub fn time_metadata(&self) -> Result<&TimeMetadata> {
        self.metadata.as_ref().ok_or(StorageError::NotInitialized)
    }

    /// Shared time vector
    pub fn time_vector(&self) -> Result<Series> {
        Ok(self.time_metadata()?.time_vector().clone())
    }

    /// Variable names of the file open for `direction`, in file order
    pub fn variables(&self, direction: Direction) -> Vec<VariableName> {
        self.file(direction)
            .map(|f| f.variables().iter().map(|v| v.name().clone()).collect())
            .unwrap_or_default()
    }

    /// Number of column reads served so far
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl SeriesSource for TimeSeriesStore {
    fn fetch(&self, node: &str, direction: Direction, variable: &str) -> Result<Series> {
        let file = self.file(direction).ok_or_else(|| StorageError::DirectionNotOpen {
            direction: direction.to_string(),
        })?;
        let section = file
            .variable(variable)
            .ok_or_else(|| StorageError::UnknownVariable {
                variable: variable.to_string(),
                direction: direction.to_string(),
            })?;
        let column = section
            .column_of(node)
            .ok_or_else(|| StorageError::UnknownNode {
                node: node.to_string(),
                direction: direction.to_string(),
                variable: variable.to_string(),
            })?;

        let values = file.read_column(section, column)?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        log::debug!("Read {}.{}[{}] ({} steps)", direction, variable, node, values.len());
        Ok(Arc::from(values))
    }

    fn generation(&self, direction: Direction) -> u64 {
        self.generations[direction.index()]
    }

    fn catalog(&self, direction: Direction) -> Vec<CatalogEntry> {
        self.file(direction)
            .map(|f| {
                f.variables()
                    .iter()
                    .map(|v| CatalogEntry {
                        variable: v.name().clone(),
                        nodes: v.uids().to_vec(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn validate_dt(dt: f64) -> Result<()> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(StorageError::invalid_format(format!(
            "dt must be finite and positive, got {}",
            dt
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtrc::TraceFileWriter;

    fn output_file() -> TraceFile {
        let bytes = TraceFileWriter::new()
            .dt(0.5)
            .variable("V", ["a", "b"], 4, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0])
            .unwrap()
            .to_bytes()
            .unwrap();
        TraceFile::from_bytes(bytes).unwrap()
    }

    fn input_file(steps: usize) -> TraceFile {
        let bytes = TraceFileWriter::new()
            .variable("I", ["a"], steps, vec![0.25; steps])
            .unwrap()
            .to_bytes()
            .unwrap();
        TraceFile::from_bytes(bytes).unwrap()
    }

    #[test]
    fn test_time_metadata() {
        let meta = TimeMetadata::new(0.5, 4);
        assert_eq!(meta.steps(), 4);
        assert_eq!(&meta.time_vector()[..], &[0.0, 0.5, 1.0, 1.5]);
        assert!(TimeMetadata::new(0.1, 0).time_vector().is_empty());
    }

    #[test]
    fn test_not_initialized() {
        let store = TimeSeriesStore::new();
        assert!(matches!(store.time_vector(), Err(StorageError::NotInitialized)));
    }

    #[test]
    fn test_fetch_and_time() {
        let mut store = TimeSeriesStore::new();
        let summary = store.attach(Direction::Output, output_file()).unwrap();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.steps, Some(4));

        assert_eq!(&store.time_vector().unwrap()[..], &[0.0, 0.5, 1.0, 1.5]);
        let b = store.fetch("b", Direction::Output, "V").unwrap();
        assert_eq!(&b[..], &[2.0, 4.0, 6.0, 8.0]);
        assert_eq!(store.read_count(), 1);
    }

    #[test]
    fn test_fetch_errors() {
        let mut store = TimeSeriesStore::new();
        assert!(matches!(
            store.fetch("a", Direction::Input, "I"),
            Err(StorageError::DirectionNotOpen { .. })
        ));

        store.attach(Direction::Output, output_file()).unwrap();
        let err = store.fetch("x", Direction::Output, "V").unwrap_err();
        assert!(matches!(err, StorageError::UnknownNode { .. }));
        assert!(err.is_sparsity_miss());
        assert!(matches!(
            store.fetch("a", Direction::Output, "spike_state"),
            Err(StorageError::UnknownVariable { .. })
        ));
        assert_eq!(store.read_count(), 0);
    }

    #[test]
    fn test_input_dt_defaults_then_follows_output() {
        let mut store = TimeSeriesStore::new();
        store.attach(Direction::Input, input_file(4)).unwrap();
        assert_eq!(store.dt(), DEFAULT_DT);
        assert_eq!(&store.time_vector().unwrap()[..], &[0.0, 1.0, 2.0, 3.0]);

        store.attach(Direction::Output, output_file()).unwrap();
        assert_eq!(store.dt(), 0.5);

        // A later input open keeps the output's dt
        store.attach(Direction::Input, input_file(4)).unwrap();
        assert_eq!(store.dt(), 0.5);
        assert_eq!(store.time_metadata().unwrap().dt(), 0.5);
    }

    #[test]
    fn test_inconsistent_length_leaves_store_intact() {
        let mut store = TimeSeriesStore::new();
        store.attach(Direction::Output, output_file()).unwrap();
        let generation = store.generation(Direction::Input);

        let err = store.attach(Direction::Input, input_file(5)).unwrap_err();
        assert!(matches!(
            err,
            StorageError::InconsistentLength { expected: 4, found: 5, .. }
        ));
        assert!(!store.is_open(Direction::Input));
        assert_eq!(store.generation(Direction::Input), generation);
        assert_eq!(store.time_metadata().unwrap().steps(), 4);
        assert_eq!(&store.fetch("a", Direction::Output, "V").unwrap()[..], &[1.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn test_output_requires_metadata() {
        let mut store = TimeSeriesStore::new();
        let err = store.attach(Direction::Output, input_file(4)).unwrap_err();
        assert!(matches!(err, StorageError::MissingMetadata { .. }));

        // An explicit dt removes the requirement
        store.attach_with_dt(Direction::Output, input_file(4), 0.1).unwrap();
        assert_eq!(store.dt(), 0.1);
    }

    #[test]
    fn test_explicit_dt_overrides_metadata() {
        let mut store = TimeSeriesStore::new();
        store.attach_with_dt(Direction::Output, output_file(), 0.25).unwrap();
        assert_eq!(&store.time_vector().unwrap()[..], &[0.0, 0.25, 0.5, 0.75]);
        assert!(store.attach_with_dt(Direction::Input, input_file(4), -1.0).is_err());
    }

    #[test]
    fn test_plain_output_open_drops_explicit_dt() {
        let mut store = TimeSeriesStore::new();
        store.attach_with_dt(Direction::Output, output_file(), 0.25).unwrap();
        store.attach(Direction::Input, input_file(4)).unwrap();
        assert_eq!(store.dt(), 0.25);

        store.attach(Direction::Output, output_file()).unwrap();
        assert_eq!(store.dt(), 0.5);
        assert_eq!(&store.time_vector().unwrap()[..], &[0.0, 0.5, 1.0, 1.5]);

        // Without an override the metadata requirement is back
        let err = store.attach(Direction::Output, input_file(4)).unwrap_err();
        assert!(matches!(err, StorageError::MissingMetadata { .. }));
        assert_eq!(store.dt(), 0.5);
    }

    #[test]
    fn test_closing_everything_drops_explicit_dt() {
        let mut store = TimeSeriesStore::new();
        store.attach_with_dt(Direction::Input, input_file(4), 0.25).unwrap();
        store.close(Direction::Input);
        store.attach(Direction::Input, input_file(4)).unwrap();
        assert_eq!(store.dt(), DEFAULT_DT);
    }

    #[test]
    fn test_reopen_bumps_generation_and_close() {
        let mut store = TimeSeriesStore::new();
        store.attach(Direction::Output, output_file()).unwrap();
        store.attach(Direction::Output, output_file()).unwrap();
        assert_eq!(store.generation(Direction::Output), 2);

        store.close(Direction::Output);
        assert_eq!(store.generation(Direction::Output), 3);
        assert!(store.catalog(Direction::Output).is_empty());
        assert!(matches!(store.time_vector(), Err(StorageError::NotInitialized)));
    }

    #[test]
    fn test_catalog() {
        let mut store = TimeSeriesStore::new();
        store.attach(Direction::Output, output_file()).unwrap();
        let catalog = store.catalog(Direction::Output);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].variable.as_str(), "V");
        assert_eq!(catalog[0].nodes.len(), 2);
        assert_eq!(store.variables(Direction::Output), vec![VariableName::new("V")]);
    }
}
