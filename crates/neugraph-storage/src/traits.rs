//! Core trait definitions for the storage layer

use crate::{
    error::Result,
    ids::{Direction, NodeId, VariableName},
};

use std::sync::Arc;

/// A realized time series, one value per time step.
///
/// Owned independently of the file it was read from.
pub type Series = Arc<[f64]>;

/// Which nodes a variable covers, as known when its file was opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Variable name
    pub variable: VariableName,
    /// Nodes with a column in this variable, in column order
    pub nodes: Vec<NodeId>,
}

/// Source of per-node series, keyed by direction and variable
pub trait SeriesSource {
    /// Read the full series of `node` for `direction.variable`
    fn fetch(&self, node: &str, direction: Direction, variable: &str) -> Result<Series>;

    /// Counter bumped every time the backing file for `direction` is replaced
    fn generation(&self, direction: Direction) -> u64;

    /// Variables and node coverage of the file open for `direction`.
    /// Empty when nothing is open.
    fn catalog(&self, direction: Direction) -> Vec<CatalogEntry>;
}
