//! Trace storage for the neugraph circuit viewer
//!
//! This crate owns the on-disk side of the viewer: the VTRC trace format
//! (one file per simulation direction, one section per recorded variable),
//! memory-mapped access to it, and [`TimeSeriesStore`], which answers
//! "give me the series of node X for variable Y" by reading a single column
//! of the mapped file.

#![deny(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod error;
pub mod ids;
pub mod schemas;
pub mod traits;

// Storage backends
pub mod file;
pub mod store;

// Specific format implementations
pub mod vtrc;

// Re-export essential types
pub use error::{Result, StorageError};
pub use ids::{Direction, NodeId, OpenMode, VariableName};
pub use traits::{CatalogEntry, Series, SeriesSource};

// Re-export implementations
pub use file::TraceBytes;
pub use store::{OpenSummary, TimeMetadata, TimeSeriesStore, DEFAULT_DT};
pub use vtrc::{TraceFile, TraceFileWriter, VTRCHeader, VariableSection, DT_ATTR, METADATA_SECTION};

/// Storage crate version for compatibility checking
pub const STORAGE_VERSION: u32 = 1;

/// Magic numbers for all binary formats
pub mod magic {
    /// VTRC magic number: "VTRC"
    pub const VTRC: [u8; 4] = [0x56, 0x54, 0x52, 0x43];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_spells_format_name() {
        assert_eq!(&magic::VTRC, b"VTRC");
    }
}
