//! Error types for the storage layer

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// A variable's step count disagrees with the established one
    #[error("Inconsistent length for variable '{variable}': {found} steps, expected {expected}")]
    InconsistentLength {
        /// Variable whose step count disagreed
        variable: String,
        /// Step count already established
        expected: usize,
        /// Step count found in the file
        found: usize,
    },

    /// Node has no column in the requested variable
    #[error("Node '{node}' not present in {direction}.{variable}")]
    UnknownNode {
        /// Node that was looked up
        node: String,
        /// Direction that was searched
        direction: String,
        /// Variable that was searched
        variable: String,
    },

    /// Variable does not exist in the requested direction
    #[error("Variable '{variable}' not present in {direction} store")]
    UnknownVariable {
        /// Variable that was looked up
        variable: String,
        /// Direction that was searched
        direction: String,
    },

    /// Time metadata requested before any variable was loaded
    #[error("Time metadata not initialized: no variable loaded yet")]
    NotInitialized,

    /// Unrecognized direction string
    #[error("Unsupported direction: '{direction}' (expected 'input' or 'output')")]
    UnsupportedDirection {
        /// Direction string received
        direction: String,
    },

    /// Unrecognized open mode string
    #[error("Unsupported open mode: '{mode}' (expected 'r' or 'r+')")]
    UnsupportedMode {
        /// Mode string received
        mode: String,
    },

    /// Nothing is open for the requested direction
    #[error("No {direction} store is open")]
    DirectionNotOpen {
        /// Direction that was requested
        direction: String,
    },

    /// Reserved metadata section or attribute is missing
    #[error("Missing metadata: {what}")]
    MissingMetadata {
        /// What was missing
        what: String,
    },

    /// Invalid magic number in binary format
    #[error("Invalid magic number: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// Expected magic number
        expected: [u8; 4],
        /// Found magic number
        found: [u8; 4],
    },

    /// Unsupported version
    #[error("Unsupported version: {version}, supported: {supported}")]
    UnsupportedVersion {
        /// Version found
        version: u32,
        /// Supported version
        supported: u32,
    },

    /// Checksum verification failed
    #[error("Checksum verification failed: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Invalid file format or corrupted data
    #[error("Invalid format: {reason}")]
    InvalidFormat {
        /// Reason for invalid format
        reason: String,
    },

    /// Out of bounds access
    #[error("Index {index} out of bounds (max: {max})")]
    OutOfBounds {
        /// Index that was out of bounds
        index: usize,
        /// Maximum allowed index
        max: usize,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        /// Source I/O error
        source: std::io::Error,
    },
}

impl StorageError {
    /// Create an invalid format error
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }

    /// Create a missing metadata error
    pub fn missing_metadata(what: impl Into<String>) -> Self {
        Self::MissingMetadata { what: what.into() }
    }

    /// True for errors that only mean "this node has no data for this
    /// variable". Everything else is a real fault.
    pub fn is_sparsity_miss(&self) -> bool {
        matches!(
            self,
            Self::UnknownNode { .. } | Self::UnknownVariable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StorageError::invalid_format("test reason");
        assert!(matches!(err, StorageError::InvalidFormat { .. }));

        let err = StorageError::missing_metadata("dt");
        assert!(matches!(err, StorageError::MissingMetadata { .. }));
    }

    #[test]
    fn test_sparsity_classification() {
        let miss = StorageError::UnknownNode {
            node: "x".into(),
            direction: "output".into(),
            variable: "V".into(),
        };
        assert!(miss.is_sparsity_miss());

        let io = StorageError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!io.is_sparsity_miss());
        assert!(!StorageError::NotInitialized.is_sparsity_miss());
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::InconsistentLength {
            variable: "I".into(),
            expected: 4,
            found: 5,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Inconsistent length"));
        assert!(msg.contains("'I'"));
    }
}
