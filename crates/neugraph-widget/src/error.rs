//! Error types for the viewer widget

use thiserror::Error;

use crate::render::RenderError;

/// Result type for widget operations
pub type Result<T> = std::result::Result<T, WidgetError>;

/// Errors that can occur while serving plot requests
#[derive(Error, Debug)]
pub enum WidgetError {
    /// Storage layer error
    #[error("Storage error: {source}")]
    Storage {
        #[from]
        /// Source storage error
        source: neugraph_storage::StorageError,
    },

    /// Renderer failed to produce an artifact
    #[error("Render error: {source}")]
    Render {
        #[from]
        /// Source render error
        source: RenderError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use neugraph_storage::StorageError;

    #[test]
    fn test_error_conversion() {
        let err: WidgetError = StorageError::NotInitialized.into();
        assert!(matches!(err, WidgetError::Storage { .. }));

        let err: WidgetError = RenderError::failed("no backend").into();
        let msg = format!("{}", err);
        assert!(msg.contains("Render error"));
        assert!(msg.contains("no backend"));
    }
}
