//! Engine error types.

use stocksync_connectors::ConnectorError;
use thiserror::Error;

/// Errors raised while interpreting or driving a workflow.
///
/// All of these are contained at the stage boundary and surface through
/// [`crate::execution::StageResult::error_message`]; only a stage configured
/// with the `fail` error strategy escalates one into halting the run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or missing workflow/stage configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A connector operation failed.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// A stage could not produce output from its input data.
    #[error("transformation error: {0}")]
    Transformation(String),
}

impl EngineError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
