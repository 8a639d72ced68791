//! Connector error types.

use thiserror::Error;

/// Errors raised by connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The remote service returned a non-success response.
    #[error("{service} API error: {message}")]
    Api { service: &'static str, message: String },

    /// Transport-level failure (connection, TLS, timeout).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A required argument was not supplied in the call-argument map.
    #[error("missing required argument '{argument}' for operation '{operation}'")]
    MissingArgument {
        operation: &'static str,
        argument: &'static str,
    },

    /// The operation name is not part of this connector's contract.
    #[error("connector '{service}' has no operation '{operation}'")]
    UnknownOperation { service: &'static str, operation: String },

    /// The operation exists but the connector lacks the capability for it.
    #[error("connector '{service}' does not support '{operation}'")]
    NotSupported { service: &'static str, operation: &'static str },

    /// The remote service answered with a payload we could not interpret.
    #[error("{service} returned an invalid response: {message}")]
    InvalidResponse { service: &'static str, message: String },
}

impl ConnectorError {
    /// Create an API error for the given service.
    pub fn api(service: &'static str, message: impl Into<String>) -> Self {
        Self::Api { service, message: message.into() }
    }

    /// Create an invalid-response error for the given service.
    pub fn invalid_response(service: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse { service, message: message.into() }
    }
}
