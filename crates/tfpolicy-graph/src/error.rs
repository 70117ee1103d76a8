//! Error types for tfpolicy-graph

use thiserror::Error;

/// Errors raised while configuring the Graph client.
///
/// Failures of individual calls surface as
/// [`TransportError`](tfpolicy_core::TransportError) instead.
#[derive(Error, Debug)]
pub enum GraphError {
    /// One or more credential values are absent
    #[error("missing credentials: {} must be set via flag or environment variable", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    /// The tenant id is not a UUID
    #[error("invalid tenant id {value:?}: {source}")]
    InvalidTenantId {
        value: String,
        #[source]
        source: uuid::Error,
    },

    /// HTTP client could not be constructed
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for GraphError {
    fn from(err: reqwest::Error) -> Self {
        GraphError::Http(err.to_string())
    }
}
