//! tfpolicy-graph: Graph API transport for trust-framework policies
//!
//! Provides the production [`PolicyTransport`](tfpolicy_core::PolicyTransport)
//! used by the `tfpolicy` binary: client-credential authentication, the
//! policy upload, delete and list endpoints, and the tenant default-domain
//! lookup behind [`TenantDirectory`](tfpolicy_core::TenantDirectory).

pub mod client;
pub mod credentials;
pub mod error;

pub use client::{GraphClient, GraphConfig, DEFAULT_GRAPH_URL, DEFAULT_LOGIN_URL};
pub use credentials::{GraphCredentials, CLIENT_ID_ENV, CLIENT_SECRET_ENV, TENANT_ID_ENV};
pub use error::GraphError;

/// Result type for graph client setup
pub type Result<T> = std::result::Result<T, GraphError>;
