//! Remote capabilities consumed by the uploader and the build step.
//!
//! Authentication, rate limiting and the HTTP call shape live behind these
//! traits. Inject the Graph client in production or
//! [`MemoryTransport`](crate::fakes::MemoryTransport) in tests.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request could not be sent or the response could not be read.
    #[error("request failed: {0}")]
    Request(String),

    /// The service answered with an error status.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// No usable access token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The per-call deadline elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The upload task ended without reporting a result.
    #[error("upload task aborted: {0}")]
    Aborted(String),
}

/// Result alias for transport calls.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Upload, delete and list trust-framework policies on the remote service.
#[async_trait]
pub trait PolicyTransport: Send + Sync {
    /// Create or replace the policy `policy_id` with `content`.
    async fn upload_policy(&self, policy_id: &str, content: &[u8]) -> TransportResult<()>;

    /// Delete the policy `policy_id`.
    async fn delete_policy(&self, policy_id: &str) -> TransportResult<()>;

    /// Ids of every policy currently stored remotely.
    async fn list_policies(&self) -> TransportResult<Vec<String>>;
}

/// Read-only view of the tenant the policies are deployed to.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Default domain name of the tenant, e.g. `contoso.onmicrosoft.com`.
    async fn default_domain(&self) -> TransportResult<String>;
}
