//! Concurrent batch upload of resolved policies to the identity service.

pub mod error;
pub mod sequencer;
pub mod transport;
pub mod uploader;

pub use error::{BatchError, DeployError, DeployResult, PolicyFailure};
pub use sequencer::{deploy_batches, BatchReport, DeployReport};
pub use transport::{PolicyTransport, TenantDirectory, TransportError, TransportResult};
pub use uploader::{BatchOutcome, BatchUploader, UploadOptions};
