//! tfpolicy core library
//!
//! Builds environment-specific trust-framework policies from templates and
//! uploads them in inheritance order. Re-exports the pipeline types for
//! programmatic access.

pub mod deploy;
pub mod environment;
pub mod fakes;
pub mod obs;
pub mod policy;
pub mod service;
pub mod telemetry;

pub use deploy::{
    deploy_batches, BatchError, BatchOutcome, BatchReport, BatchUploader, DeployError,
    DeployReport, DeployResult, PolicyFailure, PolicyTransport, TenantDirectory, TransportError,
    TransportResult, UploadOptions,
};

pub use environment::{load_environments, ConfigError, EnvironmentConfig};

pub use policy::{
    BuildReport, PolicyBuilder, PolicyDocument, PolicyError, PolicyResult, PolicyTree, Settings,
    SettingsSubstitution, WrittenPolicy,
};

pub use obs::DeploySpan;
pub use service::{PolicyService, ServiceError, ServiceResult, TENANT_SETTING};
pub use telemetry::init_tracing;

/// Crate version, for `--version` style output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
