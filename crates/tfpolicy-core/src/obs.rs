//! Structured observability hooks for build and deploy lifecycle events.
//!
//! - Deploy-scoped tracing spans via the [`DeploySpan`] helper
//! - Emission functions for build, batch and per-policy events
//!
//! Events are emitted at `info!` level, failures at `warn!`. Filtering goes
//! through `TFPOLICY_LOG` (see [`crate::telemetry`]).

use std::time::Duration;

use tracing::{info, warn, Span};

use crate::deploy::TransportError;

/// Span shared by every upload of one deploy.
///
/// Unlike a guard that enters the current thread, the span is handed to the
/// [`BatchUploader`](crate::deploy::BatchUploader) and re-attached to each
/// spawned task, so it follows uploads across worker threads.
pub struct DeploySpan;

impl DeploySpan {
    /// Create a span tagged with the environment name.
    pub fn create(environment: &str) -> Span {
        tracing::info_span!("tfpolicy.deploy", environment = %environment)
    }
}

/// Emit event: resolved policies written for an environment.
pub fn emit_build_finished(environment: &str, written: usize, target: &std::path::Path) {
    info!(
        event = "build.finished",
        environment = %environment,
        written = written,
        target = %target.display(),
    );
}

/// Emit event: a batch is about to be uploaded.
pub fn emit_batch_started(batch: usize, policies: usize) {
    info!(event = "batch.started", batch = batch, policies = policies);
}

pub fn emit_batch_finished(batch: usize, succeeded: usize, failed: usize) {
    info!(
        event = "batch.finished",
        batch = batch,
        succeeded = succeeded,
        failed = failed,
    );
}

pub fn emit_policy_uploaded(policy_id: &str) {
    info!(event = "policy.uploaded", policy_id = %policy_id);
}

/// Emit event: one upload failed (warning level).
pub fn emit_policy_upload_failed(policy_id: &str, error: &TransportError) {
    warn!(event = "policy.upload_failed", policy_id = %policy_id, error = %error);
}

/// Emit event: deploy finished, with or without success.
pub fn emit_deploy_finished(environment: &str, elapsed: Duration, uploaded: usize, success: bool) {
    info!(
        event = "deploy.finished",
        environment = %environment,
        duration_ms = elapsed.as_millis() as u64,
        uploaded = uploaded,
        success = success,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_span_create() {
        let span = DeploySpan::create("dev");
        let _entered = span.enter();
        emit_batch_started(0, 2);
    }
}
