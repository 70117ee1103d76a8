//! Concurrent upload of one batch of resolved policies.
//!
//! Exactly one task is spawned per policy and each task reports exactly one
//! result into a channel buffered to the batch size. Results are drained
//! only after every task has been joined, so no task outlives the call and
//! no result is read early. A failing policy never stops its siblings.
//!
//! The uploader does not decide whether to continue with the next batch; it
//! only reports. See [`crate::deploy::sequencer`] for batch ordering.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, instrument, Instrument, Span};

use crate::deploy::error::{BatchError, PolicyFailure};
use crate::deploy::transport::{PolicyTransport, TransportError, TransportResult};
use crate::obs::{emit_policy_upload_failed, emit_policy_uploaded};
use crate::policy::PolicyDocument;

/// Options applied uniformly to every upload in a batch.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Deadline for each individual upload call.
    pub call_timeout: Option<Duration>,
}

/// Per-policy outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Ids uploaded successfully, sorted.
    pub succeeded: Vec<String>,
    /// Failed uploads, sorted by id.
    pub failures: Vec<PolicyFailure>,
}

impl BatchOutcome {
    /// Number of policies attempted (succeeded + failed).
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapse into the uploaded ids or one aggregated error.
    pub fn into_result(self) -> Result<Vec<String>, BatchError> {
        match BatchError::from_failures(self.failures) {
            Some(err) => Err(err),
            None => Ok(self.succeeded),
        }
    }
}

/// Uploads batches through an injected transport.
///
/// The transport and the tracing span are explicit: every upload task runs
/// inside `span`, and nothing is read from process-wide client state.
#[derive(Clone)]
pub struct BatchUploader {
    transport: Arc<dyn PolicyTransport>,
    span: Span,
    options: UploadOptions,
}

impl BatchUploader {
    pub fn new(transport: Arc<dyn PolicyTransport>, span: Span) -> Self {
        Self {
            transport,
            span,
            options: UploadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn transport(&self) -> &Arc<dyn PolicyTransport> {
        &self.transport
    }

    /// Upload `batch` concurrently and return the aggregated error, if any.
    pub async fn upload(&self, batch: &[PolicyDocument]) -> Result<Vec<String>, BatchError> {
        self.upload_batch(batch).await.into_result()
    }

    /// Upload `batch` concurrently and report every policy's outcome.
    #[instrument(parent = &self.span, skip_all, fields(policies = batch.len()))]
    pub async fn upload_batch(&self, batch: &[PolicyDocument]) -> BatchOutcome {
        if batch.is_empty() {
            return BatchOutcome::default();
        }

        let (tx, mut rx) = mpsc::channel::<(String, TransportResult<()>)>(batch.len());
        let mut tasks = Vec::with_capacity(batch.len());

        for policy in batch {
            let transport = Arc::clone(&self.transport);
            let tx = tx.clone();
            let policy_id = policy.id().to_string();
            let content = policy.content().to_vec();
            let timeout = self.options.call_timeout;

            let task = tokio::spawn(
                async move {
                    debug!(policy_id = %policy_id, "uploading policy");
                    let result =
                        upload_one(transport.as_ref(), &policy_id, &content, timeout).await;
                    // Capacity equals the batch size, so this never finds the channel full.
                    let _ = tx.try_send((policy_id, result));
                }
                .instrument(Span::current()),
            );
            tasks.push((policy.id().to_string(), task));
        }
        drop(tx);

        let joined = join_all(
            tasks
                .into_iter()
                .map(|(policy_id, task)| async move { (policy_id, task.await) }),
        )
        .await;

        let mut outcome = BatchOutcome::default();
        for (policy_id, joined) in joined {
            if let Err(e) = joined {
                outcome.failures.push(PolicyFailure {
                    policy_id,
                    cause: TransportError::Aborted(e.to_string()),
                });
            }
        }

        while let Ok((policy_id, result)) = rx.try_recv() {
            match result {
                Ok(()) => {
                    emit_policy_uploaded(&policy_id);
                    outcome.succeeded.push(policy_id);
                }
                Err(cause) => {
                    emit_policy_upload_failed(&policy_id, &cause);
                    outcome.failures.push(PolicyFailure { policy_id, cause });
                }
            }
        }

        outcome.succeeded.sort();
        outcome
            .failures
            .sort_by(|a, b| a.policy_id.cmp(&b.policy_id));
        outcome
    }
}

async fn upload_one(
    transport: &dyn PolicyTransport,
    policy_id: &str,
    content: &[u8],
    timeout: Option<Duration>,
) -> TransportResult<()> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, transport.upload_policy(policy_id, content))
            .await
            .map_err(|_| TransportError::Timeout(limit))?,
        None => transport.upload_policy(policy_id, content).await,
    }
}
