//! Ordered upload of inheritance batches.
//!
//! Batch `k + 1` starts only after every upload of batch `k` has completed.
//! When a batch reports any failure, later batches are not attempted, so a
//! child is never uploaded unless its parent's upload succeeded.

use tracing::info;

use crate::deploy::error::{BatchError, DeployError, DeployResult};
use crate::deploy::uploader::{BatchOutcome, BatchUploader};
use crate::obs::{emit_batch_finished, emit_batch_started};
use crate::policy::PolicyDocument;

/// Ids uploaded by one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub index: usize,
    pub uploaded: Vec<String>,
}

/// Outcome of a fully successful deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub batches: Vec<BatchReport>,
}

impl DeployReport {
    /// Total number of uploaded policies.
    pub fn uploaded_count(&self) -> usize {
        self.batches.iter().map(|b| b.uploaded.len()).sum()
    }
}

/// Upload `batches` in order, halting at the first batch with a failure.
pub async fn deploy_batches(
    uploader: &BatchUploader,
    batches: &[Vec<PolicyDocument>],
) -> DeployResult<DeployReport> {
    let mut report = DeployReport::default();

    for (index, batch) in batches.iter().enumerate() {
        emit_batch_started(index, batch.len());
        let outcome = uploader.upload_batch(batch).await;
        emit_batch_finished(index, outcome.succeeded.len(), outcome.failures.len());

        let BatchOutcome {
            succeeded,
            failures,
        } = outcome;
        match BatchError::from_failures(failures) {
            None => report.batches.push(BatchReport {
                index,
                uploaded: succeeded,
            }),
            Some(source) => {
                let skipped = batches.len() - index - 1;
                if skipped > 0 {
                    info!(batch = index, skipped, "halting deploy, later batches skipped");
                }
                return Err(DeployError::BatchFailed {
                    batch: index,
                    skipped,
                    succeeded,
                    source,
                });
            }
        }
    }

    Ok(report)
}
