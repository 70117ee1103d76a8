//! Aggregated per-policy failures and deploy errors.

use std::fmt;

use thiserror::Error;

use crate::deploy::transport::TransportError;

/// One policy whose remote call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyFailure {
    pub policy_id: String,
    pub cause: TransportError,
}

impl fmt::Display for PolicyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.policy_id, self.cause)
    }
}

/// Every per-policy failure of one batch of remote calls.
///
/// Failures are kept sorted by policy id, so iteration and display are
/// deterministic regardless of completion order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct BatchError {
    failures: Vec<PolicyFailure>,
}

impl BatchError {
    /// Returns `None` when `failures` is empty.
    pub fn from_failures(mut failures: Vec<PolicyFailure>) -> Option<Self> {
        if failures.is_empty() {
            return None;
        }
        failures.sort_by(|a, b| a.policy_id.cmp(&b.policy_id));
        Some(Self { failures })
    }

    pub fn failures(&self) -> &[PolicyFailure] {
        &self.failures
    }

    pub fn policy_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.policy_id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} policy operation(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  * {failure}")?;
        }
        Ok(())
    }
}

impl IntoIterator for BatchError {
    type Item = PolicyFailure;
    type IntoIter = std::vec::IntoIter<PolicyFailure>;

    fn into_iter(self) -> Self::IntoIter {
        self.failures.into_iter()
    }
}

/// Errors produced while deploying batches in order.
#[derive(Debug, Error)]
pub enum DeployError {
    /// A batch reported failures; later batches were not attempted.
    ///
    /// `succeeded` lists the ids of the failed batch that did reach the tenant.
    #[error("failed to upload batch {batch} ({skipped} later batch(es) skipped): {source}")]
    BatchFailed {
        batch: usize,
        skipped: usize,
        succeeded: Vec<String>,
        #[source]
        source: BatchError,
    },
}

/// Convenience result alias.
pub type DeployResult<T> = std::result::Result<T, DeployError>;
