//! In-memory fake for the remote policy store (testing only)
//!
//! `MemoryTransport` satisfies the [`PolicyTransport`] contract without any
//! network access, records every call, and can inject per-id failures,
//! latency, or a rendezvous barrier to prove uploads overlap. It doubles as a
//! [`TenantDirectory`] when given a default domain.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;

use crate::deploy::transport::{PolicyTransport, TenantDirectory, TransportError, TransportResult};

#[derive(Debug, Default)]
struct State {
    stored: BTreeMap<String, Vec<u8>>,
    uploads: Vec<String>,
    deletes: Vec<String>,
}

/// In-memory policy store backed by a `BTreeMap<policy_id, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    barrier: Option<Arc<Barrier>>,
    default_domain: Option<String>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads and deletes of these ids fail with a 400 status.
    pub fn failing_on<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.failing.extend(ids.into_iter().map(str::to_string));
        self
    }

    /// Sleep this long inside every upload.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every upload waits until `parties` uploads are in flight at once.
    pub fn with_barrier(mut self, parties: usize) -> Self {
        self.barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    /// Answer tenant lookups with `domain`. Without it, lookups fail with 404.
    pub fn with_default_domain(mut self, domain: &str) -> Self {
        self.default_domain = Some(domain.to_string());
        self
    }

    /// Pre-populate the store.
    pub fn with_policy(self, policy_id: &str, content: &[u8]) -> Self {
        self.lock()
            .stored
            .insert(policy_id.to_string(), content.to_vec());
        self
    }

    /// Ids passed to `upload_policy`, in call order, failures included.
    pub fn upload_log(&self) -> Vec<String> {
        self.lock().uploads.clone()
    }

    /// Ids passed to `delete_policy`, in call order, failures included.
    pub fn delete_log(&self) -> Vec<String> {
        self.lock().deletes.clone()
    }

    pub fn stored(&self, policy_id: &str) -> Option<Vec<u8>> {
        self.lock().stored.get(policy_id).cloned()
    }

    pub fn stored_ids(&self) -> Vec<String> {
        self.lock().stored.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rejected(&self, policy_id: &str) -> TransportResult<()> {
        if self.failing.contains(policy_id) {
            return Err(TransportError::Status {
                status: 400,
                body: format!("policy {policy_id} rejected"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyTransport for MemoryTransport {
    async fn upload_policy(&self, policy_id: &str, content: &[u8]) -> TransportResult<()> {
        self.lock().uploads.push(policy_id.to_string());

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.rejected(policy_id)?;
        self.lock()
            .stored
            .insert(policy_id.to_string(), content.to_vec());
        Ok(())
    }

    async fn delete_policy(&self, policy_id: &str) -> TransportResult<()> {
        self.lock().deletes.push(policy_id.to_string());
        self.rejected(policy_id)?;
        match self.lock().stored.remove(policy_id) {
            Some(_) => Ok(()),
            None => Err(TransportError::Status {
                status: 404,
                body: format!("policy {policy_id} not found"),
            }),
        }
    }

    async fn list_policies(&self) -> TransportResult<Vec<String>> {
        Ok(self.stored_ids())
    }
}

#[async_trait]
impl TenantDirectory for MemoryTransport {
    async fn default_domain(&self) -> TransportResult<String> {
        self.default_domain
            .clone()
            .ok_or_else(|| TransportError::Status {
                status: 404,
                body: "tenant information not found".to_string(),
            })
    }
}
