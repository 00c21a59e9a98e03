//! One-onboarding-per-endpoint admission control
//!
//! The marker row in `ActiveAddBMCRequest` is the only exclusive lock in the
//! service. Acquisition relies on the store's atomic `create`.

use agg_core::tables;
use agg_store::{KvStore, StoreError};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct AdmissionGuard {
    store: Arc<dyn KvStore>,
}

impl AdmissionGuard {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Returns `Ok(true)` when another run already holds `key`
    pub async fn try_acquire(&self, key: &str) -> Result<bool, StoreError> {
        let marker = json!({ "ManagerAddress": key }).to_string();
        match self
            .store
            .create(tables::ACTIVE_ADD_BMC_REQUEST, key, &marker)
            .await
        {
            Ok(()) => {
                debug!(key, "Admission acquired");
                Ok(false)
            }
            Err(e) if e.is_duplicate() => Ok(true),
            Err(e) => Err(e),
        }
    }

    pub async fn release(&self, key: &str) {
        match self.store.delete(tables::ACTIVE_ADD_BMC_REQUEST, key).await {
            Ok(()) => debug!(key, "Admission released"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(key, "Failed to release admission record: {}", e),
        }
    }

    /// Acquire and return a permit that releases on drop
    pub async fn acquire(self: &Arc<Self>, key: &str) -> Result<Option<AdmissionPermit>, StoreError> {
        if self.try_acquire(key).await? {
            return Ok(None);
        }
        Ok(Some(AdmissionPermit {
            guard: Arc::clone(self),
            key: Some(key.to_string()),
        }))
    }
}

/// Held admission; the record is deleted on drop or by [`AdmissionPermit::release`]
pub struct AdmissionPermit {
    guard: Arc<AdmissionGuard>,
    key: Option<String>,
}

impl AdmissionPermit {
    pub async fn release(mut self) {
        if let Some(key) = self.key.take() {
            self.guard.release(&key).await;
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let guard = Arc::clone(&self.guard);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { guard.release(&key).await });
            } else {
                warn!(key = %key, "Admission record left behind: no runtime to release it");
            }
        }
    }
}
