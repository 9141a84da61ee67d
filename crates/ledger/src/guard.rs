//! Idempotency guard over processed-event markers

use crate::error::StoreError;
use crate::store::LedgerStore;
use std::sync::Arc;
use tracing::debug;

/// Durable set of processed event ids.
///
/// The guard only checks and marks; callers sequence check -> apply -> mark.
/// A crash between apply and mark re-applies the event on redelivery, but an
/// event is never marked before its effects were written.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn LedgerStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn already_processed(&self, event_id: &str) -> Result<bool, StoreError> {
        self.store.exists_processed_marker(event_id).await
    }

    /// Record `event_id` as processed; a no-op if it already is
    pub async fn mark_processed(&self, event_id: &str) -> Result<(), StoreError> {
        if !self.store.insert_processed_marker_if_absent(event_id).await? {
            debug!(event_id, "marker already present");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLedgerStore;

    #[tokio::test]
    async fn test_mark_is_idempotent() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let guard = IdempotencyGuard::new(store.clone());

        assert!(!guard.already_processed("evt").await.unwrap());
        guard.mark_processed("evt").await.unwrap();
        guard.mark_processed("evt").await.unwrap();
        assert!(guard.already_processed("evt").await.unwrap());
        assert_eq!(store.processed_marker_count().await.unwrap(), 1);
    }
}
