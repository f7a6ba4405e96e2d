//! Order lookups for query surfaces (cache-aside over the store).

use std::sync::Arc;

use orderline_core::{Order, OrderUid};
use thiserror::Error;
use tracing::debug;

use crate::store::{LookupSource, OrderStore, StoreError};

/// Errors returned by [`LookupService::lookup`].
#[derive(Debug, Error)]
pub enum LookupError {
    /// No order with this identifier exists.
    #[error("order not found: {0}")]
    NotFound(String),

    /// The store could not be read.
    #[error("lookup failed: {0}")]
    Internal(#[from] StoreError),
}

/// Read-only order access for the HTTP layer.
#[derive(Clone)]
pub struct LookupService {
    store: OrderStore,
}

impl LookupService {
    #[must_use]
    pub const fn new(store: OrderStore) -> Self {
        Self { store }
    }

    /// Look up an order by its raw identifier.
    ///
    /// Identifiers that could never be stored (empty or too long) are reported
    /// as not found.
    ///
    /// # Errors
    ///
    /// Returns `LookupError::NotFound` if no such order exists.
    /// Returns `LookupError::Internal` if the cache misses and the store fails.
    pub async fn lookup(&self, order_uid: &str) -> Result<Arc<Order>, LookupError> {
        let Ok(uid) = OrderUid::parse(order_uid) else {
            return Err(LookupError::NotFound(order_uid.to_owned()));
        };

        match self.store.get_order_with_source(&uid).await? {
            Some((order, source)) => {
                debug!(order_uid = %uid, from_cache = source == LookupSource::Cache, "Order served");
                Ok(order)
            }
            None => Err(LookupError::NotFound(uid.into_inner())),
        }
    }

    /// Check that the backing store answers.
    ///
    /// # Errors
    ///
    /// Returns the repository error if the store is unreachable.
    pub async fn ready(&self) -> Result<(), crate::db::RepositoryError> {
        self.store.repository().ping().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use orderline_core::{Delivery, Payment};

    use super::*;
    use crate::cache::OrderCache;
    use crate::db::{InMemoryOrderRepository, OrderRepository};

    fn order(uid: &str) -> Order {
        serde_json::from_value(serde_json::json!({
            "order_uid": uid,
            "delivery": Delivery::default(),
            "payment": Payment::default(),
        }))
        .unwrap()
    }

    fn service() -> (LookupService, Arc<InMemoryOrderRepository>) {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let store = OrderStore::new(repo.clone(), Arc::new(OrderCache::unbounded()));
        (LookupService::new(store), repo)
    }

    #[tokio::test]
    async fn test_lookup_found() {
        let (service, repo) = service();
        repo.insert(&order("A1")).await.unwrap();

        let found = service.lookup("A1").await.unwrap();
        assert_eq!(found.order_uid, "A1");
    }

    #[tokio::test]
    async fn test_lookup_missing_is_not_found() {
        let (service, _) = service();
        assert!(matches!(
            service.lookup("nope").await,
            Err(LookupError::NotFound(uid)) if uid == "nope"
        ));
    }

    #[tokio::test]
    async fn test_lookup_invalid_uid_is_not_found() {
        let (service, repo) = service();
        repo.set_unavailable(true);

        assert!(matches!(service.lookup("").await, Err(LookupError::NotFound(_))));
        let too_long = "x".repeat(OrderUid::MAX_LENGTH + 1);
        assert!(matches!(
            service.lookup(&too_long).await,
            Err(LookupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_store_failure_is_internal() {
        let (service, repo) = service();
        repo.set_unavailable(true);

        assert!(matches!(
            service.lookup("A1").await,
            Err(LookupError::Internal(_))
        ));
        assert!(service.ready().await.is_err());
    }
}
