//! Order store: the repository plus its write-through cache.
//!
//! The repository is authoritative. The cache is written only after a commit
//! succeeds, and read first on lookups with a backfill on miss.

use std::sync::Arc;

use orderline_core::{Order, OrderUid, OrderUidError};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::cache::OrderCache;
use crate::db::{OrderRepository, RepositoryError};

/// Errors returned by [`OrderStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order identifier is missing or malformed.
    #[error("invalid order: {0}")]
    InvalidOrder(#[from] OrderUidError),

    /// An order with this identifier is already persisted.
    #[error("order {0} already exists")]
    AlreadyExists(OrderUid),

    /// Any other persistence failure.
    #[error("persistence failure: {0}")]
    Persistence(#[source] RepositoryError),
}

impl StoreError {
    /// Whether the failure is a uniqueness violation on the identifier.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Where a lookup was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Cache,
    Store,
}

/// Authoritative order persistence with a write-through cache.
///
/// Cheap to clone; clones share the repository and the cache.
#[derive(Clone)]
pub struct OrderStore {
    repository: Arc<dyn OrderRepository>,
    cache: Arc<OrderCache>,
}

impl OrderStore {
    /// Create a store over `repository` publishing into `cache`.
    #[must_use]
    pub fn new(repository: Arc<dyn OrderRepository>, cache: Arc<OrderCache>) -> Self {
        Self { repository, cache }
    }

    /// Get a reference to the cache.
    #[must_use]
    pub fn cache(&self) -> &OrderCache {
        &self.cache
    }

    /// Get a reference to the repository.
    #[must_use]
    pub fn repository(&self) -> &dyn OrderRepository {
        self.repository.as_ref()
    }

    /// Persist `order` atomically, then publish it into the cache.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidOrder` if the identifier is empty or too long.
    /// Returns `StoreError::AlreadyExists` if the identifier is already persisted.
    /// Returns `StoreError::Persistence` for any other failure. The cache is
    /// untouched on every error path.
    #[instrument(skip(self, order), fields(order_uid = %order.order_uid))]
    pub async fn insert_order(&self, order: Order) -> Result<Arc<Order>, StoreError> {
        let uid = order.uid()?;

        self.repository
            .insert(&order)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => StoreError::AlreadyExists(uid.clone()),
                other => StoreError::Persistence(other),
            })?;

        let order = Arc::new(order);
        self.cache.set(uid, Arc::clone(&order));
        info!("Order persisted and cached");

        Ok(order)
    }

    /// Get an order by identifier, consulting the cache first.
    ///
    /// A store hit is backfilled into the cache before returning.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Persistence` if the cache misses and the store
    /// read fails. An absent order is `Ok(None)`, never an error.
    pub async fn get_order_by_uid(&self, uid: &OrderUid) -> Result<Option<Arc<Order>>, StoreError> {
        Ok(self
            .get_order_with_source(uid)
            .await?
            .map(|(order, _)| order))
    }

    /// Like [`get_order_by_uid`](Self::get_order_by_uid), also reporting
    /// whether the answer came from the cache or the store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Persistence` if the cache misses and the store
    /// read fails.
    #[instrument(skip(self), fields(order_uid = %uid))]
    pub async fn get_order_with_source(
        &self,
        uid: &OrderUid,
    ) -> Result<Option<(Arc<Order>, LookupSource)>, StoreError> {
        if let Some(order) = self.cache.get(uid.as_str()) {
            debug!("Order found in cache");
            return Ok(Some((order, LookupSource::Cache)));
        }

        let Some(order) = self
            .repository
            .find_by_uid(uid)
            .await
            .map_err(StoreError::Persistence)?
        else {
            debug!("Order not found");
            return Ok(None);
        };

        let order = Arc::new(order);
        self.cache.set(uid.clone(), Arc::clone(&order));
        debug!("Order loaded from store and cached");

        Ok(Some((order, LookupSource::Store)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use orderline_core::{Delivery, Item, Payment};

    use super::*;
    use crate::db::{FailurePoint, InMemoryOrderRepository};

    fn order(uid: &str) -> Order {
        Order {
            order_uid: uid.to_owned(),
            track_number: "WBILMTESTTRACK".to_owned(),
            entry: "WBIL".to_owned(),
            delivery: Delivery {
                name: "Jane".to_owned(),
                city: "Kiryat Mozkin".to_owned(),
                ..Delivery::default()
            },
            payment: Payment {
                amount: 500,
                currency: "USD".to_owned(),
                ..Payment::default()
            },
            items: vec![Item {
                chrt_id: 1,
                name: "Mascaras".to_owned(),
                ..Item::default()
            }],
            locale: "en".to_owned(),
            internal_signature: String::new(),
            customer_id: "test".to_owned(),
            delivery_service: "meest".to_owned(),
            shardkey: "9".to_owned(),
            sm_id: 99,
            date_created: chrono::DateTime::default(),
            oof_shard: "1".to_owned(),
        }
    }

    fn uid(s: &str) -> OrderUid {
        OrderUid::parse(s).unwrap()
    }

    fn store() -> (OrderStore, Arc<InMemoryOrderRepository>) {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let store = OrderStore::new(repo.clone(), Arc::new(OrderCache::unbounded()));
        (store, repo)
    }

    #[tokio::test]
    async fn test_insert_publishes_to_cache() {
        let (store, _) = store();
        store.insert_order(order("A1")).await.unwrap();

        assert_eq!(*store.cache().get("A1").unwrap(), order("A1"));
    }

    #[tokio::test]
    async fn test_insert_rejects_empty_uid() {
        let (store, repo) = store();
        let err = store.insert_order(order("")).await.unwrap_err();

        assert!(matches!(err, StoreError::InvalidOrder(OrderUidError::Empty)));
        assert_eq!(repo.order_count(), 0);
        assert!(store.cache().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_already_exists() {
        let (store, _) = store();
        store.insert_order(order("A1")).await.unwrap();

        let err = store.insert_order(order("A1")).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_failed_insert_does_not_touch_cache() {
        let (store, repo) = store();
        repo.fail_next_insert(FailurePoint::Payment);

        let err = store.insert_order(order("A1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)));
        assert!(!store.cache().contains("A1"));
        assert_eq!(repo.row_counts("A1"), (0, 0, 0, 0));
    }

    #[tokio::test]
    async fn test_cache_miss_backfills() {
        let (store, repo) = store();
        repo.insert(&order("A1")).await.unwrap();
        assert!(!store.cache().contains("A1"));

        let (found, source) = store
            .get_order_with_source(&uid("A1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source, LookupSource::Store);
        assert_eq!(*found, order("A1"));
        assert_eq!(*store.cache().get("A1").unwrap(), order("A1"));

        let (_, source) = store
            .get_order_with_source(&uid("A1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source, LookupSource::Cache);
    }

    #[tokio::test]
    async fn test_cache_hit_does_not_touch_store() {
        let (store, repo) = store();
        store.insert_order(order("A1")).await.unwrap();
        repo.set_unavailable(true);

        assert!(store.get_order_by_uid(&uid("A1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_not_found_is_not_an_error() {
        let (store, _) = store();
        assert!(store.get_order_by_uid(&uid("nope")).await.unwrap().is_none());
        assert!(store.cache().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_on_miss_is_an_error() {
        let (store, repo) = store();
        repo.set_unavailable(true);

        let err = store.get_order_by_uid(&uid("A1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)));
    }
}
