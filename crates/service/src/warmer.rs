//! Startup cache warm-up.
//!
//! Loads every complete order from the repository into the cache before the
//! service accepts traffic. Runs once; any failure aborts the whole warm-up
//! and the service must not start.

use std::time::{Duration, Instant};

use orderline_core::OrderUidError;
use thiserror::Error;
use tracing::{info, instrument};

use crate::cache::OrderCache;
use crate::db::{OrderRepository, RepositoryError};

/// Errors that abort cache warm-up.
#[derive(Debug, Error)]
pub enum WarmupError {
    /// The bulk read failed.
    #[error("failed to load orders: {0}")]
    Repository(#[from] RepositoryError),

    /// A stored order carries an identifier the cache cannot key.
    #[error("stored order has an invalid identifier: {0}")]
    InvalidStoredOrder(#[from] OrderUidError),
}

/// Summary of a completed warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmupReport {
    /// Orders pushed into the cache.
    pub orders: usize,
    /// Items attached across those orders.
    pub items: usize,
    pub elapsed: Duration,
}

/// Populate `cache` with every complete order held by `repository`.
///
/// Orders are validated before any is cached, so a failure leaves the cache
/// as it was.
///
/// # Errors
///
/// Returns `WarmupError::Repository` if the bulk read fails.
/// Returns `WarmupError::InvalidStoredOrder` if a stored identifier is invalid.
#[instrument(skip_all)]
pub async fn warm_cache(
    repository: &dyn OrderRepository,
    cache: &OrderCache,
) -> Result<WarmupReport, WarmupError> {
    let started = Instant::now();

    let orders = repository.load_all().await?;
    let keyed = orders
        .into_iter()
        .map(|order| order.uid().map(|uid| (uid, order)))
        .collect::<Result<Vec<_>, _>>()?;

    let orders = keyed.len();
    let mut items = 0;
    for (uid, order) in keyed {
        items += order.items.len();
        cache.set(uid, order);
    }

    let report = WarmupReport {
        orders,
        items,
        elapsed: started.elapsed(),
    };
    info!(
        orders = report.orders,
        items = report.items,
        elapsed_ms = report.elapsed.as_millis(),
        "Cache warmed"
    );

    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use orderline_core::{Delivery, Item, Order, Payment};

    use super::*;
    use crate::db::InMemoryOrderRepository;

    fn order(uid: &str, items: i64) -> Order {
        Order {
            order_uid: uid.to_owned(),
            track_number: "TRACK".to_owned(),
            entry: "WBIL".to_owned(),
            delivery: Delivery::default(),
            payment: Payment::default(),
            items: (0..items)
                .map(|chrt_id| Item {
                    chrt_id,
                    ..Item::default()
                })
                .collect(),
            locale: "en".to_owned(),
            internal_signature: String::new(),
            customer_id: "customer".to_owned(),
            delivery_service: "meest".to_owned(),
            shardkey: "9".to_owned(),
            sm_id: 99,
            date_created: chrono::DateTime::default(),
            oof_shard: "1".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_warm_empty_store() {
        let repo = InMemoryOrderRepository::new();
        let cache = OrderCache::unbounded();

        let report = warm_cache(&repo, &cache).await.unwrap();
        assert_eq!(report.orders, 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_warm_loads_orders_with_items() {
        let repo = InMemoryOrderRepository::new();
        repo.insert(&order("A1", 2)).await.unwrap();
        repo.insert(&order("A2", 1)).await.unwrap();
        let cache = OrderCache::unbounded();

        let report = warm_cache(&repo, &cache).await.unwrap();
        assert_eq!(report.orders, 2);
        assert_eq!(report.items, 3);
        assert_eq!(*cache.get("A1").unwrap(), order("A1", 2));
        assert_eq!(*cache.get("A2").unwrap(), order("A2", 1));
    }

    #[tokio::test]
    async fn test_warm_excludes_orphans() {
        let repo = InMemoryOrderRepository::new();
        repo.insert(&order("A1", 0)).await.unwrap();
        repo.insert_orphan_header(&order("ORPHAN", 0));
        let cache = OrderCache::unbounded();

        warm_cache(&repo, &cache).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains("ORPHAN"));
    }

    #[tokio::test]
    async fn test_warm_fails_closed() {
        let repo = InMemoryOrderRepository::new();
        repo.insert(&order("A1", 0)).await.unwrap();
        repo.set_unavailable(true);
        let cache = OrderCache::unbounded();

        let err = warm_cache(&repo, &cache).await.unwrap_err();
        assert!(matches!(err, WarmupError::Repository(_)));
        assert!(cache.is_empty());
    }
}
