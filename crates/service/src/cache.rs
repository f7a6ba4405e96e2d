//! In-memory order cache.
//!
//! Maps [`OrderUid`] to the full [`Order`] behind a single reader/writer lock:
//! any number of readers proceed together, and a writer holds the lock only
//! for one map mutation.
//!
//! The cache is an accelerator. It only ever receives orders the store has
//! already committed, so it may lag behind the store but never runs ahead of
//! it. There is no TTL and no invalidation path.
//!
//! # Capacity
//!
//! [`OrderCache::unbounded`] keeps every entry for the lifetime of the
//! process, which assumes the working set fits in memory.
//! [`OrderCache::bounded`] caps the entry count and evicts the oldest
//! inserted entry first.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use orderline_core::{Order, OrderUid};

/// Concurrent order cache keyed by order identifier.
#[derive(Debug, Default)]
pub struct OrderCache {
    inner: RwLock<CacheInner>,
    capacity: Option<NonZeroUsize>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<OrderUid, Arc<Order>>,
    /// Insertion order of keys, tracked only when the cache is bounded.
    insertion_order: VecDeque<OrderUid>,
}

impl OrderCache {
    /// Create a cache with no size limit.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Create a cache holding at most `capacity` entries.
    #[must_use]
    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            inner: RwLock::default(),
            capacity: Some(capacity),
        }
    }

    /// Create a cache from an optional capacity.
    #[must_use]
    pub fn with_capacity(capacity: Option<NonZeroUsize>) -> Self {
        capacity.map_or_else(Self::unbounded, Self::bounded)
    }

    /// The configured capacity, `None` when unbounded.
    #[must_use]
    pub const fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity
    }

    /// Insert or overwrite the entry for `uid`.
    pub fn set(&self, uid: OrderUid, order: impl Into<Arc<Order>>) {
        let order = order.into();
        let mut inner = self.write();

        let Some(capacity) = self.capacity else {
            inner.entries.insert(uid, order);
            return;
        };

        if let Some(existing) = inner.entries.get_mut(&uid) {
            *existing = order;
            return;
        }

        while inner.entries.len() >= capacity.get() {
            let Some(oldest) = inner.insertion_order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }

        inner.insertion_order.push_back(uid.clone());
        inner.entries.insert(uid, order);
    }

    /// Get the cached order for `uid`.
    #[must_use]
    pub fn get(&self, uid: &str) -> Option<Arc<Order>> {
        self.read().entries.get(uid).cloned()
    }

    /// Whether an entry for `uid` is present.
    #[must_use]
    pub fn contains(&self, uid: &str) -> bool {
        self.read().entries.contains_key(uid)
    }

    /// A point-in-time copy of every entry.
    #[must_use]
    pub fn get_all(&self) -> HashMap<OrderUid, Arc<Order>> {
        self.read().entries.clone()
    }

    /// Number of cached orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    // A panic while holding the lock cannot leave the map half-mutated:
    // every write is a single insert or remove.
    fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
