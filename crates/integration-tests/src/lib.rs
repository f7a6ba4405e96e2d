//! Integration tests for Orderline.
//!
//! # Running Tests
//!
//! ```bash
//! # In-memory tests (no services needed)
//! cargo test -p orderline-integration-tests
//!
//! # PostgreSQL tests (schema is applied by the tests)
//! TEST_DATABASE_URL=postgres://localhost/orders_test \
//!     cargo test -p orderline-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `order_store` - Atomic insert, write-then-cache, cache-aside lookups
//! - `ingestion` - Message handling, deduplication, dead letters, shutdown
//! - `warmup` - Startup cache population
//! - `http` - Lookup endpoint status mapping
//! - `postgres` - The same contracts against a real database

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use orderline_core::Order;
use orderline_service::cache::OrderCache;
use orderline_service::db::InMemoryOrderRepository;
use orderline_service::ingest::{
    ChannelSource, DeadLetter, DeadLetterError, DeadLetterReason, DeadLetterSink, IngestionLoop,
    Message, RetryPolicy, TransportError,
};
use orderline_service::lookup::LookupService;
use orderline_service::state::AppState;
use orderline_service::store::OrderStore;
use tokio::sync::mpsc;

/// The reference order, as producers publish it.
pub const SAMPLE_ORDER: &str = r#"{
    "order_uid": "b563feb7b2b84b6test",
    "track_number": "WBILMTESTTRACK",
    "entry": "WBIL",
    "delivery": {
        "name": "Test Testov",
        "phone": "+9720000000",
        "zip": "2639809",
        "city": "Kiryat Mozkin",
        "address": "Ploshad Mira 15",
        "region": "Kraiot",
        "email": "test@gmail.com"
    },
    "payment": {
        "transaction": "b563feb7b2b84b6test",
        "request_id": "",
        "currency": "USD",
        "provider": "wbpay",
        "amount": 1817,
        "payment_dt": 1637907727,
        "bank": "alpha",
        "delivery_cost": 1500,
        "goods_total": 317,
        "custom_fee": 0
    },
    "items": [
        {
            "chrt_id": 9934930,
            "track_number": "WBILMTESTTRACK",
            "price": 453,
            "rid": "ab4219087a764ae0btest",
            "name": "Mascaras",
            "sale": 30,
            "size": "0",
            "total_price": 317,
            "nm_id": 2389212,
            "brand": "Vivienne Sabo",
            "status": 202
        }
    ],
    "locale": "en",
    "internal_signature": "",
    "customer_id": "test",
    "delivery_service": "meest",
    "shardkey": "9",
    "sm_id": 99,
    "date_created": "2021-11-26T06:22:19Z",
    "oof_shard": "1"
}"#;

/// The reference order under a different identifier.
#[must_use]
pub fn sample_order(uid: &str) -> Order {
    let mut order: Order = serde_json::from_str(SAMPLE_ORDER).unwrap();
    order.order_uid = uid.to_string();
    order
}

/// The reference order with `items` line items numbered from 1.
#[must_use]
pub fn sample_order_with_items(uid: &str, items: usize) -> Order {
    let mut order = sample_order(uid);
    let template = order.items.first().cloned().unwrap();
    order.items = (1..=items)
        .map(|n| {
            let mut item = template.clone();
            item.chrt_id = i64::try_from(n).unwrap();
            item
        })
        .collect();
    order
}

/// An inbound message carrying `order` as compact JSON.
#[must_use]
pub fn message_for(order: &Order) -> Message {
    Message::new(serde_json::to_vec(order).unwrap())
}

/// A unique identifier for tests sharing a database.
#[must_use]
pub fn unique_uid(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// Dead-letter sink that keeps every letter in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl CollectingSink {
    #[must_use]
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().unwrap().clone()
    }

    #[must_use]
    pub fn reasons(&self) -> Vec<DeadLetterReason> {
        self.letters().iter().map(|l| l.reason).collect()
    }
}

#[async_trait]
impl DeadLetterSink for CollectingSink {
    async fn publish(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        self.letters.lock().unwrap().push(letter);
        Ok(())
    }
}

/// Sender feeding a [`ChannelSource`].
pub type MessageSender = mpsc::Sender<Result<Message, TransportError>>;

/// One service instance over an in-memory repository.
pub struct Harness {
    pub repo: Arc<InMemoryOrderRepository>,
    pub cache: Arc<OrderCache>,
    pub store: OrderStore,
    pub sink: Arc<CollectingSink>,
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        Self::over(Arc::new(InMemoryOrderRepository::new()))
    }

    /// A fresh instance with a cold cache over the same repository, as after
    /// a process restart.
    #[must_use]
    pub fn restart(&self) -> Self {
        Self::over(Arc::clone(&self.repo))
    }

    fn over(repo: Arc<InMemoryOrderRepository>) -> Self {
        let cache = Arc::new(OrderCache::unbounded());
        let store = OrderStore::new(repo.clone(), Arc::clone(&cache));
        Self {
            repo,
            cache,
            store,
            sink: Arc::new(CollectingSink::default()),
        }
    }

    /// An ingestion loop over a fresh channel, dead-lettering into `self.sink`.
    #[must_use]
    pub fn ingestion(&self, policy: RetryPolicy) -> (MessageSender, IngestionLoop<ChannelSource>) {
        let (tx, source) = ChannelSource::new(64);
        let sink: Arc<dyn DeadLetterSink> = self.sink.clone();
        (
            tx,
            IngestionLoop::new(source, self.store.clone(), policy, sink),
        )
    }

    #[must_use]
    pub fn lookup(&self) -> LookupService {
        LookupService::new(self.store.clone())
    }

    /// The HTTP router over this instance.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        orderline_service::routes::router(AppState::new(self.lookup()))
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
