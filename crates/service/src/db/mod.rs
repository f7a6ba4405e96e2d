//! Order persistence.
//!
//! # Database: `orders`
//!
//! Four tables keyed by `order_uid`:
//!
//! - `orders` - Order header (`order_uid` is the primary key)
//! - `delivery` - Delivery details (1:1)
//! - `payment` - Payment details (1:1)
//! - `items` - Line items (1:N)
//!
//! The schema lives in `crates/service/schema/orders.sql`. Applying it is an
//! operator task; the service never migrates on startup.
//!
//! Every repository call is one transaction or one round-trip. No
//! transaction is shared across calls.

pub mod memory;
pub mod orders;

use std::time::Duration;

use async_trait::async_trait;
use orderline_core::{Order, OrderUid};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use memory::{FailurePoint, InMemoryOrderRepository};
pub use orders::PgOrderRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Constraint violation (e.g., duplicate order identifier).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Transactional persistence of orders and their owned records.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert the order header, delivery, payment, and every item in one
    /// transaction. Either all rows become visible or none do.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the identifier already exists.
    /// Returns other variants for any other persistence failure.
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Read one order with its delivery, payment, and items.
    ///
    /// Returns `None` when the header (or either one-to-one child) is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the read itself fails.
    async fn find_by_uid(&self, uid: &OrderUid) -> Result<Option<Order>, RepositoryError>;

    /// Read every complete order in the store.
    ///
    /// Orders missing their delivery or payment row are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if either bulk read fails.
    async fn load_all(&self) -> Result<Vec<Order>, RepositoryError>;

    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the store does not answer.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
