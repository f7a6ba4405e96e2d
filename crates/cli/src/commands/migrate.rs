//! Schema setup for the `orders` database.
//!
//! # Usage
//!
//! ```bash
//! orderline-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `ORDERS_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! Every statement is `CREATE ... IF NOT EXISTS`, so running it twice is safe.

use sqlx::PgPool;
use thiserror::Error;

/// Errors that can occur while applying the schema.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Apply the orders schema.
///
/// # Errors
///
/// Returns an error if no database URL is set or the schema fails to apply.
pub async fn run() -> Result<(), MigrationError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("ORDERS_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| MigrationError::MissingEnvVar("ORDERS_DATABASE_URL"))?;

    tracing::info!("Connecting to orders database...");
    let pool = PgPool::connect(&database_url).await?;

    tracing::info!("Applying orders schema...");
    sqlx::raw_sql(orderline_service::SCHEMA)
        .execute(&pool)
        .await?;

    tracing::info!("Orders schema is up to date");
    Ok(())
}
