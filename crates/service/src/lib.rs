//! Orderline order service library.
//!
//! Ingests orders from a message stream, persists them transactionally in
//! `PostgreSQL`, and serves them over HTTP from an in-memory cache that is
//! warmed from the store at startup.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod lookup;
pub mod routes;
pub mod state;
pub mod store;
pub mod warmer;

/// Schema for the `orders` database, applied by operators before first start.
pub const SCHEMA: &str = include_str!("../schema/orders.sql");
