//! Orderline Core - Shared order types.
//!
//! This crate provides the order model used by every Orderline component:
//! - `service` - Ingestion loop, order store, cache, and lookup API
//! - `integration-tests` - End-to-end scenarios against the service library
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no message-stream clients. The JSON shape of [`Order`] is the wire format
//! for both inbound stream messages and lookup responses.
//!
//! # Modules
//!
//! - [`types`] - The order aggregate and its validated identifier

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
