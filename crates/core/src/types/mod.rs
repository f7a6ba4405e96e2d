//! Core types for Orderline.
//!
//! An [`Order`] owns exactly one [`Delivery`], exactly one [`Payment`], and
//! zero or more [`Item`]s. The [`OrderUid`] is the sole identity of an order.

pub mod order;
pub mod order_uid;

pub use order::{Delivery, Item, Order, Payment};
pub use order_uid::{OrderUid, OrderUidError};
