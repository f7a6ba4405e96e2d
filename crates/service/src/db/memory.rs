//! In-memory order repository.
//!
//! Keeps the same four-table shape as the `PostgreSQL` schema inside one
//! mutex. An insert stages every row and applies them together at commit, so
//! a failure at any step leaves the tables untouched.
//!
//! Faults can be injected to exercise atomicity and outage handling without
//! a database.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use orderline_core::{Delivery, Item, Order, OrderUid, Payment};

use super::{OrderRepository, RepositoryError};

/// Step of an insert transaction at which an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Inserting the order header.
    Header,
    /// Inserting the delivery row.
    Delivery,
    /// Inserting the payment row.
    Payment,
    /// Inserting the item at this index.
    Item(usize),
    /// Committing the transaction.
    Commit,
}

#[derive(Debug, Default)]
struct Tables {
    /// Header rows: orders with default children and no items.
    orders: HashMap<String, Order>,
    delivery: HashMap<String, Delivery>,
    payment: HashMap<String, Payment>,
    /// Item rows in insertion order.
    items: Vec<(String, Item)>,
}

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    fail_next_insert: Option<FailurePoint>,
    unavailable: bool,
}

/// Order repository held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    state: Mutex<State>,
}

impl InMemoryOrderRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next insert fail at `point`. The failure fires once.
    pub fn fail_next_insert(&self, point: FailurePoint) {
        self.lock().fail_next_insert = Some(point);
    }

    /// Make every call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Write a header row with no delivery or payment, as left behind by a
    /// non-transactional writer.
    pub fn insert_orphan_header(&self, order: &Order) {
        self.lock()
            .tables
            .orders
            .insert(order.order_uid.clone(), header_of(order));
    }

    /// Number of header rows.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.lock().tables.orders.len()
    }

    /// Row counts for one order: header, delivery, payment, items.
    #[must_use]
    pub fn row_counts(&self, uid: &str) -> (usize, usize, usize, usize) {
        let state = self.lock();
        let tables = &state.tables;
        (
            usize::from(tables.orders.contains_key(uid)),
            usize::from(tables.delivery.contains_key(uid)),
            usize::from(tables.payment.contains_key(uid)),
            tables.items.iter().filter(|(owner, _)| owner == uid).count(),
        )
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn header_of(order: &Order) -> Order {
    Order {
        delivery: Delivery::default(),
        payment: Payment::default(),
        items: Vec::new(),
        ..order.clone()
    }
}

fn injected(point: FailurePoint) -> RepositoryError {
    RepositoryError::Unavailable(format!("injected failure at {point:?}"))
}

fn unavailable() -> RepositoryError {
    RepositoryError::Unavailable("in-memory store marked unavailable".to_owned())
}

/// Assemble a complete order, inner-joining header, delivery, and payment.
fn assemble(tables: &Tables, uid: &str) -> Option<Order> {
    let header = tables.orders.get(uid)?;
    let delivery = tables.delivery.get(uid)?;
    let payment = tables.payment.get(uid)?;

    Some(Order {
        delivery: delivery.clone(),
        payment: payment.clone(),
        items: tables
            .items
            .iter()
            .filter(|(owner, _)| owner == uid)
            .map(|(_, item)| item.clone())
            .collect(),
        ..header.clone()
    })
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(unavailable());
        }

        let fail_at = state.fail_next_insert.take();
        let check = |point: FailurePoint| match fail_at {
            Some(p) if p == point => Err(injected(point)),
            _ => Ok(()),
        };

        let uid = order.order_uid.clone();

        check(FailurePoint::Header)?;
        if state.tables.orders.contains_key(&uid) {
            return Err(RepositoryError::Conflict(format!(
                "order {uid} already exists"
            )));
        }
        check(FailurePoint::Delivery)?;
        check(FailurePoint::Payment)?;
        let mut staged_items = Vec::with_capacity(order.items.len());
        for (index, item) in order.items.iter().enumerate() {
            check(FailurePoint::Item(index))?;
            staged_items.push((uid.clone(), item.clone()));
        }
        check(FailurePoint::Commit)?;

        let tables = &mut state.tables;
        tables.orders.insert(uid.clone(), header_of(order));
        tables.delivery.insert(uid.clone(), order.delivery.clone());
        tables.payment.insert(uid, order.payment.clone());
        tables.items.extend(staged_items);

        Ok(())
    }

    async fn find_by_uid(&self, uid: &OrderUid) -> Result<Option<Order>, RepositoryError> {
        let state = self.lock();
        if state.unavailable {
            return Err(unavailable());
        }
        Ok(assemble(&state.tables, uid.as_str()))
    }

    async fn load_all(&self) -> Result<Vec<Order>, RepositoryError> {
        let state = self.lock();
        if state.unavailable {
            return Err(unavailable());
        }
        Ok(state
            .tables
            .orders
            .keys()
            .filter_map(|uid| assemble(&state.tables, uid))
            .collect())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        if self.lock().unavailable {
            return Err(unavailable());
        }
        Ok(())
    }
}
