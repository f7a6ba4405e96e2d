//! `PostgreSQL` order repository.
//!
//! Queries are checked at runtime (`sqlx::query`/`query_as`) and map rows
//! through `FromRow` structs. Identifiers decode as [`OrderUid`], so a
//! stored row with an invalid identifier fails the read.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderline_core::{Delivery, Item, Order, OrderUid, Payment};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;

use super::{OrderRepository, RepositoryError};

const SELECT_ORDERS: &str = r"
    SELECT
        o.order_uid, o.track_number, o.entry, o.locale, o.internal_signature,
        o.customer_id, o.delivery_service, o.shardkey, o.sm_id, o.date_created, o.oof_shard,
        d.name, d.phone, d.zip, d.city, d.address, d.region, d.email,
        p.transaction, p.request_id, p.currency, p.provider, p.amount,
        p.payment_dt, p.bank, p.delivery_cost, p.goods_total, p.custom_fee
    FROM orders o
    JOIN delivery d ON o.order_uid = d.order_uid
    JOIN payment p ON o.order_uid = p.order_uid
";

const SELECT_ITEMS: &str = r"
    SELECT order_uid, chrt_id, track_number, price, rid, name, sale, size,
           total_price, nm_id, brand, status
    FROM items
";

/// Joined header, delivery, and payment row.
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    order_uid: OrderUid,
    track_number: String,
    entry: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i32,
    date_created: DateTime<Utc>,
    oof_shard: String,
    name: String,
    phone: String,
    zip: String,
    city: String,
    address: String,
    region: String,
    email: String,
    transaction: String,
    request_id: String,
    currency: String,
    provider: String,
    amount: i64,
    payment_dt: i64,
    bank: String,
    delivery_cost: i64,
    goods_total: i64,
    custom_fee: i64,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            order_uid: row.order_uid.into_inner(),
            track_number: row.track_number,
            entry: row.entry,
            delivery: Delivery {
                name: row.name,
                phone: row.phone,
                zip: row.zip,
                city: row.city,
                address: row.address,
                region: row.region,
                email: row.email,
            },
            payment: Payment {
                transaction: row.transaction,
                request_id: row.request_id,
                currency: row.currency,
                provider: row.provider,
                amount: row.amount,
                payment_dt: row.payment_dt,
                bank: row.bank,
                delivery_cost: row.delivery_cost,
                goods_total: row.goods_total,
                custom_fee: row.custom_fee,
            },
            items: Vec::new(),
            locale: row.locale,
            internal_signature: row.internal_signature,
            customer_id: row.customer_id,
            delivery_service: row.delivery_service,
            shardkey: row.shardkey,
            sm_id: row.sm_id,
            date_created: row.date_created,
            oof_shard: row.oof_shard,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    order_uid: OrderUid,
    chrt_id: i64,
    track_number: String,
    price: i64,
    rid: String,
    name: String,
    sale: i32,
    size: String,
    total_price: i64,
    nm_id: i64,
    brand: String,
    status: i32,
}

impl ItemRow {
    fn into_parts(self) -> (OrderUid, Item) {
        let item = Item {
            chrt_id: self.chrt_id,
            track_number: self.track_number,
            price: self.price,
            rid: self.rid,
            name: self.name,
            sale: self.sale,
            size: self.size,
            total_price: self.total_price,
            nm_id: self.nm_id,
            brand: self.brand,
            status: self.status,
        };
        (self.order_uid, item)
    }
}

/// Order repository backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    #[instrument(skip(self, order), fields(order_uid = %order.order_uid, items = order.items.len()))]
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        // Dropping an uncommitted transaction rolls it back.
        let mut tx = self.pool.begin().await?;

        insert_header(&mut tx, order).await?;
        insert_delivery(&mut tx, order).await?;
        insert_payment(&mut tx, order).await?;
        for item in &order.items {
            insert_item(&mut tx, &order.order_uid, item).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    #[instrument(skip(self), fields(order_uid = %uid))]
    async fn find_by_uid(&self, uid: &OrderUid) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("{SELECT_ORDERS} WHERE o.order_uid = $1"))
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, ItemRow>(&format!(
            "{SELECT_ITEMS} WHERE order_uid = $1 ORDER BY id"
        ))
        .bind(uid)
        .fetch_all(&self.pool)
        .await?;

        let mut order = Order::from(row);
        order.items = items.into_iter().map(|r| r.into_parts().1).collect();

        Ok(Some(order))
    }

    #[instrument(skip(self))]
    async fn load_all(&self) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(SELECT_ORDERS)
            .fetch_all(&self.pool)
            .await?;

        let mut orders: HashMap<OrderUid, Order> = rows
            .into_iter()
            .map(|row| (row.order_uid.clone(), Order::from(row)))
            .collect();

        let items = sqlx::query_as::<_, ItemRow>(&format!("{SELECT_ITEMS} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        for row in items {
            let (order_uid, item) = row.into_parts();
            if let Some(order) = orders.get_mut(&order_uid) {
                order.items.push(item);
            }
        }

        Ok(orders.into_values().collect())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

async fn insert_header(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        INSERT INTO orders (
            order_uid, track_number, entry, locale, internal_signature, customer_id,
            delivery_service, shardkey, sm_id, date_created, oof_shard
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ",
    )
    .bind(&order.order_uid)
    .bind(&order.track_number)
    .bind(&order.entry)
    .bind(&order.locale)
    .bind(&order.internal_signature)
    .bind(&order.customer_id)
    .bind(&order.delivery_service)
    .bind(&order.shardkey)
    .bind(order.sm_id)
    .bind(order.date_created)
    .bind(&order.oof_shard)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return RepositoryError::Conflict(format!(
                "order {} already exists",
                order.order_uid
            ));
        }
        RepositoryError::Database(e)
    })?;

    Ok(())
}

async fn insert_delivery(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
) -> Result<(), RepositoryError> {
    let delivery = &order.delivery;
    sqlx::query(
        r"
        INSERT INTO delivery (order_uid, name, phone, zip, city, address, region, email)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ",
    )
    .bind(&order.order_uid)
    .bind(&delivery.name)
    .bind(&delivery.phone)
    .bind(&delivery.zip)
    .bind(&delivery.city)
    .bind(&delivery.address)
    .bind(&delivery.region)
    .bind(&delivery.email)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_payment(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
) -> Result<(), RepositoryError> {
    let payment = &order.payment;
    sqlx::query(
        r"
        INSERT INTO payment (
            order_uid, transaction, request_id, currency, provider, amount,
            payment_dt, bank, delivery_cost, goods_total, custom_fee
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ",
    )
    .bind(&order.order_uid)
    .bind(&payment.transaction)
    .bind(&payment.request_id)
    .bind(&payment.currency)
    .bind(&payment.provider)
    .bind(payment.amount)
    .bind(payment.payment_dt)
    .bind(&payment.bank)
    .bind(payment.delivery_cost)
    .bind(payment.goods_total)
    .bind(payment.custom_fee)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_item(
    tx: &mut Transaction<'_, Postgres>,
    order_uid: &str,
    item: &Item,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        INSERT INTO items (
            order_uid, chrt_id, track_number, price, rid, name, sale, size,
            total_price, nm_id, brand, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ",
    )
    .bind(order_uid)
    .bind(item.chrt_id)
    .bind(&item.track_number)
    .bind(item.price)
    .bind(&item.rid)
    .bind(&item.name)
    .bind(item.sale)
    .bind(&item.size)
    .bind(item.total_price)
    .bind(item.nm_id)
    .bind(&item.brand)
    .bind(item.status)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
