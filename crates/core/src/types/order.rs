//! The order aggregate.
//!
//! The JSON shape of these types is the wire format: inbound stream messages
//! deserialize into [`Order`], and lookup responses serialize from it.
//!
//! Every field defaults to its zero value when absent, matching how upstream
//! producers omit empty fields. A missing `delivery` or `payment` becomes a
//! zero-valued record, so a stored order always has both children.
//! A missing `date_created` becomes the unix epoch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::order_uid::{OrderUid, OrderUidError};

/// An order with its delivery, payment, and line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier. Validated through [`Order::uid`].
    #[serde(default)]
    pub order_uid: String,
    #[serde(default)]
    pub track_number: String,
    /// Entry channel.
    #[serde(default)]
    pub entry: String,
    #[serde(default)]
    pub delivery: Delivery,
    #[serde(default)]
    pub payment: Payment,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub delivery_service: String,
    #[serde(default)]
    pub shardkey: String,
    #[serde(default)]
    pub sm_id: i32,
    #[serde(default)]
    pub date_created: DateTime<Utc>,
    /// Out-of-shard flag.
    #[serde(default)]
    pub oof_shard: String,
}

impl Order {
    /// Validate and return the order identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if `order_uid` is empty or too long.
    pub fn uid(&self) -> Result<OrderUid, OrderUidError> {
        OrderUid::parse(&self.order_uid)
    }
}

/// Delivery details, one per order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment details, one per order.
///
/// Monetary amounts are integers in the smallest currency unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    /// Payment time as unix seconds.
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

/// A line item of an order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    /// Sale percentage.
    pub sale: i32,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
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

    #[test]
    fn test_parse_full_order() {
        let order: Order = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(order.uid().unwrap().as_str(), "b563feb7b2b84b6test");
        assert_eq!(order.delivery.city, "Kiryat Mozkin");
        assert_eq!(order.payment.amount, 1817);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].brand, "Vivienne Sabo");
        assert_eq!(order.sm_id, 99);
        assert_eq!(order.date_created.to_rfc3339(), "2021-11-26T06:22:19+00:00");
    }

    #[test]
    fn test_missing_scalars_default() {
        let order: Order =
            serde_json::from_str(r#"{"order_uid":"A1","delivery":{},"payment":{}}"#).unwrap();
        assert!(order.items.is_empty());
        assert_eq!(order.delivery, Delivery::default());
        assert_eq!(order.payment, Payment::default());
        assert_eq!(order.sm_id, 0);
    }

    #[test]
    fn test_missing_uid_parses_but_fails_validation() {
        let order: Order = serde_json::from_str(r#"{"delivery":{},"payment":{}}"#).unwrap();
        assert_eq!(order.uid(), Err(OrderUidError::Empty));
    }

    #[test]
    fn test_missing_delivery_is_zero_valued() {
        let order: Order =
            serde_json::from_str(r#"{"order_uid":"A1","payment":{"amount":5}}"#).unwrap();
        assert_eq!(order.delivery, Delivery::default());
        assert_eq!(order.payment.amount, 5);
    }

    #[test]
    fn test_missing_payment_is_zero_valued() {
        let order: Order =
            serde_json::from_str(r#"{"order_uid":"A1","delivery":{"city":"Kazan"}}"#).unwrap();
        assert_eq!(order.payment, Payment::default());
        assert_eq!(order.delivery.city, "Kazan");
    }

    #[test]
    fn test_missing_date_created_is_epoch() {
        let order: Order =
            serde_json::from_str(r#"{"order_uid":"X1","track_number":"T"}"#).unwrap();
        assert_eq!(order.date_created, DateTime::<Utc>::UNIX_EPOCH);
        assert!(order.items.is_empty());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let order: Order = serde_json::from_str(
            r#"{"order_uid":"A1","delivery":{},"payment":{},"extra":{"nested":true}}"#,
        )
        .unwrap();
        assert_eq!(order.order_uid, "A1");
    }
}
