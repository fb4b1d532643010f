//! 领域事件定义
//!
//! 上游服务发布到 `orders` / `users` / `inventory` 三个 topic 的 JSON 事件。
//! 除 `event_type` 外的字段缺失或为 `null` 时取默认值，以兼容字段不全的生产者；
//! 类型不匹配或 JSON 非法则视为解码失败。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use dispatch_shared::kafka::topics;
use serde::{Deserialize, Deserializer};

/// 消费的 topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Orders,
    Users,
    Inventory,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Orders, Topic::Users, Topic::Inventory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orders => topics::ORDERS,
            Self::Users => topics::USERS,
            Self::Inventory => topics::INVENTORY,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

// ---------------------------------------------------------------------------
// 事件结构
// ---------------------------------------------------------------------------

/// 显式的 `null` 与字段缺失同样取默认值
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderItem {
    #[serde(default, deserialize_with = "null_as_default")]
    pub product_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub product_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub quantity: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderEvent {
    pub event_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub order_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<OrderItem>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl OrderEvent {
    /// 商品摘要，如 "Widget x2, Gadget x1"
    pub fn items_summary(&self) -> String {
        self.items
            .iter()
            .map(|item| format!("{} x{}", item.product_name, item.quantity))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserEvent {
    pub event_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// 事件附加信息，如密码重置链接 `reset_link`
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InventoryEvent {
    pub event_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub product_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub product_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub quantity: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub threshold: i64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// 按 topic 解码后的领域事件
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    Order(OrderEvent),
    User(UserEvent),
    Inventory(InventoryEvent),
}

impl DomainEvent {
    /// 按 topic 对应的事件结构解码
    pub fn decode(topic: Topic, payload: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match topic {
            Topic::Orders => Self::Order(serde_json::from_slice(payload)?),
            Topic::Users => Self::User(serde_json::from_slice(payload)?),
            Topic::Inventory => Self::Inventory(serde_json::from_slice(payload)?),
        })
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::Order(e) => &e.event_type,
            Self::User(e) => &e.event_type,
            Self::Inventory(e) => &e.event_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_from_str() {
        assert_eq!("orders".parse::<Topic>().unwrap(), Topic::Orders);
        assert_eq!("inventory".parse::<Topic>().unwrap(), Topic::Inventory);
        assert_eq!("payments".parse::<Topic>().unwrap_err(), "payments");
    }

    #[test]
    fn test_decode_order_event() {
        let payload = br#"{
            "event_type": "order_created",
            "order_id": "O-1",
            "user_id": "U-1",
            "email": "buyer@example.com",
            "items": [
                {"product_id": "P1", "product_name": "Widget", "quantity": 2, "price": 9.99},
                {"product_id": "P2", "product_name": "Gadget", "quantity": 1, "price": 20.0}
            ],
            "total": 39.98,
            "status": "created",
            "timestamp": "2026-05-01T10:00:00Z"
        }"#;

        let DomainEvent::Order(event) = DomainEvent::decode(Topic::Orders, payload).unwrap() else {
            panic!("应解码为订单事件");
        };
        assert_eq!(event.order_id, "O-1");
        assert_eq!(event.items.len(), 2);
        assert_eq!(event.items_summary(), "Widget x2, Gadget x1");
        assert!(event.timestamp.is_some());
    }

    #[test]
    fn test_decode_only_event_type_required() {
        let event = DomainEvent::decode(Topic::Users, br#"{"event_type":"user_registered"}"#)
            .unwrap();
        assert_eq!(event.event_type(), "user_registered");

        // 缺少 event_type 属于解码失败
        assert!(DomainEvent::decode(Topic::Users, br#"{"user_id":"U-1"}"#).is_err());
    }

    #[test]
    fn test_decode_null_fields_as_default() {
        let payload = br#"{"event_type":"order_created","order_id":null,"items":null,"total":null,"phone":null}"#;
        let DomainEvent::Order(event) = DomainEvent::decode(Topic::Orders, payload).unwrap() else {
            panic!("应解码为订单事件");
        };
        assert_eq!(event.order_id, "");
        assert!(event.items.is_empty());
        assert_eq!(event.total, 0.0);
        assert!(event.phone.is_none());

        let payload = br#"{"event_type":"user_registered","name":null,"metadata":null}"#;
        let DomainEvent::User(event) = DomainEvent::decode(Topic::Users, payload).unwrap() else {
            panic!("应解码为用户事件");
        };
        assert_eq!(event.name, "");
        assert!(event.metadata.is_empty());

        let payload = br#"{"event_type":"order_created","items":[{"product_name":null,"quantity":null}]}"#;
        let DomainEvent::Order(event) = DomainEvent::decode(Topic::Orders, payload).unwrap() else {
            panic!("应解码为订单事件");
        };
        assert_eq!(event.items[0].quantity, 0);

        // event_type 仍是必填
        assert!(DomainEvent::decode(Topic::Users, br#"{"event_type":null}"#).is_err());
    }

    #[test]
    fn test_decode_type_mismatch_is_error() {
        let payload = br#"{"event_type":"low_stock","quantity":"many"}"#;
        assert!(DomainEvent::decode(Topic::Inventory, payload).is_err());
        assert!(DomainEvent::decode(Topic::Orders, b"not json").is_err());
    }
}
