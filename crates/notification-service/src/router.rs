//! 事件路由
//!
//! 把原始消息解码为领域事件，再按 `event_type` 构造零或一条待投递通知。
//! 纯函数，不做任何 I/O；未识别的事件类型是 no-op 而不是错误，
//! 以便上游新增事件类型时无需同步升级本服务。

use tracing::debug;

use crate::error::NotificationError;
use crate::events::{DomainEvent, InventoryEvent, OrderEvent, Topic, UserEvent};
use crate::models::{Channel, MetadataValue, Notification};

/// 路由结果
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// 需要投递的通知（status = pending）
    Notify(Notification),
    /// 未识别的事件类型，直接确认
    NoOp { event_type: String },
}

/// 事件路由器
#[derive(Debug, Clone)]
pub struct EventRouter {
    /// 库存告警等运营通知的固定收件人
    ops_recipient: String,
}

impl EventRouter {
    pub fn new(ops_recipient: impl Into<String>) -> Self {
        Self {
            ops_recipient: ops_recipient.into(),
        }
    }

    /// 解码并路由一条消息
    pub fn route(&self, topic: &str, payload: &[u8]) -> Result<RouteDecision, NotificationError> {
        let parsed: Topic = topic.parse().map_err(NotificationError::UnknownTopic)?;
        let event = DomainEvent::decode(parsed, payload).map_err(|source| {
            NotificationError::Decode {
                topic: topic.to_string(),
                source,
            }
        })?;
        Ok(self.route_event(event))
    }

    /// 路由已解码的事件
    pub fn route_event(&self, event: DomainEvent) -> RouteDecision {
        let notification = match &event {
            DomainEvent::Order(e) => route_order(e),
            DomainEvent::User(e) => route_user(e),
            DomainEvent::Inventory(e) => self.route_inventory(e),
        };

        match notification {
            Some(n) => RouteDecision::Notify(n),
            None => {
                debug!(event_type = event.event_type(), "未识别的事件类型，忽略");
                RouteDecision::NoOp {
                    event_type: event.event_type().to_string(),
                }
            }
        }
    }

    fn route_inventory(&self, event: &InventoryEvent) -> Option<Notification> {
        if event.event_type != "low_stock" {
            return None;
        }

        let content = format!(
            "Product {} ({}) is low on stock: {} left, threshold {}.",
            event.product_name, event.product_id, event.quantity, event.threshold
        );
        Some(
            Notification::new(Channel::Email, self.ops_recipient.clone(), content)
                .with_subject(format!("Low Stock Alert: {}", event.product_name))
                .with_template("low_stock_alert")
                .with_metadata("product_id", event.product_id.as_str())
                .with_metadata("product_name", event.product_name.as_str())
                .with_metadata("quantity", event.quantity)
                .with_metadata("threshold", event.threshold),
        )
    }
}

fn route_order(event: &OrderEvent) -> Option<Notification> {
    let order_id = event.order_id.as_str();
    let (subject, template, content) = match event.event_type.as_str() {
        "order_created" => (
            format!("Order Confirmation #{order_id}"),
            "order_confirmation",
            format!(
                "Thank you for your order #{order_id}. Items: {}. Total: ${:.2}.",
                event.items_summary(),
                event.total
            ),
        ),
        "order_shipped" => (
            format!("Your Order #{order_id} has Shipped!"),
            "order_shipped",
            format!(
                "Your order #{order_id} is on its way. Items: {}.",
                event.items_summary()
            ),
        ),
        "order_delivered" => (
            format!("Order #{order_id} Delivered"),
            "order_delivered",
            format!("Your order #{order_id} has been delivered."),
        ),
        "order_cancelled" => (
            format!("Order #{order_id} Cancelled"),
            "order_cancelled",
            format!("Your order #{order_id} has been cancelled."),
        ),
        _ => return None,
    };

    let mut notification = Notification::new(Channel::Email, event.email.clone(), content)
        .with_user(event.user_id.clone())
        .with_subject(subject)
        .with_template(template)
        .with_metadata("order_id", order_id);

    // 确认与发货邮件附带商品明细，展开为文本摘要
    if matches!(template, "order_confirmation" | "order_shipped") {
        notification = notification
            .with_metadata("items", event.items_summary())
            .with_metadata("item_count", event.items.len() as i64);
    }
    if template == "order_confirmation" {
        notification = notification.with_metadata("total", event.total);
    }
    Some(notification)
}

fn route_user(event: &UserEvent) -> Option<Notification> {
    let notification = match event.event_type.as_str() {
        "user_registered" => Notification::new(
            Channel::Email,
            event.email.clone(),
            format!("Welcome to our store, {}!", event.name),
        )
        .with_subject("Welcome to Our Store!")
        .with_template("welcome")
        .with_metadata("name", event.name.as_str()),
        "password_reset_requested" => {
            // 缺少 reset_link 不阻断投递，按空字符串透传
            let reset_link = event
                .metadata
                .get("reset_link")
                .map(MetadataValue::from_json)
                .unwrap_or_else(|| MetadataValue::Text(String::new()));
            Notification::new(
                Channel::Email,
                event.email.clone(),
                format!("Reset your password using this link: {reset_link}"),
            )
            .with_subject("Password Reset Request")
            .with_template("password_reset")
            .with_metadata("reset_link", reset_link)
        }
        _ => return None,
    };

    Some(notification.with_user(event.user_id.clone()))
}
