//! 事件驱动的通知分发服务
//!
//! 消费 `orders`、`users`、`inventory` 三个 topic 的领域事件，
//! 转换为邮件、短信或推送通知，带退避重试地投递并持久化投递状态。
//!
//! ## 模块结构
//!
//! - `events`: 领域事件定义与解码
//! - `router`: 事件到通知的路由
//! - `channels`: 各渠道发送器
//! - `templates`: 邮件模板注册表
//! - `coordinator`: 单条通知的重试状态机
//! - `dispatcher`: 路由、持久化与投递的组合入口
//! - `consumer`: Kafka 消费与毒消息处理
//! - `store`: 通知存储
//! - `api`: 同步发送 HTTP 接口

pub mod api;
pub mod channels;
pub mod consumer;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod models;
pub mod router;
pub mod store;
pub mod templates;

pub use channels::{ChannelSender, ChannelSenders, SendError};
pub use consumer::{Disposition, QueueConsumer, disposition_for};
pub use coordinator::{MAX_RETRIES, RetryCoordinator};
pub use dispatcher::NotificationDispatcher;
pub use error::{NotificationError, Result};
pub use models::{Channel, Notification, NotificationStatus};
pub use router::{EventRouter, RouteDecision};
pub use store::{MemoryNotificationStore, NotificationStore, PgNotificationStore};
pub use templates::TemplateRegistry;

/// 服务名，用于配置文件、消费组和死信来源标记
pub const SERVICE_NAME: &str = "notification-service";
