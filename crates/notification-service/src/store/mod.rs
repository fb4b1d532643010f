//! 通知存储
//!
//! 定义存储接口，协调器与 API 依赖抽象而非具体实现，便于 mock 测试。
//! 实现必须支持多个消费任务并发写入。

mod memory;
mod postgres;

pub use memory::MemoryNotificationStore;
pub use postgres::{MIGRATOR, PgNotificationStore};

use async_trait::async_trait;
use dispatch_shared::error::Result;
use uuid::Uuid;

use crate::models::{Notification, NotificationStatus, NotificationSummary, PageRequest};

/// 通知存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<()>;

    /// 状态迁移，时间戳规则见 `Notification::apply_status`
    async fn update_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
        error_msg: Option<String>,
    ) -> Result<()>;

    async fn increment_retry_count(&self, id: Uuid) -> Result<()>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Notification>>;

    /// 按 created_at 倒序分页
    async fn get_by_user(&self, user_id: &str, page: PageRequest)
    -> Result<Vec<NotificationSummary>>;
}
