//! 内存存储
//!
//! 基于 DashMap 的 `NotificationStore` 实现，用于测试和本地嵌入，进程退出即丢失。

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dispatch_shared::error::{DispatchError, Result};
use uuid::Uuid;

use super::NotificationStore;
use crate::models::{Notification, NotificationStatus, NotificationSummary, PageRequest};

#[derive(Debug, Default)]
pub struct MemoryNotificationStore {
    notifications: DashMap<Uuid, Notification>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    /// 当前保存的全部通知（无序）
    pub fn all(&self) -> Vec<Notification> {
        self.notifications
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn not_found(id: Uuid) -> DispatchError {
    DispatchError::NotFound {
        entity: "Notification".to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, notification: &Notification) -> Result<()> {
        match self.notifications.entry(notification.id) {
            Entry::Occupied(_) => Err(DispatchError::Validation(format!(
                "通知已存在: {}",
                notification.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(notification.clone());
                Ok(())
            }
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
        error_msg: Option<String>,
    ) -> Result<()> {
        let mut entry = self.notifications.get_mut(&id).ok_or_else(|| not_found(id))?;
        entry.apply_status(status, error_msg.as_deref(), Utc::now());
        Ok(())
    }

    async fn increment_retry_count(&self, id: Uuid) -> Result<()> {
        let mut entry = self.notifications.get_mut(&id).ok_or_else(|| not_found(id))?;
        entry.retry_count += 1;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.notifications.get(&id).map(|entry| entry.value().clone()))
    }

    async fn get_by_user(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Vec<NotificationSummary>> {
        let mut rows: Vec<NotificationSummary> = self
            .notifications
            .iter()
            .filter(|entry| entry.user_id.as_deref() == Some(user_id))
            .map(|entry| NotificationSummary::from(entry.value()))
            .collect();

        // UUID v7 按时间递增，作为同一时刻创建时的次级排序
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(rows
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }
}
