//! 请求与响应 DTO

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    Channel, MetadataValue, Notification, NotificationStatus, NotificationSummary,
};

/// API 统一响应
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }
}

/// 同步发送请求
///
/// 字段缺失按空值处理，由校验统一返回 400。
#[derive(Debug, Default, Deserialize, Validate)]
pub struct SendNotificationRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(rename = "type", default)]
    #[validate(length(min = 1, message = "通知类型不能为空"))]
    pub channel_type: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "收件人不能为空"))]
    pub recipient: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, message = "通知内容不能为空"))]
    pub content: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl SendNotificationRequest {
    pub fn into_notification(self, channel: Channel) -> Notification {
        let mut notification = Notification::new(channel, self.recipient, self.content);
        if let Some(user_id) = self.user_id {
            notification = notification.with_user(user_id);
        }
        if let Some(subject) = self.subject.filter(|s| !s.is_empty()) {
            notification = notification.with_subject(subject);
        }
        if let Some(template) = self.template.filter(|t| !t.is_empty()) {
            notification = notification.with_template(template);
        }
        notification.with_metadata_map(
            self.data
                .iter()
                .map(|(k, v)| (k.clone(), MetadataValue::from_json(v)))
                .collect(),
        )
    }
}

/// 同步发送结果
#[derive(Debug, Serialize, Deserialize)]
pub struct SendNotificationResponse {
    pub id: Uuid,
    pub status: NotificationStatus,
}

/// 用户通知列表查询参数
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<NotificationSummary>,
    pub limit: i64,
    pub offset: i64,
}
