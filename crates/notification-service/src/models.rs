//! 通知数据模型
//!
//! `Notification` 是唯一持久化的实体；事件路由和同步 API 创建它，
//! 重试协调器负责推进其状态。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Channel / NotificationStatus
// ---------------------------------------------------------------------------

/// 投递渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Sms, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "push" => Ok(Self::Push),
            other => Err(format!("未知的通知渠道: {other}")),
        }
    }
}

/// 通知状态
///
/// `pending → sent | failed`，`sent` 之后可能由回执推进到 `delivered`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            other => Err(format!("未知的通知状态: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// 模板变量的取值
///
/// 反序列化时按 Text → Integer → Float → Bool 的顺序匹配 JSON 类型。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl MetadataValue {
    /// 从任意 JSON 值转换；null 视为空字符串，数组和对象保留其 JSON 文本
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Text(String::new()),
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// 模板变量集合，键有序便于日志与测试比对
pub type Metadata = BTreeMap<String, MetadataValue>;

/// 将元数据展平为字符串映射（推送渠道只接受 string → string）
pub fn flatten_metadata(metadata: &Metadata) -> BTreeMap<String, String> {
    metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// 一条待投递或已投递的通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    /// 系统告警类通知没有所属用户
    pub user_id: Option<String>,
    pub channel: Channel,
    /// 邮箱地址、手机号或设备 token
    pub recipient: String,
    pub subject: Option<String>,
    pub content: String,
    pub template_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub status: NotificationStatus,
    pub retry_count: u32,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// 创建处于 pending 状态的新通知
    pub fn new(channel: Channel, recipient: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id: None,
            channel,
            recipient: recipient.into(),
            subject: None,
            content: content.into(),
            template_id: None,
            metadata: Metadata::new(),
            status: NotificationStatus::Pending,
            retry_count: 0,
            sent_at: None,
            delivered_at: None,
            failed_at: None,
            error_msg: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 空字符串视为无所属用户
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        self.user_id = (!user_id.is_empty()).then_some(user_id);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata_map(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// 应用一次状态迁移
    ///
    /// - sent：设置 sent_at，清除 failed_at 与 error_msg
    /// - failed：设置 failed_at 与 error_msg，清除 sent_at
    /// - delivered：设置 delivered_at
    ///
    /// 内存存储与协调器本地副本共用这一规则，和数据库的 UPDATE 语句保持一致。
    pub fn apply_status(
        &mut self,
        status: NotificationStatus,
        error_msg: Option<&str>,
        at: DateTime<Utc>,
    ) {
        match status {
            NotificationStatus::Sent => {
                self.sent_at = Some(at);
                self.failed_at = None;
                self.error_msg = None;
            }
            NotificationStatus::Failed => {
                self.failed_at = Some(at);
                self.sent_at = None;
                self.error_msg = error_msg.map(str::to_string);
            }
            NotificationStatus::Delivered => {
                self.delivered_at = Some(at);
            }
            NotificationStatus::Pending => {}
        }
        self.status = status;
        self.updated_at = at;
    }
}

// ---------------------------------------------------------------------------
// 列表查询
// ---------------------------------------------------------------------------

/// 用户通知列表中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSummary {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub channel: Channel,
    pub recipient: String,
    pub subject: Option<String>,
    pub content: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Notification> for NotificationSummary {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            user_id: n.user_id.clone(),
            channel: n.channel,
            recipient: n.recipient.clone(),
            subject: n.subject.clone(),
            content: n.content.clone(),
            status: n.status,
            created_at: n.created_at,
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// 分页参数，构造时完成取值约束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    /// limit ≤ 0 或 > 100 时取 20；offset 小于 0 时取 0
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if l > 0 && l <= MAX_PAGE_LIMIT => l,
            _ => DEFAULT_PAGE_LIMIT,
        };
        let offset = offset.unwrap_or(0).max(0);
        Self { limit, offset }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}
