//! 通知渠道实现
//!
//! 定义统一的 `ChannelSender` trait 并提供各渠道的具体实现。
//!
//! ## 支持的渠道
//!
//! - **Email**: SMTP 邮件（lettre）
//! - **SMS**: Twilio 兼容的短信网关
//! - **Push**: FCM HTTP v1 推送
//!
//! 每次 `send` 只做一次投递尝试，不在内部重试或退避；重试由协调器统一负责。

mod email;
mod push;
mod sms;

pub use email::EmailSender;
pub use push::{BatchResponse, PushSender, SendResponse};
pub use sms::{SmsSender, is_valid_phone_number};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Channel, Notification};

/// 渠道投递失败
///
/// `Display` 即持久化到 `error_msg` 的失败原因。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SendError {
    #[error("连接失败: {0}")]
    Connection(String),

    #[error("认证失败: {0}")]
    Authentication(String),

    #[error("收件人被拒绝: {0}")]
    RecipientRejected(String),

    #[error("模板渲染失败: {0}")]
    TemplateRender(String),

    #[error("网关错误: {message} (code: {code}, status: {status})")]
    Gateway {
        status: u16,
        code: String,
        message: String,
    },

    #[error("{0} 客户端未初始化")]
    NotInitialized(&'static str),

    #[error("请求超时: {0}")]
    Timeout(String),
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// 渠道发送器 trait
///
/// 实现必须无状态、可重入，同一实例会被多个 topic 的消费任务并发调用。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// 该发送器负责的渠道
    fn channel(&self) -> Channel;

    /// 进行一次投递尝试
    async fn send(&self, notification: &Notification) -> Result<(), SendError>;
}

/// 每个渠道一个发送器
#[derive(Clone)]
pub struct ChannelSenders {
    email: Arc<dyn ChannelSender>,
    sms: Arc<dyn ChannelSender>,
    push: Arc<dyn ChannelSender>,
}

impl ChannelSenders {
    pub fn new(
        email: Arc<dyn ChannelSender>,
        sms: Arc<dyn ChannelSender>,
        push: Arc<dyn ChannelSender>,
    ) -> Self {
        Self { email, sms, push }
    }

    /// 取渠道对应的发送器
    pub fn for_channel(&self, channel: Channel) -> Arc<dyn ChannelSender> {
        match channel {
            Channel::Email => self.email.clone(),
            Channel::Sms => self.sms.clone(),
            Channel::Push => self.push.clone(),
        }
    }
}
