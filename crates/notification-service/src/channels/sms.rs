//! 短信渠道
//!
//! 调用 Twilio 兼容网关的 Messages 接口（表单 POST + Basic 认证）。

use std::time::Duration;

use async_trait::async_trait;
use dispatch_shared::config::SmsConfig;
use serde::Deserialize;
use tracing::{debug, info};

use super::{ChannelSender, SendError};
use crate::models::{Channel, Notification};

/// 最基本的 E.164 形式检查：以 `+` 开头，长度 10 到 15
///
/// 通过检查不代表号码真实可达。
pub fn is_valid_phone_number(phone: &str) -> bool {
    (10..=15).contains(&phone.len()) && phone.starts_with('+')
}

/// 网关错误响应体
#[derive(Debug, Default, Deserialize)]
struct GatewayError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

/// 短信发送器
pub struct SmsSender {
    client: reqwest::Client,
    endpoint: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl SmsSender {
    pub fn new(config: &SmsConfig) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let endpoint = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            config.api_base.trim_end_matches('/'),
            config.account_sid
        );

        info!(api_base = %config.api_base, "短信渠道已初始化");
        Ok(Self {
            client,
            endpoint,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
        })
    }

    /// 逐条发送，返回与输入一一对应的结果
    pub async fn send_bulk(&self, notifications: &[Notification]) -> Vec<Result<(), SendError>> {
        let mut results = Vec::with_capacity(notifications.len());
        for notification in notifications {
            results.push(self.send(notification).await);
        }
        results
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        let form = [
            ("To", notification.recipient.as_str()),
            ("From", self.from_number.as_str()),
            ("Body", notification.content.as_str()),
        ];

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            // 响应体不是预期的 JSON 时只保留状态码
            let body: GatewayError = response.json().await.unwrap_or_default();
            return Err(SendError::Gateway {
                status: status.as_u16(),
                code: body.code.to_string(),
                message: body.message,
            });
        }

        debug!(
            notification_id = %notification.id,
            recipient = %notification.recipient,
            "短信已发送"
        );
        Ok(())
    }
}
