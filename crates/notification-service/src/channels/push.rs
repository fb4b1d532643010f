//! 推送渠道
//!
//! 基于 FCM HTTP v1 接口，支持单设备、topic 广播和多设备批量发送。
//! 缺少项目 ID 或访问令牌时客户端处于未初始化状态，所有发送直接失败，不发起网络请求。

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_shared::config::PushConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{ChannelSender, SendError};
use crate::models::{Channel, Notification, flatten_metadata};

// ---------------------------------------------------------------------------
// 请求与响应
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    message: PushMessage<'a>,
}

#[derive(Debug, Serialize)]
struct PushMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'a str>,
    notification: PushContent<'a>,
    data: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct PushContent<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendReply {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorReply {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// 单条推送的结果
#[derive(Debug, Clone, PartialEq)]
pub struct SendResponse {
    pub message_id: Option<String>,
    pub error: Option<SendError>,
}

impl SendResponse {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// 批量推送结果，`responses` 与输入 token 顺序一致
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    pub success_count: usize,
    pub failure_count: usize,
    pub responses: Vec<SendResponse>,
}

enum Target<'a> {
    Token(&'a str),
    Topic(&'a str),
}

// ---------------------------------------------------------------------------
// PushSender
// ---------------------------------------------------------------------------

struct FcmClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
}

/// 推送发送器
pub struct PushSender {
    client: Option<FcmClient>,
}

impl PushSender {
    pub fn new(config: &PushConfig) -> Result<Self, SendError> {
        let token = config.access_token.as_deref().filter(|t| !t.is_empty());
        let Some(access_token) = token.filter(|_| !config.project_id.is_empty()) else {
            warn!("推送凭据缺失，推送渠道未初始化");
            return Ok(Self { client: None });
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let endpoint = format!(
            "{}/v1/projects/{}/messages:send",
            config.api_base.trim_end_matches('/'),
            config.project_id
        );

        info!(project_id = %config.project_id, "推送渠道已初始化");
        Ok(Self {
            client: Some(FcmClient {
                http,
                endpoint,
                access_token: access_token.to_string(),
            }),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.client.is_some()
    }

    fn client(&self) -> Result<&FcmClient, SendError> {
        self.client.as_ref().ok_or(SendError::NotInitialized("push"))
    }

    /// 广播到订阅了 topic 的所有设备
    pub async fn send_to_topic(
        &self,
        topic: &str,
        notification: &Notification,
    ) -> Result<String, SendError> {
        let client = self.client()?;
        post_message(client, Target::Topic(topic), notification).await
    }

    /// 逐个 token 发送，单个失败不影响其他 token
    pub async fn send_multicast(
        &self,
        tokens: &[String],
        notification: &Notification,
    ) -> Result<BatchResponse, SendError> {
        let client = self.client()?;

        let mut responses = Vec::with_capacity(tokens.len());
        for token in tokens {
            let response = match post_message(client, Target::Token(token), notification).await {
                Ok(message_id) => SendResponse {
                    message_id: Some(message_id),
                    error: None,
                },
                Err(e) => SendResponse {
                    message_id: None,
                    error: Some(e),
                },
            };
            responses.push(response);
        }

        let success_count = responses.iter().filter(|r| r.is_success()).count();
        Ok(BatchResponse {
            success_count,
            failure_count: responses.len() - success_count,
            responses,
        })
    }
}

/// 发送一条 FCM 消息，成功时返回消息名
async fn post_message(
    client: &FcmClient,
    target: Target<'_>,
    notification: &Notification,
) -> Result<String, SendError> {
    let (token, topic) = match target {
        Target::Token(t) => (Some(t), None),
        Target::Topic(t) => (None, Some(t)),
    };
    let request = SendRequest {
        message: PushMessage {
            token,
            topic,
            notification: PushContent {
                title: notification.subject.as_deref().unwrap_or_default(),
                body: &notification.content,
            },
            data: flatten_metadata(&notification.metadata),
        },
    };

    let response = client
        .http
        .post(&client.endpoint)
        .bearer_auth(&client.access_token)
        .json(&request)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let reply: ErrorReply = response.json().await.unwrap_or_default();
        return Err(SendError::Gateway {
            status: status.as_u16(),
            code: reply.error.status,
            message: reply.error.message,
        });
    }

    let reply: SendReply = response.json().await?;
    debug!(notification_id = %notification.id, message = %reply.name, "推送已发送");
    Ok(reply.name)
}

#[async_trait]
impl ChannelSender for PushSender {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    /// 收件人即设备 token
    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        let client = self.client()?;
        post_message(client, Target::Token(&notification.recipient), notification).await?;
        Ok(())
    }
}
