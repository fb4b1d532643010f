//! 邮件渠道
//!
//! 通过 lettre 的异步 SMTP 传输发送。正文优先使用模板渲染，
//! 未设置模板或模板不存在时直接使用通知的 `content`。

use std::time::Duration;

use async_trait::async_trait;
use dispatch_shared::config::{SmtpConfig, SmtpTls};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use super::{ChannelSender, SendError};
use crate::models::{Channel, Notification};
use crate::templates::TemplateRegistry;

/// SMTP 认证类失败的回复码
const AUTH_FAILURE_CODES: [&str; 3] = ["530", "534", "535"];

/// 邮件发送器
pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    templates: TemplateRegistry,
}

impl EmailSender {
    /// 根据配置构建 SMTP 传输
    ///
    /// 发件人地址非法或 TLS 中继无法解析时返回错误。
    pub fn new(config: &SmtpConfig, templates: TemplateRegistry) -> Result<Self, SendError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| SendError::Connection(format!("发件人地址非法 {}: {e}", config.from)))?;

        let builder = match config.tls {
            SmtpTls::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| SendError::Connection(e.to_string()))?,
            SmtpTls::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| SendError::Connection(e.to_string()))?,
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
        };

        let mut builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        info!(
            host = %config.host,
            port = config.port,
            tls = ?config.tls,
            "邮件渠道已初始化"
        );
        Ok(Self {
            transport: builder.build(),
            from,
            templates,
        })
    }

    /// 组装邮件
    ///
    /// 模板存在时渲染为 HTML；否则以纯文本发送 `content`。
    pub fn compose(&self, notification: &Notification) -> Result<Message, SendError> {
        let to: Mailbox = notification
            .recipient
            .parse()
            .map_err(|e| SendError::RecipientRejected(format!("{}: {e}", notification.recipient)))?;

        let (body, content_type) = match notification
            .template_id
            .as_deref()
            .filter(|id| self.templates.contains(id))
        {
            Some(id) => {
                let rendered = self
                    .templates
                    .render(id, &notification.metadata)
                    .map_err(|e| SendError::TemplateRender(e.to_string()))?;
                (rendered, ContentType::TEXT_HTML)
            }
            None => (notification.content.clone(), ContentType::TEXT_PLAIN),
        };

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(notification.subject.clone().unwrap_or_default())
            .header(content_type)
            .body(body)
            .map_err(|e| SendError::RecipientRejected(e.to_string()))
    }
}

/// 按 SMTP 回复对传输错误分类
fn classify(err: lettre::transport::smtp::Error) -> SendError {
    if err.is_timeout() {
        return SendError::Timeout(err.to_string());
    }
    if err.is_permanent() {
        let code = err.status().map(|c| c.to_string()).unwrap_or_default();
        if AUTH_FAILURE_CODES.contains(&code.as_str()) {
            return SendError::Authentication(err.to_string());
        }
        return SendError::RecipientRejected(err.to_string());
    }
    SendError::Connection(err.to_string())
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        let message = self.compose(notification)?;
        self.transport.send(message).await.map_err(classify)?;

        debug!(
            notification_id = %notification.id,
            recipient = %notification.recipient,
            "邮件已发送"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetadataValue;

    fn sender() -> EmailSender {
        let config = SmtpConfig {
            host: "127.0.0.1".to_string(),
            port: 2525,
            tls: SmtpTls::None,
            ..SmtpConfig::default()
        };
        EmailSender::new(&config, TemplateRegistry::with_defaults()).unwrap()
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8_lossy(&message.formatted()).into_owned()
    }

    #[test]
    fn test_compose_with_template() {
        let n = Notification::new(Channel::Email, "ada@example.com", "fallback")
            .with_subject("Welcome to Our Store!")
            .with_template("welcome")
            .with_metadata("name", MetadataValue::from("Ada"));

        let raw = formatted(&sender().compose(&n).unwrap());
        assert!(raw.contains("Subject: Welcome to Our Store!"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("Welcome, Ada!"));
        assert!(!raw.contains("fallback"));
    }

    #[test]
    fn test_compose_falls_back_to_content() {
        let n = Notification::new(Channel::Email, "ada@example.com", "plain body")
            .with_template("not_registered");

        let raw = formatted(&sender().compose(&n).unwrap());
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("plain body"));
    }

    #[test]
    fn test_compose_missing_variable_is_render_error() {
        let n = Notification::new(Channel::Email, "ada@example.com", "x").with_template("welcome");
        assert!(matches!(
            sender().compose(&n),
            Err(SendError::TemplateRender(_))
        ));
    }

    #[test]
    fn test_compose_invalid_recipient() {
        let n = Notification::new(Channel::Email, "not-an-address", "x");
        assert!(matches!(
            sender().compose(&n),
            Err(SendError::RecipientRejected(_))
        ));
    }

    #[test]
    fn test_invalid_from_address() {
        let config = SmtpConfig {
            from: "broken".to_string(),
            tls: SmtpTls::None,
            ..SmtpConfig::default()
        };
        assert!(EmailSender::new(&config, TemplateRegistry::new()).is_err());
    }
}
