//! 邮件渠道集成测试
//!
//! 进程内的最小 SMTP 服务，逐行应答并记录收到的命令和正文。

use std::sync::{Arc, Mutex};

use dispatch_shared::config::{SmtpConfig, SmtpTls};
use notification_service::channels::EmailSender;
use notification_service::{Channel, ChannelSender, Notification, SendError, TemplateRegistry};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Transcript {
    commands: Arc<Mutex<Vec<String>>>,
    data: Arc<Mutex<String>>,
}

/// 启动 SMTP 服务，`reject_rcpt` 为真时对 RCPT 返回 550
async fn start_smtp(reject_rcpt: bool) -> (u16, Transcript) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let transcript = Transcript::default();
    let record = transcript.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let record = record.clone();
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                write.write_all(b"220 localhost ESMTP test\r\n").await.unwrap();

                let mut in_data = false;
                while let Ok(Some(line)) = lines.next_line().await {
                    if in_data {
                        if line == "." {
                            in_data = false;
                            write.write_all(b"250 2.0.0 queued\r\n").await.unwrap();
                        } else {
                            let mut data = record.data.lock().unwrap();
                            data.push_str(&line);
                            data.push('\n');
                        }
                        continue;
                    }

                    record.commands.lock().unwrap().push(line.clone());
                    let verb = line.split_whitespace().next().unwrap_or_default().to_uppercase();
                    let reply: &[u8] = match verb.as_str() {
                        "EHLO" | "HELO" => b"250-localhost\r\n250 8BITMIME\r\n",
                        "MAIL" => b"250 2.1.0 OK\r\n",
                        "RCPT" if reject_rcpt => b"550 5.1.1 mailbox unavailable\r\n",
                        "RCPT" => b"250 2.1.5 OK\r\n",
                        "DATA" => {
                            in_data = true;
                            b"354 end data with <CR><LF>.<CR><LF>\r\n"
                        }
                        "RSET" | "NOOP" => b"250 OK\r\n",
                        "QUIT" => {
                            let _ = write.write_all(b"221 bye\r\n").await;
                            return;
                        }
                        _ => b"502 command not implemented\r\n",
                    };
                    if write.write_all(reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    (port, transcript)
}

fn sender(port: u16) -> EmailSender {
    let config = SmtpConfig {
        host: "127.0.0.1".to_string(),
        port,
        tls: SmtpTls::None,
        timeout_secs: 5,
        ..SmtpConfig::default()
    };
    EmailSender::new(&config, TemplateRegistry::with_defaults()).unwrap()
}

#[tokio::test]
async fn test_send_renders_template() {
    let (port, transcript) = start_smtp(false).await;
    let email = sender(port);

    let n = Notification::new(Channel::Email, "ada@example.com", "fallback")
        .with_subject("Welcome to Our Store!")
        .with_template("welcome")
        .with_metadata("name", "Ada");
    email.send(&n).await.unwrap();

    let commands = transcript.commands.lock().unwrap().clone();
    assert!(commands.iter().any(|c| c.starts_with("MAIL FROM:<noreply@ecommerce.com>")));
    assert!(commands.iter().any(|c| c.starts_with("RCPT TO:<ada@example.com>")));

    let data = transcript.data.lock().unwrap().clone();
    assert!(data.contains("Subject: Welcome to Our Store!"));
    assert!(data.contains("Welcome, Ada!"));
}

#[tokio::test]
async fn test_rejected_recipient_is_classified() {
    let (port, _transcript) = start_smtp(true).await;
    let email = sender(port);

    let n = Notification::new(Channel::Email, "ghost@example.com", "hi").with_subject("Hi");
    let err = email.send(&n).await.unwrap_err();
    assert!(matches!(err, SendError::RecipientRejected(_)), "got {err:?}");
}

#[tokio::test]
async fn test_unreachable_relay_is_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let email = sender(port);
    let n = Notification::new(Channel::Email, "ada@example.com", "hi");
    assert!(matches!(
        email.send(&n).await,
        Err(SendError::Connection(_))
    ));
}
