//! 通知分发服务
//!
//! 启动三个 topic 的消费任务和同步发送 HTTP 接口。

use std::sync::Arc;
use std::time::Duration;

use dispatch_shared::{
    config::{AppConfig, SmtpTls}, database::Database, observability, retry::RetryPolicy,
};
use notification_service::{
    SERVICE_NAME,
    api::{self, AppState},
    channels::{ChannelSenders, EmailSender, PushSender, SmsSender},
    consumer::QueueConsumer,
    coordinator::RetryCoordinator,
    dispatcher::NotificationDispatcher,
    events::Topic,
    router::EventRouter,
    store::{MIGRATOR, NotificationStore, PgNotificationStore},
    templates::TemplateRegistry,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load(SERVICE_NAME)?;
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let guard = observability::init(&obs_config)?;

    info!(
        environment = %config.environment,
        addr = %config.server_addr(),
        "Starting {}...",
        config.service_name
    );
    if config.is_production() && config.smtp.tls == SmtpTls::None {
        warn!(host = %config.smtp.host, "生产环境 SMTP 未启用 TLS");
    }

    // 存储
    let db = Database::connect(&config.database).await?;
    db.run_migrations(&MIGRATOR).await?;
    let store: Arc<dyn NotificationStore> = Arc::new(PgNotificationStore::new(db.clone()));

    // 渠道
    let mut templates = TemplateRegistry::with_defaults();
    if let Some(dir) = &config.dispatch.template_dir {
        templates.load_dir(dir)?;
    }
    let senders = ChannelSenders::new(
        Arc::new(EmailSender::new(&config.smtp, templates)?),
        Arc::new(SmsSender::new(&config.sms)?),
        Arc::new(PushSender::new(&config.push)?),
    );

    let coordinator =
        RetryCoordinator::new(store.clone()).with_policy(RetryPolicy::from(&config.dispatch));
    let dispatcher = NotificationDispatcher::new(
        EventRouter::new(config.dispatch.inventory_alert_recipient.clone()),
        coordinator,
        senders,
        store.clone(),
    );

    // 每个 topic 一个消费任务
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let queue = QueueConsumer::new(&config)?;
    let mut workers = JoinSet::new();
    for topic in Topic::ALL {
        let queue = queue.clone();
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown_rx.clone();

        workers.spawn(async move {
            let result = queue
                .subscribe(topic.as_str(), shutdown, |payload| {
                    let dispatcher = dispatcher.clone();
                    async move { dispatcher.handle_event(topic.as_str(), &payload).await }
                })
                .await;
            if let Err(e) = result {
                error!(topic = %topic, error = %e, "消费任务异常退出");
            }
        });
    }

    let state = AppState::new(dispatcher, store, config.service_name.clone())
        .with_metrics(guard.metrics_handle());
    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, api::app(state))
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    // 等待消费任务处理完在途消息
    let timeout = Duration::from_secs(config.dispatch.shutdown_timeout_secs);
    let drained = tokio::time::timeout(timeout, async {
        while workers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(timeout_secs = timeout.as_secs(), "消费任务未在超时内退出，强制终止");
        workers.abort_all();
    }

    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// 监听 SIGTERM 或 Ctrl+C，随后通知消费任务停止拉取新消息
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }

    let _ = shutdown_tx.send(true);
}
