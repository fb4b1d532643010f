//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集。
//! recorder 安装后返回渲染句柄，由服务的 HTTP 路由暴露 `/metrics`。

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use super::ObservabilityConfig;

/// 安装全局 Prometheus recorder 并注册指标描述
pub fn init(config: &ObservabilityConfig) -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    Ok(handle)
}

/// 注册通用指标描述，会出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "notification_events_total",
        "Domain events consumed, by topic and routing outcome"
    );
    metrics::describe_counter!(
        "notification_delivery_attempts_total",
        "Channel delivery attempts, by channel and result"
    );
    metrics::describe_counter!(
        "notifications_dispatched_total",
        "Notifications that reached a final status, by channel and status"
    );
    metrics::describe_counter!(
        "queue_messages_total",
        "Broker messages settled, by topic and disposition"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录事件路由结果（notify / noop / decode_error / unknown_topic）
#[inline]
pub fn record_event(topic: &str, outcome: &str) {
    metrics::counter!(
        "notification_events_total",
        "topic" => topic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录一次渠道投递尝试
#[inline]
pub fn record_delivery_attempt(channel: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    metrics::counter!(
        "notification_delivery_attempts_total",
        "channel" => channel.to_string(),
        "result" => result
    )
    .increment(1);
}

/// 记录通知的最终状态
#[inline]
pub fn record_dispatch(channel: &str, status: &str) {
    metrics::counter!(
        "notifications_dispatched_total",
        "channel" => channel.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录消息的结算方式（ack / requeue / dead_letter）
#[inline]
pub fn record_queue_message(topic: &str, disposition: &str) {
    metrics::counter!(
        "queue_messages_total",
        "topic" => topic.to_string(),
        "disposition" => disposition.to_string()
    )
    .increment(1);
}
