//! 应用状态定义

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::dispatcher::NotificationDispatcher;
use crate::store::NotificationStore;

/// Axum 路由共享的应用状态
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: NotificationDispatcher,
    pub store: Arc<dyn NotificationStore>,
    /// 未启用指标时为 None，`/metrics` 返回 404
    pub metrics: Option<PrometheusHandle>,
    pub service_name: String,
}

impl AppState {
    pub fn new(
        dispatcher: NotificationDispatcher,
        store: Arc<dyn NotificationStore>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            store,
            metrics: None,
            service_name: service_name.into(),
        }
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }
}
