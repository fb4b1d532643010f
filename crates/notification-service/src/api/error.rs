//! HTTP 错误映射

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dispatch_shared::error::DispatchError;
use serde_json::json;
use uuid::Uuid;

use crate::error::NotificationError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("通知不存在: {0}")]
    NotFound(Uuid),

    /// 通知已持久化但投递失败，响应携带 id 供调用方轮询状态
    #[error("通知发送失败: {message}")]
    DeliveryFailed { id: Uuid, message: String },

    #[error("存储错误: {0}")]
    Store(#[from] DispatchError),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::DeliveryFailed { .. } | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOTIFICATION_NOT_FOUND",
            Self::DeliveryFailed { .. } => "DELIVERY_FAILED",
            Self::Store(_) => "STORE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::Store(e) => {
                tracing::error!(error = %e, "通知存储失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let data = match &self {
            Self::DeliveryFailed { id, .. } => json!({ "id": id, "status": "failed" }),
            _ => serde_json::Value::Null,
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": data
        });

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<NotificationError> for ApiError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Delivery { id, source } => Self::DeliveryFailed {
                id,
                message: source.to_string(),
            },
            NotificationError::Store(e) => Self::Store(e),
            NotificationError::Validation(msg) => Self::Validation(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::SendError;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound(Uuid::now_v7()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_delivery_error_keeps_id() {
        let id = Uuid::now_v7();
        let err = ApiError::from(NotificationError::Delivery {
            id,
            source: SendError::Timeout("30s".into()),
        });
        assert!(matches!(err, ApiError::DeliveryFailed { id: got, .. } if got == id));
        assert_eq!(err.error_code(), "DELIVERY_FAILED");
    }
}
