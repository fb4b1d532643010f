//! HTTP 处理器

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::dto::{
    ApiResponse, ListQuery, NotificationListResponse, SendNotificationRequest,
    SendNotificationResponse,
};
use super::error::ApiError;
use super::state::AppState;
use crate::channels::is_valid_phone_number;
use crate::models::{Channel, Notification, PageRequest};

type Result<T> = std::result::Result<T, ApiError>;

/// 按渠道检查收件人格式
fn validate_recipient(channel: Channel, recipient: &str) -> Result<()> {
    let valid = match channel {
        Channel::Email => recipient.contains('@'),
        Channel::Sms => is_valid_phone_number(recipient),
        Channel::Push => !recipient.trim().is_empty(),
    };
    if valid {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "收件人格式不符合 {channel} 渠道要求: {recipient}"
        )))
    }
}

/// 同步发送一条通知
///
/// POST /api/notifications
pub async fn send_notification(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendNotificationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<SendNotificationResponse>>)> {
    let Json(req) = payload?;
    req.validate()?;

    let channel: Channel = req.channel_type.parse().map_err(ApiError::Validation)?;
    validate_recipient(channel, &req.recipient)?;

    let notification = req.into_notification(channel);
    info!(notification_id = %notification.id, %channel, "收到同步发送请求");

    let sent = state.dispatcher.dispatch(notification).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(SendNotificationResponse {
            id: sent.id,
            status: sent.status,
        })),
    ))
}

/// 查询单条通知
///
/// GET /api/notifications/{id}
pub async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Notification>>> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::Validation(format!("非法的通知 ID: {id}")))?;

    let notification = state
        .store
        .get_by_id(id)
        .await?
        .ok_or(ApiError::NotFound(id))?;
    Ok(Json(ApiResponse::success(notification)))
}

/// 分页查询用户的通知
///
/// GET /api/users/{user_id}/notifications
pub async fn list_user_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    query: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<NotificationListResponse>>> {
    let Query(query) = query?;
    let page = PageRequest::new(query.limit, query.offset);
    let notifications = state.store.get_by_user(&user_id, page).await?;

    Ok(Json(ApiResponse::success(NotificationListResponse {
        notifications,
        limit: page.limit,
        offset: page.offset,
    })))
}

/// 存活探针，不检查 Broker 与数据库
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": state.service_name
    }))
}

/// Prometheus 指标
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
