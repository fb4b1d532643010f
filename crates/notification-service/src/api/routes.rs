//! 路由配置

use axum::Router;
use axum::routing::{get, post};

use super::handlers;
use super::state::AppState;

/// 业务路由，挂载在 /api 下
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(handlers::send_notification))
        .route("/notifications/{id}", get(handlers::get_notification))
        .route(
            "/users/{user_id}/notifications",
            get(handlers::list_user_notifications),
        )
}

/// 完整的应用路由
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
}
