//! 同步发送 HTTP 接口
//!
//! 与异步消费链路共用同一个 `NotificationDispatcher`。

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::app;
pub use state::AppState;
