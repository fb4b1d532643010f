//! 短信渠道集成测试，使用进程内 axum 模拟网关

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use dispatch_shared::config::SmsConfig;
use notification_service::channels::SmsSender;
use notification_service::{Channel, ChannelSender, Notification, SendError};
use serde_json::json;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Gateway {
    requests: Arc<Mutex<Vec<(String, Option<String>, HashMap<String, String>)>>>,
}

async fn messages(
    State(gw): State<Gateway>,
    Path(sid): Path<String>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let to = form.get("To").cloned().unwrap_or_default();
    gw.requests.lock().unwrap().push((sid, auth, form));

    if to == "+19999999999" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": 21211, "message": "Invalid 'To' Phone Number", "status": 400})),
        );
    }
    (
        StatusCode::CREATED,
        Json(json!({"sid": "SM123", "status": "queued"})),
    )
}

async fn start_gateway() -> (String, Gateway) {
    let gw = Gateway::default();
    let app = Router::new()
        .route("/2010-04-01/Accounts/{sid}/Messages.json", post(messages))
        .with_state(gw.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), gw)
}

fn sender(api_base: String) -> SmsSender {
    SmsSender::new(&SmsConfig {
        api_base,
        account_sid: "AC42".to_string(),
        auth_token: "secret".to_string(),
        from_number: "+15005550006".to_string(),
        timeout_secs: 5,
    })
    .unwrap()
}

#[tokio::test]
async fn test_send_posts_form_with_basic_auth() {
    let (base, gw) = start_gateway().await;
    let sms = sender(base);

    let n = Notification::new(Channel::Sms, "+14155552671", "Your order shipped");
    sms.send(&n).await.unwrap();

    let requests = gw.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (sid, auth, form) = &requests[0];
    assert_eq!(sid, "AC42");
    // base64("AC42:secret")
    assert_eq!(auth.as_deref(), Some("Basic QUM0MjpzZWNyZXQ="));
    assert_eq!(form["To"], "+14155552671");
    assert_eq!(form["From"], "+15005550006");
    assert_eq!(form["Body"], "Your order shipped");
}

#[tokio::test]
async fn test_gateway_error_carries_code_and_message() {
    let (base, _gw) = start_gateway().await;
    let sms = sender(base);

    let n = Notification::new(Channel::Sms, "+19999999999", "hi");
    let err = sms.send(&n).await.unwrap_err();
    assert_eq!(
        err,
        SendError::Gateway {
            status: 400,
            code: "21211".to_string(),
            message: "Invalid 'To' Phone Number".to_string(),
        }
    );
}

#[tokio::test]
async fn test_send_bulk_reports_each_outcome() {
    let (base, gw) = start_gateway().await;
    let sms = sender(base);

    let batch = vec![
        Notification::new(Channel::Sms, "+14155552671", "a"),
        Notification::new(Channel::Sms, "+19999999999", "b"),
        Notification::new(Channel::Sms, "+14155550000", "c"),
    ];
    let results = sms.send_bulk(&batch).await;
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(SendError::Gateway { status: 400, .. })));
    assert!(results[2].is_ok());
    assert_eq!(gw.requests.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_unreachable_gateway_is_connection_error() {
    // 绑定后立即释放端口，连接会被拒绝
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let sms = sender(format!("http://{addr}"));
    let n = Notification::new(Channel::Sms, "+14155552671", "hi");
    assert!(matches!(
        sms.send(&n).await,
        Err(SendError::Connection(_))
    ));
}
