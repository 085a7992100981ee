//! REST client against an in-process axum fake of the toolhub API.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use toolhub_client::{ApiClient, ApiError, Session, SessionProvider};
use toolhub_protocol::client::{ToolInput, ToolQuery};
use toolhub_protocol::User;

const TOKEN: &str = "secret-token";

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn user_json() -> Value {
    json!({"_id": "u1", "name": "Kim", "email": "kim@example.com", "role": "admin"})
}

fn failure(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "message": message })))
}

fn authorized(headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    let bearer = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match bearer {
        Some(TOKEN) => Ok(()),
        _ => Err(failure(StatusCode::UNAUTHORIZED, "Invalid token")),
    }
}

async fn login(Json(body): Json<Value>) -> ApiResult {
    if body["password"] == "hunter2" {
        Ok(Json(json!({ "token": TOKEN, "user": user_json() })))
    } else {
        Err(failure(StatusCode::BAD_REQUEST, "Invalid credentials"))
    }
}

async fn me(headers: HeaderMap) -> ApiResult {
    if let Err(rejection) = authorized(&headers) {
        // Slow rejections let a newer login land while the request is in flight.
        tokio::time::sleep(Duration::from_millis(200)).await;
        return Err(rejection);
    }
    Ok(Json(user_json()))
}

async fn logout() -> ApiResult {
    Err(failure(StatusCode::INTERNAL_SERVER_ERROR, "logout exploded"))
}

async fn list_tools(headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> ApiResult {
    authorized(&headers)?;
    let page: u32 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let limit: u32 = params.get("limit").and_then(|l| l.parse().ok()).unwrap_or(10);
    Ok(Json(json!({
        "tools": [{
            "id": "t1",
            "title": params.get("search").cloned().unwrap_or_default(),
            "userId": params.get("userId").cloned(),
        }],
        "total": 1,
        "page": page,
        "limit": limit,
    })))
}

async fn run_tool(
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<Value>,
) -> ApiResult {
    authorized(&headers)?;
    Ok(Json(json!({ "result": { "tool": id, "echo": input } })))
}

async fn serve() -> String {
    let api = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .route("/tools", get(list_tools))
        .route("/tools/{id}/run", post(run_tool));
    let app = Router::new().nest("/api", api);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}/api")
}

fn client(base_url: String) -> ApiClient {
    ApiClient::new(base_url, SessionProvider::new())
}

#[tokio::test]
async fn login_starts_session_and_authenticates_later_calls() {
    let api = client(serve().await);

    let user = api.login("kim@example.com", "hunter2").await.expect("login");
    assert_eq!(user.id, "u1");
    assert!(user.is_admin());
    assert_eq!(api.session().token().as_deref(), Some(TOKEN));

    let me = api.me().await.expect("me");
    assert_eq!(me.email, "kim@example.com");
}

#[tokio::test]
async fn bad_credentials_surface_server_message() {
    let api = client(serve().await);

    match api.login("kim@example.com", "wrong").await {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "Invalid credentials");
        }
        other => panic!("expected status error, got {:?}", other),
    }
    assert!(!api.session().is_active());
}

#[tokio::test]
async fn unauthorized_response_ends_session() {
    let api = client(serve().await);
    let user: User = serde_json::from_value(user_json()).expect("user");
    api.session().begin(Session {
        user,
        token: "expired".to_string(),
    });

    assert!(matches!(api.me().await, Err(ApiError::Unauthorized)));
    assert!(!api.session().is_active());
}

#[tokio::test]
async fn late_rejection_of_old_token_keeps_newer_login() {
    let api = client(serve().await);
    let user: User = serde_json::from_value(user_json()).expect("user");
    api.session().begin(Session {
        user,
        token: "expired".to_string(),
    });

    let (stale, fresh) = tokio::join!(api.me(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        api.login("kim@example.com", "hunter2").await
    });

    assert!(matches!(stale, Err(ApiError::Unauthorized)));
    assert!(fresh.is_ok());
    assert_eq!(api.session().token().as_deref(), Some(TOKEN));
}

#[tokio::test]
async fn restore_only_starts_session_for_valid_token() {
    let api = client(serve().await);

    assert!(matches!(
        api.restore("stale").await,
        Err(ApiError::Unauthorized)
    ));
    assert!(!api.session().is_active());

    let user = api.restore(TOKEN).await.expect("restore");
    assert_eq!(user.id, "u1");
    assert_eq!(api.session().token().as_deref(), Some(TOKEN));
}

#[tokio::test]
async fn logout_ends_session_even_when_server_fails() {
    let api = client(serve().await);
    api.login("kim@example.com", "hunter2").await.expect("login");

    match api.logout().await {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "logout exploded");
        }
        other => panic!("expected status error, got {:?}", other),
    }
    assert!(!api.session().is_active());
}

#[tokio::test]
async fn tool_query_is_sent_as_camel_case_params() {
    let api = client(serve().await);
    api.login("kim@example.com", "hunter2").await.expect("login");

    let page = api
        .list_tools(&ToolQuery {
            page: Some(2),
            limit: Some(6),
            search: Some("sum mary".to_string()),
            user_id: Some("u1".to_string()),
        })
        .await
        .expect("list tools");

    assert_eq!(page.page, 2);
    assert_eq!(page.limit, 6);
    assert_eq!(page.tools[0].title, "sum mary");
    assert_eq!(page.tools[0].user_id.as_deref(), Some("u1"));
}

#[tokio::test]
async fn run_tool_posts_inputs() {
    let api = client(serve().await);
    api.login("kim@example.com", "hunter2").await.expect("login");

    let mut input = ToolInput::new();
    input.insert("text".to_string(), json!("hello"));
    let result = api.run_tool("t1", &input).await.expect("run");

    assert_eq!(result.result["tool"], "t1");
    assert_eq!(result.result["echo"]["text"], "hello");
    assert!(result.error.is_none());
}
