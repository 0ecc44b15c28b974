use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use pulse_api::{AppStateInner, StreamRegistry};

fn test_app() -> (Router, Arc<AppStateInner>) {
    let state = Arc::new(AppStateInner {
        db: pulse_db::Database::open_in_memory().expect("in-memory db"),
        // Must match the middleware's fallback secret
        jwt_secret: "dev-secret-change-me".into(),
        streams: StreamRegistry::new(),
    });
    (pulse_api::router(state.clone()), state)
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.expect("request failed");
    let status = resp.status();
    let bytes = resp.into_body().collect().await.expect("body").to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn register(app: &Router, username: &str) -> (i64, String) {
    let (status, body) = call(
        app,
        post_json(
            "/auth/register",
            None,
            json!({"username": username, "password": "hunter2hunter2"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (
        body["user_id"].as_i64().unwrap(),
        body["token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn poll_requires_auth() {
    let (app, _) = test_app();
    let (status, body) = call(&app, get("/poll", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn poll_rejects_wrong_verb() {
    let (app, _) = test_app();
    let (_, token) = register(&app, "alice").await;
    let (status, body) = call(&app, post_json("/poll", Some(&token), json!({}))).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    // Every non-200 carries the structured JSON body, 405 included.
    assert_eq!(body["success"], json!(false));
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn poll_rejects_malformed_cursor() {
    let (app, _) = test_app();
    let (_, token) = register(&app, "alice").await;
    let (status, body) = call(&app, get("/poll?last_update=notanumber", Some(&token))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    // The query rejection must render as JSON, not axum's plain-text default.
    assert_eq!(body["success"], json!(false));
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn empty_global_poll_returns_empty_lists() {
    let (app, _) = test_app();
    let (_, token) = register(&app, "alice").await;

    let (status, body) = call(&app, get("/poll?last_update=0", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["valid_chats"], json!([]));
    assert_eq!(body["messages"], json!([]));
    assert!(body["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn send_then_scoped_poll_delivers_and_flips_read() {
    let (app, state) = test_app();
    let (alice_id, alice_token) = register(&app, "alice").await;
    let (bob_id, bob_token) = register(&app, "bob").await;

    // Chat setup is collaborator CRUD; do it at the db layer.
    let chat = state.db.create_chat("private", "alice & bob", 0).unwrap();
    state.db.add_member(chat, alice_id, "owner").unwrap();
    state.db.add_member(chat, bob_id, "member").unwrap();

    let (status, sent) = call(
        &app,
        post_json(
            &format!("/chats/{}/messages", chat),
            Some(&alice_token),
            json!({"body": "hello bob"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let message_id = sent["id"].as_i64().unwrap();

    // Bob's scoped poll returns the message and marks it read.
    let (status, body) = call(
        &app,
        get(&format!("/poll?last_update=0&chat_id={}", chat), Some(&bob_token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"].as_i64().unwrap(), message_id);
    assert_eq!(messages[0]["is_own"], json!(false));

    // Alice's scoped poll sees the read receipt.
    let (status, body) = call(
        &app,
        get(&format!("/poll?last_update=0&chat_id={}", chat), Some(&alice_token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reads = body["read_updates"].as_array().unwrap();
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0]["message_id"].as_i64().unwrap(), message_id);
    assert_eq!(reads[0]["is_read"], json!(true));
}

#[tokio::test]
async fn scoped_poll_of_deleted_chat_reports_chat_deleted() {
    let (app, state) = test_app();
    let (alice_id, alice_token) = register(&app, "alice").await;

    let chat = state.db.create_chat("group", "doomed", 0).unwrap();
    state.db.add_member(chat, alice_id, "owner").unwrap();
    state.db.hard_delete_chat(chat).unwrap();

    let (status, body) = call(
        &app,
        get(&format!("/poll?last_update=0&chat_id={}", chat), Some(&alice_token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["chat_deleted"], json!(true));
    assert_eq!(body["messages"], json!([]));
}

#[tokio::test]
async fn scoped_poll_of_foreign_chat_is_forbidden() {
    let (app, state) = test_app();
    let (alice_id, _) = register(&app, "alice").await;
    let (_, eve_token) = register(&app, "eve").await;

    let chat = state.db.create_chat("private", "private", 0).unwrap();
    state.db.add_member(chat, alice_id, "owner").unwrap();

    let (status, body) = call(
        &app,
        get(&format!("/poll?last_update=0&chat_id={}", chat), Some(&eve_token)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn non_member_cannot_send() {
    let (app, state) = test_app();
    let (alice_id, _) = register(&app, "alice").await;
    let (_, eve_token) = register(&app, "eve").await;

    let chat = state.db.create_chat("private", "private", 0).unwrap();
    state.db.add_member(chat, alice_id, "owner").unwrap();

    let (status, _) = call(
        &app,
        post_json(
            &format!("/chats/{}/messages", chat),
            Some(&eve_token),
            json!({"body": "let me in"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn poll_heartbeat_surfaces_in_peers_global_poll() {
    let (app, state) = test_app();
    let (alice_id, alice_token) = register(&app, "alice").await;
    let (bob_id, bob_token) = register(&app, "bob").await;

    let chat = state.db.create_chat("private", "alice & bob", 0).unwrap();
    state.db.add_member(chat, alice_id, "owner").unwrap();
    state.db.add_member(chat, bob_id, "member").unwrap();

    // Alice polls — that's her heartbeat.
    let (status, _) = call(&app, get("/poll?last_update=0", Some(&alice_token))).await;
    assert_eq!(status, StatusCode::OK);

    // Bob's global poll with cursor 0 sees her online.
    let (_, body) = call(&app, get("/poll?last_update=0", Some(&bob_token))).await;
    let statuses = body["status_updates"].as_array().unwrap();
    assert!(statuses.iter().any(|s| {
        s["user_id"].as_i64() == Some(alice_id) && s["is_online"] == json!(true)
    }));
}

#[tokio::test]
async fn logout_revokes_open_streams() {
    let (app, state) = test_app();
    let (alice_id, alice_token) = register(&app, "alice").await;

    let (_, token) = state.streams.register(alice_id);
    assert_eq!(state.streams.open_streams(alice_id), 1);

    let (status, _) = call(&app, post_json("/auth/logout", Some(&alice_token), json!({}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(token.is_cancelled());
    assert_eq!(state.streams.open_streams(alice_id), 0);

    let user = state.db.get_user_by_id(alice_id).unwrap().unwrap();
    assert!(!user.is_online);
}

#[tokio::test]
async fn duplicate_username_conflicts() {
    let (app, _) = test_app();
    register(&app, "alice").await;
    let (status, body) = call(
        &app,
        post_json(
            "/auth/register",
            None,
            json!({"username": "alice", "password": "hunter2hunter2"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], json!(false));
}
