mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::TestApp;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn post_json(app: &TestApp, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.50")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn login(app: &TestApp, email: &str) -> Value {
    let (status, _) = post_json(app, "/auth/otp/request", json!({ "email": email })).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let code = app.notifier.last_code_for(email).unwrap();
    let (status, body) = post_json(
        app,
        "/auth/otp/login",
        json!({ "email": email, "code": code }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_openapi_document_served() {
    let app = TestApp::new();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/.well-known/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let doc: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(doc["paths"]["/auth/otp/login"].is_object());
}

#[tokio::test]
async fn test_request_otp_same_answer_for_unknown_email() {
    let app = TestApp::new();
    app.store.add_principal("known@example.com");

    let (known, known_body) =
        post_json(&app, "/auth/otp/request", json!({ "email": "known@example.com" })).await;
    let (unknown, unknown_body) =
        post_json(&app, "/auth/otp/request", json!({ "email": "ghost@example.com" })).await;

    assert_eq!(known, StatusCode::ACCEPTED);
    assert_eq!(unknown, StatusCode::ACCEPTED);
    assert_eq!(known_body, unknown_body);
    assert_eq!(app.notifier.sent_count(), 1);
}

#[tokio::test]
async fn test_request_otp_rejects_malformed_email() {
    let app = TestApp::new();
    let (status, body) =
        post_json(&app, "/auth/otp/request", json!({ "email": "not-an-email" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Validation error");
}

#[tokio::test]
async fn test_login_refresh_logout_round() {
    let app = TestApp::new();
    let principal = app.store.add_principal("ray@example.com");
    app.store.assign_role(principal.principal_id, "reviewer");

    let first = login(&app, "ray@example.com").await;
    assert_eq!(first["token_type"], "Bearer");
    assert_eq!(first["expires_in"], 900);
    assert_eq!(first["principal_id"], principal.principal_id.to_string());

    let stored = app.store.refresh_tokens_for(principal.principal_id);
    assert_eq!(stored[0].created_by_ip, "203.0.113.50");

    let (status, second) = post_json(
        &app,
        "/auth/refresh",
        json!({ "refresh_token": first["refresh_token"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(second["refresh_token"], first["refresh_token"]);

    let (status, body) = post_json(
        &app,
        "/auth/logout",
        json!({ "refresh_token": second["refresh_token"] }),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = post_json(
        &app,
        "/auth/refresh",
        json!({ "refresh_token": second["refresh_token"] }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_failures_are_indistinguishable() {
    let app = TestApp::new();
    app.store.add_principal("uma@example.com");
    let first = login(&app, "uma@example.com").await;

    post_json(
        &app,
        "/auth/refresh",
        json!({ "refresh_token": first["refresh_token"] }),
    )
    .await;

    let (replayed, replayed_body) = post_json(
        &app,
        "/auth/refresh",
        json!({ "refresh_token": first["refresh_token"] }),
    )
    .await;
    let (unknown, unknown_body) = post_json(
        &app,
        "/auth/refresh",
        json!({ "refresh_token": "bogus" }),
    )
    .await;
    let (bad_code, bad_code_body) = post_json(
        &app,
        "/auth/otp/login",
        json!({ "email": "uma@example.com", "code": "999999" }),
    )
    .await;

    for status in [replayed, unknown, bad_code] {
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    assert_eq!(replayed_body, unknown_body);
    assert_eq!(unknown_body, bad_code_body);
    assert_eq!(replayed_body, json!({ "error": "Unauthorized" }));
}

#[tokio::test]
async fn test_shutdown_cancels_requests() {
    let app = TestApp::new();
    app.store.add_principal("vic@example.com");
    app.state.shutdown.cancel();

    let (status, body) =
        post_json(&app, "/auth/otp/request", json!({ "email": "vic@example.com" })).await;
    assert_eq!(status.as_u16(), 499);
    assert_eq!(body["error"], "Request cancelled");
    assert_eq!(app.notifier.sent_count(), 0);
}
