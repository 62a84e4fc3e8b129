mod auth_support;

use erp_oauth::client::RequestOptions;
use erp_oauth::AuthError;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use auth_support::{flow_for, memory_store, seed_credentials, TOKEN_PATH};

#[tokio::test]
async fn request_attaches_bearer_token_and_parses_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/resource/Vehicle"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "name": "VEH-0001" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_credentials(&store, "access-1", None);
    let flow = flow_for(&server, store);
    let body = flow
        .api()
        .request("/api/resource/Vehicle", RequestOptions::get())
        .await
        .expect("request");

    assert_eq!(body, json!({ "data": [{ "name": "VEH-0001" }] }));
}

#[tokio::test]
async fn request_defaults_content_type_to_json_when_body_present() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/resource/Vehicle"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_credentials(&store, "access-1", None);
    let flow = flow_for(&server, store);
    flow.api()
        .request(
            "api/resource/Vehicle",
            RequestOptions::post(json!({ "license_plate": "AB-123" })),
        )
        .await
        .expect("request");
}

#[tokio::test]
async fn explicit_authorization_header_is_not_overwritten() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/x"))
        .and(header("authorization", "Bearer custom"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_credentials(&store, "stored-token", None);
    let flow = flow_for(&server, store);
    let options = RequestOptions::get()
        .with_header(reqwest::header::AUTHORIZATION, "Bearer custom");
    flow.api().request("/api/x", options).await.expect("request");
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried_once() {
    let server = MockServer::start().await;
    // Stale token: the first attempt comes back 401.
    Mock::given(method("GET"))
        .and(path("/api/x"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "token_type": "Bearer",
            "refresh_token": "refresh-2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/x"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": "ok" })))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_credentials(&store, "stale", Some("refresh-1"));
    let flow = flow_for(&server, store.clone());
    let body = flow
        .api()
        .request("/api/x", RequestOptions::get())
        .await
        .expect("request");

    assert_eq!(body, json!({ "data": "ok" }));
    assert_eq!(store.access_token().as_deref(), Some("fresh"));
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() {
    let server = MockServer::start().await;
    // Both first attempts go out with the stale token and come back 401.
    Mock::given(method("GET"))
        .and(path("/api/x"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "token_type": "Bearer",
            "refresh_token": "refresh-2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/x"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": "ok" })))
        .expect(2)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_credentials(&store, "stale", Some("refresh-1"));
    let flow = flow_for(&server, store.clone());
    let api = flow.api();
    let (first, second) = tokio::join!(
        api.request("/api/x", RequestOptions::get()),
        api.request("/api/x", RequestOptions::get())
    );

    assert_eq!(first.expect("first request"), json!({ "data": "ok" }));
    assert_eq!(second.expect("second request"), json!({ "data": "ok" }));
    assert_eq!(store.access_token().as_deref(), Some("fresh"));
    assert_eq!(store.refresh_token().as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn failed_refresh_logs_out_and_surfaces_the_original_401() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/x"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "Invalid token"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_credentials(&store, "stale", Some("dead-refresh"));
    let flow = flow_for(&server, store.clone());
    let result = flow.api().request("/api/x", RequestOptions::get()).await;

    match result {
        Err(AuthError::RequestFailed { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "Invalid token");
        }
        other => panic!("expected RequestFailed, got {other:?}"),
    }
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn missing_refresh_token_means_no_refresh_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/x"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_credentials(&store, "stale", None);
    let flow = flow_for(&server, store);
    let result = flow.api().request("/api/x", RequestOptions::get()).await;
    assert!(matches!(
        result,
        Err(AuthError::RequestFailed { status: 401, .. })
    ));
}

#[tokio::test]
async fn non_401_failures_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/x"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "exception": "frappe.exceptions.InternalError"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_credentials(&store, "access-1", Some("refresh-1"));
    let flow = flow_for(&server, store);
    let result = flow.api().request("/api/x", RequestOptions::get()).await;

    match result {
        Err(AuthError::RequestFailed { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "frappe.exceptions.InternalError");
        }
        other => panic!("expected RequestFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn unparseable_success_body_reads_as_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/x"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_credentials(&store, "access-1", None);
    let flow = flow_for(&server, store);
    let body = flow
        .api()
        .request("/api/x", RequestOptions::get())
        .await
        .expect("request");
    assert_eq!(body, json!({}));
}

#[tokio::test]
async fn unparseable_error_body_falls_back_to_status_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/x"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_credentials(&store, "access-1", None);
    let flow = flow_for(&server, store);
    let result = flow.api().request("/api/x", RequestOptions::get()).await;

    match result {
        Err(AuthError::RequestFailed { status, message }) => {
            assert_eq!(status, 502);
            assert_eq!(message, "Bad Gateway");
        }
        other => panic!("expected RequestFailed, got {other:?}"),
    }
}
