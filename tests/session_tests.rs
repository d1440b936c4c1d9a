mod common;

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use shellbridge::remote::mock::MockConnector;

use common::http::{empty_request, json_request, send_json};
use common::{create_test_app, create_test_app_with, TestApp};

fn connection_body() -> Value {
    json!({
        "hostname": "example.internal",
        "port": 2222,
        "username": "deploy",
        "password": "hunter2",
    })
}

async fn create_session(app: &TestApp) -> String {
    let (status, body) = send_json(
        &app.router,
        json_request(Method::POST, "/api/session/create", &connection_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["sessionId"].as_str().expect("sessionId").to_string()
}

async fn connect(app: &TestApp, id: &str) -> (StatusCode, Value) {
    send_json(
        &app.router,
        json_request(Method::POST, "/api/session/connect", &json!({ "sessionId": id })),
    )
    .await
}

#[tokio::test]
async fn health_check_responds_ok() {
    let app = create_test_app();
    let (status, _, body) =
        common::http::send_raw(&app.router, empty_request(Method::GET, "/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn create_returns_summary_without_credentials() {
    let app = create_test_app();
    let (status, body) = send_json(
        &app.router,
        json_request(Method::POST, "/api/session/create", &connection_body()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let session = &body["session"];
    assert_eq!(session["id"], body["sessionId"]);
    assert_eq!(session["hostname"], "example.internal");
    assert_eq!(session["port"], 2222);
    assert_eq!(session["name"], "deploy@example.internal");
    assert_eq!(session["connected"], false);
    assert!(!body.to_string().contains("hunter2"));
    assert_eq!(app.connector.connect_count(), 0);
}

#[tokio::test]
async fn create_rejects_missing_hostname() {
    let app = create_test_app();
    let (status, body) = send_json(
        &app.router,
        json_request(
            Method::POST,
            "/api/session/create",
            &json!({ "username": "deploy", "password": "x" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn connect_then_list_shows_connected_session() {
    let app = create_test_app();
    let id = create_session(&app).await;

    let (status, body) = connect(&app, &id).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["session"]["connected"], true);

    let (status, body) =
        send_json(&app.router, empty_request(Method::GET, "/api/session/list")).await;
    assert_eq!(status, StatusCode::OK);
    let sessions = body["sessions"].as_array().expect("sessions array");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], id.as_str());
    assert_eq!(sessions[0]["connected"], true);
    assert!(sessions[0]["lastActivity"].is_string());
    assert!(sessions[0]["createdAt"].is_string());
}

#[tokio::test]
async fn connect_failure_is_a_gateway_error() {
    let app = create_test_app_with(
        MockConnector::new().fail_connect("Connection refused (os error 111)"),
        |_| {},
    );
    let id = create_session(&app).await;

    let (status, body) = connect(&app, &id).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "CONNECTION_ERROR");
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Connection refused"));
}

#[tokio::test]
async fn connect_unknown_session_is_not_found() {
    let app = create_test_app();
    let (status, body) = connect(&app, "does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn disconnect_removes_session_and_is_idempotent() {
    let app = create_test_app();
    let id = create_session(&app).await;
    connect(&app, &id).await;

    for _ in 0..2 {
        let (status, body) = send_json(
            &app.router,
            json_request(
                Method::POST,
                "/api/session/disconnect",
                &json!({ "sessionId": id }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    assert!(app.state.registry.get_session(&id).is_none());
    assert_eq!(app.connector.dispose_count(), 1);
}

#[tokio::test]
async fn failed_session_cannot_be_reconnected() {
    let app = create_test_app_with(MockConnector::new().fail_connect("No route to host"), |_| {});
    let id = create_session(&app).await;

    let (status, _) = connect(&app, &id).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, body) = connect(&app, &id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["error"].as_str().unwrap().contains("create a new session"));
    assert_eq!(app.connector.connect_count(), 1);
}
