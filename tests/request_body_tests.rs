mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};

use common::create_test_app;
use common::http::{json_request, multipart_request, send_raw, Part};

async fn assert_envelope(app: &common::TestApp, request: Request<Body>) {
    let uri = request.uri().to_string();
    let (status, headers, body) = send_raw(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    assert_eq!(headers[header::CONTENT_TYPE], "application/json", "{uri}");

    let body: Value = serde_json::from_slice(&body).expect("json error body");
    assert_eq!(body["success"], false, "{uri}");
    assert_eq!(body["code"], "VALIDATION_ERROR", "{uri}");
    assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()), "{uri}");
}

#[tokio::test]
async fn json_routes_reject_missing_fields_with_the_error_envelope() {
    let app = create_test_app();
    let cases = [
        ("/api/session/connect", json!({})),
        ("/api/session/disconnect", json!({ "id": "s" })),
        ("/api/sftp/list", json!({ "path": "/" })),
        ("/api/sftp/download", json!({ "sessionId": "s" })),
        ("/api/sftp/operation", json!({ "sessionId": "s" })),
        ("/api/files/download", json!({})),
        ("/api/transfers/download", json!({ "sessionId": "s" })),
    ];

    for (uri, body) in cases {
        assert_envelope(&app, json_request(Method::POST, uri, &body)).await;
    }
}

#[tokio::test]
async fn unparseable_json_uses_the_error_envelope() {
    let app = create_test_app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/session/create")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"hostname\": "))
        .unwrap();
    assert_envelope(&app, request).await;
}

#[tokio::test]
async fn multipart_routes_reject_missing_fields_with_the_error_envelope() {
    let app = create_test_app();
    let file = Part::File {
        field: "file",
        file_name: "a.txt",
        content_type: "text/plain",
        data: b"a",
    };
    let files = Part::File {
        field: "files",
        file_name: "a.txt",
        content_type: "text/plain",
        data: b"a",
    };

    assert_envelope(
        &app,
        multipart_request("/api/sftp/upload", &[Part::Text("remotePath", "/home/u"), file]),
    )
    .await;
    assert_envelope(
        &app,
        multipart_request("/api/files/upload", &[Part::Text("remotePath", "a.txt")]),
    )
    .await;
    assert_envelope(
        &app,
        multipart_request("/api/transfers/upload", &[Part::Text("sessionId", "s"), files]),
    )
    .await;
}
