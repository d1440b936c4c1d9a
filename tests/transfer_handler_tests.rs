mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use shellbridge::session::ConnectionRequest;
use shellbridge::transfer::TransferStatus;

use common::http::{empty_request, json_request, multipart_request, send_json, Part};
use common::{create_test_app, create_test_app_with, default_connector, wait_for_terminal, TestApp};

//===============
// Test Helpers
//===============
async fn connected_session(app: &TestApp) -> String {
    let session = app
        .state
        .registry
        .create_session(ConnectionRequest {
            hostname: "h".into(),
            username: "u".into(),
            password: Some("p".into()),
            ..Default::default()
        })
        .expect("create session");
    app.state
        .registry
        .connect(&session.id)
        .await
        .expect("connect session");
    session.id
}

fn file_part<'a>(file_name: &'a str, data: &'a [u8]) -> Part<'a> {
    Part::File {
        field: "files",
        file_name,
        content_type: "application/octet-stream",
        data,
    }
}

async fn queue_download(app: &TestApp, body: Value) -> (StatusCode, Value) {
    send_json(
        &app.router,
        json_request(Method::POST, "/api/transfers/download", &body),
    )
    .await
}

async fn get(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    send_json(&app.router, empty_request(Method::GET, uri)).await
}

async fn post(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    send_json(&app.router, empty_request(Method::POST, uri)).await
}

fn ids(body: &Value) -> Vec<String> {
    body["transferIds"]
        .as_array()
        .expect("transferIds")
        .iter()
        .map(|id| id.as_str().unwrap().to_string())
        .collect()
}

//==========
// Queueing
//==========

#[tokio::test]
async fn queued_uploads_land_on_the_remote() {
    let app = create_test_app();
    let id = connected_session(&app).await;

    let (status, body) = send_json(
        &app.router,
        multipart_request(
            "/api/transfers/upload",
            &[
                Part::Text("sessionId", &id),
                Part::Text("remotePath", "/home/u/docs"),
                file_part("a.bin", b"alpha"),
                file_part("b.bin", b"bravo!"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let transfer_ids = ids(&body);
    assert_eq!(transfer_ids.len(), 2);

    for transfer_id in &transfer_ids {
        let record = wait_for_terminal(&app.state, transfer_id).await;
        assert_eq!(record.status, TransferStatus::Completed, "{:?}", record.error);
    }
    assert_eq!(app.connector.file("/home/u/docs/a.bin").as_deref(), Some(&b"alpha"[..]));
    assert_eq!(app.connector.file("/home/u/docs/b.bin").as_deref(), Some(&b"bravo!"[..]));

    let (status, body) = get(&app, "/api/transfers/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["completed"], 2);
    assert_eq!(body["stats"]["totalBytes"], 11);
}

#[tokio::test]
async fn queued_download_is_written_to_the_download_dir() {
    let app = create_test_app();
    let id = connected_session(&app).await;

    let (status, body) = queue_download(
        &app,
        json!({ "sessionId": id, "remotePath": "/home/u/notes.txt" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let transfer_id = body["transferId"].as_str().expect("transferId").to_string();

    let record = wait_for_terminal(&app.state, &transfer_id).await;
    assert_eq!(record.status, TransferStatus::Completed, "{:?}", record.error);
    assert_eq!(record.size, 17);

    let local = app.temp_dir.path().join("downloads/notes.txt");
    assert_eq!(std::fs::read(&local).expect("downloaded file"), b"remember the milk");

    let (status, body) = get(&app, &format!("/api/transfers/{transfer_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transfer"]["status"], "completed");
    assert_eq!(body["transfer"]["direction"], "download");
    assert_eq!(body["transfer"]["transferred"], 17);
}

#[tokio::test]
async fn sftp_transfers_require_a_session() {
    let app = create_test_app();

    let (status, body) = queue_download(&app, json!({ "remotePath": "/home/u/notes.txt" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = send_json(
        &app.router,
        multipart_request(
            "/api/transfers/upload",
            &[Part::Text("remotePath", "/home/u"), file_part("a.bin", b"a")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn traversal_in_queued_paths_is_rejected() {
    let app = create_test_app();
    let id = connected_session(&app).await;

    let (status, body) = queue_download(
        &app,
        json!({ "sessionId": id, "remotePath": "/home/u/../../etc/shadow" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(app.state.transfers.get_active_transfers().is_empty());
}

//=================
// Cancel / Retry
//=================

#[tokio::test]
async fn unknown_transfer_is_not_found() {
    let app = create_test_app();

    let (status, _) = get(&app, "/api/transfers/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = post(&app, "/api/transfers/nope/cancel").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = post(&app, "/api/transfers/nope/retry").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn finished_transfer_cannot_be_cancelled_or_retried() {
    let app = create_test_app();
    let id = connected_session(&app).await;

    let (_, body) = queue_download(
        &app,
        json!({ "sessionId": id, "remotePath": "/home/u/notes.txt" }),
    )
    .await;
    let transfer_id = body["transferId"].as_str().unwrap().to_string();
    wait_for_terminal(&app.state, &transfer_id).await;

    let (status, body) = post(&app, &format!("/api/transfers/{transfer_id}/cancel")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = post(&app, &format!("/api/transfers/{transfer_id}/retry")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn slow_transfer_can_be_cancelled() {
    let app = create_test_app_with(
        default_connector()
            .with_file("/home/u/big.bin", vec![7u8; 4096])
            .with_io_delay(Duration::from_millis(50)),
        |_| {},
    );
    let id = connected_session(&app).await;

    let (_, body) = queue_download(
        &app,
        json!({ "sessionId": id, "remotePath": "/home/u/big.bin" }),
    )
    .await;
    let transfer_id = body["transferId"].as_str().unwrap().to_string();

    let (status, body) = post(&app, &format!("/api/transfers/{transfer_id}/cancel")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["transfer"]["status"], "cancelled");

    let (_, body) = get(&app, "/api/transfers").await;
    assert!(body["transfers"].as_array().unwrap().is_empty());
    let (_, body) = get(&app, "/api/transfers/history").await;
    assert_eq!(body["transfers"][0]["id"], transfer_id.as_str());
}

#[tokio::test]
async fn timed_out_download_is_marked_retryable() {
    let app = create_test_app_with(default_connector().fail_transfers_after(4), |_| {});
    let id = connected_session(&app).await;

    let (_, body) = queue_download(
        &app,
        json!({ "sessionId": id, "remotePath": "/home/u/notes.txt" }),
    )
    .await;
    let transfer_id = body["transferId"].as_str().unwrap().to_string();

    let record = wait_for_terminal(&app.state, &transfer_id).await;
    assert_eq!(record.status, TransferStatus::Error);
    assert!(record.retryable);

    let (status, body) = post(&app, &format!("/api/transfers/{transfer_id}/retry")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["transfer"]["status"], "pending");
    assert_eq!(body["transfer"]["attempts"], 2);
}

//=========
// History
//=========

#[tokio::test]
async fn clearing_history_reports_the_count() {
    let app = create_test_app();
    let id = connected_session(&app).await;

    for _ in 0..2 {
        let (_, body) = queue_download(
            &app,
            json!({ "sessionId": id, "remotePath": "/home/u/notes.txt" }),
        )
        .await;
        wait_for_terminal(&app.state, body["transferId"].as_str().unwrap()).await;
    }

    let (status, body) = send_json(
        &app.router,
        empty_request(Method::DELETE, "/api/transfers/history"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], 2);

    let (_, body) = get(&app, "/api/transfers/history").await;
    assert!(body["transfers"].as_array().unwrap().is_empty());
}
