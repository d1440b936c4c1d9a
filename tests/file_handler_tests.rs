mod common;

use axum::http::{header, Method, StatusCode};
use serde_json::json;

use common::http::{json_request, multipart_request, send_json, send_raw, Part};
use common::{create_test_app, MAX_UPLOAD_BYTES};

fn text_file<'a>(file_name: &'a str, data: &'a [u8]) -> Part<'a> {
    Part::File {
        field: "file",
        file_name,
        content_type: "text/plain",
        data,
    }
}

#[tokio::test]
async fn upload_then_download_round_trip() {
    let app = create_test_app();

    let (status, body) = send_json(
        &app.router,
        multipart_request(
            "/api/files/upload",
            &[
                Part::Text("remotePath", "/reports/q1.txt"),
                text_file("ignored.txt", b"quarterly"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["filePath"], "reports/q1.txt");
    assert_eq!(body["size"], 9);
    assert!(app.temp_dir.path().join("files/reports/q1.txt").is_file());

    let (status, headers, data) = send_raw(
        &app.router,
        json_request(
            Method::POST,
            "/api/files/download",
            &json!({ "remotePath": "reports/q1.txt" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"q1.txt\""
    );
    assert_eq!(&data[..], b"quarterly");
}

#[tokio::test]
async fn upload_without_path_uses_file_name() {
    let app = create_test_app();

    let (status, body) = send_json(
        &app.router,
        multipart_request("/api/files/upload", &[text_file("hello.txt", b"hi")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["filePath"], "hello.txt");
}

#[tokio::test]
async fn upload_over_the_limit_is_rejected() {
    let app = create_test_app();
    let oversized = vec![b'x'; MAX_UPLOAD_BYTES as usize + 1];

    let (status, body) = send_json(
        &app.router,
        multipart_request(
            "/api/files/upload",
            &[
                Part::Text("remotePath", "big.txt"),
                text_file("big.txt", &oversized),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["success"], false);
    assert!(!app.temp_dir.path().join("files/big.txt").exists());
}

#[tokio::test]
async fn upload_with_disallowed_type_is_rejected() {
    let app = create_test_app();

    let (status, body) = send_json(
        &app.router,
        multipart_request(
            "/api/files/upload",
            &[
                Part::Text("remotePath", "setup.exe"),
                Part::File {
                    field: "file",
                    file_name: "setup.exe",
                    content_type: "application/x-msdownload",
                    data: b"MZ",
                },
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn traversal_is_rejected_both_ways() {
    let app = create_test_app();

    let (status, body) = send_json(
        &app.router,
        multipart_request(
            "/api/files/upload",
            &[
                Part::Text("remotePath", "../outside.txt"),
                text_file("outside.txt", b"x"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "PATH_ERROR");
    assert!(!app.temp_dir.path().join("outside.txt").exists());

    let (status, body) = send_json(
        &app.router,
        json_request(
            Method::POST,
            "/api/files/download",
            &json!({ "remotePath": "reports/../../etc/passwd" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "PATH_ERROR");
}

#[tokio::test]
async fn download_of_missing_file_is_not_found() {
    let app = create_test_app();
    let (status, body) = send_json(
        &app.router,
        json_request(
            Method::POST,
            "/api/files/download",
            &json!({ "remotePath": "nothing-here.bin" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}
