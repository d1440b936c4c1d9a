//! Response builders shared by the download endpoints.

use anyhow::Context;
use axum::{body::Body, http::header, http::Response};

use crate::common::AppError;

/// Binary attachment with type, disposition and length headers.
pub fn attachment(name: &str, data: Vec<u8>) -> Result<Response<Body>, AppError> {
    Ok(Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", header_safe_name(name)),
        )
        .header(header::CONTENT_LENGTH, data.len())
        .body(Body::from(data))
        .context("build download response")?)
}

// Quoted-string safe: no quotes, backslashes or control characters
fn header_safe_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_download_headers() {
        let response = attachment("report.pdf", vec![0u8; 12]).unwrap();
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"report.pdf\""
        );
        assert_eq!(headers[header::CONTENT_LENGTH], "12");
    }

    #[test]
    fn strips_quotes_from_names() {
        assert_eq!(header_safe_name("a\"b\n.txt"), "a_b_.txt");
        assert_eq!(header_safe_name(""), "download");
    }
}
