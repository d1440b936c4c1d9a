//! Body extractors whose rejections use the `AppError` envelope.

use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum_typed_multipart::{TypedMultipart, TypedMultipartError};

use crate::common::AppError;

/// JSON request body.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}

/// Typed multipart form body.
pub struct MultipartForm<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for MultipartForm<T>
where
    TypedMultipart<T>: FromRequest<S, Rejection = TypedMultipartError>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let TypedMultipart(value) = TypedMultipart::<T>::from_request(req, state).await?;
        Ok(MultipartForm(value))
    }
}

fn rejected(status: StatusCode, message: String) -> AppError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(message)
    } else {
        AppError::Validation(message)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        rejected(rejection.status(), rejection.body_text())
    }
}

impl From<TypedMultipartError> for AppError {
    fn from(err: TypedMultipartError) -> Self {
        let message = err.to_string();
        rejected(err.into_response().status(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct SessionBody {
        session_id: String,
    }

    fn request(content_type: &str, body: &'static str) -> Request {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", content_type)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn parses_valid_json() {
        let JsonBody(body) =
            JsonBody::<SessionBody>::from_request(request("application/json", r#"{"sessionId":"s1"}"#), &())
                .await
                .unwrap();
        assert_eq!(body.session_id, "s1");
    }

    #[tokio::test]
    async fn missing_field_is_a_validation_error() {
        let err = JsonBody::<SessionBody>::from_request(request("application/json", r#"{"path":"/"}"#), &())
            .await
            .err()
            .expect("rejected");
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("sessionId"));
    }

    #[tokio::test]
    async fn wrong_content_type_is_a_validation_error() {
        let err = JsonBody::<SessionBody>::from_request(request("text/plain", "sessionId=s1"), &())
            .await
            .err()
            .expect("rejected");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
