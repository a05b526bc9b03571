use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Application error type for the HTTP surface
#[derive(Debug)]
pub enum AppError {
    /// Per-client connection limit reached
    TooManyRequests(String),
    /// Server-wide capacity reached
    ServiceUnavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::TooManyRequests(msg) => {
                tracing::warn!("Too many requests: {}", msg);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Too many connections from your IP address",
                )
            }
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Server at capacity, please try again later",
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::TooManyRequests(msg) => write!(f, "Too many requests: {msg}"),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_body() {
        let response = AppError::TooManyRequests("10.0.0.1".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], 429);
        assert!(value["error"].as_str().unwrap().contains("Too many"));
    }

    #[tokio::test]
    async fn test_capacity_body() {
        let response = AppError::ServiceUnavailable("global".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], 503);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            AppError::TooManyRequests("10.0.0.1".to_string()).to_string(),
            "Too many requests: 10.0.0.1"
        );
    }
}
