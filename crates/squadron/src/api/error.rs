//! API error envelope.
//!
//! Taxonomy kinds map to HTTP classes; every surfaced error carries its
//! kind so the UI can render it without string matching.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;

use crate::error::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Wrapper turning the domain taxonomy into responses.
#[derive(Debug)]
pub struct ApiError(Error);

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self(Error::NotFound(message.into()))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(Error::Validation(message.into()))
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(Error::Internal(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            "validation" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            "precondition_failed" => StatusCode::PRECONDITION_FAILED,
            "timeout" => StatusCode::REQUEST_TIMEOUT,
            "backend_unavailable" | "cli_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Internal error surfaced to API: {:#}", self.0);
        }

        let mut body = json!({
            "kind": kind,
            "message": self.0.to_string(),
        });
        if let Some(code) = self.0.code() {
            body["details"] = json!({"code": code});
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::AgentBusy("a".into()), StatusCode::CONFLICT),
            (
                Error::PreconditionFailed("x".into()),
                StatusCode::PRECONDITION_FAILED,
            ),
            (Error::Timeout("x".into()), StatusCode::REQUEST_TIMEOUT),
            (
                Error::BackendUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::CliUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
