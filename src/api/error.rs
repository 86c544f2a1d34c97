//--------------------------------------------------------------------------------------------------
// ENUMS
//--------------------------------------------------------------------------------------------------
// | Name            | Description                                      | Key Methods         |
// |-----------------|--------------------------------------------------|---------------------|
// | ApiError        | Error types for the API                          | from, into_response |
//--------------------------------------------------------------------------------------------------

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::domain::services::errors::{EngineError, ErrorKind};

/// Type alias for Result with ApiError
pub type ApiResult<T> = Result<T, ApiError>;

/// API-specific error types
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// A guard in the engine refused the operation
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The request was malformed before it reached the engine
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Caller identity headers are missing or unreadable
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is identified but may not read this resource
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl ApiError {
    /// `(status, kind)` reported for this error.
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Engine(e) => match e.kind() {
                ErrorKind::Validation => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
                ErrorKind::StateConflict => (StatusCode::CONFLICT, "state_conflict"),
                ErrorKind::Authorization => (StatusCode::FORBIDDEN, "authorization"),
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                ErrorKind::LimitExceeded => (StatusCode::UNPROCESSABLE_ENTITY, "limit_exceeded"),
                ErrorKind::Upstream => (StatusCode::BAD_GATEWAY, "upstream"),
            },
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "authorization"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "authorization"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();

        let body = Json(json!({
            "error": {
                "kind": kind,
                "message": self.to_string(),
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_engine_errors_map_to_status_codes() {
        let id = Uuid::nil();
        let cases = [
            (EngineError::Validation("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (EngineError::SelfMatchForbidden(id), StatusCode::CONFLICT),
            (EngineError::NotAuthorized { actor: id, action: "x" }, StatusCode::FORBIDDEN),
            (EngineError::NotFound { entity: "order", id }, StatusCode::NOT_FOUND),
            (
                EngineError::OpenOrderLimitExceeded { limit: 1, what: "orders" },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).into_response().status(), status);
        }
    }
}
