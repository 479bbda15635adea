use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use fitness_core::FheError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error")]
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl From<FheError> for ApiError {
    fn from(e: FheError) -> Self {
        match e {
            FheError::ProofInvalid(_) | FheError::InputCount { .. } | FheError::Encoding(_) => {
                ApiError::BadRequest(e.to_string())
            }
            FheError::TypeMismatch { .. } => ApiError::BadRequest(e.to_string()),
            FheError::UnauthorizedDecryption(_) => ApiError::Forbidden(e.to_string()),
            FheError::UnknownHandle(_) => ApiError::NotFound(e.to_string()),
            FheError::SubmissionLimit => ApiError::Conflict(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ApiError::Config(_) | ApiError::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(ErrorBody { error: msg })).into_response()
    }
}
