use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::error;

use chatlink_core::EngineError;
use chatlink_db::repositories::RepositoryError;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

pub type ApiFailure = (StatusCode, Json<ApiError>);

pub fn bad_request(message: impl Into<String>) -> ApiFailure {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: message.into() }))
}

pub fn engine_error(error: EngineError) -> ApiFailure {
    let status = match &error {
        EngineError::IdentityNotFound(_) | EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::AmbiguousIdentity(_) | EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::TokenInvalid | EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::TokenExpired | EngineError::TokenRefreshFailed => StatusCode::UNAUTHORIZED,
        EngineError::RemoteApi(_) => StatusCode::BAD_GATEWAY,
        EngineError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiError { error: error.to_string() }))
}

pub fn db_error(error: RepositoryError) -> ApiFailure {
    error!(error = %error, "repository error while handling request");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError { error: "an internal database error occurred".to_string() }),
    )
}
