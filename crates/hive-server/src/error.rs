use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use snafu::Snafu;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Every way a request can fail before reaching a handler's own logic.
/// Mirrors the request-hygiene taxonomy: malformed JSON is 400, missing or
/// wrong auth is 401, an unhandled extractor/service failure is 500.
#[derive(Debug, Snafu)]
pub enum ApiError {
    #[snafu(display("malformed request body: {source}"))]
    BadRequest { source: JsonRejection },
    #[snafu(display("missing or invalid authorization"))]
    Unauthorized,
    #[snafu(display("internal error: {message}"))]
    Internal { message: String },
}

impl From<JsonRejection> for ApiError {
    fn from(source: JsonRejection) -> Self {
        ApiError::BadRequest { source }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorBody { error: "no such route".to_owned() })).into_response()
}
