use crate::db::StoreError;
use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Underlying cause of a 500, only sent to clients in debug mode.
    pub detail: Option<String>,
}

/// Carried on 500 responses so [`reveal_internal_detail`] can rewrite the body.
#[derive(Debug, Clone)]
struct InternalDetail(String);

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Logs the cause and answers with a generic message.
    pub fn internal(err: impl std::error::Error) -> Self {
        error!("request failed: {err}");
        Self {
            detail: Some(err.to_string()),
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, "server error")
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::not_found(err.to_string()),
            StoreError::Invalid { .. } => Self::bad_request(err.to_string()),
            StoreError::Database(_) => Self::internal(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "ok": false, "error": self.message }));
        let mut response = (self.status, body).into_response();
        if let Some(detail) = self.detail {
            response.extensions_mut().insert(InternalDetail(detail));
        }
        response
    }
}

/// Response layer: with the debug flag on, 500 bodies name their cause.
pub async fn reveal_internal_detail(
    State(state): State<AppState>,
    response: Response,
) -> Response {
    with_internal_detail(response, state.config.debug)
}

fn with_internal_detail(response: Response, debug: bool) -> Response {
    if !debug {
        return response;
    }
    let Some(InternalDetail(detail)) = response.extensions().get::<InternalDetail>().cloned()
    else {
        return response;
    };
    let body = Json(json!({ "ok": false, "error": format!("server error: {detail}") }));
    (response.status(), body).into_response()
}
