//! HTTP mapping for engine errors

use crate::error::SnoozeError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

impl SnoozeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SnoozeError::Duplicate { .. } => StatusCode::CONFLICT,
            SnoozeError::NotFound(_) => StatusCode::NOT_FOUND,
            SnoozeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SnoozeError::OracleUnavailable { .. }
            | SnoozeError::ChainConnection { .. }
            | SnoozeError::Timeout { .. }
            | SnoozeError::Wallet(_) => StatusCode::SERVICE_UNAVAILABLE,
            SnoozeError::SubmissionRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SnoozeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
