// ABOUTME: API error type translating session failures into HTTP status codes

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::docker::ContainerError;
use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    GatewayTimeout(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Conflict(_) => Self::Conflict(err.to_string()),
            SessionError::NotFound(_) => Self::NotFound(err.to_string()),
            SessionError::ReadyTimeout { .. } => Self::GatewayTimeout(err.to_string()),
            SessionError::Activation(_) | SessionError::Backend(_) => {
                Self::BadGateway(err.to_string())
            }
            // "No such container" from the runtime is a caller-visible 404;
            // anything else it reports is on us.
            SessionError::Runtime(ContainerError::NotFound(_)) => {
                Self::NotFound(err.to_string())
            }
            SessionError::Runtime(_) => Self::Internal(err.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        if status.is_server_error() {
            error!("request failed: {}", message);
        } else {
            warn!("request rejected: {}", message);
        }

        (status, Json(ErrorBody { error: message })).into_response()
    }
}
