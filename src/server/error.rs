use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::{IngestError, SchedulerError, SessionError, VectorStoreError};
use crate::server::protocol::MessageResponse;

/// Error returned by a route handler, rendered as `{"message": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Session(SessionError),
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Session(SessionError::Unauthorized) => StatusCode::FORBIDDEN,
            ApiError::Session(SessionError::Chain(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Session(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::Session(e) => e.to_string(),
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Internal(msg) => {
                msg.clone()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.message(), "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self.message(), "request rejected");
        }
        (status, Json(MessageResponse::new(self.message()))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::Session(err)
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<VectorStoreError> for ApiError {
    fn from(err: VectorStoreError) -> Self {
        match err {
            VectorStoreError::InvalidTenant(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::DirectoryNotFound(path) => {
                ApiError::NotFound(format!("Directory {} not found", path.display()))
            }
            IngestError::VectorStore(err) => err.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
