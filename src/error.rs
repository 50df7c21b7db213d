// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum OtaError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream fetch failed: {0}")]
    UpstreamFetchFailed(String),

    #[error("storage failure: {0}")]
    StorageFailure(#[from] std::io::Error),
}

impl OtaError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        OtaError::InvalidArgument(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        OtaError::UpstreamFetchFailed(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OtaError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            OtaError::NotFound(_) => StatusCode::NOT_FOUND,
            OtaError::UpstreamFetchFailed(_) | OtaError::StorageFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<reqwest::Error> for OtaError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OtaError::upstream(format!("timed out: {e}"))
        } else if let Some(status) = e.status() {
            OtaError::upstream(format!("upstream returned {status}"))
        } else {
            OtaError::upstream(e.to_string())
        }
    }
}

impl IntoResponse for OtaError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            OtaError::StorageFailure(e) => {
                error!("{e}");
                "storage failure".to_string()
            }
            OtaError::UpstreamFetchFailed(_) => {
                error!("{self}");
                self.to_string()
            }
            _ => self.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
