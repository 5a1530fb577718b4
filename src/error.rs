use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::forms::{FieldError, FormError};
use crate::domain::lifecycle::LifecycleError;
use crate::services::attachments::AttachmentError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("submitted form data is invalid")]
    InvalidSubmission(Vec<FieldError>),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("too many requests, slow down")]
    RateLimited,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidSubmission(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                json!({ "success": false, "message": "internal server error" })
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                json!({ "success": false, "message": "internal server error" })
            }
            AppError::InvalidSubmission(errors) => json!({
                "success": false,
                "message": self.to_string(),
                "errors": errors,
            }),
            other => json!({ "success": false, "message": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
            LifecycleError::InvalidSatisfaction(_) | LifecycleError::EmptyAssignee => {
                AppError::Validation(err.to_string())
            }
        }
    }
}

impl From<FormError> for AppError {
    fn from(err: FormError) -> Self {
        match err {
            FormError::NameCollision(_) => AppError::Conflict(err.to_string()),
            _ => AppError::Validation(err.to_string()),
        }
    }
}

impl From<AttachmentError> for AppError {
    fn from(err: AttachmentError) -> Self {
        match err {
            AttachmentError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            AttachmentError::Io(_) => AppError::Internal(err.to_string()),
            _ => AppError::Validation(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

/// True when a query failed on a unique constraint.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

pub type AppResult<T> = Result<T, AppError>;
