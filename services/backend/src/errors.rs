use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shared::errors::{ErrorCategory, ErrorCode, ServiceError};

use crate::domain::TransitionError;
use crate::repository::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Collapse into the wire-level error shape
    pub fn to_service_error(&self) -> ServiceError {
        match self {
            AppError::Service(err) => err.clone(),
            AppError::Store(StoreError::NotFound { entity: "bet", id }) => {
                ServiceError::bet_not_found(id)
            }
            AppError::Store(StoreError::NotFound { entity: "batch", id }) => {
                ServiceError::batch_not_found(id)
            }
            AppError::Store(StoreError::NotFound { entity, id }) => ServiceError::new(
                ErrorCategory::NotFound,
                ErrorCode::INTERNAL_UNEXPECTED,
                format!("{} not found: {}", entity, id),
            ),
            AppError::Store(StoreError::Conflict { entity, id, expected }) => {
                ServiceError::version_conflict(entity, id, expected)
            }
            AppError::Store(StoreError::Database(err)) => ServiceError::database_error(err),
            AppError::Store(err @ StoreError::Corrupt { .. }) => ServiceError::new(
                ErrorCategory::Internal,
                ErrorCode::INTERNAL_DATABASE_QUERY,
                "Stored record could not be decoded",
            )
            .with_context(err.to_string()),
            AppError::Transition(err) => {
                ServiceError::invalid_transition(err.entity, err.from, err.to)
            }
            AppError::Internal(err) => {
                ServiceError::internal("Internal server error").with_context(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error = self.to_service_error();
        let status = StatusCode::from_u16(error.category.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match error.category.log_level() {
            "error" => tracing::error!(error_code = %error.code, error = %error, "Request failed"),
            "warn" => tracing::warn!(error_code = %error.code, error = %error, "Request rejected"),
            _ => tracing::info!(error_code = %error.code, error = %error, "Request rejected"),
        }

        metrics::counter!(
            "errors_total",
            "category" => format!("{:?}", error.category),
            "code" => error.code.clone()
        )
        .increment(1);

        let mut body = json!({
            "error": {
                "code": error.code,
                "message": error.message,
                "category": format!("{:?}", error.category),
            }
        });
        // Internal details stay in the logs
        if let Some(context) = error.context.filter(|_| error.category != ErrorCategory::Internal) {
            body["error"]["context"] = json!(context);
        }

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
