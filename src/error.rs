use crate::validation::FieldError;
use thiserror::Error;

/// A record failed its validations; carries every field error found
#[derive(Debug, Error)]
#[error("validation failed: {}", join_errors(.0))]
pub struct ValidationFailed(pub Vec<FieldError>);

/// A record does not exist, or belongs to someone else
#[derive(Debug, Error)]
#[error("{entity} not found")]
pub struct NotFound {
    pub entity: &'static str,
}

impl NotFound {
    pub fn new(entity: &'static str) -> Self {
        NotFound { entity }
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error surfaced at the API boundary
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("missing or unknown user")]
    Unauthorized,

    #[error("You are not authorized to perform this action.")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(not_found) = err.downcast_ref::<NotFound>() {
            return AppError::NotFound(not_found.to_string());
        }
        match err.downcast::<ValidationFailed>() {
            Ok(ValidationFailed(errors)) => AppError::Validation(errors),
            Err(err) => AppError::Internal(err),
        }
    }
}

impl From<ValidationFailed> for AppError {
    fn from(err: ValidationFailed) -> Self {
        AppError::Validation(err.0)
    }
}

impl From<NotFound> for AppError {
    fn from(err: NotFound) -> Self {
        AppError::NotFound(err.to_string())
    }
}

#[cfg(feature = "server")]
mod response {
    use super::AppError;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::Json;

    impl AppError {
        pub fn status(&self) -> StatusCode {
            match self {
                AppError::NotFound(_) => StatusCode::NOT_FOUND,
                AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                AppError::Unauthorized => StatusCode::UNAUTHORIZED,
                AppError::Forbidden => StatusCode::FORBIDDEN,
                AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
                AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            let status = self.status();
            let body = match &self {
                AppError::Validation(errors) => serde_json::json!({
                    "success": false,
                    "error": self.to_string(),
                    "errors": errors,
                }),
                AppError::Internal(err) => {
                    tracing::error!(error = %format!("{:#}", err), "request failed");
                    serde_json::json!({ "success": false, "error": "internal error" })
                }
                _ => serde_json::json!({ "success": false, "error": self.to_string() }),
            };
            (status, Json(body)).into_response()
        }
    }
}
