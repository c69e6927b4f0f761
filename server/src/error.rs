//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use readlist_engine::api::{ErrorBody, DUPLICATE_LIST_CODE, NOT_SET_UP_CODE};

/// Postgres error code of a unique constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Reading lists are not set up for this account")]
    NotSetUp,

    #[error("A reading list named {0} already exists")]
    DuplicateList(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl AppError {
    /// Map a unique violation on list names to a duplicate list error.
    pub fn from_insert(err: sqlx::Error, name: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                AppError::DuplicateList(name.to_string())
            }
            _ => AppError::Database(err),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotSetUp | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateList(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            AppError::NotSetUp => Some(NOT_SET_UP_CODE),
            AppError::DuplicateList(_) => Some(DUPLICATE_LIST_CODE),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            other => {
                tracing::debug!(error = %other, "request rejected");
                other.to_string()
            }
        };

        let body = Json(ErrorBody {
            error,
            code: self.code().map(str::to_string),
            details: None,
        });

        (self.status(), body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(err: AppError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn not_set_up_carries_code() {
        let (status, body) = body_of(AppError::NotSetUp).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code.as_deref(), Some(NOT_SET_UP_CODE));
    }

    #[tokio::test]
    async fn duplicate_list_is_conflict() {
        let (status, body) = body_of(AppError::DuplicateList("Travel".into())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.code.as_deref(), Some(DUPLICATE_LIST_CODE));
        assert!(body.error.contains("Travel"));
    }

    #[tokio::test]
    async fn database_errors_are_opaque() {
        let (status, body) = body_of(AppError::Database(sqlx::Error::RowNotFound)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "Database error");
        assert!(body.code.is_none());
    }
}
