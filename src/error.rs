//! Error handling

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use serde_json::json;

use crate::serializers::FieldErrors;
use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Auth errors
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid")]
    TokenInvalid,
    #[error("unauthorized")]
    Unauthorized,

    // Resource errors
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),

    // Validation errors
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("invalid fields: {0:?}")]
    InvalidFields(FieldErrors),
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    // Database errors
    #[error("database error: {0}")]
    DatabaseError(String),

    // Generic errors
    #[error("internal error: {0}")]
    InternalError(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials
            | AppError::TokenExpired
            | AppError::TokenInvalid
            | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::ValidationError(_) | AppError::InvalidFields(_) => StatusCode::BAD_REQUEST,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::DatabaseError(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            AppError::InvalidCredentials => "Invalid username or password",
            AppError::TokenExpired => "Token has expired",
            AppError::TokenInvalid => "Invalid token",
            AppError::Unauthorized => "Authentication required",
            AppError::NotFound(msg) => msg.as_str(),
            AppError::AlreadyExists(msg) => msg.as_str(),
            AppError::ValidationError(msg) => msg.as_str(),
            AppError::InvalidFields(_) => "Validation failed",
            AppError::UnsupportedMediaType(msg) => msg.as_str(),
            AppError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                "Database error occurred"
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error"
            }
        };

        let body = match &self {
            AppError::InvalidFields(fields) => json!({
                "error": error_message,
                "status": status.as_u16(),
                "fields": fields,
            }),
            _ => json!({
                "error": error_message,
                "status": status.as_u16()
            }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => AppError::AlreadyExists(msg),
            // Acting user vanished between authentication and the write
            StoreError::UnknownUser(_) => AppError::Unauthorized,
            StoreError::Database(err) => AppError::DatabaseError(err.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::TokenExpired,
            _ => AppError::TokenInvalid,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = FieldErrors::new();
        for (field, errs) in errors.field_errors() {
            for err in errs {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string());
                fields.add(field, message);
            }
        }
        AppError::InvalidFields(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::TokenExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::ValidationError("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InvalidFields(FieldErrors::new()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::AlreadyExists("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::DatabaseError("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_internal_details_are_not_leaked() {
        let response = AppError::DatabaseError("connection refused to 10.0.0.5".into()).into_response();
        let json = body_json(response).await;
        assert_eq!(json["error"], "Database error occurred");
        assert_eq!(json["status"], 500);
    }

    #[tokio::test]
    async fn test_field_errors_in_body() {
        let mut fields = FieldErrors::new();
        fields.add("dataset_type", "\"bogus\" is not a valid choice.");
        let json = body_json(AppError::InvalidFields(fields).into_response()).await;
        assert_eq!(json["status"], 400);
        assert_eq!(json["fields"]["dataset_type"][0], "\"bogus\" is not a valid choice.");
    }

    #[test]
    fn test_conflict_maps_to_already_exists() {
        let err: AppError = StoreError::Conflict("Username already taken".into()).into();
        assert!(matches!(err, AppError::AlreadyExists(_)));
    }
}
