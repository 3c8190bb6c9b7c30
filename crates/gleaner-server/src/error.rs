use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use gleaner_core::AppError;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self.0 {
            AppError::ValidationError(_) | AppError::SelectorError(_) => {
                (StatusCode::BAD_REQUEST, "validation_error")
            }
            AppError::ExportError(_) => (StatusCode::BAD_REQUEST, "export_error"),
            AppError::SerializationError(_) => (StatusCode::BAD_REQUEST, "serialization_error"),
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            AppError::HttpError(_) | AppError::NetworkError(_) | AppError::BrowserError(_) => {
                (StatusCode::BAD_GATEWAY, "fetch_error")
            }
            AppError::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Generic(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = ErrorResponse::new(error_type, self.0.to_string());
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(AppError::ValidationError("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(AppError::ExportError("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(AppError::Timeout(500)), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_of(AppError::NetworkError("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_of(AppError::DatabaseError("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
