//! HTTP mapping for [`BatchError`].
//!
//! Every error body is `{"error": "<message>"}`. Storage and internal
//! failures are logged in full but answered with a generic message.

use crate::error::BatchError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl BatchError {
    /// Status code this error is answered with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BatchError::NoValidFiles
            | BatchError::MissingField(_)
            | BatchError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BatchError::TooManyFiles { .. } | BatchError::PayloadTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            BatchError::JobNotFound(_)
            | BatchError::JobNotReady { .. }
            | BatchError::FileNotFound { .. } => StatusCode::NOT_FOUND,
            BatchError::AllFilesFailed { .. } => StatusCode::BAD_GATEWAY,
            BatchError::JobFailed { .. }
            | BatchError::ProviderNotConfigured { .. }
            | BatchError::Storage { .. }
            | BatchError::Archive(_)
            | BatchError::InvalidConfig(_)
            | BatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            BatchError::Storage { .. } | BatchError::Archive(_) | BatchError::Internal(_) => {
                tracing::error!("Internal error: {}", self);
                "An internal error occurred".to_string()
            }
            BatchError::AllFilesFailed { .. } | BatchError::JobFailed { .. } => {
                tracing::warn!("{}", self);
                self.to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_errors_are_not_found() {
        assert_eq!(
            BatchError::JobNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BatchError::JobNotReady {
                job_id: "x".into(),
                status: "processing".into()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn total_downstream_failure_is_bad_gateway() {
        let e = BatchError::AllFilesFailed {
            total: 2,
            first_error: "page 1: extraction failed: HTTP 401".into(),
        };
        assert_eq!(e.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn intake_errors() {
        assert_eq!(BatchError::NoValidFiles.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            BatchError::TooManyFiles { count: 5, limit: 2 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
