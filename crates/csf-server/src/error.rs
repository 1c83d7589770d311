//! Tagged-kind → HTTP status mapping, the one place `csf-server` branches
//! on error *kind* rather than matching `Display` text.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use csf_auth::AuthError;
use csf_db::StoreError;
use csf_types::{ErrorBody, ErrorDetail, ErrorKind};

#[derive(Debug)]
pub struct ServerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Permanent => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Authentication failures never leak which of the four reasons
        // applied; the message is intentionally generic regardless of the
        // underlying variant.
        let message = if self.kind == ErrorKind::Authentication {
            "authentication failed".to_string()
        } else {
            self.message
        };

        (status_for(self.kind), Json(ErrorBody { error: ErrorDetail { kind: self.kind, message } })).into_response()
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateSubmission => Self::new(ErrorKind::Conflict, e.to_string()),
            StoreError::NotFound => Self::new(ErrorKind::NotFound, e.to_string()),
            StoreError::Sqlx(_) => Self::new(ErrorKind::Transient, "store failure".to_string()),
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Signing(_) => Self::new(ErrorKind::Permanent, "token signing failed".to_string()),
            AuthError::Repository(_) => Self::new(ErrorKind::Transient, "store failure".to_string()),
            AuthError::MissingCredential
            | AuthError::Unrecognized
            | AuthError::TokenExpired
            | AuthError::Revoked
            | AuthError::GenerationMismatch
            | AuthError::ReplayDetected
            | AuthError::BadCredentials => Self::new(ErrorKind::Authentication, e.to_string()),
        }
    }
}
