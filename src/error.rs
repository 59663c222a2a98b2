//! Typed errors with HTTP-grade status codes and response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Every error kind the core can surface. The discriminant carries the
/// canonical message; the status code is derived in [`ErrorKind::code`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token")]
    InvalidToken,
    #[error("forbidden")]
    Forbidden,
    #[error("permission denied")]
    PermissionDenied,
    #[error("resource not found")]
    NotFound,
    #[error("user not found")]
    UserNotFound,
    #[error("role not found")]
    RoleNotFound,
    #[error("role binding not found")]
    RoleBindingNotFound,
    #[error("conflict")]
    Conflict,
    #[error("user already exists")]
    UserExists,
    #[error("role already exists")]
    RoleExists,
    #[error("role binding already exists")]
    RoleBindingExists,
    #[error("resource already exists")]
    AlreadyExists,
    #[error("unique constraint violation")]
    UniqueViolation,
    #[error("invalid input")]
    InvalidInput,
    #[error("invalid field type")]
    InvalidFieldType,
    #[error("invalid JSON format")]
    InvalidJson,
    #[error("invalid timestamp format")]
    InvalidTimestamp,
    #[error("invalid request")]
    InvalidRequest,
    #[error("internal server error")]
    Internal,
    #[error("storage operation failed")]
    StorageOperation,
    #[error("transaction failed")]
    TransactionFailed,
    #[error("database connection failed")]
    DatabaseConnection,
    #[error("not implemented")]
    NotImplemented,
}

impl ErrorKind {
    /// HTTP status code this kind maps to.
    pub fn code(self) -> u16 {
        use ErrorKind::*;
        match self {
            InvalidCredentials | TokenExpired | InvalidToken => 401,
            Forbidden | PermissionDenied => 403,
            NotFound | UserNotFound | RoleNotFound | RoleBindingNotFound => 404,
            Conflict | UserExists | RoleExists | RoleBindingExists | AlreadyExists
            | UniqueViolation => 409,
            InvalidInput | InvalidFieldType | InvalidJson | InvalidTimestamp | InvalidRequest => {
                400
            }
            Internal | StorageOperation | TransactionFailed | DatabaseConnection => 500,
            NotImplemented => 501,
        }
    }

    /// Attach a free-text reason, producing a full [`Error`].
    pub fn with_reason(self, reason: impl Into<String>) -> Error {
        Error {
            kind: self,
            reason: Some(reason.into()),
            retry_after: None,
        }
    }
}

/// Structured status error: kind, optional reason, optional retry hint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub reason: Option<String>,
    pub retry_after: Option<u32>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            reason: None,
            retry_after: None,
        }
    }

    pub fn code(&self) -> u16 {
        self.kind.code()
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_retry_after(mut self, seconds: u32) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "status {}: {}: {}", self.code(), self.kind, reason),
            None => write!(f, "status {}: {}", self.code(), self.kind),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u32>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            code: self.code(),
            message: self.kind.to_string(),
            reason: self.reason,
            retry_after: self.retry_after,
        };
        (status, Json(body)).into_response()
    }
}
