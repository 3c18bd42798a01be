use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Layer an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    DataAccess,
    UseCase,
    Application,
}

impl ErrorDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorDomain::DataAccess => "DataAccess",
            ErrorDomain::UseCase => "UseCase",
            ErrorDomain::Application => "Application",
        }
    }
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong, independent of the layer or transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Referenced entity is absent.
    NotFound,
    /// Validation failure, uniqueness violation or partially resolved batch.
    Conflict,
    /// Authentication or authorization denial.
    Forbidden,
    /// Anything unexpected: I/O, driver, broken invariants.
    Operational,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Operational => "OPERATIONAL",
        }
    }

    /// HTTP status a transport should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::BAD_REQUEST,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Operational => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Name of the RPC error type carried alongside a gRPC status.
    pub fn rpc_error_type(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Conflict => "BadRequestError",
            ErrorKind::Forbidden => "ForbiddenError",
            ErrorKind::Operational => "ServerError",
        }
    }

    pub fn from_rpc_error_type(value: &str) -> Option<Self> {
        match value {
            "NotFoundError" => Some(ErrorKind::NotFound),
            "BadRequestError" => Some(ErrorKind::Conflict),
            "ForbiddenError" => Some(ErrorKind::Forbidden),
            "ServerError" => Some(ErrorKind::Operational),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed error shared by every layer of a service.
#[derive(Debug, Error)]
#[error("{domain}::{kind} ERROR: {message}{}", caused_by(.cause))]
pub struct AppError {
    domain: ErrorDomain,
    kind: ErrorKind,
    message: String,
    cause: Option<anyhow::Error>,
}

fn caused_by(cause: &Option<anyhow::Error>) -> String {
    match cause {
        Some(cause) => format!(" | CAUSED BY {}", cause),
        None => String::new(),
    }
}

impl AppError {
    pub fn new(domain: ErrorDomain, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            domain,
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn data_access(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::DataAccess, kind, message)
    }

    pub fn use_case(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::UseCase, kind, message)
    }

    pub fn application(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Application, kind, message)
    }

    pub fn not_found(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::new(domain, ErrorKind::NotFound, message)
    }

    pub fn conflict(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::new(domain, ErrorKind::Conflict, message)
    }

    pub fn forbidden(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::new(domain, ErrorKind::Forbidden, message)
    }

    pub fn operational(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::new(domain, ErrorKind::Operational, message)
    }

    /// Attach the lower-level error that triggered this one.
    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Re-raise in another layer with extra context, keeping the kind.
    pub fn wrap(self, domain: ErrorDomain, message: impl Into<String>) -> Self {
        let kind = self.kind;
        Self::new(domain, kind, message).with_cause(self)
    }

    pub fn domain(&self) -> ErrorDomain {
        self.domain
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }

    /// Message of the immediate cause. A wrapped `AppError` contributes only
    /// its own message, so driver details further down the chain stay out.
    pub fn cause_message(&self) -> Option<String> {
        self.cause.as_ref().map(|cause| match cause.downcast_ref::<AppError>() {
            Some(inner) => inner.message().to_string(),
            None => cause.to_string(),
        })
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_operational(&self) -> bool {
        self.kind == ErrorKind::Operational
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::application(ErrorKind::Conflict, "Validation error").with_cause(err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::application(ErrorKind::Operational, "Configuration error").with_cause(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::application(ErrorKind::Operational, "I/O error").with_cause(err)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorPayload,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>, cause: Option<String>) -> Self {
        Self {
            error: ErrorPayload {
                code: status.as_u16(),
                title: status.canonical_reason().unwrap_or("Error").to_string(),
                message: message.into(),
                cause,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.kind.status_code();

        // Operational details stay in the logs.
        let cause = if self.is_operational() {
            tracing::error!(error = %self, "Operational error");
            None
        } else {
            tracing::debug!(error = %self, "Request failed");
            self.cause_message()
        };

        (status, Json(ErrorResponse::new(status, self.message, cause))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_domain_kind_and_cause() {
        let err = AppError::use_case(ErrorKind::Conflict, "Domain is invalid")
            .with_cause(anyhow::anyhow!("Name cannot be empty"));
        assert_eq!(
            err.to_string(),
            "UseCase::CONFLICT ERROR: Domain is invalid | CAUSED BY Name cannot be empty"
        );

        let err = AppError::data_access(ErrorKind::NotFound, "Session not found");
        assert_eq!(err.to_string(), "DataAccess::NOT FOUND ERROR: Session not found");
    }

    #[test]
    fn wrap_keeps_kind() {
        let err = AppError::data_access(ErrorKind::Forbidden, "denied")
            .wrap(ErrorDomain::UseCase, "Failed to create session");
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.domain(), ErrorDomain::UseCase);
        assert!(err.cause().is_some());
    }

    #[test]
    fn kinds_map_to_http_status() {
        assert_eq!(ErrorKind::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::Conflict.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorKind::Operational.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn cause_message_stops_at_wrapped_error() {
        let inner = AppError::data_access(ErrorKind::Conflict, "Domain name already exists")
            .with_cause(anyhow::anyhow!("duplicate key value violates unique constraint"));
        let err = inner.wrap(ErrorDomain::UseCase, "Failed to create domain");
        assert_eq!(
            err.cause_message().as_deref(),
            Some("Domain name already exists")
        );
    }

    #[tokio::test]
    async fn response_body_hides_operational_cause() {
        let err = AppError::data_access(ErrorKind::Operational, "Failed to query")
            .with_cause(anyhow::anyhow!("connection reset"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], 500);
        assert_eq!(body["error"]["message"], "Failed to query");
        assert!(body["error"].get("cause").is_none());
    }

    #[tokio::test]
    async fn response_body_carries_client_error_cause() {
        let err = AppError::use_case(ErrorKind::Conflict, "Failed to create domain")
            .with_cause(anyhow::anyhow!("name already taken"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["title"], "Bad Request");
        assert_eq!(body["error"]["cause"], "name already taken");
    }
}
