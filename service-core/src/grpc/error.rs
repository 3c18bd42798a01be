//! Conversion between `AppError` and `tonic::Status`.
//!
//! | ErrorKind | gRPC Status | x-error-type |
//! |-----------|-------------|--------------|
//! | `NotFound` | `NOT_FOUND` | `NotFoundError` |
//! | `Conflict` | `INVALID_ARGUMENT` | `BadRequestError` |
//! | `Forbidden` | `PERMISSION_DENIED` | `ForbiddenError` |
//! | `Operational` | `INTERNAL` | `ServerError` |

use tonic::{Code, Status};

use crate::error::{AppError, ErrorDomain, ErrorKind};

/// Metadata key naming the RPC error type of a failed call.
pub const ERROR_TYPE_KEY: &str = "x-error-type";

/// Metadata key carrying the cause of a failed call, when disclosed.
pub const ERROR_CAUSE_KEY: &str = "x-error-cause";

/// Extension trait for converting types into `tonic::Status`.
pub trait IntoStatus {
    /// Convert into a `tonic::Status`.
    fn into_status(self) -> Status;
}

pub fn kind_to_code(kind: ErrorKind) -> Code {
    match kind {
        ErrorKind::NotFound => Code::NotFound,
        ErrorKind::Conflict => Code::InvalidArgument,
        ErrorKind::Forbidden => Code::PermissionDenied,
        ErrorKind::Operational => Code::Internal,
    }
}

impl IntoStatus for AppError {
    fn into_status(self) -> Status {
        let kind = self.kind();

        let cause = if kind == ErrorKind::Operational {
            // Log the full error but don't expose it to clients
            tracing::error!(error = %self, "Operational error");
            None
        } else {
            self.cause_message()
        };

        let mut status = Status::new(kind_to_code(kind), self.message());
        if let Ok(value) = kind.rpc_error_type().parse() {
            status.metadata_mut().insert(ERROR_TYPE_KEY, value);
        }
        if let Some(cause) = cause
            && let Ok(value) = cause.parse()
        {
            status.metadata_mut().insert(ERROR_CAUSE_KEY, value);
        }
        status
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.into_status()
    }
}

/// Rebuild an `AppError` from a status received by a gRPC client.
impl From<Status> for AppError {
    fn from(status: Status) -> Self {
        let kind = status
            .metadata()
            .get(ERROR_TYPE_KEY)
            .and_then(|v| v.to_str().ok())
            .and_then(ErrorKind::from_rpc_error_type)
            .unwrap_or(match status.code() {
                Code::NotFound => ErrorKind::NotFound,
                Code::InvalidArgument | Code::AlreadyExists | Code::FailedPrecondition => {
                    ErrorKind::Conflict
                }
                Code::PermissionDenied | Code::Unauthenticated => ErrorKind::Forbidden,
                _ => ErrorKind::Operational,
            });

        let err = AppError::new(ErrorDomain::Application, kind, status.message());
        match status
            .metadata()
            .get(ERROR_CAUSE_KEY)
            .and_then(|v| v.to_str().ok())
        {
            Some(cause) => err.with_cause(anyhow::anyhow!("{}", cause)),
            None => err,
        }
    }
}

/// Result type alias for gRPC handlers.
pub type GrpcResult<T> = Result<tonic::Response<T>, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_bad_request() {
        let err = AppError::use_case(ErrorKind::Conflict, "Failed to create domain")
            .with_cause(anyhow::anyhow!("duplicate name"));
        let status: Status = err.into();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "Failed to create domain");
        assert_eq!(
            status.metadata().get(ERROR_TYPE_KEY).unwrap().to_str().unwrap(),
            "BadRequestError"
        );
        assert_eq!(
            status.metadata().get(ERROR_CAUSE_KEY).unwrap().to_str().unwrap(),
            "duplicate name"
        );
    }

    #[test]
    fn test_operational_hides_cause() {
        let err = AppError::data_access(ErrorKind::Operational, "Failed to query")
            .with_cause(anyhow::anyhow!("connection refused"));
        let status = err.into_status();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.metadata().get(ERROR_CAUSE_KEY).is_none());
        assert_eq!(
            status.metadata().get(ERROR_TYPE_KEY).unwrap().to_str().unwrap(),
            "ServerError"
        );
    }

    #[test]
    fn test_every_kind_has_a_code() {
        assert_eq!(kind_to_code(ErrorKind::NotFound), Code::NotFound);
        assert_eq!(kind_to_code(ErrorKind::Forbidden), Code::PermissionDenied);
        assert_eq!(kind_to_code(ErrorKind::Operational), Code::Internal);
    }

    #[test]
    fn test_status_round_trips_kind() {
        let status = AppError::use_case(ErrorKind::Forbidden, "User is disabled").into_status();
        let err: AppError = status.into();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.message(), "User is disabled");
    }

    #[test]
    fn test_plain_status_to_app_error() {
        let err: AppError = Status::not_found("Resource not found").into();
        assert!(err.is_not_found());
    }
}
