//! gRPC utilities shared by services.
//!
//! - Error conversion between `AppError` and `tonic::Status`
//! - Trace context propagation and metadata helpers

pub mod error;
pub mod interceptors;

pub use error::{ERROR_CAUSE_KEY, ERROR_TYPE_KEY, GrpcResult, IntoStatus, kind_to_code};
pub use interceptors::{
    REQUEST_ID_KEY, TRACEPARENT_KEY, extract_request_id, metadata_str, trace_context_interceptor,
};

// Re-export commonly used tonic types
pub use tonic::{Code, Request, Response, Status};
