//! gRPC module for idp-service.

mod context;
mod convert;
mod directory_service;
mod session_service;

pub use context::{client_info, CallContext};
pub use directory_service::DirectoryServiceImpl;
pub use service_core::grpc::trace_context_interceptor;
pub use session_service::{AuthorizationServiceImpl, SessionServiceImpl};

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("idp.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("idp_descriptor");
}
