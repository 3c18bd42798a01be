//! Caller identification shared by the gRPC services.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use service_core::grpc::{metadata_str, GrpcResult, IntoStatus};
use tonic::{Code, Request, Response, Status};

use crate::middleware::ClientInfo;
use crate::models::Session;
use crate::services::{
    record_error, record_grpc_request, record_grpc_request_duration, AuthorizationEngine,
    SessionAuthority,
};

/// With `trust_proxy_headers`, `x-real-ip` wins over the first
/// `x-forwarded-for` entry, which wins over the peer address. Only trust the
/// metadata when a proxy in front of the service sets it.
pub fn client_info<T>(request: &Request<T>, trust_proxy_headers: bool) -> ClientInfo {
    let forwarded = || {
        metadata_str(request, "x-real-ip")
            .map(str::to_string)
            .or_else(|| {
                metadata_str(request, "x-forwarded-for")
                    .and_then(|v| v.split(',').next())
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
    };
    let remote_addr = trust_proxy_headers
        .then(forwarded)
        .flatten()
        .or_else(|| request.remote_addr().map(|addr| addr.ip().to_string()))
        .unwrap_or_default();

    ClientInfo {
        user_agent: metadata_str(request, "user-agent")
            .unwrap_or_default()
            .to_string(),
        remote_addr,
    }
}

/// Session checks for session-bound calls.
#[derive(Clone)]
pub struct CallContext {
    authority: Arc<SessionAuthority>,
    authorization: Arc<AuthorizationEngine>,
    admin_role: String,
    trust_proxy_headers: bool,
}

impl CallContext {
    pub fn new(
        authority: Arc<SessionAuthority>,
        authorization: Arc<AuthorizationEngine>,
        admin_role: impl Into<String>,
        trust_proxy_headers: bool,
    ) -> Self {
        Self {
            authority,
            authorization,
            admin_role: admin_role.into(),
            trust_proxy_headers,
        }
    }

    pub fn client_info<T>(&self, request: &Request<T>) -> ClientInfo {
        client_info(request, self.trust_proxy_headers)
    }

    pub fn authority(&self) -> &SessionAuthority {
        &self.authority
    }

    pub fn authorization(&self) -> &AuthorizationEngine {
        &self.authorization
    }

    /// Validate and renew the caller's session.
    #[allow(clippy::result_large_err)]
    pub async fn authenticate<T>(
        &self,
        request: &Request<T>,
        session_id: &str,
    ) -> Result<Session, Status> {
        let client = self.client_info(request);
        match self
            .authority
            .validate(session_id, &client.user_agent, &client.remote_addr)
            .await
        {
            Ok(session) => Ok(session),
            Err(err) if err.is_operational() => Err(err.into_status()),
            Err(err) => {
                tracing::debug!(error = %err, "Session rejected");
                Err(Status::unauthenticated("Authentication required"))
            }
        }
    }

    /// Authenticate, then require the configured admin role.
    #[allow(clippy::result_large_err)]
    pub async fn require_admin<T>(
        &self,
        request: &Request<T>,
        session_id: &str,
    ) -> Result<Session, Status> {
        let session = self.authenticate(request, session_id).await?;
        self.authorization
            .require_role(&session.user.id, &self.admin_role)
            .await
            .map_err(|err| {
                if !err.is_operational() {
                    tracing::warn!(user_id = %session.user.id, "Administrative call without the admin role");
                }
                err.into_status()
            })?;
        Ok(session)
    }
}

fn code_label(code: Code) -> &'static str {
    match code {
        Code::Ok => "ok",
        Code::NotFound => "not_found",
        Code::InvalidArgument => "invalid_argument",
        Code::PermissionDenied => "permission_denied",
        Code::Unauthenticated => "unauthenticated",
        _ => "error",
    }
}

/// Run one call, recording its outcome and latency.
pub async fn observe<T, F>(method: &'static str, call: F) -> GrpcResult<T>
where
    F: Future<Output = Result<T, Status>>,
{
    let start = Instant::now();
    let result = call.await;

    let label = match &result {
        Ok(_) => "ok",
        Err(status) => {
            if status.code() == Code::Internal {
                record_error("internal", method);
            }
            code_label(status.code())
        }
    };
    record_grpc_request(method, label);
    record_grpc_request_duration(method, start.elapsed().as_secs_f64());

    result.map(Response::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_info_from_metadata() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("user-agent", "grpc-client/1.0".parse().unwrap());
        request
            .metadata_mut()
            .insert("x-forwarded-for", "5.6.7.8, 10.0.0.1".parse().unwrap());

        let client = client_info(&request, true);
        assert_eq!(client.user_agent, "grpc-client/1.0");
        assert_eq!(client.remote_addr, "5.6.7.8");

        request
            .metadata_mut()
            .insert("x-real-ip", "1.2.3.4".parse().unwrap());
        assert_eq!(client_info(&request, true).remote_addr, "1.2.3.4");

        // No peer on a hand-built request, so nothing is left once the metadata is ignored.
        assert_eq!(client_info(&request, false).remote_addr, "");
    }

    #[tokio::test]
    async fn test_observe_wraps_response() {
        let response = observe("Test", async { Ok(7u32) }).await.unwrap();
        assert_eq!(response.into_inner(), 7);

        let status = observe::<u32, _>("Test", async { Err(Status::not_found("gone")) })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }
}
