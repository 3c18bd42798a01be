//! SessionService and AuthorizationService gRPC implementations.

use service_core::grpc::GrpcResult;
use tonic::Request;

use crate::grpc::context::{observe, CallContext};
use crate::grpc::convert::{datetime_to_timestamp, entity_ref, session_to_proto};
use crate::grpc::proto::authorization_service_server::AuthorizationService;
use crate::grpc::proto::session_service_server::SessionService;
use crate::grpc::proto::*;
use crate::services::SessionRequest;

pub struct SessionServiceImpl {
    ctx: CallContext,
}

impl SessionServiceImpl {
    pub fn new(ctx: CallContext) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl SessionService for SessionServiceImpl {
    async fn create_session(
        &self,
        request: Request<CreateSessionRequest>,
    ) -> GrpcResult<CreateSessionResponse> {
        observe("CreateSession", async move {
            let client = self.ctx.client_info(&request);
            let req = request.into_inner();

            let session = self
                .ctx
                .authority()
                .create(SessionRequest {
                    domain: entity_ref(req.domain),
                    user: entity_ref(req.user),
                    password: Some(req.password),
                    user_agent: client.user_agent,
                    remote_addr: client.remote_addr,
                })
                .await?;

            Ok(CreateSessionResponse {
                session: Some(session_to_proto(session)),
            })
        })
        .await
    }

    async fn check_session(
        &self,
        request: Request<CheckSessionRequest>,
    ) -> GrpcResult<CheckSessionResponse> {
        observe("CheckSession", async move {
            let session = self
                .ctx
                .authenticate(&request, &request.get_ref().session_id)
                .await?;
            Ok(CheckSessionResponse {
                expires_on: datetime_to_timestamp(session.expires_on),
            })
        })
        .await
    }

    async fn get_session(
        &self,
        request: Request<GetSessionRequest>,
    ) -> GrpcResult<GetSessionResponse> {
        observe("GetSession", async move {
            let session = self
                .ctx
                .authenticate(&request, &request.get_ref().session_id)
                .await?;
            Ok(GetSessionResponse {
                session: Some(session_to_proto(session)),
            })
        })
        .await
    }

    async fn delete_session(
        &self,
        request: Request<DeleteSessionRequest>,
    ) -> GrpcResult<DeleteSessionResponse> {
        observe("DeleteSession", async move {
            let session = self
                .ctx
                .authenticate(&request, &request.get_ref().session_id)
                .await?;
            self.ctx.authority().delete(&session.id).await?;
            tracing::info!(user_id = %session.user.id, "Session closed");
            Ok(DeleteSessionResponse {})
        })
        .await
    }
}

pub struct AuthorizationServiceImpl {
    ctx: CallContext,
}

impl AuthorizationServiceImpl {
    pub fn new(ctx: CallContext) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl AuthorizationService for AuthorizationServiceImpl {
    async fn assert_role(&self, request: Request<AssertRoleRequest>) -> GrpcResult<AssertResponse> {
        observe("AssertRole", async move {
            let session = self
                .ctx
                .authenticate(&request, &request.get_ref().session_id)
                .await?;
            let granted = self
                .ctx
                .authorization()
                .assert_role(&session.user.id, &request.get_ref().role)
                .await?;
            Ok(AssertResponse { granted })
        })
        .await
    }

    async fn assert_permission(
        &self,
        request: Request<AssertPermissionRequest>,
    ) -> GrpcResult<AssertResponse> {
        observe("AssertPermission", async move {
            let session = self
                .ctx
                .authenticate(&request, &request.get_ref().session_id)
                .await?;
            let granted = self
                .ctx
                .authorization()
                .assert_permission(&session.user.id, &request.get_ref().permission)
                .await?;
            Ok(AssertResponse { granted })
        })
        .await
    }
}
