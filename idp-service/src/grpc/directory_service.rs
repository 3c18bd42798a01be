//! DirectoryService gRPC implementation. Every call requires the admin role.

use std::sync::Arc;

use service_core::error::AppError;
use service_core::grpc::GrpcResult;
use tonic::Request;
use validator::Validate;

use crate::dtos::admin as dto;
use crate::grpc::context::{observe, CallContext};
use crate::grpc::convert::{
    bare_user_to_proto, domain_to_proto, non_empty, page_info, page_request, permission_to_proto,
    role_to_proto, session_to_proto, user_to_proto,
};
use crate::grpc::proto::directory_service_server::DirectoryService;
use crate::grpc::proto::*;
use crate::models::DomainStats;
use crate::services::Directory;

pub struct DirectoryServiceImpl {
    ctx: CallContext,
    directory: Arc<Directory>,
}

impl DirectoryServiceImpl {
    pub fn new(ctx: CallContext, directory: Arc<Directory>) -> Self {
        Self { ctx, directory }
    }
}

fn names(values: Vec<String>) -> dto::NamesRequest {
    dto::NamesRequest { names: values }
}

#[tonic::async_trait]
impl DirectoryService for DirectoryServiceImpl {
    // =========================================================================
    // Domains
    // =========================================================================

    async fn create_domain(
        &self,
        request: Request<CreateDomainRequest>,
    ) -> GrpcResult<DomainResponse> {
        observe("CreateDomain", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let domain = self
                .directory
                .create_domain(dto::CreateDomainRequest {
                    name: req.name,
                    description: req.description,
                    enabled: req.enabled,
                })
                .await?;
            tracing::info!(domain_id = %domain.id, name = %domain.name, "Domain created");
            Ok(DomainResponse {
                domain: Some(domain_to_proto(DomainStats {
                    domain,
                    users_count: 0,
                })),
            })
        })
        .await
    }

    async fn get_domain(&self, request: Request<GetDomainRequest>) -> GrpcResult<DomainResponse> {
        observe("GetDomain", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let id = &request.get_ref().id;
            let domain = self.directory.get_domain(id).await?;
            let users_count = self.directory.count_users(id).await?;
            Ok(DomainResponse {
                domain: Some(domain_to_proto(DomainStats {
                    domain,
                    users_count,
                })),
            })
        })
        .await
    }

    async fn list_domains(
        &self,
        request: Request<ListDomainsRequest>,
    ) -> GrpcResult<ListDomainsResponse> {
        observe("ListDomains", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let (pager, sorter) = page_request(req.page);
            let user_id = non_empty(req.user_id);
            let page = self
                .directory
                .list_domains(user_id.as_deref(), &pager, &sorter)
                .await?;
            Ok(ListDomainsResponse {
                page_info: page_info(page.paginator),
                domains: page.items.into_iter().map(domain_to_proto).collect(),
            })
        })
        .await
    }

    async fn update_domain(
        &self,
        request: Request<UpdateDomainRequest>,
    ) -> GrpcResult<DomainResponse> {
        observe("UpdateDomain", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let domain = self
                .directory
                .update_domain(
                    &req.id,
                    dto::UpdateDomainRequest {
                        name: req.name,
                        description: req.description,
                        enabled: req.enabled,
                    },
                )
                .await?;
            let users_count = self.directory.count_users(&domain.id).await?;
            Ok(DomainResponse {
                domain: Some(domain_to_proto(DomainStats {
                    domain,
                    users_count,
                })),
            })
        })
        .await
    }

    async fn delete_domain(&self, request: Request<DeleteDomainRequest>) -> GrpcResult<Empty> {
        observe("DeleteDomain", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            self.directory.delete_domain(&request.get_ref().id).await?;
            Ok(Empty {})
        })
        .await
    }

    // =========================================================================
    // Users
    // =========================================================================

    async fn create_user(&self, request: Request<CreateUserRequest>) -> GrpcResult<UserResponse> {
        observe("CreateUser", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let user = self
                .directory
                .create_user(dto::CreateUserRequest {
                    name: req.name,
                    password: req.password,
                    enabled: req.enabled,
                    domain_ids: req.domain_ids,
                })
                .await?;
            tracing::info!(user_id = %user.id, name = %user.name, "User created");
            Ok(UserResponse {
                user: Some(bare_user_to_proto(user)),
            })
        })
        .await
    }

    async fn get_user(&self, request: Request<GetUserRequest>) -> GrpcResult<UserResponse> {
        observe("GetUser", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let id = &request.get_ref().id;
            let user = self.directory.get_user(id).await?;
            let mut user = bare_user_to_proto(user);
            user.domains_count = self.directory.count_domains(id).await?;
            Ok(UserResponse { user: Some(user) })
        })
        .await
    }

    async fn list_users(&self, request: Request<ListUsersRequest>) -> GrpcResult<ListUsersResponse> {
        observe("ListUsers", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let (pager, sorter) = page_request(req.page);
            let domain_id = non_empty(req.domain_id);
            let page = self
                .directory
                .list_users(domain_id.as_deref(), &pager, &sorter)
                .await?;
            Ok(ListUsersResponse {
                page_info: page_info(page.paginator),
                users: page.items.into_iter().map(user_to_proto).collect(),
            })
        })
        .await
    }

    async fn update_user(&self, request: Request<UpdateUserRequest>) -> GrpcResult<UserResponse> {
        observe("UpdateUser", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let user = self
                .directory
                .update_user(
                    &req.id,
                    dto::UpdateUserRequest {
                        name: req.name,
                        password: req.password,
                        enabled: req.enabled,
                        add_domain_ids: req.add_domain_ids,
                        remove_domain_ids: req.remove_domain_ids,
                    },
                )
                .await?;
            let mut proto_user = bare_user_to_proto(user);
            proto_user.domains_count = self.directory.count_domains(&proto_user.id).await?;
            Ok(UserResponse {
                user: Some(proto_user),
            })
        })
        .await
    }

    async fn delete_user(&self, request: Request<DeleteUserRequest>) -> GrpcResult<Empty> {
        observe("DeleteUser", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            self.directory.delete_user(&request.get_ref().id).await?;
            Ok(Empty {})
        })
        .await
    }

    async fn assign_roles(&self, request: Request<UserRolesRequest>) -> GrpcResult<Empty> {
        observe("AssignRoles", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let roles = names(req.roles);
            roles.validate().map_err(AppError::from)?;
            self.directory.assign_roles(&req.user_id, &roles.names).await?;
            Ok(Empty {})
        })
        .await
    }

    async fn revoke_roles(&self, request: Request<UserRolesRequest>) -> GrpcResult<Empty> {
        observe("RevokeRoles", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let roles = names(req.roles);
            roles.validate().map_err(AppError::from)?;
            self.directory.revoke_roles(&req.user_id, &roles.names).await?;
            Ok(Empty {})
        })
        .await
    }

    // =========================================================================
    // Roles
    // =========================================================================

    async fn create_role(&self, request: Request<CreateRoleRequest>) -> GrpcResult<RoleResponse> {
        observe("CreateRole", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let role = self
                .directory
                .create_role(dto::CreateRoleRequest {
                    name: req.name,
                    description: req.description,
                    enabled: req.enabled,
                })
                .await?;
            Ok(RoleResponse {
                role: Some(role_to_proto(role)),
            })
        })
        .await
    }

    async fn get_role(&self, request: Request<GetRoleRequest>) -> GrpcResult<RoleResponse> {
        observe("GetRole", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let role = self.directory.get_role(&request.get_ref().name).await?;
            Ok(RoleResponse {
                role: Some(role_to_proto(role)),
            })
        })
        .await
    }

    async fn list_roles(&self, request: Request<ListRolesRequest>) -> GrpcResult<ListRolesResponse> {
        observe("ListRoles", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let (pager, sorter) = page_request(req.page);
            let user_id = non_empty(req.user_id);
            let page = self
                .directory
                .list_roles(user_id.as_deref(), &pager, &sorter)
                .await?;
            Ok(ListRolesResponse {
                page_info: page_info(page.paginator),
                roles: page.items.into_iter().map(role_to_proto).collect(),
            })
        })
        .await
    }

    async fn update_role(&self, request: Request<UpdateRoleRequest>) -> GrpcResult<RoleResponse> {
        observe("UpdateRole", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let role = self
                .directory
                .update_role(
                    &req.name,
                    dto::UpdateRoleRequest {
                        description: req.description,
                        enabled: req.enabled,
                    },
                )
                .await?;
            Ok(RoleResponse {
                role: Some(role_to_proto(role)),
            })
        })
        .await
    }

    async fn rename_role(&self, request: Request<RenameRequest>) -> GrpcResult<RoleResponse> {
        observe("RenameRole", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let rename = dto::RenameRequest {
                new_name: req.new_name,
            };
            rename.validate().map_err(AppError::from)?;
            let role = self.directory.rename_role(&req.name, &rename.new_name).await?;
            Ok(RoleResponse {
                role: Some(role_to_proto(role)),
            })
        })
        .await
    }

    async fn delete_role(&self, request: Request<DeleteRoleRequest>) -> GrpcResult<Empty> {
        observe("DeleteRole", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            self.directory.delete_role(&request.get_ref().name).await?;
            Ok(Empty {})
        })
        .await
    }

    async fn add_permissions_to_role(
        &self,
        request: Request<RolePermissionsRequest>,
    ) -> GrpcResult<Empty> {
        observe("AddPermissionsToRole", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let permissions = names(req.permissions);
            permissions.validate().map_err(AppError::from)?;
            self.directory
                .add_permissions(&req.role, &permissions.names)
                .await?;
            Ok(Empty {})
        })
        .await
    }

    async fn remove_permissions_from_role(
        &self,
        request: Request<RolePermissionsRequest>,
    ) -> GrpcResult<Empty> {
        observe("RemovePermissionsFromRole", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let permissions = names(req.permissions);
            permissions.validate().map_err(AppError::from)?;
            self.directory
                .remove_permissions(&req.role, &permissions.names)
                .await?;
            Ok(Empty {})
        })
        .await
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    async fn create_permission(
        &self,
        request: Request<CreatePermissionRequest>,
    ) -> GrpcResult<PermissionResponse> {
        observe("CreatePermission", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let permission = self
                .directory
                .create_permission(dto::CreatePermissionRequest {
                    name: req.name,
                    description: req.description,
                    evaluation_rule: req.evaluation_rule,
                    enabled: req.enabled,
                })
                .await?;
            Ok(PermissionResponse {
                permission: Some(permission_to_proto(permission)),
            })
        })
        .await
    }

    async fn get_permission(
        &self,
        request: Request<GetPermissionRequest>,
    ) -> GrpcResult<PermissionResponse> {
        observe("GetPermission", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let permission = self
                .directory
                .get_permission(&request.get_ref().name)
                .await?;
            Ok(PermissionResponse {
                permission: Some(permission_to_proto(permission)),
            })
        })
        .await
    }

    async fn list_permissions(
        &self,
        request: Request<ListPermissionsRequest>,
    ) -> GrpcResult<ListPermissionsResponse> {
        observe("ListPermissions", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let (pager, sorter) = page_request(req.page);
            let role = non_empty(req.role);
            let page = self
                .directory
                .list_permissions(role.as_deref(), &pager, &sorter)
                .await?;
            Ok(ListPermissionsResponse {
                page_info: page_info(page.paginator),
                permissions: page.items.into_iter().map(permission_to_proto).collect(),
            })
        })
        .await
    }

    async fn update_permission(
        &self,
        request: Request<UpdatePermissionRequest>,
    ) -> GrpcResult<PermissionResponse> {
        observe("UpdatePermission", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let permission = self
                .directory
                .update_permission(
                    &req.name,
                    dto::UpdatePermissionRequest {
                        description: req.description,
                        evaluation_rule: req.evaluation_rule,
                        enabled: req.enabled,
                    },
                )
                .await?;
            Ok(PermissionResponse {
                permission: Some(permission_to_proto(permission)),
            })
        })
        .await
    }

    async fn rename_permission(
        &self,
        request: Request<RenameRequest>,
    ) -> GrpcResult<PermissionResponse> {
        observe("RenamePermission", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let req = request.into_inner();
            let rename = dto::RenameRequest {
                new_name: req.new_name,
            };
            rename.validate().map_err(AppError::from)?;
            let permission = self
                .directory
                .rename_permission(&req.name, &rename.new_name)
                .await?;
            Ok(PermissionResponse {
                permission: Some(permission_to_proto(permission)),
            })
        })
        .await
    }

    async fn delete_permission(
        &self,
        request: Request<DeletePermissionRequest>,
    ) -> GrpcResult<Empty> {
        observe("DeletePermission", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            self.directory
                .delete_permission(&request.get_ref().name)
                .await?;
            Ok(Empty {})
        })
        .await
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    async fn list_sessions(
        &self,
        request: Request<ListSessionsRequest>,
    ) -> GrpcResult<ListSessionsResponse> {
        observe("ListSessions", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let (pager, sorter) = page_request(request.into_inner().page);
            let page = self.ctx.authority().list(&pager, &sorter).await?;
            Ok(ListSessionsResponse {
                page_info: page_info(page.paginator),
                sessions: page.items.into_iter().map(session_to_proto).collect(),
            })
        })
        .await
    }

    async fn purge_sessions(
        &self,
        request: Request<PurgeSessionsRequest>,
    ) -> GrpcResult<PurgeSessionsResponse> {
        observe("PurgeSessions", async move {
            self.ctx
                .require_admin(&request, &request.get_ref().session_id)
                .await?;
            let purged = self.ctx.authority().purge().await?;
            Ok(PurgeSessionsResponse { purged })
        })
        .await
    }
}
