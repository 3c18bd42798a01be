//! Administrative endpoints under `/v1/admin`. Every route requires the admin role.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::admin::{
    CreateDomainRequest, CreatePermissionRequest, CreateRoleRequest, CreateUserRequest,
    DomainList, DomainResponse, ListParams, NamesRequest, PermissionList, PermissionResponse,
    PurgeResponse, RenameRequest, RoleList, RoleResponse, SessionList, UpdateDomainRequest,
    UpdatePermissionRequest, UpdateRoleRequest, UpdateUserRequest, UserList, UserResponse,
};
use crate::startup::AppState;

// ============================================================================
// Domains
// ============================================================================

/// POST /v1/admin/domains
pub async fn create_domain(
    State(state): State<AppState>,
    Json(req): Json<CreateDomainRequest>,
) -> Result<(StatusCode, Json<DomainResponse>), AppError> {
    let domain = state.directory.create_domain(req).await?;
    tracing::info!(domain_id = %domain.id, name = %domain.name, "Domain created");
    Ok((StatusCode::CREATED, Json(DomainResponse { domain })))
}

/// GET /v1/admin/domains/:id
pub async fn get_domain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DomainResponse>, AppError> {
    let domain = state.directory.get_domain(&id).await?;
    Ok(Json(DomainResponse { domain }))
}

/// GET /v1/admin/domains
pub async fn list_domains(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<DomainList>, AppError> {
    let page = state
        .directory
        .list_domains(None, &params.pager(), &params.sorter())
        .await?;
    Ok(Json(page.into()))
}

/// GET /v1/admin/users/:id/domains
pub async fn list_user_domains(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<DomainList>, AppError> {
    let page = state
        .directory
        .list_domains(Some(&user_id), &params.pager(), &params.sorter())
        .await?;
    Ok(Json(page.into()))
}

/// PUT /v1/admin/domains/:id
pub async fn update_domain(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateDomainRequest>,
) -> Result<Json<DomainResponse>, AppError> {
    let domain = state.directory.update_domain(&id, req).await?;
    Ok(Json(DomainResponse { domain }))
}

/// DELETE /v1/admin/domains/:id
pub async fn delete_domain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.directory.delete_domain(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Users
// ============================================================================

/// POST /v1/admin/users
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = state.directory.create_user(req).await?;
    tracing::info!(user_id = %user.id, name = %user.name, "User created");
    Ok((StatusCode::CREATED, Json(UserResponse { user })))
}

/// GET /v1/admin/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.directory.get_user(&id).await?;
    Ok(Json(UserResponse { user }))
}

/// GET /v1/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<UserList>, AppError> {
    let page = state
        .directory
        .list_users(None, &params.pager(), &params.sorter())
        .await?;
    Ok(Json(page.into()))
}

/// GET /v1/admin/domains/:id/users
pub async fn list_domain_users(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<UserList>, AppError> {
    let page = state
        .directory
        .list_users(Some(&domain_id), &params.pager(), &params.sorter())
        .await?;
    Ok(Json(page.into()))
}

/// PUT /v1/admin/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.directory.update_user(&id, req).await?;
    Ok(Json(UserResponse { user }))
}

/// DELETE /v1/admin/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.directory.delete_user(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/admin/users/:id/roles
pub async fn list_user_roles(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<RoleList>, AppError> {
    let page = state
        .directory
        .list_roles(Some(&user_id), &params.pager(), &params.sorter())
        .await?;
    Ok(Json(page.into()))
}

/// POST /v1/admin/users/:id/roles
pub async fn assign_roles(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<NamesRequest>,
) -> Result<StatusCode, AppError> {
    req.validate()?;
    state.directory.assign_roles(&user_id, &req.names).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/admin/users/:id/roles
pub async fn revoke_roles(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<NamesRequest>,
) -> Result<StatusCode, AppError> {
    req.validate()?;
    state.directory.revoke_roles(&user_id, &req.names).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Roles
// ============================================================================

/// POST /v1/admin/roles
pub async fn create_role(
    State(state): State<AppState>,
    Json(req): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<RoleResponse>), AppError> {
    let role = state.directory.create_role(req).await?;
    Ok((StatusCode::CREATED, Json(RoleResponse { role })))
}

/// GET /v1/admin/roles/:name
pub async fn get_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RoleResponse>, AppError> {
    let role = state.directory.get_role(&name).await?;
    Ok(Json(RoleResponse { role }))
}

/// GET /v1/admin/roles
pub async fn list_roles(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<RoleList>, AppError> {
    let page = state
        .directory
        .list_roles(None, &params.pager(), &params.sorter())
        .await?;
    Ok(Json(page.into()))
}

/// PUT /v1/admin/roles/:name
pub async fn update_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<RoleResponse>, AppError> {
    let role = state.directory.update_role(&name, req).await?;
    Ok(Json(RoleResponse { role }))
}

/// POST /v1/admin/roles/:name/rename
pub async fn rename_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<RoleResponse>, AppError> {
    req.validate()?;
    let role = state.directory.rename_role(&name, &req.new_name).await?;
    Ok(Json(RoleResponse { role }))
}

/// DELETE /v1/admin/roles/:name
pub async fn delete_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.directory.delete_role(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/admin/roles/:name/permissions
pub async fn list_role_permissions(
    State(state): State<AppState>,
    Path(role): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<PermissionList>, AppError> {
    let page = state
        .directory
        .list_permissions(Some(&role), &params.pager(), &params.sorter())
        .await?;
    Ok(Json(page.into()))
}

/// POST /v1/admin/roles/:name/permissions
pub async fn add_permissions(
    State(state): State<AppState>,
    Path(role): Path<String>,
    Json(req): Json<NamesRequest>,
) -> Result<StatusCode, AppError> {
    req.validate()?;
    state.directory.add_permissions(&role, &req.names).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/admin/roles/:name/permissions
pub async fn remove_permissions(
    State(state): State<AppState>,
    Path(role): Path<String>,
    Json(req): Json<NamesRequest>,
) -> Result<StatusCode, AppError> {
    req.validate()?;
    state.directory.remove_permissions(&role, &req.names).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Permissions
// ============================================================================

/// POST /v1/admin/permissions
pub async fn create_permission(
    State(state): State<AppState>,
    Json(req): Json<CreatePermissionRequest>,
) -> Result<(StatusCode, Json<PermissionResponse>), AppError> {
    let permission = state.directory.create_permission(req).await?;
    Ok((StatusCode::CREATED, Json(PermissionResponse { permission })))
}

/// GET /v1/admin/permissions/:name
pub async fn get_permission(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PermissionResponse>, AppError> {
    let permission = state.directory.get_permission(&name).await?;
    Ok(Json(PermissionResponse { permission }))
}

/// GET /v1/admin/permissions
pub async fn list_permissions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<PermissionList>, AppError> {
    let page = state
        .directory
        .list_permissions(None, &params.pager(), &params.sorter())
        .await?;
    Ok(Json(page.into()))
}

/// PUT /v1/admin/permissions/:name
pub async fn update_permission(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<UpdatePermissionRequest>,
) -> Result<Json<PermissionResponse>, AppError> {
    let permission = state.directory.update_permission(&name, req).await?;
    Ok(Json(PermissionResponse { permission }))
}

/// POST /v1/admin/permissions/:name/rename
pub async fn rename_permission(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<PermissionResponse>, AppError> {
    req.validate()?;
    let permission = state
        .directory
        .rename_permission(&name, &req.new_name)
        .await?;
    Ok(Json(PermissionResponse { permission }))
}

/// DELETE /v1/admin/permissions/:name
pub async fn delete_permission(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.directory.delete_permission(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Sessions
// ============================================================================

/// GET /v1/admin/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<SessionList>, AppError> {
    let page = state
        .authority
        .list(&params.pager(), &params.sorter())
        .await?;
    Ok(Json(page.into()))
}

/// POST /v1/admin/sessions/purge
pub async fn purge_sessions(State(state): State<AppState>) -> Result<Json<PurgeResponse>, AppError> {
    let purged = state.authority.purge().await?;
    Ok(Json(PurgeResponse { purged }))
}
