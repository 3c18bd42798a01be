//! Session and authorization endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::session::{CreateSessionRequest, SessionResponse};
use crate::middleware::{AuthSession, ClientInfo};
use crate::services::SessionRequest;
use crate::startup::AppState;

/// POST /v1/sessions
pub async fn create_session(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let credentials = req.session;
    let request = SessionRequest {
        domain: credentials.domain,
        user: credentials.user.reference(),
        password: Some(credentials.user.password),
        user_agent: client.user_agent,
        remote_addr: client.remote_addr,
    };

    let session = state.authority.create(request).await?;
    Ok((StatusCode::CREATED, Json(SessionResponse { session })))
}

/// HEAD /v1/sessions/current
pub async fn check_current(_session: AuthSession) -> StatusCode {
    StatusCode::OK
}

/// GET /v1/sessions/current
pub async fn get_current(AuthSession(session): AuthSession) -> Json<SessionResponse> {
    Json(SessionResponse { session })
}

/// DELETE /v1/sessions/current
pub async fn delete_current(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
) -> Result<StatusCode, AppError> {
    state.authority.delete(&session.id).await?;
    tracing::info!(user_id = %session.user.id, "Session closed");
    Ok(StatusCode::ACCEPTED)
}

/// HEAD /v1/assert/role/:role
pub async fn assert_role(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(role): Path<String>,
) -> Result<StatusCode, AppError> {
    let granted = state
        .authorization
        .assert_role(&session.user.id, &role)
        .await?;
    Ok(granted_status(granted))
}

/// HEAD /v1/assert/permission/:permission
pub async fn assert_permission(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(permission): Path<String>,
) -> Result<StatusCode, AppError> {
    let granted = state
        .authorization
        .assert_permission(&session.user.id, &permission)
        .await?;
    Ok(granted_status(granted))
}

fn granted_status(granted: bool) -> StatusCode {
    if granted {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}
