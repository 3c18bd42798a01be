use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::{AppError, ErrorDomain, ErrorResponse};

use crate::models::Session;
use crate::startup::AppState;

pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";
pub const REAL_IP_HEADER: &str = "x-real-ip";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// The client a request came from, as far as session binding is concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: String,
    pub remote_addr: String,
}

impl ClientInfo {
    /// With `trust_proxy_headers`, `X-Real-IP` wins over the first
    /// `X-Forwarded-For` entry, which wins over the peer address. Those headers
    /// are client-controlled unless a proxy in front of the service overwrites
    /// them, so only trust them behind one.
    pub fn from_headers(
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        trust_proxy_headers: bool,
    ) -> Self {
        let forwarded = || {
            header_str(headers, REAL_IP_HEADER)
                .map(str::to_string)
                .or_else(|| {
                    header_str(headers, FORWARDED_FOR_HEADER)
                        .and_then(|v| v.split(',').next())
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                })
        };
        let remote_addr = trust_proxy_headers
            .then(forwarded)
            .flatten()
            .or_else(|| peer.map(|addr| addr.ip().to_string()))
            .unwrap_or_default();

        Self {
            user_agent: header_str(headers, header::USER_AGENT.as_str())
                .unwrap_or_default()
                .to_string(),
            remote_addr,
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Read the session token from `X-Auth-Token` or `Authorization: Token token="…"`.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = header_str(headers, AUTH_TOKEN_HEADER) {
        return Some(token.to_string());
    }

    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let params = value.strip_prefix("Token ")?.trim();
    let token = params.strip_prefix("token=")?.trim().trim_matches('"');
    (!token.is_empty()).then(|| token.to_string())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new(
            StatusCode::UNAUTHORIZED,
            "Authentication required",
            None,
        )),
    )
        .into_response()
}

/// Validate the caller's session and store it in the request extensions.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = ClientInfo::from_headers(req.headers(), peer, state.trust_proxy_headers);

    let Some(token) = extract_token(req.headers()) else {
        tracing::debug!("Request without a session token");
        return unauthorized();
    };

    match state
        .authority
        .validate(&token, &client.user_agent, &client.remote_addr)
        .await
    {
        Ok(session) => {
            req.extensions_mut().insert(AuthSession(session));
            req.extensions_mut().insert(client);
            next.run(req).await
        }
        Err(err) if err.is_operational() => err.into_response(),
        Err(err) => {
            tracing::debug!(error = %err, "Session rejected");
            unauthorized()
        }
    }
}

/// Require the configured admin role. Runs after `auth_middleware`.
pub async fn admin_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(AuthSession(session)) = req.extensions().get::<AuthSession>().cloned() else {
        return unauthorized();
    };

    match state
        .authorization
        .require_role(&session.user.id, &state.admin_role)
        .await
    {
        Ok(()) => next.run(req).await,
        Err(err) => {
            if !err.is_operational() {
                tracing::warn!(user_id = %session.user.id, "Administrative call without the admin role");
            }
            err.into_response()
        }
    }
}

/// The validated session of the current request.
#[derive(Debug, Clone)]
pub struct AuthSession(pub Session);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthSession>().cloned().ok_or_else(|| {
            AppError::operational(
                ErrorDomain::Application,
                "Session missing from request extensions",
            )
        })
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for ClientInfo {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(client) = parts.extensions.get::<ClientInfo>() {
            return Ok(client.clone());
        }
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Ok(ClientInfo::from_headers(
            &parts.headers,
            peer,
            state.trust_proxy_headers,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_token_from_either_header() {
        assert_eq!(
            extract_token(&headers(&[("x-auth-token", "abc")])).as_deref(),
            Some("abc")
        );
        assert_eq!(
            extract_token(&headers(&[("authorization", "Token token=\"xyz\"")])).as_deref(),
            Some("xyz")
        );
        assert_eq!(extract_token(&headers(&[("authorization", "Bearer xyz")])), None);
        assert_eq!(extract_token(&headers(&[("authorization", "Token token=\"\"")])), None);
        assert_eq!(extract_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_remote_addr_precedence() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();

        let client = ClientInfo::from_headers(
            &headers(&[
                ("x-real-ip", "1.1.1.1"),
                ("x-forwarded-for", "2.2.2.2, 3.3.3.3"),
                ("user-agent", "curl/8"),
            ]),
            Some(peer),
            true,
        );
        assert_eq!(client.remote_addr, "1.1.1.1");
        assert_eq!(client.user_agent, "curl/8");

        let forwarded = headers(&[("x-forwarded-for", "2.2.2.2, 3.3.3.3")]);
        let client = ClientInfo::from_headers(&forwarded, Some(peer), true);
        assert_eq!(client.remote_addr, "2.2.2.2");

        let client = ClientInfo::from_headers(&HeaderMap::new(), Some(peer), true);
        assert_eq!(client.remote_addr, "10.0.0.9");
        assert_eq!(client.user_agent, "");
    }

    #[test]
    fn test_untrusted_proxy_headers_are_ignored() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        let spoofed = headers(&[("x-real-ip", "1.1.1.1"), ("x-forwarded-for", "2.2.2.2")]);

        let client = ClientInfo::from_headers(&spoofed, Some(peer), false);
        assert_eq!(client.remote_addr, "10.0.0.9");
    }
}
