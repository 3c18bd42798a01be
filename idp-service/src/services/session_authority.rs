//! Session Authority.
//!
//! Issues sessions, binds them to the client they were issued to, renews them
//! on every successful check and removes them on logout or expiry.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use service_core::error::{AppError, ErrorDomain, ErrorKind};
use tracing::{debug, info, instrument, warn};

use crate::models::{Domain, Page, Pager, Session, Sorter, User};
use crate::services::metrics::{record_session_operation, record_sessions_purged};
use crate::services::password::PasswordHasher;
use crate::store::{SessionStore, TenancyStore};

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 30;

/// Reference to a domain or user by external id or by name. The id wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EntityRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl EntityRef {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Everything needed to open a session.
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub domain: EntityRef,
    pub user: EntityRef,
    /// Checked against the stored hash when present. `None` is for trusted
    /// in-process callers only; the transports always supply the credential.
    pub password: Option<String>,
    pub user_agent: String,
    pub remote_addr: String,
}

fn denied() -> AppError {
    AppError::forbidden(ErrorDomain::UseCase, "Authentication failed")
}

fn session_not_found() -> AppError {
    AppError::not_found(ErrorDomain::UseCase, "Session not found")
}

pub struct SessionAuthority {
    tenancy: Arc<dyn TenancyStore>,
    sessions: Arc<dyn SessionStore>,
    hasher: Arc<dyn PasswordHasher>,
    ttl: Duration,
}

impl SessionAuthority {
    /// A zero or negative `ttl` selects the default lifetime.
    pub fn new(
        tenancy: Arc<dyn TenancyStore>,
        sessions: Arc<dyn SessionStore>,
        hasher: Arc<dyn PasswordHasher>,
        ttl: Duration,
    ) -> Self {
        let ttl = if ttl <= Duration::zero() {
            Duration::minutes(DEFAULT_SESSION_TTL_MINUTES)
        } else {
            ttl
        };
        Self {
            tenancy,
            sessions,
            hasher,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn resolve_domain(&self, reference: &EntityRef) -> Result<Domain, AppError> {
        match (reference.id(), reference.name()) {
            (Some(id), _) => self.tenancy.find_domain(id).await,
            (None, Some(name)) => self.tenancy.find_domain_by_name(name).await,
            (None, None) => Err(AppError::conflict(
                ErrorDomain::UseCase,
                "You need to provide domain ID or name",
            )),
        }
    }

    async fn resolve_user(&self, reference: &EntityRef) -> Result<User, AppError> {
        match (reference.id(), reference.name()) {
            (Some(id), _) => self.tenancy.find_user(id).await,
            (None, Some(name)) => self.tenancy.find_user_by_name(name).await,
            (None, None) => Err(AppError::conflict(
                ErrorDomain::UseCase,
                "You need to provide user ID or name",
            )),
        }
    }

    /// Open a session, or renew the one this client already holds.
    ///
    /// Every authentication failure is reported as the same Forbidden error;
    /// the reason is only logged.
    #[instrument(skip(self, request), fields(user_agent = %request.user_agent, remote_addr = %request.remote_addr))]
    pub async fn create(&self, request: SessionRequest) -> Result<Session, AppError> {
        let result = self.authenticate(&request).await;
        let (domain, user) = match result {
            Ok(pair) => pair,
            Err(err) => {
                let outcome = if err.kind() == ErrorKind::Forbidden {
                    "denied"
                } else {
                    "error"
                };
                record_session_operation("create", outcome);
                return Err(err);
            }
        };

        let candidate = Session::issue(
            &domain,
            &user,
            request.user_agent,
            request.remote_addr,
            self.ttl,
        );
        let session = self
            .sessions
            .create_or_reuse(&candidate)
            .await
            .map_err(|e| e.wrap(ErrorDomain::UseCase, "Failed to create session"))?;

        let outcome = if session.id == candidate.id {
            "created"
        } else {
            "reused"
        };
        record_session_operation("create", outcome);
        info!(user_id = %user.id, domain_id = %domain.id, outcome, "Session issued");

        Ok(session)
    }

    async fn authenticate(&self, request: &SessionRequest) -> Result<(Domain, User), AppError> {
        let domain = match self.resolve_domain(&request.domain).await {
            Ok(domain) => domain,
            Err(err) if err.is_not_found() => {
                warn!("Authentication failed: unknown domain");
                return Err(denied());
            }
            Err(err) => return Err(err),
        };

        let user = match self.resolve_user(&request.user).await {
            Ok(user) => user,
            Err(err) if err.is_not_found() => {
                warn!(domain_id = %domain.id, "Authentication failed: unknown user");
                return Err(denied());
            }
            Err(err) => return Err(err),
        };

        if !domain.enabled {
            warn!(domain_id = %domain.id, "Authentication failed: domain disabled");
            return Err(denied());
        }
        if !user.enabled {
            warn!(user_id = %user.id, "Authentication failed: user disabled");
            return Err(denied());
        }
        if let Some(password) = &request.password {
            if password.is_empty() || !self.hasher.verify(password, &user.password_hash) {
                warn!(user_id = %user.id, "Authentication failed: password mismatch");
                return Err(denied());
            }
        }

        match self.tenancy.find_user_in_domain(&user.id, &domain.id).await {
            Ok(_) => Ok((domain, user)),
            Err(err) if err.is_not_found() => {
                warn!(user_id = %user.id, domain_id = %domain.id, "Authentication failed: not a member");
                Err(denied())
            }
            Err(err) => Err(err.wrap(ErrorDomain::UseCase, "Failed to check membership")),
        }
    }

    #[instrument(skip(self, id))]
    pub async fn find(&self, id: &str) -> Result<Session, AppError> {
        self.sessions.find_session(id).await
    }

    #[instrument(skip(self, user_agent, remote_addr))]
    pub async fn find_user_specific(
        &self,
        user_id: &str,
        domain_id: &str,
        user_agent: &str,
        remote_addr: &str,
    ) -> Result<Session, AppError> {
        self.sessions
            .find_user_specific(user_id, domain_id, user_agent, remote_addr)
            .await
    }

    /// Slide the expiry to `now + ttl`.
    #[instrument(skip(self, session), fields(user_id = %session.user.id))]
    pub async fn retain(&self, session: &Session) -> Result<Session, AppError> {
        let now = Utc::now();
        let expires_on = now + self.ttl;
        self.sessions.retain(&session.id, now, expires_on).await?;

        let mut renewed = session.clone();
        renewed.updated_on = now;
        renewed.expires_on = expires_on;
        Ok(renewed)
    }

    #[instrument(skip(self, id))]
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        self.sessions.delete_session(id).await?;
        record_session_operation("delete", "ok");
        Ok(())
    }

    /// Remove every expired session.
    #[instrument(skip(self))]
    pub async fn purge(&self) -> Result<u64, AppError> {
        let purged = self
            .sessions
            .purge(Utc::now())
            .await
            .map_err(|e| e.wrap(ErrorDomain::UseCase, "Failed to purge sessions"))?;
        record_sessions_purged(purged);
        Ok(purged)
    }

    pub async fn list(&self, pager: &Pager, sorter: &Sorter) -> Result<Page<Session>, AppError> {
        self.sessions.list_sessions(pager, sorter).await
    }

    /// Check an inbound session reference and renew it.
    ///
    /// A session presented from another client is reported as absent.
    #[instrument(skip(self, token, user_agent, remote_addr))]
    pub async fn validate(
        &self,
        token: &str,
        user_agent: &str,
        remote_addr: &str,
    ) -> Result<Session, AppError> {
        let outcome = self.check(token, user_agent, remote_addr).await;
        let label = match &outcome {
            Ok(_) => "ok",
            Err(err) if err.is_operational() => "error",
            Err(_) => "rejected",
        };
        record_session_operation("validate", label);
        outcome
    }

    async fn check(
        &self,
        token: &str,
        user_agent: &str,
        remote_addr: &str,
    ) -> Result<Session, AppError> {
        if token.trim().is_empty() {
            return Err(session_not_found());
        }

        let session = match self.sessions.find_session(token).await {
            Ok(session) => session,
            Err(err) if err.is_not_found() => return Err(session_not_found()),
            Err(err) => return Err(err),
        };

        if !session.is_bound_to(user_agent, remote_addr) {
            debug!(user_id = %session.user.id, "Session presented from another client");
            return Err(session_not_found());
        }
        if !session.domain.enabled {
            return Err(AppError::forbidden(ErrorDomain::UseCase, "Domain is disabled"));
        }
        if !session.user.enabled {
            return Err(AppError::forbidden(ErrorDomain::UseCase, "User is disabled"));
        }
        if session.is_expired() {
            return Err(AppError::not_found(ErrorDomain::UseCase, "Session expired"));
        }

        match self.retain(&session).await {
            Ok(renewed) => Ok(renewed),
            // Purged or deleted between the lookup and the renewal.
            Err(err) if err.is_not_found() => Err(session_not_found()),
            Err(err) => Err(err),
        }
    }
}
