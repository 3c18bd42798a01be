//! Session model.
//!
//! A session binds one user in one domain to the client (user agent and remote
//! address) it was issued to. The binding is write-only: it is never serialized.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Domain, User};

/// Columns a session listing may be sorted by.
pub const SESSION_SORT_FIELDS: &[&str] = &["created_on", "updated_on", "expires_on"];

/// Live snapshot of the session's domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDomain {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
}

/// Live snapshot of the session's user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub domain: SessionDomain,
    pub user: SessionUser,
    #[serde(skip)]
    pub user_agent: String,
    #[serde(skip)]
    pub remote_addr: String,
    #[serde(with = "rfc3339_seconds")]
    pub created_on: DateTime<Utc>,
    #[serde(with = "rfc3339_seconds")]
    pub updated_on: DateTime<Utc>,
    #[serde(with = "rfc3339_seconds")]
    pub expires_on: DateTime<Utc>,
}

impl Session {
    /// A fresh session for `user` in `domain`, expiring `ttl` from now.
    pub fn issue(
        domain: &Domain,
        user: &User,
        user_agent: impl Into<String>,
        remote_addr: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            domain: SessionDomain {
                id: domain.id.clone(),
                name: domain.name.clone(),
                description: domain.description.clone(),
                enabled: domain.enabled,
            },
            user: SessionUser {
                id: user.id.clone(),
                name: user.name.clone(),
                enabled: user.enabled,
            },
            user_agent: user_agent.into(),
            remote_addr: remote_addr.into(),
            created_on: now,
            updated_on: now,
            expires_on: now + ttl,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && !self.user.id.is_empty()
            && self.user.enabled
            && self.expires_on != DateTime::<Utc>::default()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_on <= now
    }

    /// Whether the session was issued to this exact client.
    pub fn is_bound_to(&self, user_agent: &str, remote_addr: &str) -> bool {
        self.user_agent == user_agent && self.remote_addr == remote_addr
    }
}

/// Flat row produced by joining `user_sessions` with `domains` and `users`.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: String,
    pub domain_id: String,
    pub domain_name: String,
    pub domain_description: String,
    pub domain_enabled: bool,
    pub user_id: String,
    pub user_name: String,
    pub user_enabled: bool,
    pub user_agent: String,
    pub remote_addr: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    pub expires_on: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.session_id,
            domain: SessionDomain {
                id: row.domain_id,
                name: row.domain_name,
                description: row.domain_description,
                enabled: row.domain_enabled,
            },
            user: SessionUser {
                id: row.user_id,
                name: row.user_name,
                enabled: row.user_enabled,
            },
            user_agent: row.user_agent,
            remote_addr: row.remote_addr,
            created_on: row.created_on,
            updated_on: row.updated_on,
            expires_on: row.expires_on,
        }
    }
}

/// RFC 3339 in UTC with second precision, e.g. `2024-05-01T12:30:00Z`.
pub mod rfc3339_seconds {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let domain = Domain::new("acme", "Acme Corp", true);
        let user = User::new("alice", "hash", true);
        Session::issue(&domain, &user, "A", "1.2.3.4", Duration::minutes(30))
    }

    #[test]
    fn test_validity_invariant() {
        let mut s = session();
        assert!(s.is_valid());

        s.user.enabled = false;
        assert!(!s.is_valid());
        s.user.enabled = true;

        s.expires_on = DateTime::<Utc>::default();
        assert!(!s.is_valid());

        let mut s = session();
        s.id.clear();
        assert!(!s.is_valid());

        let mut s = session();
        s.user.id.clear();
        assert!(!s.is_valid());
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let s = session();
        assert!(!s.is_expired());
        assert!(s.is_expired_at(s.expires_on));
        assert!(!s.is_expired_at(s.expires_on - Duration::seconds(1)));
    }

    #[test]
    fn test_serialized_shape() {
        let s = session();
        let json = serde_json::to_value(&s).unwrap();

        assert_eq!(json["domain"]["name"], "acme");
        assert_eq!(json["domain"]["description"], "Acme Corp");
        assert_eq!(json["user"]["name"], "alice");
        assert!(json.get("user_agent").is_none());
        assert!(json.get("remote_addr").is_none());

        let expires = json["expires_on"].as_str().unwrap();
        assert!(expires.ends_with('Z'));
        assert!(!expires.contains('.'));
        assert_eq!(expires.len(), "2024-05-01T12:30:00Z".len());
    }

    #[test]
    fn test_binding() {
        let s = session();
        assert!(s.is_bound_to("A", "1.2.3.4"));
        assert!(!s.is_bound_to("A", "9.9.9.9"));
        assert!(!s.is_bound_to("B", "1.2.3.4"));
    }
}
