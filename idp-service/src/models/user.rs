//! User model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::{AppError, ErrorDomain};
use sqlx::FromRow;
use uuid::Uuid;

/// Columns a user listing may be sorted by.
pub const USER_SORT_FIELDS: &[&str] = &["name", "enabled", "created_on", "updated_on"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    #[sqlx(rename = "object_id")]
    pub id: String,
    pub name: String,
    /// Stored password hash. Never serialized.
    #[sqlx(rename = "passwd")]
    #[serde(skip)]
    pub password_hash: String,
    pub enabled: bool,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, password_hash: impl Into<String>, enabled: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            password_hash: password_hash.into(),
            enabled,
            created_on: now,
            updated_on: now,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let reason = if self.id.trim().is_empty() {
            "ID cannot be empty"
        } else if self.name.trim().is_empty() {
            "Name cannot be empty"
        } else if self.password_hash.is_empty() {
            "Password cannot be empty"
        } else {
            return Ok(());
        };
        Err(AppError::conflict(ErrorDomain::DataAccess, "User is invalid")
            .with_cause(anyhow::anyhow!(reason)))
    }
}

/// User listing entry with the number of domains the user belongs to.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserStats {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub user: User,
    pub domains_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_is_not_serialized() {
        let user = User::new("alice", "$argon2id$v=19$secret", true);
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["name"], "alice");
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn test_validate() {
        assert!(User::new("alice", "hash", true).validate().is_ok());
        assert!(User::new("", "hash", true).validate().is_err());
        assert!(User::new("alice", "", true).validate().is_err());
    }
}
