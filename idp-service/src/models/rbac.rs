//! Role and permission models. The graph is global: neither is scoped to a domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::{AppError, ErrorDomain};
use sqlx::FromRow;

/// Columns a role or permission listing may be sorted by.
pub const RBAC_SORT_FIELDS: &[&str] = &["name", "enabled", "created_on", "updated_on"];

/// A named role. The name is the identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>, description: impl Into<String>, enabled: bool) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: description.into(),
            enabled,
            created_on: now,
            updated_on: now,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        validate_name("Role", &self.name)
    }
}

/// A named permission. `evaluation_rule` is stored and returned but never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub name: String,
    pub description: String,
    pub evaluation_rule: String,
    pub enabled: bool,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl Permission {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        evaluation_rule: impl Into<String>,
        enabled: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: description.into(),
            evaluation_rule: evaluation_rule.into(),
            enabled,
            created_on: now,
            updated_on: now,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        validate_name("Permission", &self.name)
    }
}

pub(crate) fn validate_name(entity: &str, name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(
            AppError::conflict(ErrorDomain::DataAccess, format!("{} is invalid", entity))
                .with_cause(anyhow::anyhow!("Name cannot be empty")),
        );
    }
    Ok(())
}
