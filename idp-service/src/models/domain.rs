//! Domain (tenant) model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::{AppError, ErrorDomain};
use sqlx::FromRow;
use uuid::Uuid;

/// Columns a domain listing may be sorted by.
pub const DOMAIN_SORT_FIELDS: &[&str] = &["name", "enabled", "created_on", "updated_on"];

/// A tenant boundary containing users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Domain {
    #[sqlx(rename = "object_id")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl Domain {
    pub fn new(name: impl Into<String>, description: impl Into<String>, enabled: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            enabled,
            created_on: now,
            updated_on: now,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::conflict(ErrorDomain::DataAccess, "Domain is invalid")
                .with_cause(anyhow::anyhow!("ID cannot be empty")));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::conflict(ErrorDomain::DataAccess, "Domain is invalid")
                .with_cause(anyhow::anyhow!("Name cannot be empty")));
        }
        Ok(())
    }
}

/// Domain listing entry with its member count.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DomainStats {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub domain: Domain,
    pub users_count: i64,
}
