//! PostgreSQL store.

mod rbac;
mod sessions;
mod tenancy;

use async_trait::async_trait;
use service_core::error::{AppError, ErrorDomain, ErrorKind};
use sqlx::{PgConnection, PgPool};

use super::HealthCheck;
use crate::services::Database;

/// Store backed by the service database.
#[derive(Clone)]
pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn pool(&self) -> &PgPool {
        self.db.pool()
    }
}

#[async_trait]
impl HealthCheck for PgStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.db.health_check().await
    }
}

/// Translate a driver error raised while working on `entity`.
pub(crate) fn db_error(operation: &str, entity: &str) -> impl FnOnce(sqlx::Error) -> AppError {
    let operation = operation.to_string();
    let entity = entity.to_string();
    move |err| {
        let kind = classify(&err);
        let message = match kind {
            ErrorKind::NotFound => format!("{} not found", entity),
            ErrorKind::Conflict if is_unique_violation(&err) => {
                format!("{} already exists", entity)
            }
            ErrorKind::Conflict => format!("{} is invalid", entity),
            _ => format!("Failed to {}", operation),
        };
        AppError::new(ErrorDomain::DataAccess, kind, message).with_cause(err)
    }
}

fn classify(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::RowNotFound => ErrorKind::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => ErrorKind::Conflict,
        sqlx::Error::Database(db) if db.is_check_violation() => ErrorKind::Conflict,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => ErrorKind::Conflict,
        _ => ErrorKind::Operational,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub(crate) fn not_found(entity: &str) -> AppError {
    AppError::not_found(ErrorDomain::DataAccess, format!("{} not found", entity))
}

pub(crate) async fn domain_key(conn: &mut PgConnection, id: &str) -> Result<i64, AppError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM domains WHERE object_id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("find domain", "Domain"))?
        .ok_or_else(|| not_found("Domain"))
}

pub(crate) async fn user_key(conn: &mut PgConnection, id: &str) -> Result<i64, AppError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE object_id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("find user", "User"))?
        .ok_or_else(|| not_found("User"))
}

/// Internal keys of the rows whose `column` matches every value, locked for
/// the rest of the transaction. NotFound names the first value that did not
/// resolve; nothing is returned in that case.
pub(crate) async fn resolve_keys(
    conn: &mut PgConnection,
    table: &'static str,
    column: &'static str,
    values: &[String],
    entity: &str,
) -> Result<Vec<i64>, AppError> {
    if values.is_empty() {
        return Ok(Vec::new());
    }

    let mut wanted = values.to_vec();
    wanted.sort();
    wanted.dedup();

    let rows = sqlx::query_as::<_, (String, i64)>(&format!(
        "SELECT {column}, id FROM {table} WHERE {column} = ANY($1) FOR UPDATE"
    ))
    .bind(&wanted)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error("resolve names", entity))?;

    if let Some(missing) = wanted
        .iter()
        .find(|value| !rows.iter().any(|(found, _)| found == *value))
    {
        return Err(not_found(entity).with_cause(anyhow::anyhow!("'{}' does not exist", missing)));
    }

    Ok(rows.into_iter().map(|(_, key)| key).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = db_error("find domain", "Domain")(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), "Domain not found");
    }

    #[test]
    fn test_driver_failures_are_operational() {
        let err = db_error("list users", "User")(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), ErrorKind::Operational);
        assert_eq!(err.message(), "Failed to list users");
        assert!(err.cause().is_some());
    }
}
