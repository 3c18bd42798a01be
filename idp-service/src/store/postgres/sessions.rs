use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use tracing::{debug, info, instrument};

use super::{db_error, not_found, PgStore};
use crate::models::{Page, Pager, Session, SessionRow, Sorter, SESSION_SORT_FIELDS};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::transaction::run_in_transaction;
use crate::store::SessionStore;

const SESSION_SELECT: &str = r#"
    SELECT s.session_id,
           d.object_id AS domain_id,
           d.name AS domain_name,
           d.description AS domain_description,
           d.enabled AS domain_enabled,
           u.object_id AS user_id,
           u.name AS user_name,
           u.enabled AS user_enabled,
           s.user_agent,
           s.remote_addr,
           s.created_on,
           s.updated_on,
           s.expires_on
    FROM user_sessions s
    JOIN domains d ON d.id = s.domain_id
    JOIN users u ON u.id = s.user_id
"#;

#[async_trait]
impl SessionStore for PgStore {
    #[instrument(skip(self, candidate), fields(user_id = %candidate.user.id, domain_id = %candidate.domain.id))]
    async fn create_or_reuse(&self, candidate: &Session) -> Result<Session, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_session"])
            .start_timer();

        let candidate = candidate.clone();
        let session = run_in_transaction(self.pool(), "create_session", move |conn| {
            Box::pin(async move {
                let lock_key = format!(
                    "{}|{}|{}|{}",
                    candidate.user.id,
                    candidate.domain.id,
                    candidate.user_agent,
                    candidate.remote_addr
                );
                sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                    .bind(&lock_key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("lock session key", "Session"))?;

                let domain = sqlx::query_scalar::<_, i64>("SELECT id FROM domains WHERE object_id = $1")
                    .bind(&candidate.domain.id)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(db_error("find domain", "Domain"))?
                    .ok_or_else(|| not_found("Domain"))?;
                let user = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE object_id = $1")
                    .bind(&candidate.user.id)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(db_error("find user", "User"))?
                    .ok_or_else(|| not_found("User"))?;

                let reusable = sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT id FROM user_sessions
                    WHERE user_id = $1 AND domain_id = $2
                      AND user_agent = $3 AND remote_addr = $4
                      AND expires_on > $5
                    ORDER BY updated_on DESC
                    LIMIT 1
                    "#,
                )
                .bind(user)
                .bind(domain)
                .bind(&candidate.user_agent)
                .bind(&candidate.remote_addr)
                .bind(candidate.updated_on)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_error("find reusable session", "Session"))?;

                let key = match reusable {
                    Some(key) => {
                        sqlx::query(
                            "UPDATE user_sessions SET updated_on = $2, expires_on = $3 WHERE id = $1",
                        )
                        .bind(key)
                        .bind(candidate.updated_on)
                        .bind(candidate.expires_on)
                        .execute(&mut *conn)
                        .await
                        .map_err(db_error("retain session", "Session"))?;
                        debug!("Reusing unexpired session");
                        key
                    }
                    None => sqlx::query_scalar::<_, i64>(
                        r#"
                        INSERT INTO user_sessions
                            (session_id, domain_id, user_id, user_agent, remote_addr, created_on, updated_on, expires_on)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                        RETURNING id
                        "#,
                    )
                    .bind(&candidate.id)
                    .bind(domain)
                    .bind(user)
                    .bind(&candidate.user_agent)
                    .bind(&candidate.remote_addr)
                    .bind(candidate.created_on)
                    .bind(candidate.updated_on)
                    .bind(candidate.expires_on)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(db_error("create session", "Session"))?,
                };

                let row = sqlx::query_as::<_, SessionRow>(&format!("{SESSION_SELECT} WHERE s.id = $1"))
                    .bind(key)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(db_error("find session", "Session"))?;
                Ok(Session::from(row))
            })
        })
        .await?;

        timer.observe_duration();

        Ok(session)
    }

    #[instrument(skip(self, id))]
    async fn find_session(&self, id: &str) -> Result<Session, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_session"])
            .start_timer();

        let row = sqlx::query_as::<_, SessionRow>(&format!("{SESSION_SELECT} WHERE s.session_id = $1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_error("find session", "Session"))?
            .ok_or_else(|| not_found("Session"))?;

        timer.observe_duration();
        Ok(row.into())
    }

    #[instrument(skip(self, user_agent, remote_addr))]
    async fn find_user_specific(
        &self,
        user_id: &str,
        domain_id: &str,
        user_agent: &str,
        remote_addr: &str,
    ) -> Result<Session, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            {SESSION_SELECT}
            WHERE u.object_id = $1 AND d.object_id = $2
              AND s.user_agent = $3 AND s.remote_addr = $4
            ORDER BY s.updated_on DESC, s.created_on DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .bind(domain_id)
        .bind(user_agent)
        .bind(remote_addr)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("find session", "Session"))?
        .ok_or_else(|| not_found("Session"))?;

        Ok(row.into())
    }

    #[instrument(skip(self, id))]
    async fn retain(
        &self,
        id: &str,
        updated_on: DateTime<Utc>,
        expires_on: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["retain_session"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE user_sessions SET updated_on = $2, expires_on = $3 WHERE session_id = $1",
        )
        .bind(id)
        .bind(updated_on)
        .bind(expires_on)
        .execute(self.pool())
        .await
        .map_err(db_error("retain session", "Session"))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(not_found("Session"));
        }
        Ok(())
    }

    #[instrument(skip(self, id))]
    async fn delete_session(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE session_id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db_error("delete session", "Session"))?;

        if result.rows_affected() == 0 {
            return Err(not_found("Session"));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn purge(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["purge_sessions"])
            .start_timer();

        let result = sqlx::query("DELETE FROM user_sessions WHERE expires_on <= $1")
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(db_error("purge sessions", "Session"))?;

        timer.observe_duration();
        info!(purged = result.rows_affected(), "Expired sessions purged");

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn list_sessions(&self, pager: &Pager, sorter: &Sorter) -> Result<Page<Session>, AppError> {
        let column = sorter.column(SESSION_SORT_FIELDS, "created_on")?;

        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "{SESSION_SELECT} ORDER BY s.{column} {direction}, s.id LIMIT $1 OFFSET $2",
            direction = sorter.direction(),
        ))
        .bind(pager.limit())
        .bind(pager.offset())
        .fetch_all(self.pool())
        .await
        .map_err(db_error("list sessions", "Session"))?;

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM user_sessions")
            .fetch_one(self.pool())
            .await
            .map_err(db_error("count sessions", "Session"))?;

        Ok(Page::new(rows, pager.paginate(total)).map(Session::from))
    }
}
