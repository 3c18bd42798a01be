use async_trait::async_trait;
use service_core::error::AppError;
use tracing::{info, instrument};

use super::{db_error, domain_key, not_found, resolve_keys, user_key, PgStore};
use crate::models::{Domain, DomainStats, Page, Pager, Sorter, User, UserStats};
use crate::models::{DOMAIN_SORT_FIELDS, USER_SORT_FIELDS};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::transaction::run_in_transaction;
use crate::store::TenancyStore;

const DOMAIN_COLUMNS: &str =
    "d.object_id, d.name, d.description, d.enabled, d.created_on, d.updated_on";
const USER_COLUMNS: &str = "u.object_id, u.name, u.passwd, u.enabled, u.created_on, u.updated_on";

impl PgStore {
    /// `filter` is a WHERE clause whose only parameter is `$1`.
    async fn page_of_domains(
        &self,
        filter: Option<(&str, &str)>,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<DomainStats>, AppError> {
        let column = sorter.column(DOMAIN_SORT_FIELDS, "name")?;
        let (clause, first) = match filter {
            Some((clause, _)) => (clause, 2),
            None => ("", 1),
        };
        let sql = format!(
            r#"
            SELECT {DOMAIN_COLUMNS},
                   (SELECT COUNT(*) FROM domain_users c WHERE c.domain_id = d.id) AS users_count
            FROM domains d
            {clause}
            ORDER BY d.{column} {direction}, d.id
            LIMIT ${first} OFFSET ${second}
            "#,
            direction = sorter.direction(),
            second = first + 1,
        );
        let count_sql = format!("SELECT COUNT(*) FROM domains d {clause}");

        let mut query = sqlx::query_as::<_, DomainStats>(&sql);
        let mut count = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some((_, value)) = filter {
            query = query.bind(value);
            count = count.bind(value);
        }

        let items = query
            .bind(pager.limit())
            .bind(pager.offset())
            .fetch_all(self.pool())
            .await
            .map_err(db_error("list domains", "Domain"))?;
        let total = count
            .fetch_one(self.pool())
            .await
            .map_err(db_error("count domains", "Domain"))?;

        Ok(Page::new(items, pager.paginate(total)))
    }

    /// `filter` is a WHERE clause whose only parameter is `$1`.
    async fn page_of_users(
        &self,
        filter: Option<(&str, &str)>,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<UserStats>, AppError> {
        let column = sorter.column(USER_SORT_FIELDS, "name")?;
        let (clause, first) = match filter {
            Some((clause, _)) => (clause, 2),
            None => ("", 1),
        };
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS},
                   (SELECT COUNT(*) FROM domain_users c WHERE c.user_id = u.id) AS domains_count
            FROM users u
            {clause}
            ORDER BY u.{column} {direction}, u.id
            LIMIT ${first} OFFSET ${second}
            "#,
            direction = sorter.direction(),
            second = first + 1,
        );
        let count_sql = format!("SELECT COUNT(*) FROM users u {clause}");

        let mut query = sqlx::query_as::<_, UserStats>(&sql);
        let mut count = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some((_, value)) = filter {
            query = query.bind(value);
            count = count.bind(value);
        }

        let items = query
            .bind(pager.limit())
            .bind(pager.offset())
            .fetch_all(self.pool())
            .await
            .map_err(db_error("list users", "User"))?;
        let total = count
            .fetch_one(self.pool())
            .await
            .map_err(db_error("count users", "User"))?;

        Ok(Page::new(items, pager.paginate(total)))
    }
}

#[async_trait]
impl TenancyStore for PgStore {
    #[instrument(skip(self, domain), fields(name = %domain.name))]
    async fn create_domain(&self, domain: &Domain) -> Result<Domain, AppError> {
        domain.validate()?;
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_domain"])
            .start_timer();

        let created = sqlx::query_as::<_, Domain>(
            r#"
            INSERT INTO domains (object_id, name, description, enabled, created_on, updated_on)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING object_id, name, description, enabled, created_on, updated_on
            "#,
        )
        .bind(&domain.id)
        .bind(&domain.name)
        .bind(&domain.description)
        .bind(domain.enabled)
        .bind(domain.created_on)
        .bind(domain.updated_on)
        .fetch_one(self.pool())
        .await
        .map_err(db_error("create domain", "Domain"))?;

        timer.observe_duration();
        info!(domain_id = %created.id, "Domain created");

        Ok(created)
    }

    #[instrument(skip(self, domain), fields(domain_id = %domain.id))]
    async fn update_domain(&self, domain: &Domain) -> Result<Domain, AppError> {
        domain.validate()?;
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_domain"])
            .start_timer();

        let updated = sqlx::query_as::<_, Domain>(
            r#"
            UPDATE domains
            SET name = $2, description = $3, enabled = $4, updated_on = NOW()
            WHERE object_id = $1
            RETURNING object_id, name, description, enabled, created_on, updated_on
            "#,
        )
        .bind(&domain.id)
        .bind(&domain.name)
        .bind(&domain.description)
        .bind(domain.enabled)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("update domain", "Domain"))?
        .ok_or_else(|| not_found("Domain"))?;

        timer.observe_duration();

        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete_domain(&self, id: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_domain"])
            .start_timer();

        let id = id.to_string();
        run_in_transaction(self.pool(), "delete_domain", move |conn| {
            Box::pin(async move {
                let key = domain_key(conn, &id).await?;

                sqlx::query("DELETE FROM user_sessions WHERE domain_id = $1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("delete domain sessions", "Session"))?;

                sqlx::query("DELETE FROM domain_users WHERE domain_id = $1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("delete domain members", "Domain"))?;

                let result = sqlx::query("DELETE FROM domains WHERE id = $1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("delete domain", "Domain"))?;
                if result.rows_affected() == 0 {
                    return Err(not_found("Domain"));
                }
                Ok(())
            })
        })
        .await?;

        timer.observe_duration();
        info!("Domain deleted");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_domain(&self, id: &str) -> Result<Domain, AppError> {
        sqlx::query_as::<_, Domain>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains d WHERE d.object_id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("find domain", "Domain"))?
        .ok_or_else(|| not_found("Domain"))
    }

    #[instrument(skip(self))]
    async fn find_domain_by_name(&self, name: &str) -> Result<Domain, AppError> {
        sqlx::query_as::<_, Domain>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains d WHERE d.name = $1"
        ))
        .bind(name)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("find domain", "Domain"))?
        .ok_or_else(|| not_found("Domain"))
    }

    #[instrument(skip(self))]
    async fn count_users(&self, domain_id: &str) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM domain_users du
            JOIN domains d ON d.id = du.domain_id
            WHERE d.object_id = $1
            "#,
        )
        .bind(domain_id)
        .fetch_one(self.pool())
        .await
        .map_err(db_error("count users", "Domain"))
    }

    #[instrument(skip(self))]
    async fn list_domains(
        &self,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<DomainStats>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_domains"])
            .start_timer();
        let page = self.page_of_domains(None, pager, sorter).await?;
        timer.observe_duration();
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn list_domains_by_user(
        &self,
        user_id: &str,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<DomainStats>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_domains_by_user"])
            .start_timer();
        let filter = r#"
            WHERE d.id IN (
                SELECT du.domain_id FROM domain_users du
                JOIN users u ON u.id = du.user_id
                WHERE u.object_id = $1
            )"#;
        let page = self
            .page_of_domains(Some((filter, user_id)), pager, sorter)
            .await?;
        timer.observe_duration();
        Ok(page)
    }

    #[instrument(skip(self, user, domain_ids), fields(name = %user.name))]
    async fn create_user(&self, user: &User, domain_ids: &[String]) -> Result<User, AppError> {
        user.validate()?;
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_user"])
            .start_timer();

        let user = user.clone();
        let domain_ids = domain_ids.to_vec();
        let created = run_in_transaction(self.pool(), "create_user", move |conn| {
            Box::pin(async move {
                let domains = resolve_keys(conn, "domains", "object_id", &domain_ids, "Domain").await?;

                let key = sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO users (object_id, name, passwd, enabled, created_on, updated_on)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING id
                    "#,
                )
                .bind(&user.id)
                .bind(&user.name)
                .bind(&user.password_hash)
                .bind(user.enabled)
                .bind(user.created_on)
                .bind(user.updated_on)
                .fetch_one(&mut *conn)
                .await
                .map_err(db_error("create user", "User"))?;

                sqlx::query(
                    r#"
                    INSERT INTO domain_users (domain_id, user_id)
                    SELECT unnest($1::BIGINT[]), $2
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(&domains)
                .bind(key)
                .execute(&mut *conn)
                .await
                .map_err(db_error("add user to domains", "User"))?;

                Ok(user)
            })
        })
        .await?;

        timer.observe_duration();
        info!(user_id = %created.id, "User created");

        Ok(created)
    }

    #[instrument(skip(self, user, add_domain_ids, remove_domain_ids), fields(user_id = %user.id))]
    async fn update_user(
        &self,
        user: &User,
        add_domain_ids: &[String],
        remove_domain_ids: &[String],
    ) -> Result<User, AppError> {
        user.validate()?;
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_user"])
            .start_timer();

        let user = user.clone();
        let add = add_domain_ids.to_vec();
        let remove = remove_domain_ids.to_vec();
        let updated = run_in_transaction(self.pool(), "update_user", move |conn| {
            Box::pin(async move {
                let key = user_key(conn, &user.id).await?;
                let add = resolve_keys(conn, "domains", "object_id", &add, "Domain").await?;
                let remove = resolve_keys(conn, "domains", "object_id", &remove, "Domain").await?;

                let updated = sqlx::query_as::<_, User>(
                    r#"
                    UPDATE users
                    SET name = $2, passwd = $3, enabled = $4, updated_on = NOW()
                    WHERE id = $1
                    RETURNING object_id, name, passwd, enabled, created_on, updated_on
                    "#,
                )
                .bind(key)
                .bind(&user.name)
                .bind(&user.password_hash)
                .bind(user.enabled)
                .fetch_one(&mut *conn)
                .await
                .map_err(db_error("update user", "User"))?;

                if !add.is_empty() {
                    sqlx::query(
                        r#"
                        INSERT INTO domain_users (domain_id, user_id)
                        SELECT unnest($1::BIGINT[]), $2
                        ON CONFLICT DO NOTHING
                        "#,
                    )
                    .bind(&add)
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("add user to domains", "User"))?;
                }

                if !remove.is_empty() {
                    sqlx::query("DELETE FROM domain_users WHERE user_id = $1 AND domain_id = ANY($2)")
                        .bind(key)
                        .bind(&remove)
                        .execute(&mut *conn)
                        .await
                        .map_err(db_error("remove user from domains", "User"))?;
                }

                Ok(updated)
            })
        })
        .await?;

        timer.observe_duration();

        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_user"])
            .start_timer();

        let id = id.to_string();
        run_in_transaction(self.pool(), "delete_user", move |conn| {
            Box::pin(async move {
                let key = user_key(conn, &id).await?;

                sqlx::query("DELETE FROM user_sessions WHERE user_id = $1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("delete user sessions", "Session"))?;

                sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("revoke user roles", "User"))?;

                sqlx::query("DELETE FROM domain_users WHERE user_id = $1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("delete user memberships", "User"))?;

                let result = sqlx::query("DELETE FROM users WHERE id = $1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("delete user", "User"))?;
                if result.rows_affected() == 0 {
                    return Err(not_found("User"));
                }
                Ok(())
            })
        })
        .await?;

        timer.observe_duration();
        info!("User deleted");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_user(&self, id: &str) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.object_id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("find user", "User"))?
        .ok_or_else(|| not_found("User"))
    }

    #[instrument(skip(self))]
    async fn find_user_by_name(&self, name: &str) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.name = $1"
        ))
        .bind(name)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("find user", "User"))?
        .ok_or_else(|| not_found("User"))
    }

    #[instrument(skip(self))]
    async fn find_user_in_domain(&self, user_id: &str, domain_id: &str) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users u
            JOIN domain_users du ON du.user_id = u.id
            JOIN domains d ON d.id = du.domain_id
            WHERE u.object_id = $1 AND d.object_id = $2
            "#
        ))
        .bind(user_id)
        .bind(domain_id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("find user in domain", "User"))?
        .ok_or_else(|| not_found("User in domain"))
    }

    #[instrument(skip(self))]
    async fn find_user_by_name_in_domain(
        &self,
        name: &str,
        domain_id: &str,
    ) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users u
            JOIN domain_users du ON du.user_id = u.id
            JOIN domains d ON d.id = du.domain_id
            WHERE u.name = $1 AND d.object_id = $2
            "#
        ))
        .bind(name)
        .bind(domain_id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("find user in domain", "User"))?
        .ok_or_else(|| not_found("User in domain"))
    }

    #[instrument(skip(self))]
    async fn count_domains(&self, user_id: &str) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM domain_users du
            JOIN users u ON u.id = du.user_id
            WHERE u.object_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool())
        .await
        .map_err(db_error("count domains", "User"))
    }

    #[instrument(skip(self))]
    async fn list_users(&self, pager: &Pager, sorter: &Sorter) -> Result<Page<UserStats>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_users"])
            .start_timer();
        let page = self.page_of_users(None, pager, sorter).await?;
        timer.observe_duration();
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn list_users_by_domain(
        &self,
        domain_id: &str,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<UserStats>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_users_by_domain"])
            .start_timer();
        let filter = r#"
            WHERE u.id IN (
                SELECT du.user_id FROM domain_users du
                JOIN domains d ON d.id = du.domain_id
                WHERE d.object_id = $1
            )"#;
        let page = self
            .page_of_users(Some((filter, domain_id)), pager, sorter)
            .await?;
        timer.observe_duration();
        Ok(page)
    }
}
