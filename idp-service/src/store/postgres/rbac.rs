use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::{info, instrument};

use super::{db_error, not_found, resolve_keys, user_key, PgStore};
use crate::models::{Page, Pager, Permission, Role, Sorter, RBAC_SORT_FIELDS};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::transaction::run_in_transaction;
use crate::store::RbacStore;

const ROLE_COLUMNS: &str = "r.name, r.description, r.enabled, r.created_on, r.updated_on";
const PERMISSION_COLUMNS: &str =
    "p.name, p.description, p.evaluation_rule, p.enabled, p.created_on, p.updated_on";

async fn role_key(conn: &mut PgConnection, name: &str) -> Result<i64, AppError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM roles WHERE name = $1 FOR UPDATE")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("find role", "Role"))?
        .ok_or_else(|| not_found("Role"))
}

async fn permission_key(conn: &mut PgConnection, name: &str) -> Result<i64, AppError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM permissions WHERE name = $1 FOR UPDATE")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("find permission", "Permission"))?
        .ok_or_else(|| not_found("Permission"))
}

impl PgStore {
    /// `filter` is a WHERE clause whose only parameter is `$1`.
    async fn page_of_roles(
        &self,
        filter: Option<(&str, &str)>,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Role>, AppError> {
        let column = sorter.column(RBAC_SORT_FIELDS, "name")?;
        let (clause, first) = match filter {
            Some((clause, _)) => (clause, 2),
            None => ("", 1),
        };
        let sql = format!(
            "SELECT {ROLE_COLUMNS} FROM roles r {clause} ORDER BY r.{column} {direction}, r.id LIMIT ${first} OFFSET ${second}",
            direction = sorter.direction(),
            second = first + 1,
        );
        let count_sql = format!("SELECT COUNT(*) FROM roles r {clause}");

        let mut query = sqlx::query_as::<_, Role>(&sql);
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
            .map_err(db_error("list roles", "Role"))?;
        let total = count
            .fetch_one(self.pool())
            .await
            .map_err(db_error("count roles", "Role"))?;

        Ok(Page::new(items, pager.paginate(total)))
    }

    /// `filter` is a WHERE clause whose only parameter is `$1`.
    async fn page_of_permissions(
        &self,
        filter: Option<(&str, &str)>,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Permission>, AppError> {
        let column = sorter.column(RBAC_SORT_FIELDS, "name")?;
        let (clause, first) = match filter {
            Some((clause, _)) => (clause, 2),
            None => ("", 1),
        };
        let sql = format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions p {clause} ORDER BY p.{column} {direction}, p.id LIMIT ${first} OFFSET ${second}",
            direction = sorter.direction(),
            second = first + 1,
        );
        let count_sql = format!("SELECT COUNT(*) FROM permissions p {clause}");

        let mut query = sqlx::query_as::<_, Permission>(&sql);
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
            .map_err(db_error("list permissions", "Permission"))?;
        let total = count
            .fetch_one(self.pool())
            .await
            .map_err(db_error("count permissions", "Permission"))?;

        Ok(Page::new(items, pager.paginate(total)))
    }
}

#[async_trait]
impl RbacStore for PgStore {
    #[instrument(skip(self, role), fields(name = %role.name))]
    async fn create_role(&self, role: &Role) -> Result<Role, AppError> {
        role.validate()?;
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_role"])
            .start_timer();

        let created = sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (name, description, enabled, created_on, updated_on)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING name, description, enabled, created_on, updated_on
            "#,
        )
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.enabled)
        .bind(role.created_on)
        .bind(role.updated_on)
        .fetch_one(self.pool())
        .await
        .map_err(db_error("create role", "Role"))?;

        timer.observe_duration();
        info!(role = %created.name, "Role created");

        Ok(created)
    }

    #[instrument(skip(self, role), fields(name = %role.name))]
    async fn update_role(&self, role: &Role) -> Result<Role, AppError> {
        sqlx::query_as::<_, Role>(
            r#"
            UPDATE roles
            SET description = $2, enabled = $3, updated_on = NOW()
            WHERE name = $1
            RETURNING name, description, enabled, created_on, updated_on
            "#,
        )
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.enabled)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("update role", "Role"))?
        .ok_or_else(|| not_found("Role"))
    }

    #[instrument(skip(self))]
    async fn rename_role(&self, name: &str, new_name: &str) -> Result<Role, AppError> {
        Role::new(new_name, "", true).validate()?;
        sqlx::query_as::<_, Role>(
            r#"
            UPDATE roles
            SET name = $2, updated_on = NOW()
            WHERE name = $1
            RETURNING name, description, enabled, created_on, updated_on
            "#,
        )
        .bind(name)
        .bind(new_name)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("rename role", "Role"))?
        .ok_or_else(|| not_found("Role"))
    }

    #[instrument(skip(self))]
    async fn delete_role(&self, name: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_role"])
            .start_timer();

        let name = name.to_string();
        run_in_transaction(self.pool(), "delete_role", move |conn| {
            Box::pin(async move {
                let key = role_key(conn, &name).await?;

                sqlx::query("DELETE FROM user_roles WHERE role_id = $1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("revoke role", "Role"))?;

                sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("delete role permissions", "Role"))?;

                let result = sqlx::query("DELETE FROM roles WHERE id = $1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("delete role", "Role"))?;
                if result.rows_affected() == 0 {
                    return Err(not_found("Role"));
                }
                Ok(())
            })
        })
        .await?;

        timer.observe_duration();
        info!("Role deleted");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_role(&self, name: &str) -> Result<Role, AppError> {
        sqlx::query_as::<_, Role>(&format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.name = $1"))
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(db_error("find role", "Role"))?
            .ok_or_else(|| not_found("Role"))
    }

    #[instrument(skip(self))]
    async fn list_roles(&self, pager: &Pager, sorter: &Sorter) -> Result<Page<Role>, AppError> {
        self.page_of_roles(None, pager, sorter).await
    }

    #[instrument(skip(self))]
    async fn list_roles_by_user(
        &self,
        user_id: &str,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Role>, AppError> {
        let filter = r#"
            WHERE r.id IN (
                SELECT ur.role_id FROM user_roles ur
                JOIN users u ON u.id = ur.user_id
                WHERE u.object_id = $1
            )"#;
        self.page_of_roles(Some((filter, user_id)), pager, sorter).await
    }

    #[instrument(skip(self, permission), fields(name = %permission.name))]
    async fn create_permission(&self, permission: &Permission) -> Result<Permission, AppError> {
        permission.validate()?;
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_permission"])
            .start_timer();

        let created = sqlx::query_as::<_, Permission>(
            r#"
            INSERT INTO permissions (name, description, evaluation_rule, enabled, created_on, updated_on)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING name, description, evaluation_rule, enabled, created_on, updated_on
            "#,
        )
        .bind(&permission.name)
        .bind(&permission.description)
        .bind(&permission.evaluation_rule)
        .bind(permission.enabled)
        .bind(permission.created_on)
        .bind(permission.updated_on)
        .fetch_one(self.pool())
        .await
        .map_err(db_error("create permission", "Permission"))?;

        timer.observe_duration();
        info!(permission = %created.name, "Permission created");

        Ok(created)
    }

    #[instrument(skip(self, permission), fields(name = %permission.name))]
    async fn update_permission(&self, permission: &Permission) -> Result<Permission, AppError> {
        sqlx::query_as::<_, Permission>(
            r#"
            UPDATE permissions
            SET description = $2, evaluation_rule = $3, enabled = $4, updated_on = NOW()
            WHERE name = $1
            RETURNING name, description, evaluation_rule, enabled, created_on, updated_on
            "#,
        )
        .bind(&permission.name)
        .bind(&permission.description)
        .bind(&permission.evaluation_rule)
        .bind(permission.enabled)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("update permission", "Permission"))?
        .ok_or_else(|| not_found("Permission"))
    }

    #[instrument(skip(self))]
    async fn rename_permission(&self, name: &str, new_name: &str) -> Result<Permission, AppError> {
        Permission::new(new_name, "", "", true).validate()?;
        sqlx::query_as::<_, Permission>(
            r#"
            UPDATE permissions
            SET name = $2, updated_on = NOW()
            WHERE name = $1
            RETURNING name, description, evaluation_rule, enabled, created_on, updated_on
            "#,
        )
        .bind(name)
        .bind(new_name)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("rename permission", "Permission"))?
        .ok_or_else(|| not_found("Permission"))
    }

    #[instrument(skip(self))]
    async fn delete_permission(&self, name: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_permission"])
            .start_timer();

        let name = name.to_string();
        run_in_transaction(self.pool(), "delete_permission", move |conn| {
            Box::pin(async move {
                let key = permission_key(conn, &name).await?;

                sqlx::query("DELETE FROM role_permissions WHERE permission_id = $1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("delete permission grants", "Permission"))?;

                let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("delete permission", "Permission"))?;
                if result.rows_affected() == 0 {
                    return Err(not_found("Permission"));
                }
                Ok(())
            })
        })
        .await?;

        timer.observe_duration();
        info!("Permission deleted");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_permission(&self, name: &str) -> Result<Permission, AppError> {
        sqlx::query_as::<_, Permission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions p WHERE p.name = $1"
        ))
        .bind(name)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error("find permission", "Permission"))?
        .ok_or_else(|| not_found("Permission"))
    }

    #[instrument(skip(self))]
    async fn list_permissions(
        &self,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Permission>, AppError> {
        self.page_of_permissions(None, pager, sorter).await
    }

    #[instrument(skip(self))]
    async fn list_permissions_by_role(
        &self,
        role: &str,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Permission>, AppError> {
        let filter = r#"
            WHERE p.id IN (
                SELECT rp.permission_id FROM role_permissions rp
                JOIN roles r ON r.id = rp.role_id
                WHERE r.name = $1
            )"#;
        self.page_of_permissions(Some((filter, role)), pager, sorter)
            .await
    }

    #[instrument(skip(self, permissions), fields(count = permissions.len()))]
    async fn add_permissions_to_role(
        &self,
        role: &str,
        permissions: &[String],
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_permissions_to_role"])
            .start_timer();

        let role = role.to_string();
        let permissions = permissions.to_vec();
        run_in_transaction(self.pool(), "add_permissions_to_role", move |conn| {
            Box::pin(async move {
                let role = role_key(conn, &role).await?;
                let keys =
                    resolve_keys(conn, "permissions", "name", &permissions, "Permission").await?;

                sqlx::query(
                    r#"
                    INSERT INTO role_permissions (role_id, permission_id)
                    SELECT $1, unnest($2::BIGINT[])
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(role)
                .bind(&keys)
                .execute(&mut *conn)
                .await
                .map_err(db_error("add permissions to role", "Permission"))?;
                Ok(())
            })
        })
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, permissions), fields(count = permissions.len()))]
    async fn remove_permissions_from_role(
        &self,
        role: &str,
        permissions: &[String],
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["remove_permissions_from_role"])
            .start_timer();

        let role = role.to_string();
        let permissions = permissions.to_vec();
        run_in_transaction(self.pool(), "remove_permissions_from_role", move |conn| {
            Box::pin(async move {
                let role = role_key(conn, &role).await?;
                let keys =
                    resolve_keys(conn, "permissions", "name", &permissions, "Permission").await?;

                sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = ANY($2)")
                    .bind(role)
                    .bind(&keys)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("remove permissions from role", "Permission"))?;
                Ok(())
            })
        })
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, roles), fields(count = roles.len()))]
    async fn assign_roles_to_user(&self, user_id: &str, roles: &[String]) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["assign_roles_to_user"])
            .start_timer();

        let user_id = user_id.to_string();
        let roles = roles.to_vec();
        run_in_transaction(self.pool(), "assign_roles_to_user", move |conn| {
            Box::pin(async move {
                let user = user_key(conn, &user_id).await?;
                let keys = resolve_keys(conn, "roles", "name", &roles, "Role").await?;

                sqlx::query(
                    r#"
                    INSERT INTO user_roles (user_id, role_id)
                    SELECT $1, unnest($2::BIGINT[])
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(user)
                .bind(&keys)
                .execute(&mut *conn)
                .await
                .map_err(db_error("assign roles", "Role"))?;
                Ok(())
            })
        })
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, roles), fields(count = roles.len()))]
    async fn revoke_roles_from_user(&self, user_id: &str, roles: &[String]) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["revoke_roles_from_user"])
            .start_timer();

        let user_id = user_id.to_string();
        let roles = roles.to_vec();
        run_in_transaction(self.pool(), "revoke_roles_from_user", move |conn| {
            Box::pin(async move {
                let user = user_key(conn, &user_id).await?;
                let keys = resolve_keys(conn, "roles", "name", &roles, "Role").await?;

                sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = ANY($2)")
                    .bind(user)
                    .bind(&keys)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_error("revoke roles", "Role"))?;
                Ok(())
            })
        })
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn assert_role(&self, user_id: &str, role: &str) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["assert_role"])
            .start_timer();

        let granted = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM user_roles ur
                JOIN users u ON u.id = ur.user_id
                JOIN roles r ON r.id = ur.role_id
                WHERE u.object_id = $1 AND u.enabled
                  AND r.name = $2 AND r.enabled
            )
            "#,
        )
        .bind(user_id)
        .bind(role)
        .fetch_one(self.pool())
        .await
        .map_err(db_error("assert role", "Role"))?;

        timer.observe_duration();
        Ok(granted)
    }

    #[instrument(skip(self))]
    async fn assert_permission(&self, user_id: &str, permission: &str) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["assert_permission"])
            .start_timer();

        let granted = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM user_roles ur
                JOIN users u ON u.id = ur.user_id
                JOIN roles r ON r.id = ur.role_id
                JOIN role_permissions rp ON rp.role_id = r.id
                JOIN permissions p ON p.id = rp.permission_id
                WHERE u.object_id = $1 AND u.enabled
                  AND r.enabled
                  AND p.name = $2 AND p.enabled
            )
            "#,
        )
        .bind(user_id)
        .bind(permission)
        .fetch_one(self.pool())
        .await
        .map_err(db_error("assert permission", "Permission"))?;

        timer.observe_duration();
        Ok(granted)
    }
}
