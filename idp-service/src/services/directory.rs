//! Administrative use cases over domains, users, roles and permissions.

use std::sync::Arc;

use service_core::error::{AppError, ErrorDomain};
use tracing::{info, instrument};
use validator::Validate;

use crate::dtos::admin::{
    CreateDomainRequest, CreatePermissionRequest, CreateRoleRequest, CreateUserRequest,
    UpdateDomainRequest, UpdatePermissionRequest, UpdateRoleRequest, UpdateUserRequest,
};
use crate::models::{
    Domain, DomainStats, Page, Pager, Permission, Role, Sorter, User, UserStats,
};
use crate::services::password::PasswordHasher;
use crate::store::{RbacStore, TenancyStore};

pub struct Directory {
    tenancy: Arc<dyn TenancyStore>,
    rbac: Arc<dyn RbacStore>,
    hasher: Arc<dyn PasswordHasher>,
}

fn failed(action: &'static str) -> impl FnOnce(AppError) -> AppError {
    move |err| err.wrap(ErrorDomain::UseCase, format!("Failed to {}", action))
}

impl Directory {
    pub fn new(
        tenancy: Arc<dyn TenancyStore>,
        rbac: Arc<dyn RbacStore>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            tenancy,
            rbac,
            hasher,
        }
    }

    // =========================================================================
    // Domains
    // =========================================================================

    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create_domain(&self, req: CreateDomainRequest) -> Result<Domain, AppError> {
        req.validate()?;
        let domain = Domain::new(req.name, req.description, req.enabled);
        self.tenancy
            .create_domain(&domain)
            .await
            .map_err(failed("create domain"))
    }

    pub async fn get_domain(&self, id: &str) -> Result<Domain, AppError> {
        self.tenancy.find_domain(id).await.map_err(failed("get domain"))
    }

    pub async fn list_domains(
        &self,
        user_id: Option<&str>,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<DomainStats>, AppError> {
        match user_id {
            Some(user_id) => self.tenancy.list_domains_by_user(user_id, pager, sorter).await,
            None => self.tenancy.list_domains(pager, sorter).await,
        }
        .map_err(failed("list domains"))
    }

    pub async fn count_users(&self, domain_id: &str) -> Result<i64, AppError> {
        self.tenancy
            .count_users(domain_id)
            .await
            .map_err(failed("count users"))
    }

    #[instrument(skip(self, req))]
    pub async fn update_domain(
        &self,
        id: &str,
        req: UpdateDomainRequest,
    ) -> Result<Domain, AppError> {
        req.validate()?;
        let mut domain = self.tenancy.find_domain(id).await.map_err(failed("update domain"))?;
        domain.name = req.name;
        domain.description = req.description;
        domain.enabled = req.enabled;
        self.tenancy
            .update_domain(&domain)
            .await
            .map_err(failed("update domain"))
    }

    #[instrument(skip(self))]
    pub async fn delete_domain(&self, id: &str) -> Result<(), AppError> {
        self.tenancy
            .delete_domain(id)
            .await
            .map_err(failed("delete domain"))?;
        info!(domain_id = %id, "Domain removed with its sessions and memberships");
        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create_user(&self, req: CreateUserRequest) -> Result<User, AppError> {
        req.validate()?;
        let hash = self.hasher.hash(&req.password)?;
        let user = User::new(req.name, hash, req.enabled);
        self.tenancy
            .create_user(&user, &req.domain_ids)
            .await
            .map_err(failed("create user"))
    }

    pub async fn get_user(&self, id: &str) -> Result<User, AppError> {
        self.tenancy.find_user(id).await.map_err(failed("get user"))
    }

    pub async fn list_users(
        &self,
        domain_id: Option<&str>,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<UserStats>, AppError> {
        match domain_id {
            Some(domain_id) => self.tenancy.list_users_by_domain(domain_id, pager, sorter).await,
            None => self.tenancy.list_users(pager, sorter).await,
        }
        .map_err(failed("list users"))
    }

    pub async fn count_domains(&self, user_id: &str) -> Result<i64, AppError> {
        self.tenancy
            .count_domains(user_id)
            .await
            .map_err(failed("count domains"))
    }

    #[instrument(skip(self, req))]
    pub async fn update_user(&self, id: &str, req: UpdateUserRequest) -> Result<User, AppError> {
        req.validate()?;
        let mut user = self.tenancy.find_user(id).await.map_err(failed("update user"))?;
        user.name = req.name;
        user.enabled = req.enabled;
        if let Some(password) = &req.password {
            user.password_hash = self.hasher.hash(password)?;
        }
        self.tenancy
            .update_user(&user, &req.add_domain_ids, &req.remove_domain_ids)
            .await
            .map_err(failed("update user"))
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: &str) -> Result<(), AppError> {
        self.tenancy.delete_user(id).await.map_err(failed("delete user"))
    }

    #[instrument(skip(self, roles))]
    pub async fn assign_roles(&self, user_id: &str, roles: &[String]) -> Result<(), AppError> {
        self.rbac
            .assign_roles_to_user(user_id, roles)
            .await
            .map_err(failed("assign roles"))
    }

    #[instrument(skip(self, roles))]
    pub async fn revoke_roles(&self, user_id: &str, roles: &[String]) -> Result<(), AppError> {
        self.rbac
            .revoke_roles_from_user(user_id, roles)
            .await
            .map_err(failed("revoke roles"))
    }

    // =========================================================================
    // Roles
    // =========================================================================

    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create_role(&self, req: CreateRoleRequest) -> Result<Role, AppError> {
        req.validate()?;
        let role = Role::new(req.name, req.description, req.enabled);
        self.rbac.create_role(&role).await.map_err(failed("create role"))
    }

    pub async fn get_role(&self, name: &str) -> Result<Role, AppError> {
        self.rbac.find_role(name).await.map_err(failed("get role"))
    }

    pub async fn list_roles(
        &self,
        user_id: Option<&str>,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Role>, AppError> {
        match user_id {
            Some(user_id) => self.rbac.list_roles_by_user(user_id, pager, sorter).await,
            None => self.rbac.list_roles(pager, sorter).await,
        }
        .map_err(failed("list roles"))
    }

    #[instrument(skip(self, req))]
    pub async fn update_role(&self, name: &str, req: UpdateRoleRequest) -> Result<Role, AppError> {
        let mut role = self.rbac.find_role(name).await.map_err(failed("update role"))?;
        role.description = req.description;
        role.enabled = req.enabled;
        self.rbac.update_role(&role).await.map_err(failed("update role"))
    }

    #[instrument(skip(self))]
    pub async fn rename_role(&self, name: &str, new_name: &str) -> Result<Role, AppError> {
        self.rbac
            .rename_role(name, new_name)
            .await
            .map_err(failed("rename role"))
    }

    #[instrument(skip(self))]
    pub async fn delete_role(&self, name: &str) -> Result<(), AppError> {
        self.rbac.delete_role(name).await.map_err(failed("delete role"))
    }

    #[instrument(skip(self, permissions))]
    pub async fn add_permissions(&self, role: &str, permissions: &[String]) -> Result<(), AppError> {
        self.rbac
            .add_permissions_to_role(role, permissions)
            .await
            .map_err(failed("add permissions to role"))
    }

    #[instrument(skip(self, permissions))]
    pub async fn remove_permissions(
        &self,
        role: &str,
        permissions: &[String],
    ) -> Result<(), AppError> {
        self.rbac
            .remove_permissions_from_role(role, permissions)
            .await
            .map_err(failed("remove permissions from role"))
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create_permission(
        &self,
        req: CreatePermissionRequest,
    ) -> Result<Permission, AppError> {
        req.validate()?;
        let permission =
            Permission::new(req.name, req.description, req.evaluation_rule, req.enabled);
        self.rbac
            .create_permission(&permission)
            .await
            .map_err(failed("create permission"))
    }

    pub async fn get_permission(&self, name: &str) -> Result<Permission, AppError> {
        self.rbac
            .find_permission(name)
            .await
            .map_err(failed("get permission"))
    }

    pub async fn list_permissions(
        &self,
        role: Option<&str>,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Permission>, AppError> {
        match role {
            Some(role) => self.rbac.list_permissions_by_role(role, pager, sorter).await,
            None => self.rbac.list_permissions(pager, sorter).await,
        }
        .map_err(failed("list permissions"))
    }

    #[instrument(skip(self, req))]
    pub async fn update_permission(
        &self,
        name: &str,
        req: UpdatePermissionRequest,
    ) -> Result<Permission, AppError> {
        let mut permission = self
            .rbac
            .find_permission(name)
            .await
            .map_err(failed("update permission"))?;
        permission.description = req.description;
        permission.evaluation_rule = req.evaluation_rule;
        permission.enabled = req.enabled;
        self.rbac
            .update_permission(&permission)
            .await
            .map_err(failed("update permission"))
    }

    #[instrument(skip(self))]
    pub async fn rename_permission(
        &self,
        name: &str,
        new_name: &str,
    ) -> Result<Permission, AppError> {
        self.rbac
            .rename_permission(name, new_name)
            .await
            .map_err(failed("rename permission"))
    }

    #[instrument(skip(self))]
    pub async fn delete_permission(&self, name: &str) -> Result<(), AppError> {
        self.rbac
            .delete_permission(name)
            .await
            .map_err(failed("delete permission"))
    }
}
