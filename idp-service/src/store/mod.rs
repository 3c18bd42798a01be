//! Storage capabilities used by the session authority, the authorization
//! engine and the directory.
//!
//! Each backing engine implements every trait on one type so that multi-table
//! operations (cascading deletes, batch joins) can share a transaction.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;

use crate::models::{
    Domain, DomainStats, Page, Pager, Permission, Role, Session, Sorter, User, UserStats,
};

/// Domains, users and domain membership.
#[async_trait]
pub trait TenancyStore: Send + Sync {
    async fn create_domain(&self, domain: &Domain) -> Result<Domain, AppError>;

    /// Replace name, description and enabled flag.
    async fn update_domain(&self, domain: &Domain) -> Result<Domain, AppError>;

    /// Delete sessions, then memberships, then the domain, in one transaction.
    async fn delete_domain(&self, id: &str) -> Result<(), AppError>;

    async fn find_domain(&self, id: &str) -> Result<Domain, AppError>;

    async fn find_domain_by_name(&self, name: &str) -> Result<Domain, AppError>;

    async fn count_users(&self, domain_id: &str) -> Result<i64, AppError>;

    async fn list_domains(
        &self,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<DomainStats>, AppError>;

    async fn list_domains_by_user(
        &self,
        user_id: &str,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<DomainStats>, AppError>;

    /// Insert the user and its memberships. Every domain must exist.
    async fn create_user(&self, user: &User, domain_ids: &[String]) -> Result<User, AppError>;

    /// Replace name, password hash and enabled flag, and adjust memberships.
    async fn update_user(
        &self,
        user: &User,
        add_domain_ids: &[String],
        remove_domain_ids: &[String],
    ) -> Result<User, AppError>;

    /// Delete sessions, role assignments, memberships, then the user, in one transaction.
    async fn delete_user(&self, id: &str) -> Result<(), AppError>;

    async fn find_user(&self, id: &str) -> Result<User, AppError>;

    async fn find_user_by_name(&self, name: &str) -> Result<User, AppError>;

    /// NotFound unless the user is a member of the domain.
    async fn find_user_in_domain(&self, user_id: &str, domain_id: &str) -> Result<User, AppError>;

    async fn find_user_by_name_in_domain(
        &self,
        name: &str,
        domain_id: &str,
    ) -> Result<User, AppError>;

    async fn count_domains(&self, user_id: &str) -> Result<i64, AppError>;

    async fn list_users(&self, pager: &Pager, sorter: &Sorter) -> Result<Page<UserStats>, AppError>;

    async fn list_users_by_domain(
        &self,
        domain_id: &str,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<UserStats>, AppError>;
}

/// Roles, permissions and the joins between them and users.
#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn create_role(&self, role: &Role) -> Result<Role, AppError>;

    /// Replace description and enabled flag of the role named `role.name`.
    async fn update_role(&self, role: &Role) -> Result<Role, AppError>;

    /// Rename in place; join rows follow the role.
    async fn rename_role(&self, name: &str, new_name: &str) -> Result<Role, AppError>;

    async fn delete_role(&self, name: &str) -> Result<(), AppError>;

    async fn find_role(&self, name: &str) -> Result<Role, AppError>;

    async fn list_roles(&self, pager: &Pager, sorter: &Sorter) -> Result<Page<Role>, AppError>;

    async fn list_roles_by_user(
        &self,
        user_id: &str,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Role>, AppError>;

    async fn create_permission(&self, permission: &Permission) -> Result<Permission, AppError>;

    /// Replace description, evaluation rule and enabled flag.
    async fn update_permission(&self, permission: &Permission) -> Result<Permission, AppError>;

    async fn rename_permission(&self, name: &str, new_name: &str)
        -> Result<Permission, AppError>;

    async fn delete_permission(&self, name: &str) -> Result<(), AppError>;

    async fn find_permission(&self, name: &str) -> Result<Permission, AppError>;

    async fn list_permissions(
        &self,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Permission>, AppError>;

    async fn list_permissions_by_role(
        &self,
        role: &str,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Permission>, AppError>;

    /// All names must resolve before any join row is written. Existing pairs are kept.
    async fn add_permissions_to_role(&self, role: &str, permissions: &[String])
        -> Result<(), AppError>;

    /// All names must resolve before any join row is removed.
    async fn remove_permissions_from_role(
        &self,
        role: &str,
        permissions: &[String],
    ) -> Result<(), AppError>;

    async fn assign_roles_to_user(&self, user_id: &str, roles: &[String]) -> Result<(), AppError>;

    async fn revoke_roles_from_user(&self, user_id: &str, roles: &[String])
        -> Result<(), AppError>;

    /// Whether an enabled user holds an enabled role of this name.
    async fn assert_role(&self, user_id: &str, role: &str) -> Result<bool, AppError>;

    /// Whether an enabled user reaches an enabled permission of this name
    /// through an enabled role.
    async fn assert_permission(&self, user_id: &str, permission: &str) -> Result<bool, AppError>;
}

/// Session rows, always read joined with their live domain and user.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Return the unexpired session issued to the candidate's user, domain and
    /// client, renewed to the candidate's timestamps; otherwise insert the
    /// candidate. Lookup and insert are serialized per client key.
    async fn create_or_reuse(&self, candidate: &Session) -> Result<Session, AppError>;

    async fn find_session(&self, id: &str) -> Result<Session, AppError>;

    /// Most recently renewed session issued to this client, expired or not.
    async fn find_user_specific(
        &self,
        user_id: &str,
        domain_id: &str,
        user_agent: &str,
        remote_addr: &str,
    ) -> Result<Session, AppError>;

    async fn retain(
        &self,
        id: &str,
        updated_on: DateTime<Utc>,
        expires_on: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn delete_session(&self, id: &str) -> Result<(), AppError>;

    /// Delete every session with `expires_on <= now`; returns how many went.
    async fn purge(&self, now: DateTime<Utc>) -> Result<u64, AppError>;

    async fn list_sessions(&self, pager: &Pager, sorter: &Sorter) -> Result<Page<Session>, AppError>;
}

/// Backend liveness for `/health` and `/ready`.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;
}

/// Everything a running service needs from its backing store.
pub trait Store: TenancyStore + RbacStore + SessionStore + HealthCheck + 'static {}

impl<T> Store for T where T: TenancyStore + RbacStore + SessionStore + HealthCheck + 'static {}
