//! In-memory store.
//!
//! Intended for tests and local development. Rows are keyed by an internal
//! sequence number exactly like the SQL tables, and every write runs against a
//! staged copy of the state that is swapped in only when the work succeeds.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::{AppError, ErrorDomain, ErrorKind};
use tracing::instrument;

use super::{HealthCheck, RbacStore, SessionStore, TenancyStore};
use crate::models::{
    Domain, DomainStats, Page, Pager, Permission, Role, Session, SessionDomain, SessionUser,
    Sorter, User, UserStats, DOMAIN_SORT_FIELDS, RBAC_SORT_FIELDS, SESSION_SORT_FIELDS,
    USER_SORT_FIELDS,
};
use crate::services::transaction::panic_to_error;

type Key = i64;

#[derive(Debug, Clone)]
struct SessionRecord {
    session_id: String,
    domain: Key,
    user: Key,
    user_agent: String,
    remote_addr: String,
    created_on: DateTime<Utc>,
    updated_on: DateTime<Utc>,
    expires_on: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct State {
    sequence: Key,
    domains: BTreeMap<Key, Domain>,
    users: BTreeMap<Key, User>,
    /// (domain, user)
    domain_users: BTreeSet<(Key, Key)>,
    roles: BTreeMap<Key, Role>,
    permissions: BTreeMap<Key, Permission>,
    /// (role, permission)
    role_permissions: BTreeSet<(Key, Key)>,
    /// (user, role)
    user_roles: BTreeSet<(Key, Key)>,
    sessions: BTreeMap<Key, SessionRecord>,
}

fn not_found(entity: &str) -> AppError {
    AppError::not_found(ErrorDomain::DataAccess, format!("{} not found", entity))
}

fn already_exists(entity: &str) -> AppError {
    AppError::conflict(ErrorDomain::DataAccess, format!("{} already exists", entity))
}

fn lock_poisoned() -> AppError {
    AppError::data_access(ErrorKind::Operational, "Store unavailable")
        .with_cause(anyhow::anyhow!("lock poisoned"))
}

impl State {
    fn next_key(&mut self) -> Key {
        self.sequence += 1;
        self.sequence
    }

    fn domain_key(&self, id: &str) -> Result<Key, AppError> {
        self.domains
            .iter()
            .find(|(_, d)| d.id == id)
            .map(|(k, _)| *k)
            .ok_or_else(|| not_found("Domain").with_cause(anyhow::anyhow!("No domain with ID {}", id)))
    }

    fn user_key(&self, id: &str) -> Result<Key, AppError> {
        self.users
            .iter()
            .find(|(_, u)| u.id == id)
            .map(|(k, _)| *k)
            .ok_or_else(|| not_found("User").with_cause(anyhow::anyhow!("No user with ID {}", id)))
    }

    fn role_key(&self, name: &str) -> Result<Key, AppError> {
        self.roles
            .iter()
            .find(|(_, r)| r.name == name)
            .map(|(k, _)| *k)
            .ok_or_else(|| not_found("Role").with_cause(anyhow::anyhow!("No role named {}", name)))
    }

    fn permission_key(&self, name: &str) -> Result<Key, AppError> {
        self.permissions
            .iter()
            .find(|(_, p)| p.name == name)
            .map(|(k, _)| *k)
            .ok_or_else(|| {
                not_found("Permission").with_cause(anyhow::anyhow!("No permission named {}", name))
            })
    }

    fn session_key(&self, id: &str) -> Result<Key, AppError> {
        self.sessions
            .iter()
            .find(|(_, s)| s.session_id == id)
            .map(|(k, _)| *k)
            .ok_or_else(|| not_found("Session"))
    }

    fn domain_stats(&self, key: Key, domain: &Domain) -> DomainStats {
        DomainStats {
            domain: domain.clone(),
            users_count: self.domain_users.iter().filter(|(d, _)| *d == key).count() as i64,
        }
    }

    fn user_stats(&self, key: Key, user: &User) -> UserStats {
        UserStats {
            user: user.clone(),
            domains_count: self.domain_users.iter().filter(|(_, u)| *u == key).count() as i64,
        }
    }

    fn user_in_domain(&self, user: Key, domain: Key) -> Result<User, AppError> {
        if !self.domain_users.contains(&(domain, user)) {
            return Err(not_found("User in domain"));
        }
        self.users.get(&user).cloned().ok_or_else(|| not_found("User"))
    }

    fn joined(&self, record: &SessionRecord) -> Result<Session, AppError> {
        let domain = self.domains.get(&record.domain).ok_or_else(|| not_found("Domain"))?;
        let user = self.users.get(&record.user).ok_or_else(|| not_found("User"))?;
        Ok(Session {
            id: record.session_id.clone(),
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
            user_agent: record.user_agent.clone(),
            remote_addr: record.remote_addr.clone(),
            created_on: record.created_on,
            updated_on: record.updated_on,
            expires_on: record.expires_on,
        })
    }

    fn resolve_domains(&self, ids: &[String]) -> Result<Vec<Key>, AppError> {
        ids.iter().map(|id| self.domain_key(id)).collect()
    }

    fn resolve_roles(&self, names: &[String]) -> Result<Vec<Key>, AppError> {
        names.iter().map(|name| self.role_key(name)).collect()
    }

    fn resolve_permissions(&self, names: &[String]) -> Result<Vec<Key>, AppError> {
        names.iter().map(|name| self.permission_key(name)).collect()
    }
}

/// Comparable value of a sortable column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue {
    Text(String),
    Flag(bool),
    Time(DateTime<Utc>),
}

fn paginate<T>(
    mut items: Vec<T>,
    pager: &Pager,
    sorter: &Sorter,
    allowed: &[&'static str],
    default: &'static str,
    value: impl Fn(&T, &str) -> SortValue,
) -> Result<Page<T>, AppError> {
    let column = sorter.column(allowed, default)?;
    items.sort_by(|a, b| {
        let ordering = value(a, column).cmp(&value(b, column));
        if sorter.desc {
            ordering.reverse()
        } else {
            ordering
        }
    });

    let total = items.len() as i64;
    let paginator = pager.paginate(total);
    let items = items
        .into_iter()
        .skip(pager.offset() as usize)
        .take(pager.limit() as usize)
        .collect();
    Ok(Page::new(items, paginator))
}

fn domain_value(domain: &Domain, column: &str) -> SortValue {
    match column {
        "enabled" => SortValue::Flag(domain.enabled),
        "created_on" => SortValue::Time(domain.created_on),
        "updated_on" => SortValue::Time(domain.updated_on),
        _ => SortValue::Text(domain.name.clone()),
    }
}

fn user_value(user: &User, column: &str) -> SortValue {
    match column {
        "enabled" => SortValue::Flag(user.enabled),
        "created_on" => SortValue::Time(user.created_on),
        "updated_on" => SortValue::Time(user.updated_on),
        _ => SortValue::Text(user.name.clone()),
    }
}

fn role_value(role: &Role, column: &str) -> SortValue {
    match column {
        "enabled" => SortValue::Flag(role.enabled),
        "created_on" => SortValue::Time(role.created_on),
        "updated_on" => SortValue::Time(role.updated_on),
        _ => SortValue::Text(role.name.clone()),
    }
}

fn permission_value(permission: &Permission, column: &str) -> SortValue {
    match column {
        "enabled" => SortValue::Flag(permission.enabled),
        "created_on" => SortValue::Time(permission.created_on),
        "updated_on" => SortValue::Time(permission.updated_on),
        _ => SortValue::Text(permission.name.clone()),
    }
}

fn session_value(session: &Session, column: &str) -> SortValue {
    match column {
        "updated_on" => SortValue::Time(session.updated_on),
        "expires_on" => SortValue::Time(session.expires_on),
        _ => SortValue::Time(session.created_on),
    }
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, work: impl FnOnce(&State) -> Result<T, AppError>) -> Result<T, AppError> {
        let state = self.state.read().map_err(|_| lock_poisoned())?;
        work(&state)
    }

    /// Apply `work` to a staged copy; publish it only on success.
    fn transaction<T>(
        &self,
        name: &str,
        work: impl FnOnce(&mut State) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut state = self.state.write().map_err(|_| lock_poisoned())?;
        let mut staged = state.clone();
        match std::panic::catch_unwind(AssertUnwindSafe(|| work(&mut staged))) {
            Ok(Ok(value)) => {
                *state = staged;
                Ok(value)
            }
            Ok(Err(err)) => Err(err),
            Err(payload) => Err(panic_to_error(name, payload)),
        }
    }
}

#[async_trait]
impl TenancyStore for MemoryStore {
    #[instrument(skip(self, domain), fields(name = %domain.name))]
    async fn create_domain(&self, domain: &Domain) -> Result<Domain, AppError> {
        domain.validate()?;
        self.transaction("create_domain", |state| {
            if state
                .domains
                .values()
                .any(|d| d.name == domain.name || d.id == domain.id)
            {
                return Err(already_exists("Domain"));
            }
            let key = state.next_key();
            state.domains.insert(key, domain.clone());
            Ok(domain.clone())
        })
    }

    #[instrument(skip(self, domain), fields(id = %domain.id))]
    async fn update_domain(&self, domain: &Domain) -> Result<Domain, AppError> {
        domain.validate()?;
        self.transaction("update_domain", |state| {
            let key = state.domain_key(&domain.id)?;
            if state
                .domains
                .iter()
                .any(|(k, d)| *k != key && d.name == domain.name)
            {
                return Err(already_exists("Domain"));
            }
            let stored = state.domains.get_mut(&key).ok_or_else(|| not_found("Domain"))?;
            stored.name = domain.name.clone();
            stored.description = domain.description.clone();
            stored.enabled = domain.enabled;
            stored.updated_on = Utc::now();
            Ok(stored.clone())
        })
    }

    #[instrument(skip(self))]
    async fn delete_domain(&self, id: &str) -> Result<(), AppError> {
        self.transaction("delete_domain", |state| {
            let key = state.domain_key(id)?;
            state.sessions.retain(|_, s| s.domain != key);
            state.domain_users.retain(|(d, _)| *d != key);
            state.domains.remove(&key).ok_or_else(|| not_found("Domain"))?;
            Ok(())
        })
    }

    async fn find_domain(&self, id: &str) -> Result<Domain, AppError> {
        self.read(|state| {
            let key = state.domain_key(id)?;
            state.domains.get(&key).cloned().ok_or_else(|| not_found("Domain"))
        })
    }

    async fn find_domain_by_name(&self, name: &str) -> Result<Domain, AppError> {
        self.read(|state| {
            state
                .domains
                .values()
                .find(|d| d.name == name)
                .cloned()
                .ok_or_else(|| not_found("Domain"))
        })
    }

    async fn count_users(&self, domain_id: &str) -> Result<i64, AppError> {
        self.read(|state| {
            Ok(match state.domain_key(domain_id) {
                Ok(key) => state.domain_users.iter().filter(|(d, _)| *d == key).count() as i64,
                Err(_) => 0,
            })
        })
    }

    async fn list_domains(
        &self,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<DomainStats>, AppError> {
        self.read(|state| {
            let items = state
                .domains
                .iter()
                .map(|(k, d)| state.domain_stats(*k, d))
                .collect();
            paginate(items, pager, sorter, DOMAIN_SORT_FIELDS, "name", |s, c| {
                domain_value(&s.domain, c)
            })
        })
    }

    async fn list_domains_by_user(
        &self,
        user_id: &str,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<DomainStats>, AppError> {
        self.read(|state| {
            let items = match state.user_key(user_id) {
                Ok(user) => state
                    .domains
                    .iter()
                    .filter(|(k, _)| state.domain_users.contains(&(**k, user)))
                    .map(|(k, d)| state.domain_stats(*k, d))
                    .collect(),
                Err(_) => Vec::new(),
            };
            paginate(items, pager, sorter, DOMAIN_SORT_FIELDS, "name", |s, c| {
                domain_value(&s.domain, c)
            })
        })
    }

    #[instrument(skip(self, user), fields(name = %user.name))]
    async fn create_user(&self, user: &User, domain_ids: &[String]) -> Result<User, AppError> {
        user.validate()?;
        self.transaction("create_user", |state| {
            let domains = state.resolve_domains(domain_ids)?;
            if state
                .users
                .values()
                .any(|u| u.name == user.name || u.id == user.id)
            {
                return Err(already_exists("User"));
            }
            let key = state.next_key();
            state.users.insert(key, user.clone());
            for domain in domains {
                state.domain_users.insert((domain, key));
            }
            Ok(user.clone())
        })
    }

    #[instrument(skip(self, user, add_domain_ids, remove_domain_ids), fields(id = %user.id))]
    async fn update_user(
        &self,
        user: &User,
        add_domain_ids: &[String],
        remove_domain_ids: &[String],
    ) -> Result<User, AppError> {
        user.validate()?;
        self.transaction("update_user", |state| {
            let key = state.user_key(&user.id)?;
            let add = state.resolve_domains(add_domain_ids)?;
            let remove = state.resolve_domains(remove_domain_ids)?;
            if state
                .users
                .iter()
                .any(|(k, u)| *k != key && u.name == user.name)
            {
                return Err(already_exists("User"));
            }

            let stored = state.users.get_mut(&key).ok_or_else(|| not_found("User"))?;
            stored.name = user.name.clone();
            stored.password_hash = user.password_hash.clone();
            stored.enabled = user.enabled;
            stored.updated_on = Utc::now();
            let updated = stored.clone();

            for domain in add {
                state.domain_users.insert((domain, key));
            }
            for domain in remove {
                state.domain_users.remove(&(domain, key));
            }
            Ok(updated)
        })
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: &str) -> Result<(), AppError> {
        self.transaction("delete_user", |state| {
            let key = state.user_key(id)?;
            state.sessions.retain(|_, s| s.user != key);
            state.user_roles.retain(|(u, _)| *u != key);
            state.domain_users.retain(|(_, u)| *u != key);
            state.users.remove(&key).ok_or_else(|| not_found("User"))?;
            Ok(())
        })
    }

    async fn find_user(&self, id: &str) -> Result<User, AppError> {
        self.read(|state| {
            let key = state.user_key(id)?;
            state.users.get(&key).cloned().ok_or_else(|| not_found("User"))
        })
    }

    async fn find_user_by_name(&self, name: &str) -> Result<User, AppError> {
        self.read(|state| {
            state
                .users
                .values()
                .find(|u| u.name == name)
                .cloned()
                .ok_or_else(|| not_found("User"))
        })
    }

    async fn find_user_in_domain(&self, user_id: &str, domain_id: &str) -> Result<User, AppError> {
        self.read(|state| {
            let user = state.user_key(user_id)?;
            let domain = state.domain_key(domain_id)?;
            state.user_in_domain(user, domain)
        })
    }

    async fn find_user_by_name_in_domain(
        &self,
        name: &str,
        domain_id: &str,
    ) -> Result<User, AppError> {
        self.read(|state| {
            let user = state
                .users
                .iter()
                .find(|(_, u)| u.name == name)
                .map(|(k, _)| *k)
                .ok_or_else(|| not_found("User"))?;
            let domain = state.domain_key(domain_id)?;
            state.user_in_domain(user, domain)
        })
    }

    async fn count_domains(&self, user_id: &str) -> Result<i64, AppError> {
        self.read(|state| {
            Ok(match state.user_key(user_id) {
                Ok(key) => state.domain_users.iter().filter(|(_, u)| *u == key).count() as i64,
                Err(_) => 0,
            })
        })
    }

    async fn list_users(&self, pager: &Pager, sorter: &Sorter) -> Result<Page<UserStats>, AppError> {
        self.read(|state| {
            let items = state
                .users
                .iter()
                .map(|(k, u)| state.user_stats(*k, u))
                .collect();
            paginate(items, pager, sorter, USER_SORT_FIELDS, "name", |s, c| {
                user_value(&s.user, c)
            })
        })
    }

    async fn list_users_by_domain(
        &self,
        domain_id: &str,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<UserStats>, AppError> {
        self.read(|state| {
            let items = match state.domain_key(domain_id) {
                Ok(domain) => state
                    .users
                    .iter()
                    .filter(|(k, _)| state.domain_users.contains(&(domain, **k)))
                    .map(|(k, u)| state.user_stats(*k, u))
                    .collect(),
                Err(_) => Vec::new(),
            };
            paginate(items, pager, sorter, USER_SORT_FIELDS, "name", |s, c| {
                user_value(&s.user, c)
            })
        })
    }
}

#[async_trait]
impl RbacStore for MemoryStore {
    #[instrument(skip(self, role), fields(name = %role.name))]
    async fn create_role(&self, role: &Role) -> Result<Role, AppError> {
        role.validate()?;
        self.transaction("create_role", |state| {
            if state.roles.values().any(|r| r.name == role.name) {
                return Err(already_exists("Role"));
            }
            let key = state.next_key();
            state.roles.insert(key, role.clone());
            Ok(role.clone())
        })
    }

    #[instrument(skip(self, role), fields(name = %role.name))]
    async fn update_role(&self, role: &Role) -> Result<Role, AppError> {
        self.transaction("update_role", |state| {
            let key = state.role_key(&role.name)?;
            let stored = state.roles.get_mut(&key).ok_or_else(|| not_found("Role"))?;
            stored.description = role.description.clone();
            stored.enabled = role.enabled;
            stored.updated_on = Utc::now();
            Ok(stored.clone())
        })
    }

    #[instrument(skip(self))]
    async fn rename_role(&self, name: &str, new_name: &str) -> Result<Role, AppError> {
        crate::models::Role::new(new_name, "", true).validate()?;
        self.transaction("rename_role", |state| {
            let key = state.role_key(name)?;
            if state.roles.iter().any(|(k, r)| *k != key && r.name == new_name) {
                return Err(already_exists("Role"));
            }
            let stored = state.roles.get_mut(&key).ok_or_else(|| not_found("Role"))?;
            stored.name = new_name.to_string();
            stored.updated_on = Utc::now();
            Ok(stored.clone())
        })
    }

    #[instrument(skip(self))]
    async fn delete_role(&self, name: &str) -> Result<(), AppError> {
        self.transaction("delete_role", |state| {
            let key = state.role_key(name)?;
            state.user_roles.retain(|(_, r)| *r != key);
            state.role_permissions.retain(|(r, _)| *r != key);
            state.roles.remove(&key).ok_or_else(|| not_found("Role"))?;
            Ok(())
        })
    }

    async fn find_role(&self, name: &str) -> Result<Role, AppError> {
        self.read(|state| {
            let key = state.role_key(name)?;
            state.roles.get(&key).cloned().ok_or_else(|| not_found("Role"))
        })
    }

    async fn list_roles(&self, pager: &Pager, sorter: &Sorter) -> Result<Page<Role>, AppError> {
        self.read(|state| {
            let items = state.roles.values().cloned().collect();
            paginate(items, pager, sorter, RBAC_SORT_FIELDS, "name", role_value)
        })
    }

    async fn list_roles_by_user(
        &self,
        user_id: &str,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Role>, AppError> {
        self.read(|state| {
            let items = match state.user_key(user_id) {
                Ok(user) => state
                    .roles
                    .iter()
                    .filter(|(k, _)| state.user_roles.contains(&(user, **k)))
                    .map(|(_, r)| r.clone())
                    .collect(),
                Err(_) => Vec::new(),
            };
            paginate(items, pager, sorter, RBAC_SORT_FIELDS, "name", role_value)
        })
    }

    #[instrument(skip(self, permission), fields(name = %permission.name))]
    async fn create_permission(&self, permission: &Permission) -> Result<Permission, AppError> {
        permission.validate()?;
        self.transaction("create_permission", |state| {
            if state.permissions.values().any(|p| p.name == permission.name) {
                return Err(already_exists("Permission"));
            }
            let key = state.next_key();
            state.permissions.insert(key, permission.clone());
            Ok(permission.clone())
        })
    }

    #[instrument(skip(self, permission), fields(name = %permission.name))]
    async fn update_permission(&self, permission: &Permission) -> Result<Permission, AppError> {
        self.transaction("update_permission", |state| {
            let key = state.permission_key(&permission.name)?;
            let stored = state
                .permissions
                .get_mut(&key)
                .ok_or_else(|| not_found("Permission"))?;
            stored.description = permission.description.clone();
            stored.evaluation_rule = permission.evaluation_rule.clone();
            stored.enabled = permission.enabled;
            stored.updated_on = Utc::now();
            Ok(stored.clone())
        })
    }

    #[instrument(skip(self))]
    async fn rename_permission(&self, name: &str, new_name: &str) -> Result<Permission, AppError> {
        Permission::new(new_name, "", "", true).validate()?;
        self.transaction("rename_permission", |state| {
            let key = state.permission_key(name)?;
            if state
                .permissions
                .iter()
                .any(|(k, p)| *k != key && p.name == new_name)
            {
                return Err(already_exists("Permission"));
            }
            let stored = state
                .permissions
                .get_mut(&key)
                .ok_or_else(|| not_found("Permission"))?;
            stored.name = new_name.to_string();
            stored.updated_on = Utc::now();
            Ok(stored.clone())
        })
    }

    #[instrument(skip(self))]
    async fn delete_permission(&self, name: &str) -> Result<(), AppError> {
        self.transaction("delete_permission", |state| {
            let key = state.permission_key(name)?;
            state.role_permissions.retain(|(_, p)| *p != key);
            state
                .permissions
                .remove(&key)
                .ok_or_else(|| not_found("Permission"))?;
            Ok(())
        })
    }

    async fn find_permission(&self, name: &str) -> Result<Permission, AppError> {
        self.read(|state| {
            let key = state.permission_key(name)?;
            state
                .permissions
                .get(&key)
                .cloned()
                .ok_or_else(|| not_found("Permission"))
        })
    }

    async fn list_permissions(
        &self,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Permission>, AppError> {
        self.read(|state| {
            let items = state.permissions.values().cloned().collect();
            paginate(items, pager, sorter, RBAC_SORT_FIELDS, "name", permission_value)
        })
    }

    async fn list_permissions_by_role(
        &self,
        role: &str,
        pager: &Pager,
        sorter: &Sorter,
    ) -> Result<Page<Permission>, AppError> {
        self.read(|state| {
            let items = match state.role_key(role) {
                Ok(role) => state
                    .permissions
                    .iter()
                    .filter(|(k, _)| state.role_permissions.contains(&(role, **k)))
                    .map(|(_, p)| p.clone())
                    .collect(),
                Err(_) => Vec::new(),
            };
            paginate(items, pager, sorter, RBAC_SORT_FIELDS, "name", permission_value)
        })
    }

    #[instrument(skip(self, permissions), fields(count = permissions.len()))]
    async fn add_permissions_to_role(
        &self,
        role: &str,
        permissions: &[String],
    ) -> Result<(), AppError> {
        self.transaction("add_permissions_to_role", |state| {
            let role = state.role_key(role)?;
            let permissions = state.resolve_permissions(permissions)?;
            for permission in permissions {
                state.role_permissions.insert((role, permission));
            }
            Ok(())
        })
    }

    #[instrument(skip(self, permissions), fields(count = permissions.len()))]
    async fn remove_permissions_from_role(
        &self,
        role: &str,
        permissions: &[String],
    ) -> Result<(), AppError> {
        self.transaction("remove_permissions_from_role", |state| {
            let role = state.role_key(role)?;
            let permissions = state.resolve_permissions(permissions)?;
            for permission in permissions {
                state.role_permissions.remove(&(role, permission));
            }
            Ok(())
        })
    }

    #[instrument(skip(self, roles), fields(count = roles.len()))]
    async fn assign_roles_to_user(&self, user_id: &str, roles: &[String]) -> Result<(), AppError> {
        self.transaction("assign_roles_to_user", |state| {
            let user = state.user_key(user_id)?;
            let roles = state.resolve_roles(roles)?;
            for role in roles {
                state.user_roles.insert((user, role));
            }
            Ok(())
        })
    }

    #[instrument(skip(self, roles), fields(count = roles.len()))]
    async fn revoke_roles_from_user(&self, user_id: &str, roles: &[String]) -> Result<(), AppError> {
        self.transaction("revoke_roles_from_user", |state| {
            let user = state.user_key(user_id)?;
            let roles = state.resolve_roles(roles)?;
            for role in roles {
                state.user_roles.remove(&(user, role));
            }
            Ok(())
        })
    }

    async fn assert_role(&self, user_id: &str, role: &str) -> Result<bool, AppError> {
        self.read(|state| {
            let granted = state
                .users
                .iter()
                .filter(|(_, u)| u.id == user_id && u.enabled)
                .any(|(user, _)| {
                    state
                        .roles
                        .iter()
                        .filter(|(_, r)| r.name == role && r.enabled)
                        .any(|(role, _)| state.user_roles.contains(&(*user, *role)))
                });
            Ok(granted)
        })
    }

    async fn assert_permission(&self, user_id: &str, permission: &str) -> Result<bool, AppError> {
        self.read(|state| {
            let Some(permission) = state
                .permissions
                .iter()
                .find(|(_, p)| p.name == permission && p.enabled)
                .map(|(k, _)| *k)
            else {
                return Ok(false);
            };
            let granted = state
                .users
                .iter()
                .filter(|(_, u)| u.id == user_id && u.enabled)
                .any(|(user, _)| {
                    state
                        .roles
                        .iter()
                        .filter(|(_, r)| r.enabled)
                        .any(|(role, _)| {
                            state.user_roles.contains(&(*user, *role))
                                && state.role_permissions.contains(&(*role, permission))
                        })
                });
            Ok(granted)
        })
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    #[instrument(skip(self, candidate), fields(user_id = %candidate.user.id, domain_id = %candidate.domain.id))]
    async fn create_or_reuse(&self, candidate: &Session) -> Result<Session, AppError> {
        self.transaction("create_or_reuse_session", |state| {
            let domain = state.domain_key(&candidate.domain.id)?;
            let user = state.user_key(&candidate.user.id)?;
            let now = candidate.updated_on;

            let reusable = state
                .sessions
                .iter()
                .filter(|(_, s)| {
                    s.user == user
                        && s.domain == domain
                        && s.user_agent == candidate.user_agent
                        && s.remote_addr == candidate.remote_addr
                        && s.expires_on > now
                })
                .max_by(|(_, a), (_, b)| a.updated_on.cmp(&b.updated_on))
                .map(|(k, _)| *k);

            let key = match reusable {
                Some(key) => {
                    let record = state.sessions.get_mut(&key).ok_or_else(|| not_found("Session"))?;
                    record.updated_on = candidate.updated_on;
                    record.expires_on = candidate.expires_on;
                    key
                }
                None => {
                    if state.session_key(&candidate.id).is_ok() {
                        return Err(already_exists("Session"));
                    }
                    let key = state.next_key();
                    state.sessions.insert(
                        key,
                        SessionRecord {
                            session_id: candidate.id.clone(),
                            domain,
                            user,
                            user_agent: candidate.user_agent.clone(),
                            remote_addr: candidate.remote_addr.clone(),
                            created_on: candidate.created_on,
                            updated_on: candidate.updated_on,
                            expires_on: candidate.expires_on,
                        },
                    );
                    key
                }
            };

            let record = state.sessions.get(&key).ok_or_else(|| not_found("Session"))?;
            state.joined(record)
        })
    }

    async fn find_session(&self, id: &str) -> Result<Session, AppError> {
        self.read(|state| {
            let key = state.session_key(id)?;
            let record = state.sessions.get(&key).ok_or_else(|| not_found("Session"))?;
            state.joined(record)
        })
    }

    async fn find_user_specific(
        &self,
        user_id: &str,
        domain_id: &str,
        user_agent: &str,
        remote_addr: &str,
    ) -> Result<Session, AppError> {
        self.read(|state| {
            let user = state.user_key(user_id)?;
            let domain = state.domain_key(domain_id)?;
            let record = state
                .sessions
                .values()
                .filter(|s| {
                    s.user == user
                        && s.domain == domain
                        && s.user_agent == user_agent
                        && s.remote_addr == remote_addr
                })
                .max_by(|a, b| match a.updated_on.cmp(&b.updated_on) {
                    Ordering::Equal => a.created_on.cmp(&b.created_on),
                    other => other,
                })
                .ok_or_else(|| not_found("Session"))?;
            state.joined(record)
        })
    }

    #[instrument(skip(self))]
    async fn retain(
        &self,
        id: &str,
        updated_on: DateTime<Utc>,
        expires_on: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.transaction("retain_session", |state| {
            let key = state.session_key(id)?;
            let record = state.sessions.get_mut(&key).ok_or_else(|| not_found("Session"))?;
            record.updated_on = updated_on;
            record.expires_on = expires_on;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    async fn delete_session(&self, id: &str) -> Result<(), AppError> {
        self.transaction("delete_session", |state| {
            let key = state.session_key(id)?;
            state.sessions.remove(&key);
            Ok(())
        })
    }

    #[instrument(skip(self))]
    async fn purge(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        self.transaction("purge_sessions", |state| {
            let before = state.sessions.len();
            state.sessions.retain(|_, s| s.expires_on > now);
            Ok((before - state.sessions.len()) as u64)
        })
    }

    async fn list_sessions(&self, pager: &Pager, sorter: &Sorter) -> Result<Page<Session>, AppError> {
        self.read(|state| {
            let items = state
                .sessions
                .values()
                .map(|record| state.joined(record))
                .collect::<Result<Vec<_>, _>>()?;
            paginate(items, pager, sorter, SESSION_SORT_FIELDS, "created_on", session_value)
        })
    }
}

#[async_trait]
impl HealthCheck for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.read(|_| Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_transaction_leaves_state_untouched() {
        let store = MemoryStore::new();
        let result: Result<(), AppError> = store.transaction("seed", |state| {
            let key = state.next_key();
            state.domains.insert(key, Domain::new("acme", "", true));
            Err(AppError::data_access(ErrorKind::Conflict, "rejected"))
        });
        assert!(result.is_err());
        assert!(store.state.read().unwrap().domains.is_empty());
    }

    #[test]
    fn test_panicking_transaction_is_rolled_back() {
        let store = MemoryStore::new();
        let result: Result<(), AppError> = store.transaction("explode", |state| {
            let key = state.next_key();
            state.domains.insert(key, Domain::new("acme", "", true));
            panic!("boom");
        });

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Operational);
        assert!(store.state.read().unwrap().domains.is_empty());

        // The lock is not poisoned.
        assert!(store.transaction("after", |_| Ok(())).is_ok());
    }

    #[tokio::test]
    async fn test_sort_and_paginate_domains() {
        let store = MemoryStore::new();
        for name in ["charlie", "alpha", "bravo"] {
            store.create_domain(&Domain::new(name, "", true)).await.unwrap();
        }

        let page = store
            .list_domains(&Pager::new(1, 2), &Sorter::default())
            .await
            .unwrap();
        let names: Vec<_> = page.items.iter().map(|d| d.domain.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "bravo"]);
        assert!(page.paginator.has_next_page);
        assert_eq!(page.paginator.total, 3);

        let page = store
            .list_domains(&Pager::new(1, 10), &Sorter::new("name", true))
            .await
            .unwrap();
        assert_eq!(page.items[0].domain.name, "charlie");

        let err = store
            .list_domains(&Pager::default(), &Sorter::new("passwd", false))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_duplicate_names_conflict() {
        let store = MemoryStore::new();
        store.create_domain(&Domain::new("acme", "", true)).await.unwrap();
        let err = store
            .create_domain(&Domain::new("acme", "other", true))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.message(), "Domain already exists");
    }
}
