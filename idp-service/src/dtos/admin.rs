use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{
    Domain, DomainStats, Page, Pager, Paginator, Permission, Role, Session, Sorter, User,
    UserStats,
};

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDomainRequest {
    #[validate(length(min = 1, message = "Domain name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

/// Full replacement of a domain's mutable fields.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateDomainRequest {
    #[validate(length(min = 1, message = "Domain name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, message = "User name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub domain_ids: Vec<String>,
}

/// Full replacement of a user's mutable fields. The password is kept when omitted.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, message = "User name is required"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password cannot be empty"))]
    pub password: Option<String>,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub add_domain_ids: Vec<String>,
    #[serde(default)]
    pub remove_domain_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, message = "Role name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub description: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePermissionRequest {
    #[validate(length(min = 1, message = "Permission name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub evaluation_rule: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePermissionRequest {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub evaluation_rule: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RenameRequest {
    #[validate(length(min = 1, message = "New name is required"))]
    pub new_name: String,
}

/// Batch of role or permission names.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NamesRequest {
    #[validate(length(min = 1, message = "At least one name is required"))]
    pub names: Vec<String>,
}

/// Query string of every listing endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub sort: Option<String>,
    pub desc: Option<bool>,
}

impl ListParams {
    pub fn pager(&self) -> Pager {
        let defaults = Pager::default();
        Pager::new(
            self.page.unwrap_or(defaults.page),
            self.per_page.unwrap_or(defaults.per_page),
        )
    }

    pub fn sorter(&self) -> Sorter {
        Sorter::new(self.sort.clone().unwrap_or_default(), self.desc.unwrap_or(false))
    }
}

/// One page of a listing.
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub paginator: Paginator,
    pub total_pages: i64,
}

impl<T> From<Page<T>> for ListResponse<T> {
    fn from(page: Page<T>) -> Self {
        Self {
            total_pages: page.paginator.total_pages(),
            items: page.items,
            paginator: page.paginator,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DomainResponse {
    pub domain: Domain,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct RoleResponse {
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct PermissionResponse {
    pub permission: Permission,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub purged: u64,
}

pub type DomainList = ListResponse<DomainStats>;
pub type UserList = ListResponse<UserStats>;
pub type RoleList = ListResponse<Role>;
pub type PermissionList = ListResponse<Permission>;
pub type SessionList = ListResponse<Session>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_params_defaults() {
        let params = ListParams::default();
        assert_eq!(params.pager(), Pager::default());
        assert_eq!(params.sorter(), Sorter::default());

        let params = ListParams {
            page: Some(3),
            per_page: Some(1000),
            sort: Some("name".into()),
            desc: Some(true),
        };
        let pager = params.pager();
        assert_eq!(pager.page, 3);
        assert_eq!(pager.per_page, crate::models::MAX_PER_PAGE);
        assert!(params.sorter().desc);
    }

    #[test]
    fn test_validation() {
        let req = CreateDomainRequest {
            name: String::new(),
            description: String::new(),
            enabled: true,
        };
        assert!(req.validate().is_err());

        let req = UpdateUserRequest {
            name: "alice".into(),
            password: None,
            enabled: true,
            add_domain_ids: vec![],
            remove_domain_ids: vec![],
        };
        assert!(req.validate().is_ok());

        let req = NamesRequest { names: vec![] };
        assert!(req.validate().is_err());
    }
}
