//! Domain models for idp-service.

mod domain;
mod pagination;
mod rbac;
mod session;
mod user;

pub use domain::{Domain, DomainStats, DOMAIN_SORT_FIELDS};
pub use pagination::{Page, Pager, Paginator, Sorter, DEFAULT_PER_PAGE, MAX_PER_PAGE};
pub use rbac::{Permission, Role, RBAC_SORT_FIELDS};
pub use session::{
    rfc3339_seconds, Session, SessionDomain, SessionRow, SessionUser, SESSION_SORT_FIELDS,
};
pub use user::{User, UserStats, USER_SORT_FIELDS};
