//! Conversions between models and protobuf messages.

use chrono::{DateTime, Utc};
use prost_types::Timestamp;

use crate::grpc::proto;
use crate::models::{
    DomainStats, Pager, Paginator, Permission, Role, Session, Sorter, User, UserStats,
};
use crate::services::EntityRef;

pub fn datetime_to_timestamp(dt: DateTime<Utc>) -> Option<Timestamp> {
    Some(Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    })
}

pub fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn entity_ref(value: Option<proto::EntityRef>) -> EntityRef {
    let value = value.unwrap_or_default();
    EntityRef {
        id: non_empty(value.id),
        name: non_empty(value.name),
    }
}

pub fn page_request(page: Option<proto::PageRequest>) -> (Pager, Sorter) {
    let page = page.unwrap_or_default();
    (
        Pager::new(page.page, page.per_page),
        Sorter::new(page.sort, page.desc),
    )
}

pub fn page_info(paginator: Paginator) -> Option<proto::PageInfo> {
    Some(proto::PageInfo {
        page: paginator.page,
        per_page: paginator.per_page,
        total: paginator.total,
        has_next_page: paginator.has_next_page,
        total_pages: paginator.total_pages(),
    })
}

pub fn session_to_proto(session: Session) -> proto::Session {
    proto::Session {
        id: session.id,
        domain: Some(proto::SessionDomain {
            id: session.domain.id,
            name: session.domain.name,
            description: session.domain.description,
            enabled: session.domain.enabled,
        }),
        user: Some(proto::SessionUser {
            id: session.user.id,
            name: session.user.name,
            enabled: session.user.enabled,
        }),
        created_on: datetime_to_timestamp(session.created_on),
        updated_on: datetime_to_timestamp(session.updated_on),
        expires_on: datetime_to_timestamp(session.expires_on),
    }
}

pub fn domain_to_proto(stats: DomainStats) -> proto::Domain {
    let domain = stats.domain;
    proto::Domain {
        id: domain.id,
        name: domain.name,
        description: domain.description,
        enabled: domain.enabled,
        created_on: datetime_to_timestamp(domain.created_on),
        updated_on: datetime_to_timestamp(domain.updated_on),
        users_count: stats.users_count,
    }
}

pub fn user_to_proto(stats: UserStats) -> proto::User {
    let user = stats.user;
    proto::User {
        id: user.id,
        name: user.name,
        enabled: user.enabled,
        created_on: datetime_to_timestamp(user.created_on),
        updated_on: datetime_to_timestamp(user.updated_on),
        domains_count: stats.domains_count,
    }
}

/// A single user outside a listing carries no domain count.
pub fn bare_user_to_proto(user: User) -> proto::User {
    user_to_proto(UserStats {
        user,
        domains_count: 0,
    })
}

pub fn role_to_proto(role: Role) -> proto::Role {
    proto::Role {
        name: role.name,
        description: role.description,
        enabled: role.enabled,
        created_on: datetime_to_timestamp(role.created_on),
        updated_on: datetime_to_timestamp(role.updated_on),
    }
}

pub fn permission_to_proto(permission: Permission) -> proto::Permission {
    proto::Permission {
        name: permission.name,
        description: permission.description,
        evaluation_rule: permission.evaluation_rule,
        enabled: permission.enabled,
        created_on: datetime_to_timestamp(permission.created_on),
        updated_on: datetime_to_timestamp(permission.updated_on),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref_ignores_blanks() {
        let reference = entity_ref(Some(proto::EntityRef {
            id: "  ".into(),
            name: "acme".into(),
        }));
        assert_eq!(reference, EntityRef::by_name("acme"));
        assert_eq!(entity_ref(None), EntityRef::default());
    }

    #[test]
    fn test_page_request_defaults() {
        let (pager, sorter) = page_request(None);
        assert_eq!(pager, Pager::default());
        assert_eq!(sorter, Sorter::default());
    }

    #[test]
    fn test_timestamp_keeps_seconds() {
        let dt = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let ts = datetime_to_timestamp(dt).unwrap();
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.nanos, 0);
    }
}
