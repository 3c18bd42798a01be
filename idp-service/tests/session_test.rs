//! Session Authority tests over the in-memory store.

mod common;

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use common::{memory_state, seed, ALICE_PASSWORD, REMOTE_ADDR, USER_AGENT};
use idp_service::dtos::admin::{CreateUserRequest, UpdateDomainRequest};
use idp_service::services::{EntityRef, SessionRequest};
use idp_service::store::SessionStore;
use service_core::error::ErrorKind;
use tokio_test::{assert_err, assert_ok};

fn alice_request(domain_id: &str) -> SessionRequest {
    SessionRequest {
        domain: EntityRef::by_id(domain_id),
        user: EntityRef::by_name("alice"),
        password: Some(ALICE_PASSWORD.to_string()),
        user_agent: USER_AGENT.to_string(),
        remote_addr: REMOTE_ADDR.to_string(),
    }
}

#[tokio::test]
async fn create_session_returns_valid_session() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;

    let session = assert_ok!(state.authority.create(alice_request(&seeded.domain_id)).await);

    assert!(session.is_valid());
    assert!(!session.is_expired());
    assert_eq!(session.user.id, seeded.alice_id);
    assert_eq!(session.user.name, "alice");
    assert_eq!(session.domain.id, seeded.domain_id);
    assert_eq!(session.domain.name, "acme");
    assert_eq!(session.user_agent, USER_AGENT);
    assert_eq!(session.remote_addr, REMOTE_ADDR);
    assert!(session.expires_on > session.updated_on);
}

#[tokio::test]
async fn create_session_by_domain_name() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;

    let mut request = alice_request(&seeded.domain_id);
    request.domain = EntityRef::by_name("acme");
    request.user = EntityRef::by_id(&seeded.alice_id);

    let session = assert_ok!(state.authority.create(request).await);
    assert_eq!(session.domain.id, seeded.domain_id);
}

#[tokio::test]
async fn same_client_reuses_session() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;

    let first = assert_ok!(state.authority.create(alice_request(&seeded.domain_id)).await);
    tokio::time::sleep(StdDuration::from_millis(10)).await;
    let second = assert_ok!(state.authority.create(alice_request(&seeded.domain_id)).await);

    assert_eq!(first.id, second.id);
    assert_eq!(first.created_on, second.created_on);
    assert!(second.updated_on > first.updated_on);
    assert!(second.expires_on > first.expires_on);
}

#[tokio::test]
async fn different_client_gets_new_session() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;

    let first = assert_ok!(state.authority.create(alice_request(&seeded.domain_id)).await);

    let mut other = alice_request(&seeded.domain_id);
    other.remote_addr = "198.51.100.20".to_string();
    let second = assert_ok!(state.authority.create(other).await);

    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn session_is_bound_to_issuing_client() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;
    let session = assert_ok!(state.authority.create(alice_request(&seeded.domain_id)).await);

    let err = assert_err!(
        state
            .authority
            .validate(&session.id, USER_AGENT, "198.51.100.20")
            .await
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = assert_err!(
        state
            .authority
            .validate(&session.id, "other-agent/2.0", REMOTE_ADDR)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert_ok!(state.authority.validate(&session.id, USER_AGENT, REMOTE_ADDR).await);
}

#[tokio::test]
async fn unknown_or_empty_token_is_not_found() {
    let (state, _store) = memory_state();
    seed(&state).await;

    let err = assert_err!(
        state
            .authority
            .validate("no-such-session", USER_AGENT, REMOTE_ADDR)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = assert_err!(state.authority.validate("  ", USER_AGENT, REMOTE_ADDR).await);
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn validate_slides_expiration() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;
    let session = assert_ok!(state.authority.create(alice_request(&seeded.domain_id)).await);

    tokio::time::sleep(StdDuration::from_millis(10)).await;
    let renewed = assert_ok!(
        state
            .authority
            .validate(&session.id, USER_AGENT, REMOTE_ADDR)
            .await
    );

    assert_eq!(renewed.id, session.id);
    assert!(renewed.updated_on > session.updated_on);
    assert!(renewed.expires_on > session.expires_on);
    assert_eq!(renewed.expires_on, renewed.updated_on + state.authority.ttl());

    let stored = assert_ok!(state.authority.find(&session.id).await);
    assert_eq!(stored.expires_on, renewed.expires_on);
}

#[tokio::test]
async fn expired_session_is_rejected_and_purged() {
    let (state, store) = memory_state();
    let seeded = seed(&state).await;
    let session = assert_ok!(state.authority.create(alice_request(&seeded.domain_id)).await);

    let past = Utc::now() - Duration::minutes(5);
    assert_ok!(store.retain(&session.id, past - Duration::minutes(30), past).await);

    let err = assert_err!(
        state
            .authority
            .validate(&session.id, USER_AGENT, REMOTE_ADDR)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.message(), "Session expired");

    let purged = assert_ok!(state.authority.purge().await);
    assert_eq!(purged, 1);

    let err = assert_err!(state.authority.find(&session.id).await);
    assert!(err.is_not_found());
    assert_eq!(assert_ok!(state.authority.purge().await), 0);
}

#[tokio::test]
async fn expired_session_is_not_reused() {
    let (state, store) = memory_state();
    let seeded = seed(&state).await;
    let first = assert_ok!(state.authority.create(alice_request(&seeded.domain_id)).await);

    let past = Utc::now() - Duration::minutes(1);
    assert_ok!(store.retain(&first.id, past, past).await);

    let second = assert_ok!(state.authority.create(alice_request(&seeded.domain_id)).await);
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn purge_keeps_live_sessions() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;
    let session = assert_ok!(state.authority.create(alice_request(&seeded.domain_id)).await);

    assert_eq!(assert_ok!(state.authority.purge().await), 0);
    assert_ok!(state.authority.find(&session.id).await);
}

#[tokio::test]
async fn wrong_password_is_forbidden() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;

    let mut request = alice_request(&seeded.domain_id);
    request.password = Some("wrong".to_string());

    let err = assert_err!(state.authority.create(request).await);
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(err.message(), "Authentication failed");
}

#[tokio::test]
async fn empty_password_is_forbidden() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;

    let mut request = alice_request(&seeded.domain_id);
    request.password = Some(String::new());

    let err = assert_err!(state.authority.create(request).await);
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(err.message(), "Authentication failed");
}

#[tokio::test]
async fn unknown_user_and_unknown_domain_look_alike() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;

    let mut unknown_user = alice_request(&seeded.domain_id);
    unknown_user.user = EntityRef::by_name("mallory");
    let user_err = assert_err!(state.authority.create(unknown_user).await);

    let mut unknown_domain = alice_request(&seeded.domain_id);
    unknown_domain.domain = EntityRef::by_name("globex");
    let domain_err = assert_err!(state.authority.create(unknown_domain).await);

    assert_eq!(user_err.kind(), ErrorKind::Forbidden);
    assert_eq!(domain_err.kind(), ErrorKind::Forbidden);
    assert_eq!(user_err.message(), domain_err.message());
}

#[tokio::test]
async fn non_member_is_forbidden() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;

    assert_ok!(
        state
            .directory
            .create_user(CreateUserRequest {
                name: "outsider".into(),
                password: "outsider-pass".into(),
                enabled: true,
                domain_ids: vec![],
            })
            .await
    );

    let mut request = alice_request(&seeded.domain_id);
    request.user = EntityRef::by_name("outsider");
    request.password = Some("outsider-pass".to_string());

    let err = assert_err!(state.authority.create(request).await);
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn disabled_user_is_forbidden() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;

    assert_ok!(
        state
            .directory
            .create_user(CreateUserRequest {
                name: "dormant".into(),
                password: "dormant-pass".into(),
                enabled: false,
                domain_ids: vec![seeded.domain_id.clone()],
            })
            .await
    );

    let mut request = alice_request(&seeded.domain_id);
    request.user = EntityRef::by_name("dormant");
    request.password = Some("dormant-pass".to_string());

    let err = assert_err!(state.authority.create(request).await);
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn missing_domain_reference_is_conflict() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;

    let mut request = alice_request(&seeded.domain_id);
    request.domain = EntityRef::default();

    let err = assert_err!(state.authority.create(request).await);
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.message(), "You need to provide domain ID or name");
}

#[tokio::test]
async fn disabling_domain_invalidates_live_sessions() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;
    let session = assert_ok!(state.authority.create(alice_request(&seeded.domain_id)).await);

    assert_ok!(
        state
            .directory
            .update_domain(
                &seeded.domain_id,
                UpdateDomainRequest {
                    name: "acme".into(),
                    description: "Acme Corp".into(),
                    enabled: false,
                },
            )
            .await
    );

    let err = assert_err!(
        state
            .authority
            .validate(&session.id, USER_AGENT, REMOTE_ADDR)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn deleted_session_is_gone() {
    let (state, _store) = memory_state();
    let seeded = seed(&state).await;
    let session = assert_ok!(state.authority.create(alice_request(&seeded.domain_id)).await);

    assert_ok!(state.authority.delete(&session.id).await);

    let err = assert_err!(
        state
            .authority
            .validate(&session.id, USER_AGENT, REMOTE_ADDR)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
