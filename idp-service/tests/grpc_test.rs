//! gRPC surface tests against a running server.

mod common;

use common::{from_address, from_client, seed, TestApp, ALICE_PASSWORD, ROOT_PASSWORD};
use idp_service::grpc::proto::*;
use tonic::Code;

async fn login(app: &TestApp, user: &str, password: &str) -> String {
    let mut client = app.session_client().await;
    let response = client
        .create_session(from_client(CreateSessionRequest {
            domain: Some(EntityRef {
                id: String::new(),
                name: "acme".to_string(),
            }),
            user: Some(EntityRef {
                id: String::new(),
                name: user.to_string(),
            }),
            password: password.to_string(),
        }))
        .await;
    assert!(response.is_ok(), "CreateSession should succeed: {:?}", response.err());

    response.unwrap().into_inner().session.unwrap().id
}

#[tokio::test]
async fn create_and_check_session() {
    let app = TestApp::spawn().await;
    let seeded = seed(&app.state).await;
    let token = login(&app, "alice", ALICE_PASSWORD).await;

    let mut client = app.session_client().await;
    let checked = client
        .check_session(from_client(CheckSessionRequest {
            session_id: token.clone(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(checked.expires_on.is_some());

    let session = client
        .get_session(from_client(GetSessionRequest {
            session_id: token.clone(),
        }))
        .await
        .unwrap()
        .into_inner()
        .session
        .unwrap();
    assert_eq!(session.id, token);
    assert_eq!(session.user.unwrap().id, seeded.alice_id);
    assert_eq!(session.domain.unwrap().id, seeded.domain_id);
}

#[tokio::test]
async fn same_client_reuses_session() {
    let app = TestApp::spawn().await;
    seed(&app.state).await;

    let first = login(&app, "alice", ALICE_PASSWORD).await;
    let second = login(&app, "alice", ALICE_PASSWORD).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn wrong_password_is_permission_denied() {
    let app = TestApp::spawn().await;
    seed(&app.state).await;

    let mut client = app.session_client().await;
    let status = client
        .create_session(from_client(CreateSessionRequest {
            domain: Some(EntityRef {
                id: String::new(),
                name: "acme".to_string(),
            }),
            user: Some(EntityRef {
                id: String::new(),
                name: "alice".to_string(),
            }),
            password: "wrong".to_string(),
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn empty_password_is_permission_denied() {
    let app = TestApp::spawn().await;
    seed(&app.state).await;

    let mut client = app.session_client().await;
    for password in ["", "   "] {
        let status = client
            .create_session(from_client(CreateSessionRequest {
                domain: Some(EntityRef {
                    id: String::new(),
                    name: "acme".to_string(),
                }),
                user: Some(EntityRef {
                    id: String::new(),
                    name: "root".to_string(),
                }),
                password: password.to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::PermissionDenied);
    }
}

#[tokio::test]
async fn unknown_or_moved_session_is_unauthenticated() {
    let app = TestApp::spawn().await;
    seed(&app.state).await;
    let token = login(&app, "alice", ALICE_PASSWORD).await;

    let mut client = app.session_client().await;
    let status = client
        .check_session(from_client(CheckSessionRequest {
            session_id: "no-such-session".to_string(),
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    let status = client
        .check_session(from_address(
            CheckSessionRequest {
                session_id: token.clone(),
            },
            "198.51.100.20",
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    client
        .delete_session(from_client(DeleteSessionRequest {
            session_id: token.clone(),
        }))
        .await
        .unwrap();
    let status = client
        .check_session(from_client(CheckSessionRequest { session_id: token }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn assertions_report_grants() {
    let app = TestApp::spawn().await;
    seed(&app.state).await;
    let root = login(&app, "root", ROOT_PASSWORD).await;
    let alice = login(&app, "alice", ALICE_PASSWORD).await;

    let mut client = app.authorization_client().await;
    let granted = client
        .assert_role(from_client(AssertRoleRequest {
            session_id: root,
            role: "admin".to_string(),
        }))
        .await
        .unwrap()
        .into_inner()
        .granted;
    assert!(granted);

    let granted = client
        .assert_role(from_client(AssertRoleRequest {
            session_id: alice.clone(),
            role: "admin".to_string(),
        }))
        .await
        .unwrap()
        .into_inner()
        .granted;
    assert!(!granted);

    let granted = client
        .assert_permission(from_client(AssertPermissionRequest {
            session_id: alice,
            permission: "doc:read".to_string(),
        }))
        .await
        .unwrap()
        .into_inner()
        .granted;
    assert!(!granted);
}

#[tokio::test]
async fn directory_requires_admin() {
    let app = TestApp::spawn().await;
    seed(&app.state).await;
    let alice = login(&app, "alice", ALICE_PASSWORD).await;

    let mut client = app.directory_client().await;
    let status = client
        .list_domains(from_client(ListDomainsRequest {
            session_id: alice,
            page: None,
            user_id: String::new(),
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let status = client
        .list_domains(from_client(ListDomainsRequest {
            session_id: String::new(),
            page: None,
            user_id: String::new(),
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn directory_manages_domains() {
    let app = TestApp::spawn().await;
    seed(&app.state).await;
    let root = login(&app, "root", ROOT_PASSWORD).await;

    let mut client = app.directory_client().await;
    let domain = client
        .create_domain(from_client(CreateDomainRequest {
            session_id: root.clone(),
            name: "globex".to_string(),
            description: "Globex".to_string(),
            enabled: true,
        }))
        .await
        .unwrap()
        .into_inner()
        .domain
        .unwrap();
    assert_eq!(domain.name, "globex");
    assert!(!domain.id.is_empty());

    let status = client
        .create_domain(from_client(CreateDomainRequest {
            session_id: root.clone(),
            name: "globex".to_string(),
            description: String::new(),
            enabled: true,
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let listed = client
        .list_domains(from_client(ListDomainsRequest {
            session_id: root,
            page: Some(PageRequest {
                page: 1,
                per_page: 1,
                sort: "name".to_string(),
                desc: false,
            }),
            user_id: String::new(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(listed.domains.len(), 1);
    assert_eq!(listed.domains[0].name, "acme");
    assert_eq!(listed.domains[0].users_count, 2);

    let page_info = listed.page_info.unwrap();
    assert_eq!(page_info.total, 2);
    assert!(page_info.has_next_page);
    assert_eq!(page_info.total_pages, 2);
}

#[tokio::test]
async fn directory_manages_roles_and_purges() {
    let app = TestApp::spawn().await;
    let seeded = seed(&app.state).await;
    let root = login(&app, "root", ROOT_PASSWORD).await;

    let mut directory = app.directory_client().await;
    directory
        .create_role(from_client(CreateRoleRequest {
            session_id: root.clone(),
            name: "editor".to_string(),
            description: String::new(),
            enabled: true,
        }))
        .await
        .unwrap();

    let status = directory
        .assign_roles(from_client(UserRolesRequest {
            session_id: root.clone(),
            user_id: seeded.alice_id.clone(),
            roles: vec!["editor".to_string(), "ghost".to_string()],
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    directory
        .assign_roles(from_client(UserRolesRequest {
            session_id: root.clone(),
            user_id: seeded.alice_id.clone(),
            roles: vec!["editor".to_string()],
        }))
        .await
        .unwrap();

    let roles = directory
        .list_roles(from_client(ListRolesRequest {
            session_id: root.clone(),
            page: None,
            user_id: seeded.alice_id.clone(),
        }))
        .await
        .unwrap()
        .into_inner()
        .roles;
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].name, "editor");

    let purged = directory
        .purge_sessions(from_client(PurgeSessionsRequest { session_id: root }))
        .await
        .unwrap()
        .into_inner()
        .purged;
    assert_eq!(purged, 0);
}
