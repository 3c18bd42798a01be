//! Application startup and lifecycle management.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, head, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use tokio::net::TcpListener;
use tonic::transport::Server as GrpcServer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::IdpConfig;
use crate::grpc::proto::{
    authorization_service_server::AuthorizationServiceServer,
    directory_service_server::DirectoryServiceServer,
    session_service_server::SessionServiceServer, FILE_DESCRIPTOR_SET,
};
use crate::grpc::{
    trace_context_interceptor, AuthorizationServiceImpl, CallContext, DirectoryServiceImpl,
    SessionServiceImpl,
};
use crate::handlers::{self, admin, session};
use crate::middleware::{admin_middleware, auth_middleware};
use crate::services::metrics::metrics_middleware;
use crate::services::{
    hasher_for, init_metrics, AuthorizationEngine, Database, Directory, PasswordHasher,
    PurgeScheduler, SessionAuthority,
};
use crate::store::{HealthCheck, PgStore, Store};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub admin_role: String,
    pub authority: Arc<SessionAuthority>,
    pub authorization: Arc<AuthorizationEngine>,
    pub directory: Arc<Directory>,
    pub health: Arc<dyn HealthCheck>,
    /// Take the client address from `X-Real-IP`/`X-Forwarded-For`.
    pub trust_proxy_headers: bool,
}

impl AppState {
    /// Wire every component onto one backing store.
    pub fn new<S: Store>(
        store: Arc<S>,
        hasher: Arc<dyn PasswordHasher>,
        session_ttl: chrono::Duration,
        service_name: impl Into<String>,
        admin_role: impl Into<String>,
    ) -> Self {
        let authority = Arc::new(SessionAuthority::new(
            store.clone(),
            store.clone(),
            hasher.clone(),
            session_ttl,
        ));
        let authorization = Arc::new(AuthorizationEngine::new(store.clone()));
        let directory = Arc::new(Directory::new(store.clone(), store.clone(), hasher));

        Self {
            service_name: service_name.into(),
            admin_role: admin_role.into(),
            authority,
            authorization,
            directory,
            health: store,
            trust_proxy_headers: true,
        }
    }

    pub fn with_trusted_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    fn call_context(&self) -> CallContext {
        CallContext::new(
            self.authority.clone(),
            self.authorization.clone(),
            self.admin_role.clone(),
            self.trust_proxy_headers,
        )
    }
}

fn admin_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/domains", get(admin::list_domains).post(admin::create_domain))
        .route(
            "/domains/:id",
            get(admin::get_domain)
                .put(admin::update_domain)
                .delete(admin::delete_domain),
        )
        .route("/domains/:id/users", get(admin::list_domain_users))
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/users/:id",
            get(admin::get_user)
                .put(admin::update_user)
                .delete(admin::delete_user),
        )
        .route("/users/:id/domains", get(admin::list_user_domains))
        .route(
            "/users/:id/roles",
            get(admin::list_user_roles)
                .post(admin::assign_roles)
                .delete(admin::revoke_roles),
        )
        .route("/roles", get(admin::list_roles).post(admin::create_role))
        .route(
            "/roles/:name",
            get(admin::get_role)
                .put(admin::update_role)
                .delete(admin::delete_role),
        )
        .route("/roles/:name/rename", post(admin::rename_role))
        .route(
            "/roles/:name/permissions",
            get(admin::list_role_permissions)
                .post(admin::add_permissions)
                .delete(admin::remove_permissions),
        )
        .route(
            "/permissions",
            get(admin::list_permissions).post(admin::create_permission),
        )
        .route(
            "/permissions/:name",
            get(admin::get_permission)
                .put(admin::update_permission)
                .delete(admin::delete_permission),
        )
        .route("/permissions/:name/rename", post(admin::rename_permission))
        .route("/sessions", get(admin::list_sessions))
        .route("/sessions/purge", post(admin::purge_sessions))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_middleware,
        ))
}

/// The complete HTTP surface.
pub fn http_router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/v1/sessions/current",
            get(session::get_current)
                .head(session::check_current)
                .delete(session::delete_current),
        )
        .route("/v1/assert/role/:role", head(session::assert_role))
        .route(
            "/v1/assert/permission/:permission",
            head(session::assert_permission),
        )
        .nest("/v1/admin", admin_router(&state))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/v1/sessions", post(session::create_session))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    purge_interval: Duration,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: IdpConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: IdpConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: IdpConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let store = Arc::new(PgStore::new(db));
        let hasher = hasher_for(config.security.password_hasher, &config.security.secret_salt);
        let state = AppState::new(
            store,
            hasher,
            config.session.ttl(),
            config.service_name.clone(),
            config.security.admin_role.clone(),
        )
        .with_trusted_proxy_headers(config.security.trust_proxy_headers);

        Self::bind(
            state,
            &config.common.host,
            config.common.port,
            config.session.purge_interval(),
        )
        .await
    }

    /// Bind the HTTP listener on `port` and the gRPC listener on `port + 1`.
    /// Port 0 picks a free port for both.
    pub async fn bind(
        state: AppState,
        host: &str,
        port: u16,
        purge_interval: Duration,
    ) -> Result<Self, AppError> {
        let http_addr = format!("{}:{}", host, port);
        let http_listener = TcpListener::bind(&http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        let grpc_addr = format!("{}:{}", host, if port == 0 { 0 } else { port + 1 });
        let grpc_listener = TcpListener::bind(&grpc_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %grpc_addr, "Failed to bind gRPC listener");
            AppError::from(e)
        })?;
        let grpc_port = grpc_listener.local_addr()?.port();

        tracing::info!(http_port, grpc_port, "Identity provider listeners bound");

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            purge_interval,
            state,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let purge = PurgeScheduler::new(self.state.authority.clone(), self.purge_interval);
        // Stops the purge loop however this future ends.
        let _purge_guard = purge.shutdown_token().drop_guard();
        purge.start();

        let ctx = self.state.call_context();
        let session_service = SessionServiceImpl::new(ctx.clone());
        let authorization_service = AuthorizationServiceImpl::new(ctx.clone());
        let directory_service = DirectoryServiceImpl::new(ctx, self.state.directory.clone());

        let http_router = http_router(self.state.clone())
            .into_make_service_with_connect_info::<SocketAddr>();

        // gRPC health service
        let (mut health_reporter, grpc_health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<SessionServiceServer<SessionServiceImpl>>()
            .await;
        health_reporter
            .set_serving::<AuthorizationServiceServer<AuthorizationServiceImpl>>()
            .await;
        health_reporter
            .set_serving::<DirectoryServiceServer<DirectoryServiceImpl>>()
            .await;

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| {
                std::io::Error::other(format!("Failed to build reflection service: {}", e))
            })?;

        let grpc_trace_layer = TraceLayer::new_for_grpc()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(self.grpc_listener);
        let grpc_server = GrpcServer::builder()
            .layer(grpc_trace_layer)
            .add_service(grpc_health_service)
            .add_service(reflection_service)
            .add_service(SessionServiceServer::with_interceptor(
                session_service,
                trace_context_interceptor,
            ))
            .add_service(AuthorizationServiceServer::with_interceptor(
                authorization_service,
                trace_context_interceptor,
            ))
            .add_service(DirectoryServiceServer::with_interceptor(
                directory_service,
                trace_context_interceptor,
            ))
            .serve_with_incoming(incoming);

        tracing::info!(
            service = %self.state.service_name,
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            grpc_port = self.grpc_port,
            "Service ready to accept connections"
        );

        tokio::select! {
            result = axum::serve(self.http_listener, http_router) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "HTTP server error");
                    return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
                }
            }
            result = grpc_server => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "gRPC server error");
                    return Err(std::io::Error::other(format!("gRPC server error: {}", e)));
                }
            }
        }

        Ok(())
    }
}
