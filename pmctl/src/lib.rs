//! # pmctl: Access Control for a Pulsar Admin Console
//!
//! `pmctl` is the authorization and credential layer behind a web console for Apache Pulsar
//! clusters. It decides who may do what on which tenant, namespace or topic, and it issues and
//! revokes the credentials callers present to prove who they are.
//!
//! ## Overview
//!
//! A console manages one or more clusters, each registered as an *environment*. Exactly one
//! environment is active at a time and every permission decision is made against it. Within an
//! environment, administrators build *roles* out of a fixed catalogue of seventeen
//! `(action, resource level)` permissions, optionally narrowing each grant with a resource pattern
//! such as `acme/*` or `acme/orders/*-events`, and assign those roles to users.
//!
//! Three kinds of credential exist:
//!
//! - **Sessions**: a short-lived signed access token paired with a single-use refresh token. The
//!   access token only authenticates while its session row is live, so revoking a session takes
//!   effect on the next request.
//! - **OIDC logins**: an environment may delegate sign-in to an OpenID Connect provider. The
//!   authorization-code exchange is PKCE-protected and ends in an ordinary session.
//! - **API tokens**: long-lived `pc_`-prefixed bearer tokens for scripts and CI. Only a hash is
//!   stored; the value is shown once at creation.
//! - **Cluster tokens**: JWTs for the Pulsar brokers themselves, signed with a per-environment
//!   secret that is encrypted at rest.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum). All persistence goes through the
//! [`store::AuthStore`] trait, implemented over PostgreSQL for production and in memory for tests
//! and for running without a database.
//!
//! ### Request Flow
//!
//! Every request under `/api/v1` first passes through [`auth::middleware::rbac_enforcement`]. It
//! looks the `(method, path)` pair up in the configured route table and, for a matching route,
//! resolves the caller and checks the required permission in the active environment. Unmatched
//! routes pass straight through. Handlers then pull the caller out with the
//! [`auth::current_user::CurrentUser`] extractor, which reuses whatever the middleware resolved,
//! and perform any finer-grained checks against a concrete resource path themselves.
//!
//! ### Core Components
//!
//! - [`auth`]: resource patterns, signed tokens, caller extraction and the route-level RBAC layer
//! - [`rbac`]: the authorization service and system role seeding
//! - [`credentials`]: API token, cluster token, session and OIDC login lifecycles
//! - [`store`]: the persistence seam, with [`db`] holding the PostgreSQL repositories
//! - [`api`]: the `/rbac`, `/tokens`, `/auth`, `/auth/oidc` and `/environments` HTTP surface
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use pmctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = pmctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     pmctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! Migrations run automatically on startup when `database.url` is set:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::migrate::MigrateError> {
//! pmctl::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod errors;
mod openapi;
pub mod rbac;
pub mod store;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Router,
    http::{self, HeaderValue},
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use bon::Builder;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;

use crate::{
    auth::{middleware::RouteTable, tokens::TokenIssuer},
    config::{CorsOrigin, DefaultEnvironment},
    credentials::{ApiTokenService, OidcService, SessionService, maintenance::run_session_cleanup},
    crypto::SecretCipher,
    db::models::{environments::EnvironmentCreateDBRequest, users::UserCreateDBRequest},
    openapi::ApiDoc,
    rbac::{RbacService, seed::seed_system_roles},
    store::{AuthStore, MemoryStore, PostgresStore, StoreResult},
    types::{EnvironmentId, UserId, abbrev_uuid},
};

/// Application state shared across all request handlers.
///
/// The four services and the route table are built from `store` and `config` by
/// [`AppState::from_store`]; they share the same store handle.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn AuthStore>,
    pub rbac: RbacService,
    pub api_tokens: ApiTokenService,
    pub sessions: SessionService,
    pub oidc: OidcService,
    /// Compiled `rbac.route_permissions`
    pub routes: Arc<RouteTable>,
}

impl AppState {
    /// Wire the services over `store`. Fails on a missing secret or a bad route pattern.
    pub fn from_store(config: Config, store: Arc<dyn AuthStore>) -> anyhow::Result<Self> {
        let issuer = TokenIssuer::from_config(&config)?;
        let encryption_key = config
            .encryption_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .context("encryption_key is required")?;
        let cipher = SecretCipher::new(encryption_key);
        let routes = RouteTable::compile(&config.rbac.route_permissions).context("Failed to compile route permissions")?;
        let http = reqwest::Client::builder()
            .timeout(config.auth.oidc_request_timeout)
            .build()
            .context("Failed to create identity provider HTTP client")?;
        let sessions = SessionService::new(store.clone(), issuer, cipher.clone());

        Ok(Self::builder()
            .rbac(RbacService::new(store.clone()))
            .api_tokens(ApiTokenService::new(store.clone(), cipher.clone()))
            .oidc(OidcService::new(
                store.clone(),
                cipher,
                sessions.clone(),
                http,
                config.auth.oidc_login_timeout,
            ))
            .sessions(sessions)
            .routes(Arc::new(routes))
            .store(store)
            .config(config)
            .build())
    }
}

/// Get the pmctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial admin user if it doesn't exist.
///
/// Idempotent: an existing user with this email is promoted to global admin if it isn't one
/// already. Returns the admin's user ID.
#[instrument(skip(store))]
pub async fn create_initial_admin_user(email: &str, store: &dyn AuthStore) -> StoreResult<UserId> {
    if let Some(existing) = store.get_user_by_email(email).await? {
        if !existing.is_global_admin {
            store.set_global_admin(existing.id, true).await?;
            info!(user_id = %abbrev_uuid(&existing.id), "Promoted existing user to global admin");
        }
        return Ok(existing.id);
    }

    let created = store
        .create_user(&UserCreateDBRequest {
            email: email.to_string(),
            display_name: None,
            is_global_admin: true,
        })
        .await?;
    info!(user_id = %abbrev_uuid(&created.id), "Created initial admin user");
    Ok(created.id)
}

/// Make sure the configured default environment exists with its system roles.
///
/// It is activated only when no environment is active, so a switch made by an administrator
/// survives restarts.
#[instrument(skip_all, fields(name = %default.name))]
pub async fn ensure_default_environment(default: &DefaultEnvironment, store: &dyn AuthStore) -> StoreResult<EnvironmentId> {
    let environment = match store.get_environment_by_name(&default.name).await? {
        Some(environment) => environment,
        None => {
            let environment = store
                .create_environment(&EnvironmentCreateDBRequest {
                    name: default.name.clone(),
                    admin_url: default.admin_url.clone(),
                    rbac_enabled: default.rbac_enabled,
                })
                .await?;
            info!(environment_id = %abbrev_uuid(&environment.id), "Created default environment");
            environment
        }
    };

    let seeded = seed_system_roles(store, environment.id).await?;
    if seeded > 0 {
        info!(seeded, "Seeded system roles");
    }

    if store.get_active_environment().await?.is_none() {
        store.activate_environment(environment.id).await?;
        info!(environment_id = %abbrev_uuid(&environment.id), "Activated default environment");
    }

    Ok(environment.id)
}

/// Startup data: the bootstrap admin, the default environment, and system roles in whichever
/// environment is active.
pub async fn bootstrap(store: &dyn AuthStore, config: &Config) -> anyhow::Result<()> {
    create_initial_admin_user(&config.admin_email, store)
        .await
        .context("Failed to create initial admin user")?;

    if let Some(default) = &config.default_environment {
        ensure_default_environment(default, store)
            .await
            .context("Failed to set up default environment")?;
    }

    if let Some(active) = store.get_active_environment().await? {
        seed_system_roles(store, active.id).await?;
    }

    Ok(())
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allow_origin = if config.cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Origins never carry a trailing slash
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(config.cors.allow_credentials)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::DELETE,
        ])
        .allow_headers([
            http::header::AUTHORIZATION,
            http::header::CONTENT_TYPE,
            http::HeaderName::try_from(config.auth.api_token_header.as_str())?,
        ])
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the main application router with all endpoints and middleware.
///
/// - `/healthz`
/// - `/api/v1/*`: the console API, behind the route-level RBAC layer
/// - `/docs` and `/api-docs/openapi.json`
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{auth as auth_handlers, environments, oidc, rbac as rbac_handlers, tokens};

    let api_routes = Router::new()
        // Permissions and roles
        .route("/rbac/permissions", get(rbac_handlers::list_permissions))
        .route("/rbac/roles", get(rbac_handlers::list_roles).post(rbac_handlers::create_role))
        .route(
            "/rbac/roles/{role_id}",
            get(rbac_handlers::get_role)
                .put(rbac_handlers::update_role)
                .delete(rbac_handlers::delete_role),
        )
        .route(
            "/rbac/roles/{role_id}/permissions",
            post(rbac_handlers::add_role_permission).put(rbac_handlers::set_role_permissions),
        )
        .route("/rbac/roles/{role_id}/users", get(rbac_handlers::list_role_users))
        .route(
            "/rbac/roles/{role_id}/permissions/{permission_id}",
            delete(rbac_handlers::remove_role_permission),
        )
        // Role assignment and checks
        .route("/rbac/users", get(rbac_handlers::list_users))
        .route(
            "/rbac/users/{user_id}/roles",
            post(rbac_handlers::assign_user_role).put(rbac_handlers::set_user_roles),
        )
        .route("/rbac/users/{user_id}/roles/{role_id}", delete(rbac_handlers::remove_user_role))
        .route("/rbac/users/{user_id}/permissions", get(rbac_handlers::get_user_permissions))
        .route("/rbac/check", post(rbac_handlers::check_permission))
        .route("/rbac/my-permissions", get(rbac_handlers::my_permissions))
        // API tokens
        .route("/tokens", get(tokens::list_tokens).post(tokens::create_token))
        .route("/tokens/stats", get(tokens::token_stats))
        .route("/tokens/revoke-all", post(tokens::revoke_all_tokens))
        .route(
            "/tokens/{token_id}",
            get(tokens::get_token).delete(tokens::delete_token),
        )
        .route("/tokens/{token_id}/revoke", post(tokens::revoke_token))
        // Cluster tokens
        .route("/tokens/pulsar/capability", get(tokens::cluster_token_capability))
        .route("/tokens/pulsar/generate", post(tokens::generate_cluster_token))
        .route(
            "/tokens/pulsar/secret",
            post(tokens::set_cluster_token_secret).delete(tokens::remove_cluster_token_secret),
        )
        // Token administration
        .route("/tokens/admin/user/{user_id}", get(tokens::admin_list_user_tokens))
        .route("/tokens/admin/user/{user_id}/revoke-all", post(tokens::admin_revoke_user_tokens))
        // Sessions
        .route("/auth/refresh", post(auth_handlers::refresh))
        .route("/auth/logout", post(auth_handlers::logout))
        .route("/auth/sessions", get(auth_handlers::list_sessions))
        .route("/auth/sessions/revoke-others", post(auth_handlers::revoke_other_sessions))
        .route("/auth/sessions/{session_id}", delete(auth_handlers::revoke_session))
        // OIDC login, public
        .route("/auth/oidc/providers", get(oidc::list_login_providers))
        .route("/auth/oidc/authorize", post(oidc::authorize))
        .route("/auth/oidc/callback", post(oidc::callback))
        // Environments
        .route(
            "/environments",
            get(environments::list_environments).post(environments::create_environment),
        )
        .route("/environments/{environment_id}/activate", post(environments::activate_environment))
        .route("/environments/{environment_id}/rbac", put(environments::set_environment_rbac))
        // OIDC provider administration
        .route(
            "/environments/{environment_id}/oidc",
            get(oidc::get_provider)
                .put(oidc::configure_provider)
                .delete(oidc::delete_provider),
        )
        .route("/environments/{environment_id}/oidc/enable", post(oidc::enable_provider))
        .route("/environments/{environment_id}/oidc/disable", post(oidc::disable_provider))
        .route("/environments/{environment_id}/oidc/client-secret", put(oidc::update_client_secret))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .route("/api-docs/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        // Outside the nest so rules see the full `/api/v1/...` path
        .layer(from_fn_with_state(state.clone(), auth::middleware::rbac_enforcement));

    // Tracing outermost so CORS preflights are logged too
    let router = router.layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_request(DefaultOnRequest::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(create_cors_layer(&state.config)?),
    );

    Ok(router)
}

/// Background tasks running alongside the HTTP server: currently the session sweeper.
///
/// When dropped, the `drop_guard` cancels the shutdown token, signalling every task to stop.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(state: &AppState, shutdown_token: CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    let sessions = state.sessions.clone();
    let interval = state.config.maintenance.cleanup_interval;
    let cleanup_shutdown = shutdown_token.clone();
    background_tasks.push(tokio::spawn(async move {
        if let Err(e) = run_session_cleanup(sessions, interval, cleanup_shutdown).await {
            tracing::error!("Session cleanup task failed: {e:#}");
        }
    }));

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Connect to PostgreSQL and run migrations, or fall back to the in-memory store.
async fn setup_store(config: &Config) -> anyhow::Result<(Arc<dyn AuthStore>, Option<PgPool>)> {
    let Some(url) = config.database.url.as_deref() else {
        tracing::warn!("No database.url configured, using the in-memory store; state is lost on restart");
        return Ok((Arc::new(MemoryStore::new()), None));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .context("Failed to connect to database")?;
    migrator().run(&pool).await.context("Failed to run migrations")?;
    info!("Database migrations applied");

    Ok((Arc::new(PostgresStore::new(pool.clone())), Some(pool)))
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] connects the store, runs migrations, bootstraps startup
///    data and starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: when the shutdown signal resolves, stops background services and closes the
///    pool
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting pmctl with configuration: {:#?}", config);

        if config.rbac.enforcement == crate::config::RbacEnforcement::Annotate {
            tracing::warn!("RBAC enforcement is in annotate mode; route permissions are logged but not enforced");
        }

        let (store, pool) = setup_store(&config).await?;
        bootstrap(store.as_ref(), &config).await?;

        let app_state = AppState::from_store(config.clone(), store)?;
        let router = build_router(&app_state)?;
        let bg_services = setup_background_services(&app_state, CancellationToken::new());

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "pmctl listening on http://{}, docs at http://localhost:{}/docs",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::*;
    use axum::http::{StatusCode, header};

    #[test_log::test(tokio::test)]
    async fn test_bootstrap_is_idempotent() {
        let config = create_test_config();
        let store = MemoryStore::new();

        bootstrap(&store, &config).await.unwrap();
        bootstrap(&store, &config).await.unwrap();

        let admin = store.get_user_by_email(&config.admin_email).await.unwrap().unwrap();
        assert!(admin.is_global_admin);
        assert_eq!(store.list_users(0, 100).await.unwrap().len(), 1);

        let environments = store.list_environments().await.unwrap();
        assert_eq!(environments.len(), 1);
        assert!(environments[0].is_active);
        assert_eq!(store.list_roles(environments[0].id, true).await.unwrap().len(), 5);
    }

    #[test_log::test(tokio::test)]
    async fn test_bootstrap_promotes_existing_user() {
        let config = create_test_config();
        let store = MemoryStore::new();
        store
            .create_user(&UserCreateDBRequest {
                email: config.admin_email.clone(),
                display_name: Some("Ops".to_string()),
                is_global_admin: false,
            })
            .await
            .unwrap();

        let admin_id = create_initial_admin_user(&config.admin_email, &store).await.unwrap();

        let admin = store.get_user(admin_id).await.unwrap().unwrap();
        assert!(admin.is_global_admin);
        assert_eq!(admin.display_name.as_deref(), Some("Ops"));
    }

    #[test_log::test(tokio::test)]
    async fn test_default_environment_does_not_steal_activation() {
        let config = create_test_config();
        let store = MemoryStore::new();
        let other = store
            .create_environment(&EnvironmentCreateDBRequest {
                name: "prod".to_string(),
                admin_url: "http://pulsar-prod:8080".to_string(),
                rbac_enabled: true,
            })
            .await
            .unwrap();
        store.activate_environment(other.id).await.unwrap();

        bootstrap(&store, &config).await.unwrap();

        let active = store.get_active_environment().await.unwrap().unwrap();
        assert_eq!(active.id, other.id);
        // The active environment gets its system roles too
        assert_eq!(store.list_roles(other.id, true).await.unwrap().len(), 5);
        assert!(store.get_environment_by_name("test").await.unwrap().is_some());
    }

    #[test]
    fn test_app_state_requires_secrets() {
        let mut config = create_test_config();
        config.encryption_key = None;
        assert!(AppState::from_store(config, Arc::new(MemoryStore::new())).is_err());

        let mut config = create_test_config();
        config.secret_key = Some(String::new());
        assert!(AppState::from_store(config, Arc::new(MemoryStore::new())).is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_public_endpoints() {
        let state = create_test_state().await;
        let app = create_test_app(state);

        let response = app.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");

        let response = app.get("/api-docs/openapi.json").await;
        response.assert_status_ok();
        let doc: serde_json::Value = response.json();
        assert!(doc["paths"]["/rbac/roles"].is_object());

        app.get("/docs").await.assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn test_route_rules_apply_to_console_routes() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "nobody@example.com").await;
        let token = bearer_token(&state, user.id).await;
        let app = create_test_app(state);

        // `^/api/v1/environment` needs read:cluster, which a user with no roles lacks
        let response = app.get("/api/v1/environments").authorization_bearer(&token).await;
        response.assert_status(StatusCode::FORBIDDEN);
        response.assert_json(&serde_json::json!({ "detail": "Permission denied: read:cluster" }));

        // No rule covers /rbac; the handler decides
        app.get("/api/v1/rbac/my-permissions")
            .authorization_bearer(&token)
            .await
            .assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn test_cors_preflight() {
        let state = create_test_state_with(|config| {
            config.cors.allowed_origins = vec![CorsOrigin::Url("https://console.example.com".parse().unwrap())];
        })
        .await;
        let app = create_test_app(state);

        let response = app
            .method(http::Method::OPTIONS, "/api/v1/tokens")
            .add_header(header::ORIGIN, "https://console.example.com")
            .add_header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .await;
        assert_eq!(
            response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            "https://console.example.com"
        );
        assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS), "true");
    }
}
