//! Test utilities: in-memory application state, users, roles and credentials.

use std::sync::Arc;

use axum_test::TestServer;

use crate::{
    AppState,
    config::{Config, DefaultEnvironment},
    db::models::{
        roles::{RoleCreateDBRequest, RoleDBResponse},
        users::{UserCreateDBRequest, UserDBResponse},
    },
    store::{AuthStore, MemoryStore},
    types::{EnvironmentId, UserId},
};

pub fn create_test_config() -> Config {
    // The identity provider client needs a process-wide TLS provider; main installs it in production
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        encryption_key: Some("test-encryption-key-for-testing-only".to_string()),
        admin_email: "admin@example.com".to_string(),
        default_environment: Some(DefaultEnvironment {
            name: "test".to_string(),
            admin_url: "http://localhost:8080".to_string(),
            rbac_enabled: true,
        }),
        ..Default::default()
    }
}

/// State over an empty store: no admin, no environment, no roles.
pub fn create_bare_state() -> AppState {
    AppState::from_store(create_test_config(), Arc::new(MemoryStore::new())).expect("Failed to build test state")
}

/// State over a bootstrapped in-memory store.
pub async fn create_test_state() -> AppState {
    create_test_state_with(|_| {}).await
}

pub async fn create_test_state_with(configure: impl FnOnce(&mut Config)) -> AppState {
    let mut config = create_test_config();
    configure(&mut config);

    let store = Arc::new(MemoryStore::new());
    crate::bootstrap(store.as_ref(), &config).await.expect("Failed to bootstrap test store");
    AppState::from_store(config, store).expect("Failed to build test state")
}

pub fn create_test_app(state: AppState) -> TestServer {
    let router = crate::build_router(&state).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}

pub async fn create_test_user(state: &AppState, email: &str) -> UserDBResponse {
    state
        .store
        .create_user(&UserCreateDBRequest {
            email: email.to_string(),
            display_name: None,
            is_global_admin: false,
        })
        .await
        .expect("Failed to create test user")
}

async fn active_environment_id(state: &AppState) -> EnvironmentId {
    state
        .store
        .get_active_environment()
        .await
        .expect("Failed to load active environment")
        .expect("No active environment")
        .id
}

/// Assign a seeded role by name in the active environment.
pub async fn assign_system_role(state: &AppState, user_id: UserId, role_name: &str) {
    let environment_id = active_environment_id(state).await;
    let role = state
        .store
        .get_role_by_name(environment_id, role_name)
        .await
        .expect("Failed to look up role")
        .unwrap_or_else(|| panic!("No role named {role_name}"));
    state
        .store
        .assign_role(user_id, role.id, None)
        .await
        .expect("Failed to assign role");
}

/// A custom role with no permissions in the active environment.
pub async fn create_test_role(state: &AppState, name: &str) -> RoleDBResponse {
    let environment_id = active_environment_id(state).await;
    state
        .store
        .create_role(&RoleCreateDBRequest {
            environment_id,
            name: name.to_string(),
            description: None,
            is_system: false,
        })
        .await
        .expect("Failed to create test role")
}

/// A fresh API token for `user_id`, usable as a bearer credential.
pub async fn bearer_token(state: &AppState, user_id: UserId) -> String {
    let (token, _) = state
        .api_tokens
        .create_token(user_id, "test", None, None)
        .await
        .expect("Failed to create API token");
    token
}

/// A bearer credential for the bootstrap admin.
pub async fn admin_token(state: &AppState) -> String {
    let admin = state
        .store
        .get_user_by_email(&state.config.admin_email)
        .await
        .expect("Failed to look up admin")
        .expect("Admin not bootstrapped");
    bearer_token(state, admin.id).await
}
