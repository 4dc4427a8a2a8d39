//! The persistence seam for the authorization and credential services.
//!
//! Services only ever talk to an [`AuthStore`]. Two implementations exist:
//!
//! - [`PostgresStore`]: the production store over a `PgPool`, built on the repositories in
//!   [`crate::db::handlers`]. Multi-row mutations run in a single transaction.
//! - [`MemoryStore`]: maps behind one `tokio::sync::RwLock`, used by tests and for running the
//!   service without a database. Atomic operations hold the write lock for their whole duration.
//!
//! Both implementations must agree on every observable behaviour; the HTTP tests run against
//! [`MemoryStore`] and `tests/pg_store.rs` exercises the same contract against PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db::{
        errors::DbError,
        models::{
            api_tokens::{ApiToken, ApiTokenCreateDBRequest, ApiTokenStats},
            environments::{EnvironmentCreateDBRequest, EnvironmentDBResponse, EnvironmentUpdateDBRequest},
            oidc_providers::{OidcLoginState, OidcLoginStateCreateDBRequest, OidcProvider, OidcProviderUpsertDBRequest},
            permissions::Permission,
            role_permissions::{AuthorizationSnapshot, Grant, RolePermission, RolePermissionDetail, RolePermissionGrant},
            roles::{RoleCreateDBRequest, RoleDBResponse, RoleUpdateDBRequest},
            sessions::{Session, SessionCreateDBRequest},
            user_roles::{UserRole, UserRoleDetail},
            users::{UserCreateDBRequest, UserDBResponse},
        },
    },
    types::{Action, ApiTokenId, EnvironmentId, OidcProviderId, PermissionId, ResourceLevel, RoleId, SessionId, UserId},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Protected(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => StoreError::NotFound {
                entity: "Record",
                id: "unknown".to_string(),
            },
            DbError::UniqueViolation {
                table, conflicting_value, ..
            } => StoreError::Conflict(conflict_message(table.as_deref(), conflicting_value.as_deref())),
            DbError::ForeignKeyViolation { table, .. } => StoreError::NotFound {
                entity: "Referenced record",
                id: table.unwrap_or_else(|| "unknown".to_string()),
            },
            DbError::ProtectedEntity {
                operation,
                reason,
                entity_type,
                ..
            } => StoreError::Protected(format!("Cannot {operation} {entity_type}: {reason}")),
            e @ (DbError::CheckViolation { .. } | DbError::Other(_)) => StoreError::Unexpected(anyhow::Error::new(e)),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

/// Same wording for both stores, so callers and tests can rely on it.
pub(crate) fn conflict_message(table: Option<&str>, value: Option<&str>) -> String {
    match (table, value) {
        (Some("roles"), Some(name)) => format!("Role with name '{name}' already exists"),
        (Some("environments"), Some(name)) => format!("Environment '{name}' already exists"),
        (Some("users"), _) => "An account with this email address already exists".to_string(),
        (Some("role_permissions"), _) => "Permission is already granted to this role".to_string(),
        _ => "Resource already exists".to_string(),
    }
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    // Users
    async fn get_user(&self, id: UserId) -> StoreResult<Option<UserDBResponse>>;
    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<UserDBResponse>>;
    async fn list_users(&self, skip: i64, limit: i64) -> StoreResult<Vec<UserDBResponse>>;
    async fn create_user(&self, request: &UserCreateDBRequest) -> StoreResult<UserDBResponse>;
    async fn set_global_admin(&self, id: UserId, is_global_admin: bool) -> StoreResult<bool>;
    async fn set_user_active(&self, id: UserId, is_active: bool) -> StoreResult<bool>;

    // Environments
    async fn get_environment(&self, id: EnvironmentId) -> StoreResult<Option<EnvironmentDBResponse>>;
    async fn get_active_environment(&self) -> StoreResult<Option<EnvironmentDBResponse>>;
    async fn get_environment_by_name(&self, name: &str) -> StoreResult<Option<EnvironmentDBResponse>>;
    async fn list_environments(&self) -> StoreResult<Vec<EnvironmentDBResponse>>;
    async fn create_environment(&self, request: &EnvironmentCreateDBRequest) -> StoreResult<EnvironmentDBResponse>;
    /// Deactivate all environments and activate `id` as one atomic step. `None` if `id` is unknown,
    /// in which case nothing changes.
    async fn activate_environment(&self, id: EnvironmentId) -> StoreResult<Option<EnvironmentDBResponse>>;
    async fn update_environment(
        &self,
        id: EnvironmentId,
        request: &EnvironmentUpdateDBRequest,
    ) -> StoreResult<Option<EnvironmentDBResponse>>;

    // Permissions
    async fn list_permissions(&self) -> StoreResult<Vec<Permission>>;
    async fn get_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>>;
    async fn get_permission_by_action_and_level(
        &self,
        action: Action,
        resource_level: ResourceLevel,
    ) -> StoreResult<Option<Permission>>;

    // Roles
    /// Fails with [`StoreError::Conflict`] when the name is taken in the environment.
    async fn create_role(&self, request: &RoleCreateDBRequest) -> StoreResult<RoleDBResponse>;
    async fn get_role(&self, id: RoleId) -> StoreResult<Option<RoleDBResponse>>;
    async fn get_role_by_name(&self, environment_id: EnvironmentId, name: &str) -> StoreResult<Option<RoleDBResponse>>;
    async fn list_roles(&self, environment_id: EnvironmentId, include_system: bool) -> StoreResult<Vec<RoleDBResponse>>;
    async fn update_role(&self, id: RoleId, request: &RoleUpdateDBRequest) -> StoreResult<Option<RoleDBResponse>>;
    /// `false` when the role is missing or is a system role.
    async fn delete_role(&self, id: RoleId) -> StoreResult<bool>;

    // Role permissions
    async fn role_permissions(&self, role_id: RoleId) -> StoreResult<Vec<RolePermissionDetail>>;
    async fn add_role_permission(&self, role_id: RoleId, grant: &RolePermissionGrant) -> StoreResult<RolePermission>;
    async fn remove_role_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
        resource_pattern: Option<&str>,
    ) -> StoreResult<bool>;
    /// Replace every grant of the role in one transaction.
    async fn replace_role_permissions(&self, role_id: RoleId, grants: &[RolePermissionGrant]) -> StoreResult<()>;

    // User roles
    async fn assign_role(&self, user_id: UserId, role_id: RoleId, assigned_by: Option<UserId>) -> StoreResult<UserRole>;
    async fn remove_user_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<bool>;
    async fn user_roles(&self, user_id: UserId, environment_id: Option<EnvironmentId>) -> StoreResult<Vec<UserRoleDetail>>;
    async fn user_roles_for_users(
        &self,
        user_ids: &[UserId],
        environment_id: EnvironmentId,
    ) -> StoreResult<Vec<UserRoleDetail>>;
    async fn role_users(&self, role_id: RoleId) -> StoreResult<Vec<UserRoleDetail>>;
    /// Replace the user's assignments within one environment in one transaction.
    async fn replace_user_roles(
        &self,
        user_id: UserId,
        environment_id: EnvironmentId,
        role_ids: &[RoleId],
        assigned_by: Option<UserId>,
    ) -> StoreResult<()>;
    /// Whether the user holds the seeded system role `role_name` in any environment.
    async fn has_system_role_any_environment(&self, user_id: UserId, role_name: &str) -> StoreResult<bool>;

    // Permission resolution
    async fn effective_grants(&self, user_id: UserId, environment_id: EnvironmentId) -> StoreResult<Vec<Grant>>;
    /// The user row and [`AuthorizationSnapshot::grants`] as of one instant, so a concurrent
    /// deactivation or role change is either fully visible or not at all. `None` for an unknown user.
    async fn authorization_snapshot(
        &self,
        user_id: UserId,
        environment_id: EnvironmentId,
        action: Action,
        resource_level: ResourceLevel,
    ) -> StoreResult<Option<AuthorizationSnapshot>>;

    // Sessions
    async fn create_session(&self, request: &SessionCreateDBRequest) -> StoreResult<Session>;
    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>>;
    async fn find_valid_session_by_access_hash(&self, access_token_hash: &str, now: DateTime<Utc>) -> StoreResult<Option<Session>>;
    /// Atomically revoke the valid session holding `refresh_token_id` for `next.user_id` and
    /// insert `next`. `None` (and no change) when no such valid session exists.
    async fn rotate_session(
        &self,
        refresh_token_id: &str,
        now: DateTime<Utc>,
        next: &SessionCreateDBRequest,
    ) -> StoreResult<Option<Session>>;
    async fn list_sessions(&self, user_id: UserId, include_expired: bool, now: DateTime<Utc>) -> StoreResult<Vec<Session>>;
    async fn revoke_session(&self, id: SessionId) -> StoreResult<bool>;
    async fn revoke_user_sessions(&self, user_id: UserId, keep_access_hash: Option<&str>) -> StoreResult<u64>;
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;
    async fn delete_revoked_sessions(&self) -> StoreResult<u64>;

    // API tokens
    async fn create_api_token(&self, request: &ApiTokenCreateDBRequest) -> StoreResult<ApiToken>;
    async fn get_api_token(&self, id: ApiTokenId) -> StoreResult<Option<ApiToken>>;
    async fn list_api_tokens(&self, user_id: UserId, include_revoked: bool) -> StoreResult<Vec<ApiToken>>;
    async fn find_valid_api_token(&self, token_hash: &str, now: DateTime<Utc>) -> StoreResult<Option<ApiToken>>;
    async fn touch_api_token(&self, id: ApiTokenId, now: DateTime<Utc>) -> StoreResult<()>;
    /// `true` if the token exists, whether or not it was already revoked.
    async fn revoke_api_token(&self, id: ApiTokenId) -> StoreResult<bool>;
    async fn revoke_user_api_tokens(&self, user_id: UserId) -> StoreResult<u64>;
    async fn delete_api_token(&self, id: ApiTokenId) -> StoreResult<bool>;
    async fn api_token_stats(&self, user_id: UserId, now: DateTime<Utc>) -> StoreResult<ApiTokenStats>;

    // OIDC providers
    async fn get_oidc_provider(&self, id: OidcProviderId) -> StoreResult<Option<OidcProvider>>;
    async fn get_oidc_provider_for_environment(&self, environment_id: EnvironmentId) -> StoreResult<Option<OidcProvider>>;
    async fn list_enabled_oidc_providers(&self) -> StoreResult<Vec<OidcProvider>>;
    /// Create the environment's provider or replace its configuration. Fails with
    /// [`StoreError::NotFound`] for an unknown environment.
    async fn upsert_oidc_provider(&self, request: &OidcProviderUpsertDBRequest) -> StoreResult<OidcProvider>;
    async fn set_oidc_provider_enabled(&self, id: OidcProviderId, is_enabled: bool) -> StoreResult<Option<OidcProvider>>;
    async fn update_oidc_client_secret(
        &self,
        id: OidcProviderId,
        client_secret_encrypted: Option<&str>,
    ) -> StoreResult<Option<OidcProvider>>;
    /// Also drops the provider's pending logins.
    async fn delete_oidc_provider(&self, environment_id: EnvironmentId) -> StoreResult<bool>;
    /// Record a pending login, removing every expired one in the same step.
    async fn create_oidc_login_state(&self, request: &OidcLoginStateCreateDBRequest, now: DateTime<Utc>) -> StoreResult<OidcLoginState>;
    /// Remove and return the pending login if it has not expired. Single use.
    async fn take_oidc_login_state(&self, state_hash: &str, now: DateTime<Utc>) -> StoreResult<Option<OidcLoginState>>;
}
