//! PostgreSQL implementation of [`AuthStore`].
//!
//! Every method borrows a pooled connection and delegates to a repository from
//! [`crate::db::handlers`]. Operations that touch several rows (`activate_environment`,
//! `replace_role_permissions`, `replace_user_roles`, `rotate_session`) open a transaction and
//! commit only after every statement succeeded; dropping the transaction on an error rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use super::{AuthStore, StoreError, StoreResult};
use crate::{
    db::{
        errors::DbError,
        handlers::{ApiTokens, Environments, OidcProviders, Permissions, Repository, RolePermissions, Roles, Sessions, UserRoles, Users},
        models::{
            api_tokens::{ApiToken, ApiTokenCreateDBRequest, ApiTokenStats},
            environments::{EnvironmentCreateDBRequest, EnvironmentDBResponse, EnvironmentFilter, EnvironmentUpdateDBRequest},
            oidc_providers::{OidcLoginState, OidcLoginStateCreateDBRequest, OidcProvider, OidcProviderUpsertDBRequest},
            permissions::Permission,
            role_permissions::{AuthorizationSnapshot, Grant, RolePermission, RolePermissionDetail, RolePermissionGrant},
            roles::{RoleCreateDBRequest, RoleDBResponse, RoleFilter, RoleUpdateDBRequest},
            sessions::{Session, SessionCreateDBRequest},
            user_roles::{UserRole, UserRoleDetail},
            users::{UserCreateDBRequest, UserDBResponse},
        },
    },
    types::{Action, ApiTokenId, EnvironmentId, OidcProviderId, PermissionId, ResourceLevel, RoleId, SessionId, UserId, abbrev_uuid},
};

/// `UPDATE .. RETURNING` on a missing row surfaces as `NotFound`; the store reports that as `None`.
fn optional<T>(result: Result<T, DbError>) -> StoreResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(DbError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AuthStore for PostgresStore {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<UserDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Users::new(&mut conn).get_by_id(id).await?)
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<UserDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Users::new(&mut conn).get_by_email(email).await?)
    }

    async fn list_users(&self, skip: i64, limit: i64) -> StoreResult<Vec<UserDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Users::new(&mut conn).list(skip, limit).await?)
    }

    async fn create_user(&self, request: &UserCreateDBRequest) -> StoreResult<UserDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Ok(Users::new(&mut conn).create(request).await?)
    }

    async fn set_global_admin(&self, id: UserId, is_global_admin: bool) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(Users::new(&mut conn).set_global_admin(id, is_global_admin).await?)
    }

    async fn set_user_active(&self, id: UserId, is_active: bool) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(Users::new(&mut conn).set_active(id, is_active).await?)
    }

    async fn get_environment(&self, id: EnvironmentId) -> StoreResult<Option<EnvironmentDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Environments::new(&mut conn).get_by_id(id).await?)
    }

    async fn get_active_environment(&self) -> StoreResult<Option<EnvironmentDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Environments::new(&mut conn).get_active().await?)
    }

    async fn get_environment_by_name(&self, name: &str) -> StoreResult<Option<EnvironmentDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Environments::new(&mut conn).get_by_name(name).await?)
    }

    async fn list_environments(&self) -> StoreResult<Vec<EnvironmentDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        let filter = EnvironmentFilter {
            skip: 0,
            limit: i64::MAX,
        };
        Ok(Environments::new(&mut conn).list(&filter).await?)
    }

    async fn create_environment(&self, request: &EnvironmentCreateDBRequest) -> StoreResult<EnvironmentDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Ok(Environments::new(&mut conn).create(request).await?)
    }

    #[instrument(skip(self), fields(environment_id = %abbrev_uuid(&id)), err)]
    async fn activate_environment(&self, id: EnvironmentId) -> StoreResult<Option<EnvironmentDBResponse>> {
        let mut tx = self.pool.begin().await?;
        let activated = Environments::new(&mut tx).activate(id).await?;
        if activated.is_some() {
            tx.commit().await?;
        }
        Ok(activated)
    }

    async fn update_environment(
        &self,
        id: EnvironmentId,
        request: &EnvironmentUpdateDBRequest,
    ) -> StoreResult<Option<EnvironmentDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        optional(Environments::new(&mut conn).update(id, request).await)
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Permissions::new(&mut conn).list().await?)
    }

    async fn get_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Permissions::new(&mut conn).get_by_id(id).await?)
    }

    async fn get_permission_by_action_and_level(
        &self,
        action: Action,
        resource_level: ResourceLevel,
    ) -> StoreResult<Option<Permission>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Permissions::new(&mut conn)
            .get_by_action_and_level(action, resource_level)
            .await?)
    }

    async fn create_role(&self, request: &RoleCreateDBRequest) -> StoreResult<RoleDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Ok(Roles::new(&mut conn).create(request).await?)
    }

    async fn get_role(&self, id: RoleId) -> StoreResult<Option<RoleDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Roles::new(&mut conn).get_by_id(id).await?)
    }

    async fn get_role_by_name(&self, environment_id: EnvironmentId, name: &str) -> StoreResult<Option<RoleDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Roles::new(&mut conn).get_by_name(environment_id, name).await?)
    }

    async fn list_roles(&self, environment_id: EnvironmentId, include_system: bool) -> StoreResult<Vec<RoleDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        let filter = RoleFilter {
            environment_id,
            include_system,
        };
        Ok(Roles::new(&mut conn).list(&filter).await?)
    }

    async fn update_role(&self, id: RoleId, request: &RoleUpdateDBRequest) -> StoreResult<Option<RoleDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        optional(Roles::new(&mut conn).update(id, request).await)
    }

    async fn delete_role(&self, id: RoleId) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(Roles::new(&mut conn).delete(id).await?)
    }

    async fn role_permissions(&self, role_id: RoleId) -> StoreResult<Vec<RolePermissionDetail>> {
        let mut conn = self.pool.acquire().await?;
        Ok(RolePermissions::new(&mut conn).list_for_role(role_id).await?)
    }

    async fn add_role_permission(&self, role_id: RoleId, grant: &RolePermissionGrant) -> StoreResult<RolePermission> {
        let mut conn = self.pool.acquire().await?;
        Ok(RolePermissions::new(&mut conn).add(role_id, grant).await?)
    }

    async fn remove_role_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
        resource_pattern: Option<&str>,
    ) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(RolePermissions::new(&mut conn)
            .remove(role_id, permission_id, resource_pattern)
            .await?)
    }

    #[instrument(skip(self, grants), fields(role_id = %abbrev_uuid(&role_id), count = grants.len()), err)]
    async fn replace_role_permissions(&self, role_id: RoleId, grants: &[RolePermissionGrant]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        {
            let mut repo = RolePermissions::new(&mut tx);
            repo.clear_for_role(role_id).await?;
            for grant in grants {
                repo.add(role_id, grant).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn assign_role(&self, user_id: UserId, role_id: RoleId, assigned_by: Option<UserId>) -> StoreResult<UserRole> {
        let mut conn = self.pool.acquire().await?;
        Ok(UserRoles::new(&mut conn).assign(user_id, role_id, assigned_by).await?)
    }

    async fn remove_user_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(UserRoles::new(&mut conn).remove(user_id, role_id).await?)
    }

    async fn user_roles(&self, user_id: UserId, environment_id: Option<EnvironmentId>) -> StoreResult<Vec<UserRoleDetail>> {
        let mut conn = self.pool.acquire().await?;
        Ok(UserRoles::new(&mut conn).list_for_user(user_id, environment_id).await?)
    }

    async fn user_roles_for_users(
        &self,
        user_ids: &[UserId],
        environment_id: EnvironmentId,
    ) -> StoreResult<Vec<UserRoleDetail>> {
        let mut conn = self.pool.acquire().await?;
        Ok(UserRoles::new(&mut conn).list_for_users(user_ids, environment_id).await?)
    }

    async fn role_users(&self, role_id: RoleId) -> StoreResult<Vec<UserRoleDetail>> {
        let mut conn = self.pool.acquire().await?;
        Ok(UserRoles::new(&mut conn).list_for_role(role_id).await?)
    }

    #[instrument(skip(self, role_ids), fields(user_id = %abbrev_uuid(&user_id), count = role_ids.len()), err)]
    async fn replace_user_roles(
        &self,
        user_id: UserId,
        environment_id: EnvironmentId,
        role_ids: &[RoleId],
        assigned_by: Option<UserId>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        {
            let mut repo = UserRoles::new(&mut tx);
            repo.clear_for_user_in_environment(user_id, environment_id).await?;
            for role_id in role_ids {
                repo.assign(user_id, *role_id, assigned_by).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn has_system_role_any_environment(&self, user_id: UserId, role_name: &str) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(UserRoles::new(&mut conn)
            .has_system_role_any_environment(user_id, role_name)
            .await?)
    }

    async fn authorization_snapshot(
        &self,
        user_id: UserId,
        environment_id: EnvironmentId,
        action: Action,
        resource_level: ResourceLevel,
    ) -> StoreResult<Option<AuthorizationSnapshot>> {
        let mut tx = self.pool.begin().await?;
        // Both reads must see the same snapshot
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let Some(user) = Users::new(&mut tx).get_by_id(user_id).await? else {
            return Ok(None);
        };
        let grants = RolePermissions::new(&mut tx)
            .grants_for(user_id, environment_id, action, resource_level)
            .await?;
        tx.commit().await?;

        Ok(Some(AuthorizationSnapshot { user, grants }))
    }

    async fn effective_grants(&self, user_id: UserId, environment_id: EnvironmentId) -> StoreResult<Vec<Grant>> {
        let mut conn = self.pool.acquire().await?;
        Ok(RolePermissions::new(&mut conn).effective_for(user_id, environment_id).await?)
    }

    async fn create_session(&self, request: &SessionCreateDBRequest) -> StoreResult<Session> {
        let mut conn = self.pool.acquire().await?;
        Ok(Sessions::new(&mut conn).create(request).await?)
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Sessions::new(&mut conn).get_by_id(id).await?)
    }

    async fn find_valid_session_by_access_hash(&self, access_token_hash: &str, now: DateTime<Utc>) -> StoreResult<Option<Session>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Sessions::new(&mut conn)
            .find_valid_by_access_hash(access_token_hash, now)
            .await?)
    }

    #[instrument(skip(self, refresh_token_id, next), fields(user_id = %abbrev_uuid(&next.user_id)), err)]
    async fn rotate_session(
        &self,
        refresh_token_id: &str,
        now: DateTime<Utc>,
        next: &SessionCreateDBRequest,
    ) -> StoreResult<Option<Session>> {
        let mut tx = self.pool.begin().await?;
        let session = {
            let mut repo = Sessions::new(&mut tx);
            let current = match repo.find_valid_by_refresh_id_for_update(refresh_token_id, now).await? {
                Some(current) if current.user_id == next.user_id => current,
                _ => return Ok(None),
            };
            repo.revoke(current.id).await?;
            repo.create(next).await?
        };
        tx.commit().await?;
        Ok(Some(session))
    }

    async fn list_sessions(&self, user_id: UserId, include_expired: bool, now: DateTime<Utc>) -> StoreResult<Vec<Session>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Sessions::new(&mut conn).list_for_user(user_id, include_expired, now).await?)
    }

    async fn revoke_session(&self, id: SessionId) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(Sessions::new(&mut conn).revoke(id).await?)
    }

    async fn revoke_user_sessions(&self, user_id: UserId, keep_access_hash: Option<&str>) -> StoreResult<u64> {
        let mut conn = self.pool.acquire().await?;
        Ok(Sessions::new(&mut conn).revoke_for_user(user_id, keep_access_hash).await?)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut conn = self.pool.acquire().await?;
        Ok(Sessions::new(&mut conn).delete_expired(now).await?)
    }

    async fn delete_revoked_sessions(&self) -> StoreResult<u64> {
        let mut conn = self.pool.acquire().await?;
        Ok(Sessions::new(&mut conn).delete_revoked().await?)
    }

    async fn create_api_token(&self, request: &ApiTokenCreateDBRequest) -> StoreResult<ApiToken> {
        let mut conn = self.pool.acquire().await?;
        Ok(ApiTokens::new(&mut conn).create(request).await?)
    }

    async fn get_api_token(&self, id: ApiTokenId) -> StoreResult<Option<ApiToken>> {
        let mut conn = self.pool.acquire().await?;
        Ok(ApiTokens::new(&mut conn).get_by_id(id).await?)
    }

    async fn list_api_tokens(&self, user_id: UserId, include_revoked: bool) -> StoreResult<Vec<ApiToken>> {
        let mut conn = self.pool.acquire().await?;
        Ok(ApiTokens::new(&mut conn).list_for_user(user_id, include_revoked).await?)
    }

    async fn find_valid_api_token(&self, token_hash: &str, now: DateTime<Utc>) -> StoreResult<Option<ApiToken>> {
        let mut conn = self.pool.acquire().await?;
        Ok(ApiTokens::new(&mut conn).find_valid_by_hash(token_hash, now).await?)
    }

    async fn touch_api_token(&self, id: ApiTokenId, now: DateTime<Utc>) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        Ok(ApiTokens::new(&mut conn).touch(id, now).await?)
    }

    async fn revoke_api_token(&self, id: ApiTokenId) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(ApiTokens::new(&mut conn).revoke(id).await?)
    }

    async fn revoke_user_api_tokens(&self, user_id: UserId) -> StoreResult<u64> {
        let mut conn = self.pool.acquire().await?;
        Ok(ApiTokens::new(&mut conn).revoke_for_user(user_id).await?)
    }

    async fn delete_api_token(&self, id: ApiTokenId) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(ApiTokens::new(&mut conn).delete(id).await?)
    }

    async fn api_token_stats(&self, user_id: UserId, now: DateTime<Utc>) -> StoreResult<ApiTokenStats> {
        let mut conn = self.pool.acquire().await?;
        Ok(ApiTokens::new(&mut conn).stats_for_user(user_id, now).await?)
    }

    async fn get_oidc_provider(&self, id: OidcProviderId) -> StoreResult<Option<OidcProvider>> {
        let mut conn = self.pool.acquire().await?;
        Ok(OidcProviders::new(&mut conn).get_by_id(id).await?)
    }

    async fn get_oidc_provider_for_environment(&self, environment_id: EnvironmentId) -> StoreResult<Option<OidcProvider>> {
        let mut conn = self.pool.acquire().await?;
        Ok(OidcProviders::new(&mut conn).get_for_environment(environment_id).await?)
    }

    async fn list_enabled_oidc_providers(&self) -> StoreResult<Vec<OidcProvider>> {
        let mut conn = self.pool.acquire().await?;
        Ok(OidcProviders::new(&mut conn).list_enabled().await?)
    }

    #[instrument(skip(self, request), fields(environment_id = %abbrev_uuid(&request.environment_id)), err)]
    async fn upsert_oidc_provider(&self, request: &OidcProviderUpsertDBRequest) -> StoreResult<OidcProvider> {
        let mut conn = self.pool.acquire().await?;
        match OidcProviders::new(&mut conn).upsert(request).await {
            Ok(provider) => Ok(provider),
            Err(DbError::ForeignKeyViolation { .. }) => Err(StoreError::NotFound {
                entity: "Environment",
                id: request.environment_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_oidc_provider_enabled(&self, id: OidcProviderId, is_enabled: bool) -> StoreResult<Option<OidcProvider>> {
        let mut conn = self.pool.acquire().await?;
        Ok(OidcProviders::new(&mut conn).set_enabled(id, is_enabled).await?)
    }

    async fn update_oidc_client_secret(
        &self,
        id: OidcProviderId,
        client_secret_encrypted: Option<&str>,
    ) -> StoreResult<Option<OidcProvider>> {
        let mut conn = self.pool.acquire().await?;
        Ok(OidcProviders::new(&mut conn)
            .update_client_secret(id, client_secret_encrypted)
            .await?)
    }

    async fn delete_oidc_provider(&self, environment_id: EnvironmentId) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(OidcProviders::new(&mut conn).delete_for_environment(environment_id).await?)
    }

    #[instrument(skip(self, request), err)]
    async fn create_oidc_login_state(&self, request: &OidcLoginStateCreateDBRequest, now: DateTime<Utc>) -> StoreResult<OidcLoginState> {
        let mut tx = self.pool.begin().await?;
        OidcProviders::new(&mut tx).delete_expired_login_states(now).await?;
        let state = OidcProviders::new(&mut tx).create_login_state(request).await?;
        tx.commit().await?;
        Ok(state)
    }

    async fn take_oidc_login_state(&self, state_hash: &str, now: DateTime<Utc>) -> StoreResult<Option<OidcLoginState>> {
        let mut conn = self.pool.acquire().await?;
        Ok(OidcProviders::new(&mut conn).take_login_state(state_hash, now).await?)
    }
}
