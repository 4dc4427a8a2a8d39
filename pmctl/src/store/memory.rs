//! In-memory implementation of [`AuthStore`].
//!
//! All state lives in one [`State`] behind a `tokio::sync::RwLock`. Reads take the read lock;
//! every mutation, including the multi-row replace-all and the environment switch, runs entirely
//! under one write lock acquisition, which gives it the same all-or-nothing visibility as a
//! database transaction. State is lost on restart.
//!
//! The permission catalogue is seeded on construction, mirroring the seed migration.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AuthStore, StoreError, StoreResult, conflict_message};
use crate::{
    db::models::{
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
    rbac::seed::PERMISSION_DEFINITIONS,
    types::{Action, ApiTokenId, EnvironmentId, OidcProviderId, PermissionId, ResourceLevel, RoleId, SessionId, UserId},
};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, UserDBResponse>,
    environments: HashMap<EnvironmentId, EnvironmentDBResponse>,
    permissions: HashMap<PermissionId, Permission>,
    roles: HashMap<RoleId, RoleDBResponse>,
    role_permissions: Vec<RolePermission>,
    user_roles: Vec<UserRole>,
    sessions: HashMap<SessionId, Session>,
    api_tokens: HashMap<ApiTokenId, ApiToken>,
    oidc_providers: HashMap<OidcProviderId, OidcProvider>,
    /// Keyed by state hash
    oidc_login_states: HashMap<String, OidcLoginState>,
}

impl State {
    fn role_permission_detail(&self, rp: &RolePermission) -> Option<RolePermissionDetail> {
        let permission = self.permissions.get(&rp.permission_id)?;
        Some(RolePermissionDetail {
            id: rp.id,
            role_id: rp.role_id,
            permission_id: rp.permission_id,
            action: permission.action,
            resource_level: permission.resource_level,
            resource_pattern: rp.resource_pattern.clone(),
            description: permission.description.clone(),
        })
    }

    fn user_role_detail(&self, ur: &UserRole) -> Option<UserRoleDetail> {
        let role = self.roles.get(&ur.role_id)?;
        Some(UserRoleDetail {
            user_id: ur.user_id,
            role_id: ur.role_id,
            role_name: role.name.clone(),
            is_system: role.is_system,
            environment_id: role.environment_id,
            assigned_by: ur.assigned_by,
            assigned_at: ur.assigned_at,
        })
    }

    /// The UserRole → Role → RolePermission → Permission join, optionally narrowed to one permission.
    fn grants(&self, user_id: UserId, environment_id: EnvironmentId, only: Option<(Action, ResourceLevel)>) -> Vec<Grant> {
        let mut grants = Vec::new();
        for ur in self.user_roles.iter().filter(|ur| ur.user_id == user_id) {
            let Some(role) = self.roles.get(&ur.role_id).filter(|r| r.environment_id == environment_id) else {
                continue;
            };
            for rp in self.role_permissions.iter().filter(|rp| rp.role_id == role.id) {
                let Some(permission) = self.permissions.get(&rp.permission_id) else {
                    continue;
                };
                if only.is_some_and(|(action, level)| permission.action != action || permission.resource_level != level) {
                    continue;
                }
                grants.push(Grant {
                    action: permission.action,
                    resource_level: permission.resource_level,
                    resource_pattern: rp.resource_pattern.clone(),
                    role_name: role.name.clone(),
                });
            }
        }
        grants
    }

    fn insert_role_permission(&mut self, role_id: RoleId, grant: &RolePermissionGrant) -> StoreResult<RolePermission> {
        if !self.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound {
                entity: "Role",
                id: role_id.to_string(),
            });
        }
        if !self.permissions.contains_key(&grant.permission_id) {
            return Err(StoreError::NotFound {
                entity: "Permission",
                id: grant.permission_id.to_string(),
            });
        }
        if let Some(existing) = self.role_permissions.iter().find(|rp| {
            rp.role_id == role_id && rp.permission_id == grant.permission_id && rp.resource_pattern == grant.resource_pattern
        }) {
            return Ok(existing.clone());
        }

        let row = RolePermission {
            id: Uuid::new_v4(),
            role_id,
            permission_id: grant.permission_id,
            resource_pattern: grant.resource_pattern.clone(),
            created_at: Utc::now(),
        };
        self.role_permissions.push(row.clone());
        Ok(row)
    }

    fn insert_user_role(&mut self, user_id: UserId, role_id: RoleId, assigned_by: Option<UserId>) -> StoreResult<UserRole> {
        if !self.users.contains_key(&user_id) {
            return Err(StoreError::NotFound {
                entity: "User",
                id: user_id.to_string(),
            });
        }
        if !self.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound {
                entity: "Role",
                id: role_id.to_string(),
            });
        }
        if let Some(existing) = self.user_roles.iter().find(|ur| ur.user_id == user_id && ur.role_id == role_id) {
            return Ok(existing.clone());
        }

        let row = UserRole {
            id: Uuid::new_v4(),
            user_id,
            role_id,
            assigned_by,
            assigned_at: Utc::now(),
        };
        self.user_roles.push(row.clone());
        Ok(row)
    }

    fn insert_session(&mut self, request: &SessionCreateDBRequest) -> StoreResult<Session> {
        if !self.users.contains_key(&request.user_id) {
            return Err(StoreError::NotFound {
                entity: "User",
                id: request.user_id.to_string(),
            });
        }
        if self.sessions.values().any(|s| s.refresh_token_id == request.refresh_token_id) {
            return Err(StoreError::Conflict(conflict_message(Some("sessions"), None)));
        }

        let session = Session {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            access_token_hash: request.access_token_hash.clone(),
            refresh_token_id: request.refresh_token_id.clone(),
            refresh_token_encrypted: request.refresh_token_encrypted.clone(),
            expires_at: request.expires_at,
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent.clone(),
            is_revoked: false,
            created_at: Utc::now(),
        };
        self.sessions.insert(session.id, session.clone());
        Ok(session)
    }
}

/// Process-local [`AuthStore`]. Cheap to construct; clone the surrounding `Arc` to share it.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let now = Utc::now();
        let permissions = PERMISSION_DEFINITIONS
            .iter()
            .map(|(action, resource_level, description)| {
                let permission = Permission {
                    id: Uuid::new_v4(),
                    action: *action,
                    resource_level: *resource_level,
                    description: Some(description.to_string()),
                    created_at: now,
                };
                (permission.id, permission)
            })
            .collect();

        Self {
            state: RwLock::new(State {
                permissions,
                ..Default::default()
            }),
        }
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<UserDBResponse>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<UserDBResponse>> {
        Ok(self.state.read().await.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self, skip: i64, limit: i64) -> StoreResult<Vec<UserDBResponse>> {
        let state = self.state.read().await;
        let mut users: Vec<_> = state.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.email.cmp(&b.email)));
        Ok(users
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn create_user(&self, request: &UserCreateDBRequest) -> StoreResult<UserDBResponse> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == request.email) {
            return Err(StoreError::Conflict(conflict_message(Some("users"), Some(&request.email))));
        }

        let now = Utc::now();
        let user = UserDBResponse {
            id: Uuid::new_v4(),
            email: request.email.clone(),
            display_name: request.display_name.clone(),
            is_active: true,
            is_global_admin: request.is_global_admin,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_global_admin(&self, id: UserId, is_global_admin: bool) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.users.get_mut(&id) {
            Some(user) => {
                user.is_global_admin = is_global_admin;
                user.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn set_user_active(&self, id: UserId, is_active: bool) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.users.get_mut(&id) {
            Some(user) => {
                user.is_active = is_active;
                user.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn get_environment(&self, id: EnvironmentId) -> StoreResult<Option<EnvironmentDBResponse>> {
        Ok(self.state.read().await.environments.get(&id).cloned())
    }

    async fn get_active_environment(&self) -> StoreResult<Option<EnvironmentDBResponse>> {
        Ok(self
            .state
            .read()
            .await
            .environments
            .values()
            .find(|e| e.is_active)
            .cloned())
    }

    async fn get_environment_by_name(&self, name: &str) -> StoreResult<Option<EnvironmentDBResponse>> {
        Ok(self
            .state
            .read()
            .await
            .environments
            .values()
            .find(|e| e.name == name)
            .cloned())
    }

    async fn list_environments(&self) -> StoreResult<Vec<EnvironmentDBResponse>> {
        let mut environments: Vec<_> = self.state.read().await.environments.values().cloned().collect();
        environments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(environments)
    }

    async fn create_environment(&self, request: &EnvironmentCreateDBRequest) -> StoreResult<EnvironmentDBResponse> {
        let mut state = self.state.write().await;
        if state.environments.values().any(|e| e.name == request.name) {
            return Err(StoreError::Conflict(conflict_message(Some("environments"), Some(&request.name))));
        }

        let now = Utc::now();
        let environment = EnvironmentDBResponse {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            admin_url: request.admin_url.clone(),
            is_active: false,
            rbac_enabled: request.rbac_enabled,
            token_encrypted: None,
            pulsar_token_secret_key_encrypted: None,
            created_at: now,
            updated_at: now,
        };
        state.environments.insert(environment.id, environment.clone());
        Ok(environment)
    }

    async fn activate_environment(&self, id: EnvironmentId) -> StoreResult<Option<EnvironmentDBResponse>> {
        let mut state = self.state.write().await;
        if !state.environments.contains_key(&id) {
            return Ok(None);
        }

        let now = Utc::now();
        for environment in state.environments.values_mut() {
            let active = environment.id == id;
            if environment.is_active != active {
                environment.is_active = active;
                environment.updated_at = now;
            }
        }
        Ok(state.environments.get(&id).cloned())
    }

    async fn update_environment(
        &self,
        id: EnvironmentId,
        request: &EnvironmentUpdateDBRequest,
    ) -> StoreResult<Option<EnvironmentDBResponse>> {
        let mut state = self.state.write().await;
        let Some(environment) = state.environments.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(admin_url) = &request.admin_url {
            environment.admin_url = admin_url.clone();
        }
        if let Some(rbac_enabled) = request.rbac_enabled {
            environment.rbac_enabled = rbac_enabled;
        }
        if let Some(secret) = &request.pulsar_token_secret_key_encrypted {
            environment.pulsar_token_secret_key_encrypted = secret.clone();
        }
        environment.updated_at = Utc::now();
        Ok(Some(environment.clone()))
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let mut permissions: Vec<_> = self.state.read().await.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| {
            (a.action.as_str(), a.resource_level.as_str()).cmp(&(b.action.as_str(), b.resource_level.as_str()))
        });
        Ok(permissions)
    }

    async fn get_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>> {
        Ok(self.state.read().await.permissions.get(&id).cloned())
    }

    async fn get_permission_by_action_and_level(
        &self,
        action: Action,
        resource_level: ResourceLevel,
    ) -> StoreResult<Option<Permission>> {
        Ok(self
            .state
            .read()
            .await
            .permissions
            .values()
            .find(|p| p.action == action && p.resource_level == resource_level)
            .cloned())
    }

    async fn create_role(&self, request: &RoleCreateDBRequest) -> StoreResult<RoleDBResponse> {
        let mut state = self.state.write().await;
        if !state.environments.contains_key(&request.environment_id) {
            return Err(StoreError::NotFound {
                entity: "Environment",
                id: request.environment_id.to_string(),
            });
        }
        if state
            .roles
            .values()
            .any(|r| r.environment_id == request.environment_id && r.name == request.name)
        {
            return Err(StoreError::Conflict(conflict_message(Some("roles"), Some(&request.name))));
        }

        let now = Utc::now();
        let role = RoleDBResponse {
            id: Uuid::new_v4(),
            environment_id: request.environment_id,
            name: request.name.clone(),
            description: request.description.clone(),
            is_system: request.is_system,
            created_at: now,
            updated_at: now,
        };
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn get_role(&self, id: RoleId) -> StoreResult<Option<RoleDBResponse>> {
        Ok(self.state.read().await.roles.get(&id).cloned())
    }

    async fn get_role_by_name(&self, environment_id: EnvironmentId, name: &str) -> StoreResult<Option<RoleDBResponse>> {
        Ok(self
            .state
            .read()
            .await
            .roles
            .values()
            .find(|r| r.environment_id == environment_id && r.name == name)
            .cloned())
    }

    async fn list_roles(&self, environment_id: EnvironmentId, include_system: bool) -> StoreResult<Vec<RoleDBResponse>> {
        let mut roles: Vec<_> = self
            .state
            .read()
            .await
            .roles
            .values()
            .filter(|r| r.environment_id == environment_id && (include_system || !r.is_system))
            .cloned()
            .collect();
        roles.sort_by(|a, b| b.is_system.cmp(&a.is_system).then_with(|| a.name.cmp(&b.name)));
        Ok(roles)
    }

    async fn update_role(&self, id: RoleId, request: &RoleUpdateDBRequest) -> StoreResult<Option<RoleDBResponse>> {
        let mut state = self.state.write().await;
        let Some(environment_id) = state.roles.get(&id).map(|r| r.environment_id) else {
            return Ok(None);
        };
        if let Some(name) = &request.name
            && state
                .roles
                .values()
                .any(|r| r.id != id && r.environment_id == environment_id && &r.name == name)
        {
            return Err(StoreError::Conflict(conflict_message(Some("roles"), Some(name))));
        }

        let Some(role) = state.roles.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &request.name {
            role.name = name.clone();
        }
        if let Some(description) = &request.description {
            role.description = Some(description.clone());
        }
        role.updated_at = Utc::now();
        Ok(Some(role.clone()))
    }

    async fn delete_role(&self, id: RoleId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.roles.get(&id) {
            Some(role) if !role.is_system => {
                state.roles.remove(&id);
                state.role_permissions.retain(|rp| rp.role_id != id);
                state.user_roles.retain(|ur| ur.role_id != id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn role_permissions(&self, role_id: RoleId) -> StoreResult<Vec<RolePermissionDetail>> {
        let state = self.state.read().await;
        let mut details: Vec<_> = state
            .role_permissions
            .iter()
            .filter(|rp| rp.role_id == role_id)
            .filter_map(|rp| state.role_permission_detail(rp))
            .collect();
        details.sort_by(|a, b| {
            (a.action.as_str(), a.resource_level.as_str(), &a.resource_pattern).cmp(&(
                b.action.as_str(),
                b.resource_level.as_str(),
                &b.resource_pattern,
            ))
        });
        Ok(details)
    }

    async fn add_role_permission(&self, role_id: RoleId, grant: &RolePermissionGrant) -> StoreResult<RolePermission> {
        self.state.write().await.insert_role_permission(role_id, grant)
    }

    async fn remove_role_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
        resource_pattern: Option<&str>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let before = state.role_permissions.len();
        state.role_permissions.retain(|rp| {
            !(rp.role_id == role_id && rp.permission_id == permission_id && rp.resource_pattern.as_deref() == resource_pattern)
        });
        Ok(state.role_permissions.len() < before)
    }

    async fn replace_role_permissions(&self, role_id: RoleId, grants: &[RolePermissionGrant]) -> StoreResult<()> {
        let mut state = self.state.write().await;
        // Validate everything before touching anything
        if !state.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound {
                entity: "Role",
                id: role_id.to_string(),
            });
        }
        if let Some(missing) = grants.iter().find(|g| !state.permissions.contains_key(&g.permission_id)) {
            return Err(StoreError::NotFound {
                entity: "Permission",
                id: missing.permission_id.to_string(),
            });
        }

        state.role_permissions.retain(|rp| rp.role_id != role_id);
        for grant in grants {
            state.insert_role_permission(role_id, grant)?;
        }
        Ok(())
    }

    async fn assign_role(&self, user_id: UserId, role_id: RoleId, assigned_by: Option<UserId>) -> StoreResult<UserRole> {
        self.state.write().await.insert_user_role(user_id, role_id, assigned_by)
    }

    async fn remove_user_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let before = state.user_roles.len();
        state.user_roles.retain(|ur| !(ur.user_id == user_id && ur.role_id == role_id));
        Ok(state.user_roles.len() < before)
    }

    async fn user_roles(&self, user_id: UserId, environment_id: Option<EnvironmentId>) -> StoreResult<Vec<UserRoleDetail>> {
        let state = self.state.read().await;
        let mut roles: Vec<_> = state
            .user_roles
            .iter()
            .filter(|ur| ur.user_id == user_id)
            .filter_map(|ur| state.user_role_detail(ur))
            .filter(|d| environment_id.is_none_or(|env| d.environment_id == env))
            .collect();
        roles.sort_by(|a, b| a.role_name.cmp(&b.role_name));
        Ok(roles)
    }

    async fn user_roles_for_users(
        &self,
        user_ids: &[UserId],
        environment_id: EnvironmentId,
    ) -> StoreResult<Vec<UserRoleDetail>> {
        let state = self.state.read().await;
        let mut roles: Vec<_> = state
            .user_roles
            .iter()
            .filter(|ur| user_ids.contains(&ur.user_id))
            .filter_map(|ur| state.user_role_detail(ur))
            .filter(|d| d.environment_id == environment_id)
            .collect();
        roles.sort_by(|a, b| a.role_name.cmp(&b.role_name));
        Ok(roles)
    }

    async fn role_users(&self, role_id: RoleId) -> StoreResult<Vec<UserRoleDetail>> {
        let state = self.state.read().await;
        let mut roles: Vec<_> = state
            .user_roles
            .iter()
            .filter(|ur| ur.role_id == role_id)
            .filter_map(|ur| state.user_role_detail(ur))
            .collect();
        roles.sort_by_key(|d| d.assigned_at);
        Ok(roles)
    }

    async fn replace_user_roles(
        &self,
        user_id: UserId,
        environment_id: EnvironmentId,
        role_ids: &[RoleId],
        assigned_by: Option<UserId>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::NotFound {
                entity: "User",
                id: user_id.to_string(),
            });
        }
        if let Some(missing) = role_ids.iter().find(|id| !state.roles.contains_key(id)) {
            return Err(StoreError::NotFound {
                entity: "Role",
                id: missing.to_string(),
            });
        }

        let in_environment: Vec<RoleId> = state
            .roles
            .values()
            .filter(|r| r.environment_id == environment_id)
            .map(|r| r.id)
            .collect();
        state
            .user_roles
            .retain(|ur| !(ur.user_id == user_id && in_environment.contains(&ur.role_id)));
        for role_id in role_ids {
            state.insert_user_role(user_id, *role_id, assigned_by)?;
        }
        Ok(())
    }

    async fn has_system_role_any_environment(&self, user_id: UserId, role_name: &str) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .user_roles
            .iter()
            .filter(|ur| ur.user_id == user_id)
            .filter_map(|ur| state.roles.get(&ur.role_id))
            .any(|r| r.is_system && r.name == role_name))
    }

    async fn authorization_snapshot(
        &self,
        user_id: UserId,
        environment_id: EnvironmentId,
        action: Action,
        resource_level: ResourceLevel,
    ) -> StoreResult<Option<AuthorizationSnapshot>> {
        let state = self.state.read().await;
        Ok(state.users.get(&user_id).cloned().map(|user| AuthorizationSnapshot {
            user,
            grants: state.grants(user_id, environment_id, Some((action, resource_level))),
        }))
    }

    async fn effective_grants(&self, user_id: UserId, environment_id: EnvironmentId) -> StoreResult<Vec<Grant>> {
        let mut grants = self.state.read().await.grants(user_id, environment_id, None);
        grants.sort_by(|a, b| {
            (&a.role_name, a.action.as_str(), a.resource_level.as_str()).cmp(&(
                &b.role_name,
                b.action.as_str(),
                b.resource_level.as_str(),
            ))
        });
        Ok(grants)
    }

    async fn create_session(&self, request: &SessionCreateDBRequest) -> StoreResult<Session> {
        self.state.write().await.insert_session(request)
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        Ok(self.state.read().await.sessions.get(&id).cloned())
    }

    async fn find_valid_session_by_access_hash(&self, access_token_hash: &str, now: DateTime<Utc>) -> StoreResult<Option<Session>> {
        Ok(self
            .state
            .read()
            .await
            .sessions
            .values()
            .find(|s| s.access_token_hash == access_token_hash && s.is_valid_at(now))
            .cloned())
    }

    async fn rotate_session(
        &self,
        refresh_token_id: &str,
        now: DateTime<Utc>,
        next: &SessionCreateDBRequest,
    ) -> StoreResult<Option<Session>> {
        let mut state = self.state.write().await;
        let Some(current) = state
            .sessions
            .values()
            .find(|s| s.refresh_token_id == refresh_token_id && s.user_id == next.user_id && s.is_valid_at(now))
            .map(|s| s.id)
        else {
            return Ok(None);
        };

        let session = state.insert_session(next)?;
        if let Some(old) = state.sessions.get_mut(&current) {
            old.is_revoked = true;
        }
        Ok(Some(session))
    }

    async fn list_sessions(&self, user_id: UserId, include_expired: bool, now: DateTime<Utc>) -> StoreResult<Vec<Session>> {
        let mut sessions: Vec<_> = self
            .state
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && (include_expired || s.is_valid_at(now)))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn revoke_session(&self, id: SessionId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.sessions.get_mut(&id) {
            Some(session) => {
                session.is_revoked = true;
                true
            }
            None => false,
        })
    }

    async fn revoke_user_sessions(&self, user_id: UserId, keep_access_hash: Option<&str>) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut count = 0;
        for session in state.sessions.values_mut() {
            if session.user_id == user_id
                && !session.is_revoked
                && keep_access_hash != Some(session.access_token_hash.as_str())
            {
                session.is_revoked = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - state.sessions.len()) as u64)
    }

    async fn delete_revoked_sessions(&self) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| !s.is_revoked);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn create_api_token(&self, request: &ApiTokenCreateDBRequest) -> StoreResult<ApiToken> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&request.user_id) {
            return Err(StoreError::NotFound {
                entity: "User",
                id: request.user_id.to_string(),
            });
        }
        if state.api_tokens.values().any(|t| t.token_hash == request.token_hash) {
            return Err(StoreError::Conflict(conflict_message(Some("api_tokens"), None)));
        }

        let token = ApiToken {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            name: request.name.clone(),
            token_hash: request.token_hash.clone(),
            token_prefix: request.token_prefix.clone(),
            expires_at: request.expires_at,
            last_used_at: None,
            is_revoked: false,
            scopes: request.scopes.clone(),
            created_at: Utc::now(),
        };
        state.api_tokens.insert(token.id, token.clone());
        Ok(token)
    }

    async fn get_api_token(&self, id: ApiTokenId) -> StoreResult<Option<ApiToken>> {
        Ok(self.state.read().await.api_tokens.get(&id).cloned())
    }

    async fn list_api_tokens(&self, user_id: UserId, include_revoked: bool) -> StoreResult<Vec<ApiToken>> {
        let mut tokens: Vec<_> = self
            .state
            .read()
            .await
            .api_tokens
            .values()
            .filter(|t| t.user_id == user_id && (include_revoked || !t.is_revoked))
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }

    async fn find_valid_api_token(&self, token_hash: &str, now: DateTime<Utc>) -> StoreResult<Option<ApiToken>> {
        Ok(self
            .state
            .read()
            .await
            .api_tokens
            .values()
            .find(|t| t.token_hash == token_hash && t.is_valid_at(now))
            .cloned())
    }

    async fn touch_api_token(&self, id: ApiTokenId, now: DateTime<Utc>) -> StoreResult<()> {
        if let Some(token) = self.state.write().await.api_tokens.get_mut(&id) {
            token.last_used_at = Some(now);
        }
        Ok(())
    }

    async fn revoke_api_token(&self, id: ApiTokenId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.api_tokens.get_mut(&id) {
            Some(token) => {
                token.is_revoked = true;
                true
            }
            None => false,
        })
    }

    async fn revoke_user_api_tokens(&self, user_id: UserId) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut count = 0;
        for token in state.api_tokens.values_mut() {
            if token.user_id == user_id && !token.is_revoked {
                token.is_revoked = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_api_token(&self, id: ApiTokenId) -> StoreResult<bool> {
        Ok(self.state.write().await.api_tokens.remove(&id).is_some())
    }

    async fn api_token_stats(&self, user_id: UserId, now: DateTime<Utc>) -> StoreResult<ApiTokenStats> {
        let state = self.state.read().await;
        let mut stats = ApiTokenStats::default();
        for token in state.api_tokens.values().filter(|t| t.user_id == user_id) {
            stats.total += 1;
            if token.is_revoked {
                stats.revoked += 1;
            } else if token.is_expired_at(now) {
                stats.expired += 1;
            } else {
                stats.active += 1;
            }
        }
        Ok(stats)
    }

    async fn get_oidc_provider(&self, id: OidcProviderId) -> StoreResult<Option<OidcProvider>> {
        Ok(self.state.read().await.oidc_providers.get(&id).cloned())
    }

    async fn get_oidc_provider_for_environment(&self, environment_id: EnvironmentId) -> StoreResult<Option<OidcProvider>> {
        Ok(self
            .state
            .read()
            .await
            .oidc_providers
            .values()
            .find(|p| p.environment_id == environment_id)
            .cloned())
    }

    async fn list_enabled_oidc_providers(&self) -> StoreResult<Vec<OidcProvider>> {
        let mut providers: Vec<_> = self
            .state
            .read()
            .await
            .oidc_providers
            .values()
            .filter(|p| p.is_enabled)
            .cloned()
            .collect();
        providers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(providers)
    }

    async fn upsert_oidc_provider(&self, request: &OidcProviderUpsertDBRequest) -> StoreResult<OidcProvider> {
        let mut state = self.state.write().await;
        if !state.environments.contains_key(&request.environment_id) {
            return Err(StoreError::NotFound {
                entity: "Environment",
                id: request.environment_id.to_string(),
            });
        }

        let now = Utc::now();
        let existing = state
            .oidc_providers
            .values()
            .find(|p| p.environment_id == request.environment_id)
            .cloned();
        let provider = OidcProvider {
            id: existing.as_ref().map_or_else(Uuid::new_v4, |p| p.id),
            environment_id: request.environment_id,
            issuer_url: request.issuer_url.clone(),
            client_id: request.client_id.clone(),
            client_secret_encrypted: request
                .client_secret_encrypted
                .clone()
                .or_else(|| existing.as_ref().and_then(|p| p.client_secret_encrypted.clone())),
            use_pkce: request.use_pkce,
            scopes: request.scopes.clone(),
            role_claim: request.role_claim.clone(),
            auto_create_users: request.auto_create_users,
            default_role_name: request.default_role_name.clone(),
            is_enabled: request.is_enabled,
            created_at: existing.as_ref().map_or(now, |p| p.created_at),
            updated_at: now,
        };
        state.oidc_providers.insert(provider.id, provider.clone());
        Ok(provider)
    }

    async fn set_oidc_provider_enabled(&self, id: OidcProviderId, is_enabled: bool) -> StoreResult<Option<OidcProvider>> {
        let mut state = self.state.write().await;
        Ok(state.oidc_providers.get_mut(&id).map(|provider| {
            provider.is_enabled = is_enabled;
            provider.updated_at = Utc::now();
            provider.clone()
        }))
    }

    async fn update_oidc_client_secret(
        &self,
        id: OidcProviderId,
        client_secret_encrypted: Option<&str>,
    ) -> StoreResult<Option<OidcProvider>> {
        let mut state = self.state.write().await;
        Ok(state.oidc_providers.get_mut(&id).map(|provider| {
            provider.client_secret_encrypted = client_secret_encrypted.map(str::to_string);
            provider.updated_at = Utc::now();
            provider.clone()
        }))
    }

    async fn delete_oidc_provider(&self, environment_id: EnvironmentId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let Some(id) = state
            .oidc_providers
            .values()
            .find(|p| p.environment_id == environment_id)
            .map(|p| p.id)
        else {
            return Ok(false);
        };
        state.oidc_providers.remove(&id);
        state.oidc_login_states.retain(|_, login| login.provider_id != id);
        Ok(true)
    }

    async fn create_oidc_login_state(&self, request: &OidcLoginStateCreateDBRequest, now: DateTime<Utc>) -> StoreResult<OidcLoginState> {
        let mut state = self.state.write().await;
        if !state.oidc_providers.contains_key(&request.provider_id) {
            return Err(StoreError::NotFound {
                entity: "OIDC provider",
                id: request.provider_id.to_string(),
            });
        }
        state.oidc_login_states.retain(|_, login| login.expires_at > now);
        if state.oidc_login_states.contains_key(&request.state_hash) {
            return Err(StoreError::Conflict(conflict_message(Some("oidc_login_states"), None)));
        }

        let login = OidcLoginState {
            state_hash: request.state_hash.clone(),
            provider_id: request.provider_id,
            code_challenge: request.code_challenge.clone(),
            redirect_uri: request.redirect_uri.clone(),
            expires_at: request.expires_at,
            created_at: now,
        };
        state.oidc_login_states.insert(login.state_hash.clone(), login.clone());
        Ok(login)
    }

    async fn take_oidc_login_state(&self, state_hash: &str, now: DateTime<Utc>) -> StoreResult<Option<OidcLoginState>> {
        let mut state = self.state.write().await;
        Ok(state
            .oidc_login_states
            .remove(state_hash)
            .filter(|login| login.expires_at > now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seeded() -> (MemoryStore, UserDBResponse, EnvironmentDBResponse) {
        let store = MemoryStore::new();
        let user = store
            .create_user(&UserCreateDBRequest {
                email: "dev@example.com".to_string(),
                display_name: None,
                is_global_admin: false,
            })
            .await
            .unwrap();
        let env = store
            .create_environment(&EnvironmentCreateDBRequest {
                name: "prod".to_string(),
                admin_url: "http://pulsar:8080".to_string(),
                rbac_enabled: true,
            })
            .await
            .unwrap();
        (store, user, env)
    }

    async fn role(store: &MemoryStore, env: EnvironmentId, name: &str, is_system: bool) -> RoleDBResponse {
        store
            .create_role(&RoleCreateDBRequest {
                environment_id: env,
                name: name.to_string(),
                description: None,
                is_system,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_permission_catalogue_is_seeded() {
        let store = MemoryStore::new();
        let permissions = store.list_permissions().await.unwrap();
        assert_eq!(permissions.len(), 17);
        assert_eq!(permissions[0].key(), "admin:cluster");

        let produce = store
            .get_permission_by_action_and_level(Action::Produce, ResourceLevel::Topic)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(produce.description.as_deref(), Some("Publish messages to a topic"));
        assert!(
            store
                .get_permission_by_action_and_level(Action::Produce, ResourceLevel::Cluster)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_activate_environment_switches_exactly_one() {
        let (store, _, prod) = seeded().await;
        let staging = store
            .create_environment(&EnvironmentCreateDBRequest {
                name: "staging".to_string(),
                admin_url: "http://staging:8080".to_string(),
                rbac_enabled: false,
            })
            .await
            .unwrap();

        store.activate_environment(prod.id).await.unwrap().unwrap();
        store.activate_environment(staging.id).await.unwrap().unwrap();

        let active: Vec<_> = store
            .list_environments()
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, staging.id);

        assert!(store.activate_environment(Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(store.get_active_environment().await.unwrap().unwrap().id, staging.id);
    }

    #[tokio::test]
    async fn test_duplicate_role_name_conflicts_per_environment() {
        let (store, _, env) = seeded().await;
        role(&store, env.id, "ops", false).await;

        let err = store
            .create_role(&RoleCreateDBRequest {
                environment_id: env.id,
                name: "ops".to_string(),
                description: None,
                is_system: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(msg) if msg == "Role with name 'ops' already exists"));
    }

    #[tokio::test]
    async fn test_system_roles_are_not_deleted() {
        let (store, _, env) = seeded().await;
        let system = role(&store, env.id, "viewer", true).await;
        let custom = role(&store, env.id, "ops", false).await;

        assert!(!store.delete_role(system.id).await.unwrap());
        assert!(store.delete_role(custom.id).await.unwrap());
        assert!(!store.delete_role(custom.id).await.unwrap());
        assert!(store.get_role(system.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replace_role_permissions_is_all_or_nothing() {
        let (store, _, env) = seeded().await;
        let ops = role(&store, env.id, "ops", false).await;
        let read_topic = store
            .get_permission_by_action_and_level(Action::Read, ResourceLevel::Topic)
            .await
            .unwrap()
            .unwrap();
        store
            .add_role_permission(
                ops.id,
                &RolePermissionGrant {
                    permission_id: read_topic.id,
                    resource_pattern: None,
                },
            )
            .await
            .unwrap();

        let bad = [
            RolePermissionGrant {
                permission_id: read_topic.id,
                resource_pattern: Some("acme/*".to_string()),
            },
            RolePermissionGrant {
                permission_id: Uuid::new_v4(),
                resource_pattern: None,
            },
        ];
        assert!(store.replace_role_permissions(ops.id, &bad).await.is_err());

        let unchanged = store.role_permissions(ops.id).await.unwrap();
        assert_eq!(unchanged.len(), 1);
        assert_eq!(unchanged[0].resource_pattern, None);

        store.replace_role_permissions(ops.id, &[]).await.unwrap();
        assert!(store.role_permissions(ops.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_user_roles_keeps_other_environments() {
        let (store, user, prod) = seeded().await;
        let staging = store
            .create_environment(&EnvironmentCreateDBRequest {
                name: "staging".to_string(),
                admin_url: "http://staging:8080".to_string(),
                rbac_enabled: false,
            })
            .await
            .unwrap();
        let prod_viewer = role(&store, prod.id, "viewer", true).await;
        let prod_dev = role(&store, prod.id, "developer", true).await;
        let staging_viewer = role(&store, staging.id, "viewer", true).await;

        store.assign_role(user.id, prod_viewer.id, None).await.unwrap();
        store.assign_role(user.id, staging_viewer.id, None).await.unwrap();

        store
            .replace_user_roles(user.id, prod.id, &[prod_dev.id], None)
            .await
            .unwrap();

        let prod_roles = store.user_roles(user.id, Some(prod.id)).await.unwrap();
        assert_eq!(prod_roles.len(), 1);
        assert_eq!(prod_roles[0].role_name, "developer");
        assert_eq!(store.user_roles(user.id, Some(staging.id)).await.unwrap().len(), 1);
        assert_eq!(store.user_roles(user.id, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rotate_session_is_single_use() {
        let (store, user, _) = seeded().await;
        let now = Utc::now();
        let request = |refresh: &str| SessionCreateDBRequest {
            user_id: user.id,
            access_token_hash: format!("access-{refresh}"),
            refresh_token_id: refresh.to_string(),
            refresh_token_encrypted: None,
            expires_at: now + Duration::days(7),
            ip_address: None,
            user_agent: None,
        };

        let first = store.create_session(&request("r1")).await.unwrap();
        let second = store.rotate_session("r1", now, &request("r2")).await.unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert!(store.get_session(first.id).await.unwrap().unwrap().is_revoked);

        // Replaying the old refresh id finds nothing
        assert!(store.rotate_session("r1", now, &request("r3")).await.unwrap().is_none());
        assert_eq!(store.list_sessions(user.id, false, now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_oidc_provider_upsert_keeps_identity_and_secret() {
        let (store, _, env) = seeded().await;
        let request = |secret: Option<&str>, client_id: &str| OidcProviderUpsertDBRequest {
            environment_id: env.id,
            issuer_url: "https://sso.example.com".to_string(),
            client_id: client_id.to_string(),
            client_secret_encrypted: secret.map(str::to_string),
            use_pkce: true,
            scopes: vec!["openid".to_string()],
            role_claim: "groups".to_string(),
            auto_create_users: true,
            default_role_name: None,
            is_enabled: true,
        };

        let first = store.upsert_oidc_provider(&request(Some("sealed"), "console")).await.unwrap();
        let second = store.upsert_oidc_provider(&request(None, "console-v2")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.client_id, "console-v2");
        assert_eq!(second.client_secret_encrypted.as_deref(), Some("sealed"));

        let unknown = OidcProviderUpsertDBRequest {
            environment_id: Uuid::new_v4(),
            ..request(None, "x")
        };
        assert!(matches!(
            store.upsert_oidc_provider(&unknown).await,
            Err(StoreError::NotFound { entity: "Environment", .. })
        ));
    }

    #[tokio::test]
    async fn test_oidc_login_state_is_single_use_and_expires() {
        let (store, _, env) = seeded().await;
        let provider = store
            .upsert_oidc_provider(&OidcProviderUpsertDBRequest {
                environment_id: env.id,
                issuer_url: "https://sso.example.com".to_string(),
                client_id: "console".to_string(),
                client_secret_encrypted: None,
                use_pkce: true,
                scopes: vec!["openid".to_string()],
                role_claim: "groups".to_string(),
                auto_create_users: false,
                default_role_name: None,
                is_enabled: true,
            })
            .await
            .unwrap();
        let now = Utc::now();
        let login = |hash: &str, expires_at: DateTime<Utc>| OidcLoginStateCreateDBRequest {
            state_hash: hash.to_string(),
            provider_id: provider.id,
            code_challenge: None,
            redirect_uri: "https://console.example.com/callback".to_string(),
            expires_at,
        };

        store.create_oidc_login_state(&login("live", now + Duration::minutes(10)), now).await.unwrap();
        store.create_oidc_login_state(&login("stale", now + Duration::seconds(1)), now).await.unwrap();

        assert!(store.take_oidc_login_state("live", now).await.unwrap().is_some());
        assert!(store.take_oidc_login_state("live", now).await.unwrap().is_none());
        let later = now + Duration::minutes(1);
        assert!(store.take_oidc_login_state("stale", later).await.unwrap().is_none());

        // Deleting the provider drops its pending logins
        store.create_oidc_login_state(&login("pending", now + Duration::minutes(10)), now).await.unwrap();
        assert!(store.delete_oidc_provider(env.id).await.unwrap());
        assert!(store.take_oidc_login_state("pending", now).await.unwrap().is_none());
        assert!(!store.delete_oidc_provider(env.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_api_token_stats() {
        let (store, user, _) = seeded().await;
        let now = Utc::now();
        let create = |hash: &str, expires_at: Option<DateTime<Utc>>| ApiTokenCreateDBRequest {
            user_id: user.id,
            name: hash.to_string(),
            token_hash: hash.to_string(),
            token_prefix: "pc_xxxxx".to_string(),
            expires_at,
            scopes: None,
        };

        store.create_api_token(&create("a", None)).await.unwrap();
        store
            .create_api_token(&create("b", Some(now - Duration::days(1))))
            .await
            .unwrap();
        let revoked = store.create_api_token(&create("c", None)).await.unwrap();
        assert!(store.revoke_api_token(revoked.id).await.unwrap());
        assert!(store.revoke_api_token(revoked.id).await.unwrap());

        let stats = store.api_token_stats(user.id, now).await.unwrap();
        assert_eq!(
            stats,
            ApiTokenStats {
                total: 3,
                active: 1,
                revoked: 1,
                expired: 1
            }
        );
        assert!(store.find_valid_api_token("b", now).await.unwrap().is_none());
        assert!(store.find_valid_api_token("a", now).await.unwrap().is_some());
    }
}
