//! The authorization entry point and role management.

use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::{RbacError, Result, seed::SUPERUSER_ROLE};
use crate::{
    auth::pattern::ResourcePattern,
    db::models::{
        permissions::Permission,
        role_permissions::{AuthorizationSnapshot, RolePermission, RolePermissionDetail, RolePermissionGrant},
        roles::{RoleCreateDBRequest, RoleDBResponse, RoleUpdateDBRequest},
        user_roles::{UserRole, UserRoleDetail},
        users::UserDBResponse,
    },
    store::{AuthStore, StoreError},
    types::{Action, EnvironmentId, PermissionId, ResourceLevel, RoleId, UserId, abbrev_uuid},
};

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Break-glass: the user carries the global-admin flag and skips every grant lookup.
    GlobalAdmin,
    Granted { role_name: String },
    Denied,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Denied)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Decision::GlobalAdmin => "global_admin",
            Decision::Granted { .. } => "role_permission",
            Decision::Denied => "no_permission",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectivePermission {
    pub action: Action,
    pub resource_level: ResourceLevel,
    pub resource_pattern: Option<String>,
    /// Name of the role the grant comes from
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct RoleWithPermissions {
    pub role: RoleDBResponse,
    pub permissions: Vec<RolePermissionDetail>,
}

#[derive(Debug, Clone)]
pub struct UserWithRoles {
    pub user: UserDBResponse,
    pub roles: Vec<UserRoleDetail>,
}

/// Stateless over an [`AuthStore`]; every call reads the store, so role changes take effect on
/// the next check.
#[derive(Clone)]
pub struct RbacService {
    store: Arc<dyn AuthStore>,
}

impl RbacService {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Whether `user_id` may perform `action` at `resource_level`, optionally on one resource path.
    ///
    /// Fails closed: unknown or inactive users and users without a matching grant are denied.
    pub async fn check_permission(
        &self,
        user_id: UserId,
        environment_id: EnvironmentId,
        action: Action,
        resource_level: ResourceLevel,
        resource_path: Option<&str>,
    ) -> Result<bool> {
        Ok(self
            .authorize(user_id, environment_id, action, resource_level, resource_path)
            .await?
            .is_allowed())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn authorize(
        &self,
        user_id: UserId,
        environment_id: EnvironmentId,
        action: Action,
        resource_level: ResourceLevel,
        resource_path: Option<&str>,
    ) -> Result<Decision> {
        // User flags and grants come from one snapshot
        let Some(AuthorizationSnapshot { user, grants }) = self
            .store
            .authorization_snapshot(user_id, environment_id, action, resource_level)
            .await?
        else {
            debug!("Permission check for unknown user");
            return Ok(Decision::Denied);
        };
        if !user.is_active {
            debug!("Permission check for inactive user");
            return Ok(Decision::Denied);
        }

        // The only place the global-admin flag is honoured
        if user.is_global_admin {
            info!(
                email = %user.email,
                permission = %format!("{action}:{resource_level}"),
                resource_path,
                "Global admin bypass"
            );
            return Ok(Decision::GlobalAdmin);
        }

        let granted = match resource_path {
            None => grants.into_iter().next(),
            Some(path) => grants
                .into_iter()
                .find(|g| ResourcePattern::parse(g.resource_pattern.as_deref()).matches(path)),
        };

        Ok(match granted {
            Some(grant) => Decision::Granted {
                role_name: grant.role_name,
            },
            None => {
                debug!(permission = %format!("{action}:{resource_level}"), resource_path, "No matching grant");
                Decision::Denied
            }
        })
    }

    /// Every grant the user holds in the environment, labelled with the granting role.
    pub async fn get_user_permissions(
        &self,
        user_id: UserId,
        environment_id: EnvironmentId,
    ) -> Result<Vec<EffectivePermission>> {
        let grants = self.store.effective_grants(user_id, environment_id).await?;
        Ok(grants
            .into_iter()
            .map(|g| EffectivePermission {
                action: g.action,
                resource_level: g.resource_level,
                resource_pattern: g.resource_pattern,
                source: g.role_name,
            })
            .collect())
    }

    /// Global admins and holders of the `superuser` system role in any environment.
    pub async fn is_superuser(&self, user_id: UserId, is_global_admin: bool) -> Result<bool> {
        if is_global_admin {
            return Ok(true);
        }
        Ok(self.store.has_system_role_any_environment(user_id, SUPERUSER_ROLE).await?)
    }

    pub async fn list_permissions(&self) -> Result<Vec<Permission>> {
        Ok(self.store.list_permissions().await?)
    }

    /// Permission catalogue keyed by action name.
    pub async fn get_permissions_grouped(&self) -> Result<BTreeMap<String, Vec<Permission>>> {
        let mut grouped: BTreeMap<String, Vec<Permission>> = BTreeMap::new();
        for permission in self.store.list_permissions().await? {
            grouped
                .entry(permission.action.as_str().to_string())
                .or_default()
                .push(permission);
        }
        Ok(grouped)
    }

    pub async fn list_roles(&self, environment_id: EnvironmentId, include_system: bool) -> Result<Vec<RoleWithPermissions>> {
        let roles = self.store.list_roles(environment_id, include_system).await?;
        let mut out = Vec::with_capacity(roles.len());
        for role in roles {
            let permissions = self.store.role_permissions(role.id).await?;
            out.push(RoleWithPermissions { role, permissions });
        }
        Ok(out)
    }

    pub async fn get_role(&self, role_id: RoleId) -> Result<Option<RoleWithPermissions>> {
        let Some(role) = self.store.get_role(role_id).await? else {
            return Ok(None);
        };
        let permissions = self.store.role_permissions(role_id).await?;
        Ok(Some(RoleWithPermissions { role, permissions }))
    }

    #[instrument(skip(self, description), fields(environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn create_role(
        &self,
        environment_id: EnvironmentId,
        name: &str,
        description: Option<String>,
    ) -> Result<RoleDBResponse> {
        let name = validate_role_name(name)?;
        let role = self
            .store
            .create_role(&RoleCreateDBRequest {
                environment_id,
                name,
                description,
                is_system: false,
            })
            .await
            .map_err(duplicate_name_is_validation)?;

        info!(role_id = %abbrev_uuid(&role.id), name = %role.name, "Created role");
        Ok(role)
    }

    /// `None` when the role does not exist. System roles keep their name.
    #[instrument(skip(self, name, description), fields(role_id = %abbrev_uuid(&role_id)), err)]
    pub async fn update_role(
        &self,
        role_id: RoleId,
        name: Option<&str>,
        description: Option<String>,
    ) -> Result<Option<RoleDBResponse>> {
        let Some(existing) = self.store.get_role(role_id).await? else {
            return Ok(None);
        };

        let name = name.map(validate_role_name).transpose()?;
        if existing.is_system && name.as_ref().is_some_and(|n| n != &existing.name) {
            return Err(RbacError::Validation("System roles cannot be renamed".to_string()));
        }

        let role = self
            .store
            .update_role(role_id, &RoleUpdateDBRequest { name, description })
            .await
            .map_err(duplicate_name_is_validation)?;

        if let Some(role) = &role {
            info!(name = %role.name, "Updated role");
        }
        Ok(role)
    }

    /// `false` when the role is missing or a system role.
    #[instrument(skip(self), fields(role_id = %abbrev_uuid(&role_id)), err)]
    pub async fn delete_role(&self, role_id: RoleId) -> Result<bool> {
        let deleted = self.store.delete_role(role_id).await?;
        if deleted {
            info!("Deleted role");
        }
        Ok(deleted)
    }

    pub async fn get_role_permissions(&self, role_id: RoleId) -> Result<Vec<RolePermissionDetail>> {
        Ok(self.store.role_permissions(role_id).await?)
    }

    /// Grant a permission to a role. Granting the same `(permission, pattern)` twice is a no-op.
    #[instrument(skip(self, resource_pattern), fields(role_id = %abbrev_uuid(&role_id), permission_id = %abbrev_uuid(&permission_id)), err)]
    pub async fn add_permission_to_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
        resource_pattern: Option<String>,
    ) -> Result<RolePermission> {
        self.require_role(role_id).await?;
        let grant = self.validate_grant(permission_id, resource_pattern).await?;
        let row = self.store.add_role_permission(role_id, &grant).await?;

        info!(resource_pattern = ?grant.resource_pattern, "Granted permission to role");
        Ok(row)
    }

    #[instrument(skip(self, resource_pattern), fields(role_id = %abbrev_uuid(&role_id), permission_id = %abbrev_uuid(&permission_id)), err)]
    pub async fn remove_permission_from_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
        resource_pattern: Option<&str>,
    ) -> Result<bool> {
        let resource_pattern = resource_pattern.map(str::trim).filter(|p| !p.is_empty());
        let removed = self
            .store
            .remove_role_permission(role_id, permission_id, resource_pattern)
            .await?;
        if removed {
            info!(resource_pattern, "Removed permission from role");
        }
        Ok(removed)
    }

    /// Replace every grant of the role. Input is validated in full before anything is written, and
    /// the write itself is a single atomic store operation.
    #[instrument(skip(self, grants), fields(role_id = %abbrev_uuid(&role_id), count = grants.len()), err)]
    pub async fn set_role_permissions(&self, role_id: RoleId, grants: Vec<(PermissionId, Option<String>)>) -> Result<()> {
        self.require_role(role_id).await?;

        let mut validated: Vec<RolePermissionGrant> = Vec::with_capacity(grants.len());
        for (permission_id, resource_pattern) in grants {
            let grant = self.validate_grant(permission_id, resource_pattern).await?;
            if !validated.contains(&grant) {
                validated.push(grant);
            }
        }

        self.store.replace_role_permissions(role_id, &validated).await?;
        info!(count = validated.len(), "Replaced role permissions");
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), role_id = %abbrev_uuid(&role_id)), err)]
    pub async fn assign_role_to_user(
        &self,
        user_id: UserId,
        role_id: RoleId,
        assigned_by: Option<UserId>,
    ) -> Result<UserRole> {
        if self.store.get_user(user_id).await?.is_none() {
            return Err(RbacError::Validation("User not found".to_string()));
        }
        if self.store.get_role(role_id).await?.is_none() {
            return Err(RbacError::Validation("Role not found".to_string()));
        }

        let assignment = self.store.assign_role(user_id, role_id, assigned_by).await?;
        info!(assigned_by = ?assigned_by.as_ref().map(abbrev_uuid), "Assigned role to user");
        Ok(assignment)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), role_id = %abbrev_uuid(&role_id)), err)]
    pub async fn remove_role_from_user(&self, user_id: UserId, role_id: RoleId) -> Result<bool> {
        let removed = self.store.remove_user_role(user_id, role_id).await?;
        if removed {
            info!("Removed role from user");
        }
        Ok(removed)
    }

    /// Replace the user's roles within one environment. Roles from other environments are rejected
    /// and assignments in other environments are untouched.
    #[instrument(skip(self, role_ids), fields(user_id = %abbrev_uuid(&user_id), environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn set_user_roles(
        &self,
        user_id: UserId,
        environment_id: EnvironmentId,
        role_ids: &[RoleId],
        assigned_by: Option<UserId>,
    ) -> Result<()> {
        if self.store.get_user(user_id).await?.is_none() {
            return Err(RbacError::Validation("User not found".to_string()));
        }

        let mut unique: Vec<RoleId> = Vec::with_capacity(role_ids.len());
        for role_id in role_ids {
            match self.store.get_role(*role_id).await? {
                Some(role) if role.environment_id == environment_id => {
                    if !unique.contains(role_id) {
                        unique.push(*role_id);
                    }
                }
                Some(_) => {
                    return Err(RbacError::Validation(format!(
                        "Role {role_id} does not belong to the active environment"
                    )));
                }
                None => return Err(RbacError::Validation(format!("Role {role_id} not found"))),
            }
        }

        self.store
            .replace_user_roles(user_id, environment_id, &unique, assigned_by)
            .await?;
        info!(count = unique.len(), "Replaced user roles");
        Ok(())
    }

    pub async fn get_user_roles(&self, user_id: UserId, environment_id: EnvironmentId) -> Result<Vec<UserRoleDetail>> {
        Ok(self.store.user_roles(user_id, Some(environment_id)).await?)
    }

    /// Everyone holding `role_id`, oldest assignment first.
    pub async fn get_role_users(&self, role_id: RoleId) -> Result<Vec<UserRoleDetail>> {
        self.require_role(role_id).await?;
        Ok(self.store.role_users(role_id).await?)
    }

    /// A page of users, each with their roles in `environment_id`.
    pub async fn get_users_with_roles(&self, environment_id: EnvironmentId, skip: i64, limit: i64) -> Result<Vec<UserWithRoles>> {
        let users = self.store.list_users(skip, limit).await?;
        let ids: Vec<UserId> = users.iter().map(|u| u.id).collect();
        let mut assignments = self.store.user_roles_for_users(&ids, environment_id).await?;

        Ok(users
            .into_iter()
            .map(|user| {
                let (roles, rest): (Vec<_>, Vec<_>) = assignments.drain(..).partition(|r| r.user_id == user.id);
                assignments = rest;
                UserWithRoles { user, roles }
            })
            .collect())
    }

    async fn require_role(&self, role_id: RoleId) -> Result<RoleDBResponse> {
        self.store.get_role(role_id).await?.ok_or_else(|| RbacError::NotFound {
            entity: "Role",
            id: role_id.to_string(),
        })
    }

    async fn validate_grant(&self, permission_id: PermissionId, resource_pattern: Option<String>) -> Result<RolePermissionGrant> {
        if self.store.get_permission(permission_id).await?.is_none() {
            return Err(RbacError::Validation(format!("Permission {permission_id} not found")));
        }

        let resource_pattern = match resource_pattern.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(pattern) => {
                ResourcePattern::validate(pattern).map_err(|e| {
                    warn!(pattern, error = %e, "Rejected resource pattern");
                    RbacError::Validation(format!("Invalid resource pattern '{pattern}': {e}"))
                })?;
                Some(pattern.to_string())
            }
        };

        Ok(RolePermissionGrant {
            permission_id,
            resource_pattern,
        })
    }
}

fn validate_role_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RbacError::Validation("Role name cannot be empty".to_string()));
    }
    if name.len() > 100 {
        return Err(RbacError::Validation("Role name cannot exceed 100 characters".to_string()));
    }
    Ok(name.to_string())
}

fn duplicate_name_is_validation(err: StoreError) -> RbacError {
    match err {
        StoreError::Conflict(message) => RbacError::Validation(message),
        e => RbacError::Store(e),
    }
}
