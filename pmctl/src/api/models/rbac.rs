//! API request/response models for roles, permissions and role assignments.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    db::models::{permissions::Permission, role_permissions::RolePermissionDetail, user_roles::UserRoleDetail},
    rbac::{EffectivePermission, RoleWithPermissions, UserWithRoles},
    types::{Action, PermissionId, ResourceLevel, RoleId, UserId},
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionInfo {
    #[schema(value_type = String, format = "uuid")]
    pub id: PermissionId,
    pub action: Action,
    pub resource_level: ResourceLevel,
    pub description: Option<String>,
    /// `action:resource_level`
    pub full_name: String,
}

impl From<Permission> for PermissionInfo {
    fn from(p: Permission) -> Self {
        Self {
            full_name: p.key(),
            id: p.id,
            action: p.action,
            resource_level: p.resource_level,
            description: p.description,
        }
    }
}

/// Permission catalogue grouped by action
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionsResponse {
    pub permissions: BTreeMap<String, Vec<PermissionInfo>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolePermissionInfo {
    #[schema(value_type = String, format = "uuid")]
    pub permission_id: PermissionId,
    pub action: Action,
    pub resource_level: ResourceLevel,
    pub resource_pattern: Option<String>,
}

impl From<RolePermissionDetail> for RolePermissionInfo {
    fn from(d: RolePermissionDetail) -> Self {
        Self {
            permission_id: d.permission_id,
            action: d.action,
            resource_level: d.resource_level,
            resource_pattern: d.resource_pattern,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleInfo {
    #[schema(value_type = String, format = "uuid")]
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub permissions: Vec<RolePermissionInfo>,
}

impl From<RoleWithPermissions> for RoleInfo {
    fn from(r: RoleWithPermissions) -> Self {
        Self {
            id: r.role.id,
            name: r.role.name,
            description: r.role.description,
            is_system: r.role.is_system,
            permissions: r.permissions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolesResponse {
    pub roles: Vec<RoleInfo>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListRolesQuery {
    /// Include the seeded system roles
    #[param(default = true)]
    pub include_system: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleCreate {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddPermissionRequest {
    #[schema(value_type = String, format = "uuid")]
    pub permission_id: PermissionId,
    /// Limits the grant to matching resources; omitted means every resource at the level
    pub resource_pattern: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RemovePermissionQuery {
    pub resource_pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetPermissionsRequest {
    pub permissions: Vec<AddPermissionRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    #[schema(value_type = String, format = "uuid")]
    pub role_id: RoleId,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetUserRolesRequest {
    #[schema(value_type = Vec<String>)]
    pub role_ids: Vec<RoleId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRoleInfo {
    #[schema(value_type = String, format = "uuid")]
    pub role_id: RoleId,
    pub role_name: String,
    pub is_system: bool,
    pub assigned_at: DateTime<Utc>,
}

impl From<UserRoleDetail> for UserRoleInfo {
    fn from(d: UserRoleDetail) -> Self {
        Self {
            role_id: d.role_id,
            role_name: d.role_name,
            is_system: d.is_system,
            assigned_at: d.assigned_at,
        }
    }
}

/// One holder of a role
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleMemberInfo {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub assigned_by: Option<UserId>,
    pub assigned_at: DateTime<Utc>,
}

impl From<UserRoleDetail> for RoleMemberInfo {
    fn from(d: UserRoleDetail) -> Self {
        Self {
            user_id: d.user_id,
            assigned_by: d.assigned_by,
            assigned_at: d.assigned_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleMembersResponse {
    #[schema(value_type = String, format = "uuid")]
    pub role_id: RoleId,
    pub users: Vec<RoleMemberInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserWithRolesInfo {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub roles: Vec<UserRoleInfo>,
}

impl From<UserWithRoles> for UserWithRolesInfo {
    fn from(u: UserWithRoles) -> Self {
        Self {
            id: u.user.id,
            email: u.user.email,
            display_name: u.user.display_name,
            is_active: u.user.is_active,
            roles: u.roles.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UsersResponse {
    pub users: Vec<UserWithRolesInfo>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListUsersQuery {
    #[param(default = 0, minimum = 0)]
    pub skip: Option<i64>,
    #[param(default = 100, minimum = 1, maximum = 1000)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckPermissionRequest {
    pub action: Action,
    pub resource_level: ResourceLevel,
    /// e.g. `acme/prod/orders`; omitted checks for any grant at the level
    pub resource_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckPermissionResponse {
    pub allowed: bool,
    /// `global_admin`, `role_permission` or `no_permission`
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserPermissionInfo {
    pub action: Action,
    pub resource_level: ResourceLevel,
    pub resource_pattern: Option<String>,
    /// Role the grant comes from
    pub source: String,
}

impl From<EffectivePermission> for UserPermissionInfo {
    fn from(p: EffectivePermission) -> Self {
        Self {
            action: p.action,
            resource_level: p.resource_level,
            resource_pattern: p.resource_pattern,
            source: p.source,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserPermissionsResponse {
    pub permissions: Vec<UserPermissionInfo>,
}

/// Plain acknowledgement body
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
