//! Database models for role permission grants and the projections resolved through them.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::users::UserDBResponse;
use crate::types::{Action, PermissionId, ResourceLevel, RoleId, RolePermissionId};

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RolePermission {
    pub id: RolePermissionId,
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    pub resource_pattern: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A grant joined with its permission definition, as shown on a role
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RolePermissionDetail {
    pub id: RolePermissionId,
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    pub action: Action,
    pub resource_level: ResourceLevel,
    pub resource_pattern: Option<String>,
    pub description: Option<String>,
}

/// One entry of a replace-all or add request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RolePermissionGrant {
    pub permission_id: PermissionId,
    pub resource_pattern: Option<String>,
}

/// A permission held by a user through one of their roles
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Grant {
    pub action: Action,
    pub resource_level: ResourceLevel,
    pub resource_pattern: Option<String>,
    pub role_name: String,
}

/// A user and the grants they hold for one `(action, resource_level)`, read from a single
/// snapshot of the store.
#[derive(Debug, Clone)]
pub struct AuthorizationSnapshot {
    pub user: UserDBResponse,
    pub grants: Vec<Grant>,
}
