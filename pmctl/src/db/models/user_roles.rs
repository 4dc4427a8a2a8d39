//! Database models for user role assignments.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{EnvironmentId, RoleId, UserId, UserRoleId};

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserRole {
    pub id: UserRoleId,
    pub user_id: UserId,
    pub role_id: RoleId,
    pub assigned_by: Option<UserId>,
    pub assigned_at: DateTime<Utc>,
}

/// An assignment joined with its role
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserRoleDetail {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub role_name: String,
    pub is_system: bool,
    pub environment_id: EnvironmentId,
    pub assigned_by: Option<UserId>,
    pub assigned_at: DateTime<Utc>,
}
