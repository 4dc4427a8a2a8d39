//! Database models for roles.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{EnvironmentId, RoleId};

/// Database request for creating a role
#[derive(Debug, Clone)]
pub struct RoleCreateDBRequest {
    pub environment_id: EnvironmentId,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
}

/// Database request for updating a role. The system flag is not updatable.
#[derive(Debug, Clone, Default)]
pub struct RoleUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Database response for a role
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RoleDBResponse {
    pub id: RoleId,
    pub environment_id: EnvironmentId,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for listing roles
#[derive(Debug, Clone)]
pub struct RoleFilter {
    pub environment_id: EnvironmentId,
    pub include_system: bool,
}
