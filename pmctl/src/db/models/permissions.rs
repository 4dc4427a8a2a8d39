//! Database models for permission definitions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::types::{Action, PermissionId, ResourceLevel};

/// A seeded `(action, resource_level)` definition. Rows are never mutated at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow, ToSchema)]
pub struct Permission {
    #[schema(value_type = String, format = "uuid")]
    pub id: PermissionId,
    pub action: Action,
    pub resource_level: ResourceLevel,
    pub description: Option<String>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl Permission {
    /// `action:level` form used in error messages and logs
    pub fn key(&self) -> String {
        format!("{}:{}", self.action, self.resource_level)
    }
}
