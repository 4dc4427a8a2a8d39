//! API request/response models for environments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{db::models::environments::EnvironmentDBResponse, types::EnvironmentId};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentCreate {
    pub name: String,
    pub admin_url: String,
    #[serde(default = "default_rbac_enabled")]
    pub rbac_enabled: bool,
}

fn default_rbac_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RbacToggle {
    pub enabled: bool,
}

/// Encrypted secrets are never returned; only whether a signing key is configured.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: EnvironmentId,
    pub name: String,
    pub admin_url: String,
    pub is_active: bool,
    pub rbac_enabled: bool,
    pub has_cluster_token_secret: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EnvironmentDBResponse> for EnvironmentResponse {
    fn from(env: EnvironmentDBResponse) -> Self {
        Self {
            has_cluster_token_secret: env.has_cluster_token_secret(),
            id: env.id,
            name: env.name,
            admin_url: env.admin_url,
            is_active: env.is_active,
            rbac_enabled: env.rbac_enabled,
            created_at: env.created_at,
            updated_at: env.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentsResponse {
    pub environments: Vec<EnvironmentResponse>,
}
