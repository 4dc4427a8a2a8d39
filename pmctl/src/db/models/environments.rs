//! Database models for environments (one per managed cluster).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::EnvironmentId;

/// Database request for creating an environment
#[derive(Debug, Clone)]
pub struct EnvironmentCreateDBRequest {
    pub name: String,
    pub admin_url: String,
    pub rbac_enabled: bool,
}

/// Database request for updating an environment
#[derive(Debug, Clone, Default)]
pub struct EnvironmentUpdateDBRequest {
    pub admin_url: Option<String>,
    pub rbac_enabled: Option<bool>,
    /// `Some(None)` clears the stored signing key
    pub pulsar_token_secret_key_encrypted: Option<Option<String>>,
}

/// Database response for an environment
#[derive(Debug, Clone, FromRow)]
pub struct EnvironmentDBResponse {
    pub id: EnvironmentId,
    pub name: String,
    pub admin_url: String,
    pub is_active: bool,
    pub rbac_enabled: bool,
    pub token_encrypted: Option<String>,
    pub pulsar_token_secret_key_encrypted: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnvironmentDBResponse {
    pub fn has_cluster_token_secret(&self) -> bool {
        self.pulsar_token_secret_key_encrypted
            .as_deref()
            .is_some_and(|s| !s.is_empty())
    }
}

/// Filter for listing environments
#[derive(Debug, Clone)]
pub struct EnvironmentFilter {
    pub skip: i64,
    pub limit: i64,
}

impl Default for EnvironmentFilter {
    fn default() -> Self {
        Self { skip: 0, limit: 100 }
    }
}
