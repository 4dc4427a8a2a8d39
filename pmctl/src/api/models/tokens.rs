//! API request/response models for console API tokens and cluster tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    db::models::api_tokens::{ApiToken, ApiTokenStats},
    types::{ApiTokenId, EnvironmentId},
};

pub const SAVE_TOKEN_MESSAGE: &str = "Save this token now. It will not be shown again.";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenCreate {
    pub name: String,
    /// Omit for a token that never expires
    pub expires_in_days: Option<i64>,
    pub scopes: Option<Vec<String>>,
}

/// Returned once, on creation. The only response that carries the token value.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenCreatedResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ApiTokenId,
    pub name: String,
    pub token: String,
    pub token_prefix: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<Vec<String>>,
    pub message: String,
}

impl TokenCreatedResponse {
    pub fn new(token: String, row: ApiToken) -> Self {
        Self {
            id: row.id,
            name: row.name,
            token,
            token_prefix: row.token_prefix,
            expires_at: row.expires_at,
            scopes: row.scopes,
            message: SAVE_TOKEN_MESSAGE.to_string(),
        }
    }
}

/// Token metadata, never the value
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenInfo {
    #[schema(value_type = String, format = "uuid")]
    pub id: ApiTokenId,
    pub name: String,
    pub token_prefix: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
    pub is_expired: bool,
    pub is_valid: bool,
    pub scopes: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl From<ApiToken> for TokenInfo {
    fn from(t: ApiToken) -> Self {
        let now = Utc::now();
        Self {
            is_expired: t.is_expired_at(now),
            is_valid: t.is_valid_at(now),
            id: t.id,
            name: t.name,
            token_prefix: t.token_prefix,
            expires_at: t.expires_at,
            last_used_at: t.last_used_at,
            is_revoked: t.is_revoked,
            scopes: t.scopes,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokensResponse {
    pub tokens: Vec<TokenInfo>,
}

impl From<Vec<ApiToken>> for TokensResponse {
    fn from(tokens: Vec<ApiToken>) -> Self {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListTokensQuery {
    pub include_revoked: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenStatsResponse {
    pub total: i64,
    pub active: i64,
    pub revoked: i64,
    pub expired: i64,
}

impl From<ApiTokenStats> for TokenStatsResponse {
    fn from(s: ApiTokenStats) -> Self {
        Self {
            total: s.total,
            active: s.active,
            revoked: s.revoked,
            expired: s.expired,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClusterTokenRequest {
    pub subject: String,
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClusterTokenResponse {
    pub token: String,
    pub subject: String,
    pub expires_in_days: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClusterTokenSecretRequest {
    pub secret_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClusterTokenCapabilityResponse {
    pub can_generate: bool,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub environment_id: Option<EnvironmentId>,
    pub environment_name: Option<String>,
}
