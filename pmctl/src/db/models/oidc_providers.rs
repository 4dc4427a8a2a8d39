//! Database models for per-environment OIDC providers and pending logins.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{EnvironmentId, OidcProviderId};

pub const DEFAULT_SCOPES: [&str; 3] = ["openid", "profile", "email"];

/// Create-or-replace request for an environment's provider. The client secret is already
/// encrypted; `None` keeps whatever secret is stored.
#[derive(Debug, Clone)]
pub struct OidcProviderUpsertDBRequest {
    pub environment_id: EnvironmentId,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret_encrypted: Option<String>,
    pub use_pkce: bool,
    pub scopes: Vec<String>,
    pub role_claim: String,
    pub auto_create_users: bool,
    pub default_role_name: Option<String>,
    pub is_enabled: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct OidcProvider {
    pub id: OidcProviderId,
    pub environment_id: EnvironmentId,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret_encrypted: Option<String>,
    pub use_pkce: bool,
    pub scopes: Vec<String>,
    pub role_claim: String,
    pub auto_create_users: bool,
    pub default_role_name: Option<String>,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OidcProvider {
    pub fn has_client_secret(&self) -> bool {
        self.client_secret_encrypted.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// A started login. Only the SHA-256 of the `state` parameter is stored.
#[derive(Debug, Clone, FromRow)]
pub struct OidcLoginState {
    pub state_hash: String,
    pub provider_id: OidcProviderId,
    /// Present when the provider uses PKCE; the callback must present its verifier
    pub code_challenge: Option<String>,
    pub redirect_uri: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OidcLoginStateCreateDBRequest {
    pub state_hash: String,
    pub provider_id: OidcProviderId,
    pub code_challenge: Option<String>,
    pub redirect_uri: String,
    pub expires_at: DateTime<Utc>,
}
