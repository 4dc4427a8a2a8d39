//! API request/response models for OIDC providers and the OIDC login flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    credentials::{AuthorizationRequest, OidcProviderSettings},
    db::models::oidc_providers::OidcProvider,
    types::{EnvironmentId, OidcProviderId},
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OidcProviderConfigure {
    pub issuer_url: String,
    pub client_id: String,
    /// Omit to keep the stored secret
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_true")]
    pub use_pkce: bool,
    /// Defaults to `openid profile email`
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_role_claim")]
    pub role_claim: String,
    #[serde(default = "default_true")]
    pub auto_create_users: bool,
    #[serde(default)]
    pub default_role_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_role_claim() -> String {
    "groups".to_string()
}

impl From<OidcProviderConfigure> for OidcProviderSettings {
    fn from(data: OidcProviderConfigure) -> Self {
        Self {
            issuer_url: data.issuer_url,
            client_id: data.client_id,
            client_secret: data.client_secret,
            use_pkce: data.use_pkce,
            scopes: data.scopes,
            role_claim: data.role_claim,
            auto_create_users: data.auto_create_users,
            default_role_name: data.default_role_name,
            is_enabled: data.is_enabled,
        }
    }
}

/// The client secret is never returned; only whether one is stored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OidcProviderResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: OidcProviderId,
    #[schema(value_type = String, format = "uuid")]
    pub environment_id: EnvironmentId,
    pub issuer_url: String,
    pub client_id: String,
    pub has_client_secret: bool,
    pub use_pkce: bool,
    pub scopes: Vec<String>,
    pub role_claim: String,
    pub auto_create_users: bool,
    pub default_role_name: Option<String>,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OidcProvider> for OidcProviderResponse {
    fn from(provider: OidcProvider) -> Self {
        Self {
            has_client_secret: provider.has_client_secret(),
            id: provider.id,
            environment_id: provider.environment_id,
            issuer_url: provider.issuer_url,
            client_id: provider.client_id,
            use_pkce: provider.use_pkce,
            scopes: provider.scopes,
            role_claim: provider.role_claim,
            auto_create_users: provider.auto_create_users,
            default_role_name: provider.default_role_name,
            is_enabled: provider.is_enabled,
            created_at: provider.created_at,
            updated_at: provider.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClientSecretUpdate {
    /// `null` clears the secret, which is only allowed while PKCE is on
    pub client_secret: Option<String>,
}

/// What the login page needs to know about a provider.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OidcLoginProvider {
    #[schema(value_type = String, format = "uuid")]
    pub environment_id: EnvironmentId,
    pub issuer_url: String,
    pub use_pkce: bool,
    /// Logins always run against the active environment
    pub is_active_environment: bool,
}

impl OidcLoginProvider {
    pub fn new(provider: OidcProvider, active_environment: Option<EnvironmentId>) -> Self {
        Self {
            is_active_environment: active_environment == Some(provider.environment_id),
            environment_id: provider.environment_id,
            issuer_url: provider.issuer_url,
            use_pkce: provider.use_pkce,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OidcLoginProvidersResponse {
    pub providers: Vec<OidcLoginProvider>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OidcAuthorizeRequest {
    pub redirect_uri: String,
    /// The client's own `S256` challenge. Without one the server generates the pair and returns
    /// the verifier.
    #[serde(default)]
    pub code_challenge: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OidcAuthorizeResponse {
    pub authorization_url: String,
    pub state: String,
    /// Returned once; the client must send it back with the callback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl From<AuthorizationRequest> for OidcAuthorizeResponse {
    fn from(request: AuthorizationRequest) -> Self {
        Self {
            authorization_url: request.authorization_url.to_string(),
            state: request.state,
            code_verifier: request.code_verifier,
            code_challenge_method: request.code_challenge_method.map(str::to_string),
            expires_at: request.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OidcCallbackRequest {
    pub code: String,
    pub state: String,
    #[serde(default)]
    pub code_verifier: Option<String>,
}
