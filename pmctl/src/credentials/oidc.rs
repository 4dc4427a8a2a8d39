//! Login through an external OpenID Connect provider.
//!
//! Each environment may configure one provider. A login is the authorization-code flow, run
//! in two calls:
//!
//! 1. [`OidcService::begin_login`] records a pending login under the SHA-256 of a random `state`
//!    and returns the provider's authorization URL. When the provider uses PKCE the pending login
//!    carries the `S256` challenge: the client either supplied it, or receives a freshly generated
//!    verifier exactly once in the response.
//! 2. [`OidcService::complete_login`] consumes the pending login, checks the presented verifier
//!    against the stored challenge, redeems the code at the token endpoint, reads the userinfo
//!    claims and starts an ordinary session for the matching console user.
//!
//! Endpoints come from the provider's discovery document, fetched on every login.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::{
    Client,
    header::{ACCEPT, CONTENT_TYPE},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{CredentialError, Result, SessionService, TokenPair};
use crate::{
    crypto::{self, PKCE_METHOD, PkceChallenge, SecretCipher},
    db::models::{
        oidc_providers::{DEFAULT_SCOPES, OidcLoginStateCreateDBRequest, OidcProvider, OidcProviderUpsertDBRequest},
        users::{UserCreateDBRequest, UserDBResponse},
    },
    rbac::seed::SUPERUSER_ROLE,
    store::AuthStore,
    types::{EnvironmentId, UserId, abbrev_uuid},
};

/// Provider settings as an administrator submits them. The client secret is plaintext here and
/// is encrypted before it reaches the store; `None` keeps the stored secret.
#[derive(Debug, Clone)]
pub struct OidcProviderSettings {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub use_pkce: bool,
    pub scopes: Vec<String>,
    pub role_claim: String,
    pub auto_create_users: bool,
    pub default_role_name: Option<String>,
    pub is_enabled: bool,
}

/// Everything the client needs to send the user to the provider.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub authorization_url: Url,
    pub state: String,
    /// Only set when the server generated the PKCE pair
    pub code_verifier: Option<String>,
    pub code_challenge_method: Option<&'static str>,
    pub expires_at: DateTime<Utc>,
}

/// The part of the discovery document used here.
#[derive(Debug, Clone, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    authorization_endpoint: Url,
    token_endpoint: Url,
    userinfo_endpoint: Option<Url>,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
}

#[derive(Clone)]
pub struct OidcService {
    store: Arc<dyn AuthStore>,
    cipher: SecretCipher,
    sessions: SessionService,
    http: Client,
    login_ttl: Duration,
}

fn provider_not_found(environment_id: EnvironmentId) -> CredentialError {
    CredentialError::NotFound {
        entity: "OIDC provider",
        id: environment_id.to_string(),
    }
}

fn upstream(err: reqwest::Error) -> CredentialError {
    CredentialError::Upstream(err.to_string())
}

fn secret_required() -> CredentialError {
    CredentialError::Validation("client_secret is required when PKCE is disabled".to_string())
}

/// Joining onto a URL without a trailing slash replaces its last path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        return url.clone();
    }
    let mut url = url.clone();
    let path = format!("{}/", url.path());
    url.set_path(&path);
    url
}

/// An absolute http(s) URL without query or fragment, stored without a trailing slash.
fn normalize_issuer(issuer_url: &str) -> Result<String> {
    let url = Url::parse(issuer_url.trim()).map_err(|e| CredentialError::Validation(format!("Invalid issuer URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.query().is_some() || url.fragment().is_some() {
        return Err(CredentialError::Validation(
            "Invalid issuer URL: expected an http(s) URL without query or fragment".to_string(),
        ));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Trimmed and deduplicated, in submission order. Empty means the defaults; `openid` is required.
fn normalize_scopes(scopes: Vec<String>) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::new();
    for scope in scopes.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !normalized.iter().any(|s| s == scope) {
            normalized.push(scope.to_string());
        }
    }
    if normalized.is_empty() {
        return Ok(DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect());
    }
    if !normalized.iter().any(|s| s == "openid") {
        return Err(CredentialError::Validation("scopes must include 'openid'".to_string()));
    }
    Ok(normalized)
}

/// A client-supplied challenge must have the shape of base64url(SHA-256(..)).
fn validate_challenge(challenge: &str) -> Result<()> {
    let well_formed =
        challenge.len() == 43 && challenge.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if well_formed {
        Ok(())
    } else {
        Err(CredentialError::Validation(
            "code_challenge must be an unpadded base64url SHA-256 digest".to_string(),
        ))
    }
}

/// Values of the role claim: a string array, or a single string.
fn claim_values(claims: &Value, claim: &str) -> Vec<String> {
    match claims.get(claim) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        Some(Value::String(value)) => vec![value.clone()],
        _ => Vec::new(),
    }
}

impl OidcService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        cipher: SecretCipher,
        sessions: SessionService,
        http: Client,
        login_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cipher,
            sessions,
            http,
            login_ttl,
        }
    }

    pub async fn get_provider(&self, environment_id: EnvironmentId) -> Result<Option<OidcProvider>> {
        Ok(self.store.get_oidc_provider_for_environment(environment_id).await?)
    }

    pub async fn enabled_providers(&self) -> Result<Vec<OidcProvider>> {
        Ok(self.store.list_enabled_oidc_providers().await?)
    }

    /// Create or replace the environment's provider.
    #[instrument(skip(self, settings), fields(environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn configure_provider(&self, environment_id: EnvironmentId, settings: OidcProviderSettings) -> Result<OidcProvider> {
        if self.store.get_environment(environment_id).await?.is_none() {
            return Err(CredentialError::NotFound {
                entity: "Environment",
                id: environment_id.to_string(),
            });
        }

        let issuer_url = normalize_issuer(&settings.issuer_url)?;
        let client_id = settings.client_id.trim().to_string();
        if client_id.is_empty() {
            return Err(CredentialError::Validation("client_id cannot be empty".to_string()));
        }
        let role_claim = settings.role_claim.trim().to_string();
        if role_claim.is_empty() {
            return Err(CredentialError::Validation("role_claim cannot be empty".to_string()));
        }
        let scopes = normalize_scopes(settings.scopes)?;

        let default_role_name = settings
            .default_role_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        if let Some(name) = &default_role_name
            && self.store.get_role_by_name(environment_id, name).await?.is_none()
        {
            return Err(CredentialError::Validation(format!(
                "Role '{name}' does not exist in this environment"
            )));
        }

        let client_secret_encrypted = match settings.client_secret.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(secret) => Some(self.cipher.encrypt(secret)?),
            None => None,
        };
        if !settings.use_pkce && client_secret_encrypted.is_none() {
            let has_stored_secret = self
                .get_provider(environment_id)
                .await?
                .is_some_and(|p| p.has_client_secret());
            if !has_stored_secret {
                return Err(secret_required());
            }
        }

        let provider = self
            .store
            .upsert_oidc_provider(&OidcProviderUpsertDBRequest {
                environment_id,
                issuer_url,
                client_id,
                client_secret_encrypted,
                use_pkce: settings.use_pkce,
                scopes,
                role_claim,
                auto_create_users: settings.auto_create_users,
                default_role_name,
                is_enabled: settings.is_enabled,
            })
            .await?;

        info!(
            issuer = %provider.issuer_url,
            use_pkce = provider.use_pkce,
            is_enabled = provider.is_enabled,
            "Configured OIDC provider"
        );
        Ok(provider)
    }

    #[instrument(skip(self), fields(environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn set_enabled(&self, environment_id: EnvironmentId, is_enabled: bool) -> Result<OidcProvider> {
        let provider = self
            .get_provider(environment_id)
            .await?
            .ok_or_else(|| provider_not_found(environment_id))?;
        let provider = self
            .store
            .set_oidc_provider_enabled(provider.id, is_enabled)
            .await?
            .ok_or_else(|| provider_not_found(environment_id))?;

        info!(is_enabled, "OIDC provider toggled");
        Ok(provider)
    }

    /// Replace the client secret, or clear it with `None`. Clearing is refused while PKCE is off.
    #[instrument(skip(self, client_secret), fields(environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn update_client_secret(&self, environment_id: EnvironmentId, client_secret: Option<&str>) -> Result<OidcProvider> {
        let provider = self
            .get_provider(environment_id)
            .await?
            .ok_or_else(|| provider_not_found(environment_id))?;

        let encrypted = match client_secret.map(str::trim).filter(|s| !s.is_empty()) {
            Some(secret) => Some(self.cipher.encrypt(secret)?),
            None if !provider.use_pkce => return Err(secret_required()),
            None => None,
        };

        let provider = self
            .store
            .update_oidc_client_secret(provider.id, encrypted.as_deref())
            .await?
            .ok_or_else(|| provider_not_found(environment_id))?;

        info!(has_client_secret = provider.has_client_secret(), "Updated OIDC client secret");
        Ok(provider)
    }

    #[instrument(skip(self), fields(environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn delete_provider(&self, environment_id: EnvironmentId) -> Result<bool> {
        let deleted = self.store.delete_oidc_provider(environment_id).await?;
        if deleted {
            info!("Deleted OIDC provider");
        }
        Ok(deleted)
    }

    /// Start a login against the active environment's provider.
    ///
    /// `code_challenge` is the client's own `S256` challenge; without one a PKCE pair is generated
    /// and its verifier returned.
    #[instrument(skip_all, err)]
    pub async fn begin_login(&self, redirect_uri: &str, code_challenge: Option<&str>) -> Result<AuthorizationRequest> {
        let environment = self
            .store
            .get_active_environment()
            .await?
            .ok_or_else(|| CredentialError::Validation("No active environment".to_string()))?;
        let provider = self
            .get_provider(environment.id)
            .await?
            .filter(|p| p.is_enabled)
            .ok_or_else(|| provider_not_found(environment.id))?;
        let redirect_uri =
            Url::parse(redirect_uri.trim()).map_err(|e| CredentialError::Validation(format!("Invalid redirect_uri: {e}")))?;

        let (code_challenge, code_verifier) = match (provider.use_pkce, code_challenge) {
            (false, _) => (None, None),
            (true, Some(challenge)) => {
                validate_challenge(challenge)?;
                (Some(challenge.to_string()), None)
            }
            (true, None) => {
                let pkce = PkceChallenge::generate();
                (Some(pkce.challenge), Some(pkce.verifier))
            }
        };

        let metadata = self.discover(&provider).await?;

        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(self.login_ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| CredentialError::Validation("OIDC login lifetime is out of range".to_string()))?;
        let state = crypto::generate_token::<32>();

        let mut authorization_url = metadata.authorization_endpoint;
        {
            let mut query = authorization_url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &provider.client_id)
                .append_pair("redirect_uri", redirect_uri.as_str())
                .append_pair("scope", &provider.scopes.join(" "))
                .append_pair("state", &state);
            if let Some(challenge) = &code_challenge {
                query
                    .append_pair("code_challenge", challenge)
                    .append_pair("code_challenge_method", PKCE_METHOD);
            }
        }

        self.store
            .create_oidc_login_state(
                &OidcLoginStateCreateDBRequest {
                    state_hash: crypto::hash_value(&state),
                    provider_id: provider.id,
                    code_challenge: code_challenge.clone(),
                    redirect_uri: redirect_uri.to_string(),
                    expires_at,
                },
                now,
            )
            .await?;

        debug!(provider_id = %abbrev_uuid(&provider.id), "Started OIDC login");
        Ok(AuthorizationRequest {
            authorization_url,
            state,
            code_verifier,
            code_challenge_method: code_challenge.map(|_| PKCE_METHOD),
            expires_at,
        })
    }

    /// Finish a login started by [`OidcService::begin_login`] and start a session.
    ///
    /// An unknown, expired or replayed `state`, a missing or wrong PKCE verifier and a code the
    /// provider rejects are all [`CredentialError::InvalidCredential`].
    #[instrument(skip_all, err)]
    pub async fn complete_login(
        &self,
        code: &str,
        state: &str,
        code_verifier: Option<&str>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<TokenPair> {
        let Some(login) = self
            .store
            .take_oidc_login_state(&crypto::hash_value(state), Utc::now())
            .await?
        else {
            warn!("OIDC callback with unknown or expired state");
            return Err(CredentialError::InvalidCredential);
        };

        let provider = self
            .store
            .get_oidc_provider(login.provider_id)
            .await?
            .filter(|p| p.is_enabled)
            .ok_or(CredentialError::InvalidCredential)?;

        let code_verifier = match &login.code_challenge {
            Some(challenge) => match code_verifier {
                Some(verifier) if crypto::verify_pkce(verifier, challenge) => Some(verifier),
                _ => {
                    warn!(provider_id = %abbrev_uuid(&provider.id), "OIDC callback failed PKCE verification");
                    return Err(CredentialError::InvalidCredential);
                }
            },
            None => None,
        };

        let metadata = self.discover(&provider).await?;
        let access_token = self
            .redeem_code(&provider, &metadata, code, &login.redirect_uri, code_verifier)
            .await?;
        let claims = self.userinfo(&metadata, &access_token).await?;
        let user = self.resolve_user(&provider, &claims).await?;

        let pair = self.sessions.create_session(user.id, ip_address, user_agent).await?;
        info!(
            user_id = %abbrev_uuid(&user.id),
            environment_id = %abbrev_uuid(&provider.environment_id),
            "OIDC login"
        );
        Ok(pair)
    }

    async fn discover(&self, provider: &OidcProvider) -> Result<ProviderMetadata> {
        let issuer = Url::parse(&provider.issuer_url)
            .map_err(|e| CredentialError::Upstream(format!("stored issuer URL is invalid: {e}")))?;
        let url = ensure_slash(&issuer)
            .join(".well-known/openid-configuration")
            .map_err(|e| CredentialError::Upstream(format!("failed to build discovery URL: {e}")))?;

        debug!(%url, "Fetching OIDC discovery document");
        let response = self.http.get(url).header(ACCEPT, "application/json").send().await.map_err(upstream)?;
        if !response.status().is_success() {
            return Err(CredentialError::Upstream(format!("discovery returned {}", response.status())));
        }
        let metadata: ProviderMetadata = response.json().await.map_err(upstream)?;

        if metadata.issuer.trim_end_matches('/') != provider.issuer_url {
            return Err(CredentialError::Upstream(format!(
                "discovery document names issuer {}",
                metadata.issuer
            )));
        }
        Ok(metadata)
    }

    async fn redeem_code(
        &self,
        provider: &OidcProvider,
        metadata: &ProviderMetadata,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<String> {
        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("grant_type", "authorization_code")
                .append_pair("code", code)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("client_id", &provider.client_id);
            if let Some(verifier) = code_verifier {
                form.append_pair("code_verifier", verifier);
            }
            if let Some(encrypted) = provider.client_secret_encrypted.as_deref().filter(|s| !s.is_empty()) {
                form.append_pair("client_secret", &self.cipher.decrypt(encrypted)?);
            }
            form.finish()
        };

        let response = self
            .http
            .post(metadata.token_endpoint.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(upstream)?;

        let status = response.status();
        if status.is_client_error() {
            warn!(%status, "Token endpoint rejected the authorization code");
            return Err(CredentialError::InvalidCredential);
        }
        if !status.is_success() {
            return Err(CredentialError::Upstream(format!("token endpoint returned {status}")));
        }
        let token: TokenEndpointResponse = response.json().await.map_err(upstream)?;
        Ok(token.access_token)
    }

    async fn userinfo(&self, metadata: &ProviderMetadata, access_token: &str) -> Result<Value> {
        let endpoint = metadata
            .userinfo_endpoint
            .clone()
            .ok_or_else(|| CredentialError::Upstream("discovery document has no userinfo_endpoint".to_string()))?;

        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(upstream)?;
        if !response.status().is_success() {
            return Err(CredentialError::Upstream(format!("userinfo returned {}", response.status())));
        }
        response.json().await.map_err(upstream)
    }

    /// The console user for the claims, provisioned if the provider allows it, with the roles
    /// named by the role claim added in the provider's environment.
    async fn resolve_user(&self, provider: &OidcProvider, claims: &Value) -> Result<UserDBResponse> {
        let email = claims
            .get("email")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| CredentialError::Validation("Identity provider did not return an email address".to_string()))?;
        if claims.get("email_verified").and_then(Value::as_bool) == Some(false) {
            warn!("OIDC login with an unverified email address");
            return Err(CredentialError::InvalidCredential);
        }

        let user = match self.store.get_user_by_email(email).await? {
            Some(user) => user,
            None if provider.auto_create_users => {
                let user = self
                    .store
                    .create_user(&UserCreateDBRequest {
                        email: email.to_string(),
                        display_name: claims.get("name").and_then(Value::as_str).map(str::to_string),
                        is_global_admin: false,
                    })
                    .await?;
                info!(user_id = %abbrev_uuid(&user.id), "Provisioned user from OIDC login");
                if let Some(role_name) = &provider.default_role_name {
                    self.assign_named_role(provider.environment_id, user.id, role_name).await?;
                }
                user
            }
            None => {
                warn!("OIDC login for an identity with no console account");
                return Err(CredentialError::Validation(
                    "No console account exists for this identity".to_string(),
                ));
            }
        };
        if !user.is_active {
            return Err(CredentialError::Validation("User is not active".to_string()));
        }

        for role_name in claim_values(claims, &provider.role_claim) {
            self.assign_named_role(provider.environment_id, user.id, &role_name).await?;
        }
        Ok(user)
    }

    /// Additive; claim values without a matching role are skipped. The superuser role is only
    /// ever granted by an administrator.
    async fn assign_named_role(&self, environment_id: EnvironmentId, user_id: UserId, role_name: &str) -> Result<()> {
        match self.store.get_role_by_name(environment_id, role_name).await? {
            Some(role) if role.is_system && role.name == SUPERUSER_ROLE => {
                warn!(user_id = %abbrev_uuid(&user_id), "Ignoring superuser role from identity provider claim");
            }
            Some(role) => {
                self.store.assign_role(user_id, role.id, None).await?;
            }
            None => debug!(role_name, "No role matches claim value"),
        }
        Ok(())
    }
}
