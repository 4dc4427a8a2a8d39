//! Console API tokens and cluster-token issuance.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::{CredentialError, Result};
use crate::{
    auth::tokens::{create_cluster_token, offset_by_days},
    crypto::{self, SecretCipher},
    db::models::{
        api_tokens::{ApiToken, ApiTokenCreateDBRequest, ApiTokenStats},
        environments::{EnvironmentDBResponse, EnvironmentUpdateDBRequest},
        users::UserDBResponse,
    },
    store::AuthStore,
    types::{ApiTokenId, EnvironmentId, UserId, abbrev_uuid},
};

const MAX_TOKEN_NAME_LEN: usize = 100;

fn out_of_range() -> CredentialError {
    CredentialError::Validation("expires_in_days is out of range".to_string())
}

#[derive(Clone)]
pub struct ApiTokenService {
    store: Arc<dyn AuthStore>,
    cipher: SecretCipher,
}

impl ApiTokenService {
    pub fn new(store: Arc<dyn AuthStore>, cipher: SecretCipher) -> Self {
        Self { store, cipher }
    }

    /// Mint a token for `user_id`. The returned plaintext is the only copy that will ever exist.
    ///
    /// `expires_in_days`: `None` never expires; zero or negative yields a token that is already
    /// expired.
    #[instrument(skip(self, name, scopes), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn create_token(
        &self,
        user_id: UserId,
        name: &str,
        expires_in_days: Option<i64>,
        scopes: Option<Vec<String>>,
    ) -> Result<(String, ApiToken)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CredentialError::Validation("Token name cannot be empty".to_string()));
        }
        if name.len() > MAX_TOKEN_NAME_LEN {
            return Err(CredentialError::Validation(format!(
                "Token name cannot exceed {MAX_TOKEN_NAME_LEN} characters"
            )));
        }
        self.require_active_user(user_id).await?;

        let expires_at = match expires_in_days {
            None => None,
            Some(days) => Some(offset_by_days(Utc::now(), days).ok_or_else(out_of_range)?),
        };
        let generated = crypto::generate_api_token();

        let token = self
            .store
            .create_api_token(&ApiTokenCreateDBRequest {
                user_id,
                name: name.to_string(),
                token_hash: generated.hash,
                token_prefix: generated.display_prefix,
                expires_at,
                scopes,
            })
            .await?;

        info!(token_id = %abbrev_uuid(&token.id), prefix = %token.token_prefix, "Created API token");
        Ok((generated.full, token))
    }

    /// Resolve a presented API token to its owner. `None` for anything that is not a live token of
    /// an active user.
    pub async fn validate_token(&self, token: &str) -> Result<Option<(UserDBResponse, ApiToken)>> {
        if !crypto::is_api_token(token) {
            return Ok(None);
        }

        let now = Utc::now();
        let Some(api_token) = self.store.find_valid_api_token(&crypto::hash_value(token), now).await? else {
            return Ok(None);
        };

        // Usage tracking never decides validity
        if let Err(e) = self.store.touch_api_token(api_token.id, now).await {
            warn!(token_id = %abbrev_uuid(&api_token.id), error = %e, "Failed to record API token use");
        }

        match self.store.get_user(api_token.user_id).await? {
            Some(user) if user.is_active => Ok(Some((user, api_token))),
            _ => Ok(None),
        }
    }

    /// The token if it exists and belongs to `owner`.
    pub async fn get_token(&self, token_id: ApiTokenId, owner: UserId) -> Result<Option<ApiToken>> {
        Ok(self
            .store
            .get_api_token(token_id)
            .await?
            .filter(|t| t.user_id == owner))
    }

    pub async fn list_tokens(&self, user_id: UserId, include_revoked: bool) -> Result<Vec<ApiToken>> {
        Ok(self.store.list_api_tokens(user_id, include_revoked).await?)
    }

    /// Revoke a token owned by `owner`. Revoking an already revoked token succeeds; a token owned by
    /// someone else is reported exactly like a missing one.
    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&token_id), owner = %abbrev_uuid(&owner)), err)]
    pub async fn revoke_token(&self, token_id: ApiTokenId, owner: UserId) -> Result<bool> {
        if self.get_token(token_id, owner).await?.is_none() {
            return Ok(false);
        }
        let revoked = self.store.revoke_api_token(token_id).await?;
        info!("Revoked API token");
        Ok(revoked)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64> {
        let count = self.store.revoke_user_api_tokens(user_id).await?;
        info!(count, "Revoked all API tokens for user");
        Ok(count)
    }

    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&token_id), owner = %abbrev_uuid(&owner)), err)]
    pub async fn delete_token(&self, token_id: ApiTokenId, owner: UserId) -> Result<bool> {
        if self.get_token(token_id, owner).await?.is_none() {
            return Ok(false);
        }
        Ok(self.store.delete_api_token(token_id).await?)
    }

    pub async fn token_stats(&self, user_id: UserId) -> Result<ApiTokenStats> {
        Ok(self.store.api_token_stats(user_id, Utc::now()).await?)
    }

    /// Mint a token for the messaging cluster, signed with the environment's own key.
    #[instrument(skip(self, subject), fields(environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn generate_cluster_token(
        &self,
        environment_id: EnvironmentId,
        subject: &str,
        expires_in_days: Option<i64>,
    ) -> Result<String> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(CredentialError::Validation("Token subject cannot be empty".to_string()));
        }
        if let Some(days) = expires_in_days {
            if days <= 0 {
                return Err(CredentialError::Validation("expires_in_days must be positive".to_string()));
            }
            offset_by_days(Utc::now(), days).ok_or_else(out_of_range)?;
        }

        let environment = self.require_environment(environment_id).await?;
        let Some(encrypted) = environment.pulsar_token_secret_key_encrypted.as_deref().filter(|s| !s.is_empty()) else {
            return Err(CredentialError::Validation(
                "Pulsar token secret key not configured for this environment".to_string(),
            ));
        };

        let secret = self.cipher.decrypt(encrypted)?;
        let token = create_cluster_token(subject, &secret, expires_in_days)?;

        info!(subject, expires_in_days, environment = %environment.name, "Generated cluster token");
        Ok(token)
    }

    pub async fn can_generate_cluster_tokens(&self, environment_id: EnvironmentId) -> Result<bool> {
        Ok(self
            .store
            .get_environment(environment_id)
            .await?
            .is_some_and(|e| e.has_cluster_token_secret()))
    }

    /// Store the environment's signing key encrypted. `false` when the environment is unknown.
    #[instrument(skip(self, secret_key), fields(environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn set_cluster_token_secret(&self, environment_id: EnvironmentId, secret_key: &str) -> Result<bool> {
        if secret_key.is_empty() {
            return Err(CredentialError::Validation("Secret key cannot be empty".to_string()));
        }

        let encrypted = self.cipher.encrypt(secret_key)?;
        let updated = self
            .store
            .update_environment(
                environment_id,
                &EnvironmentUpdateDBRequest {
                    pulsar_token_secret_key_encrypted: Some(Some(encrypted)),
                    ..Default::default()
                },
            )
            .await?;

        if updated.is_some() {
            info!(secret = %crypto::mask_sensitive(secret_key, 4), "Set cluster token signing key");
        }
        Ok(updated.is_some())
    }

    #[instrument(skip(self), fields(environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn remove_cluster_token_secret(&self, environment_id: EnvironmentId) -> Result<bool> {
        let updated = self
            .store
            .update_environment(
                environment_id,
                &EnvironmentUpdateDBRequest {
                    pulsar_token_secret_key_encrypted: Some(None),
                    ..Default::default()
                },
            )
            .await?;

        if updated.is_some() {
            info!("Removed cluster token signing key");
        }
        Ok(updated.is_some())
    }

    async fn require_active_user(&self, user_id: UserId) -> Result<UserDBResponse> {
        match self.store.get_user(user_id).await? {
            None => Err(CredentialError::Validation("User not found".to_string())),
            Some(user) if !user.is_active => Err(CredentialError::Validation("User is not active".to_string())),
            Some(user) => Ok(user),
        }
    }

    async fn require_environment(&self, environment_id: EnvironmentId) -> Result<EnvironmentDBResponse> {
        self.store
            .get_environment(environment_id)
            .await?
            .ok_or_else(|| CredentialError::Validation("Environment not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::models::{environments::EnvironmentCreateDBRequest, users::UserCreateDBRequest},
        store::MemoryStore,
    };
    use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
    use uuid::Uuid;

    async fn setup() -> (Arc<MemoryStore>, ApiTokenService, UserId) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(&UserCreateDBRequest {
                email: "dev@example.com".to_string(),
                display_name: Some("Dev".to_string()),
                is_global_admin: false,
            })
            .await
            .unwrap();
        let service = ApiTokenService::new(store.clone(), SecretCipher::new("test-encryption-key"));
        (store, service, user.id)
    }

    #[tokio::test]
    async fn test_create_and_validate() {
        let (store, service, user_id) = setup().await;
        let (plaintext, record) = service
            .create_token(user_id, "ci", Some(30), Some(vec!["read".to_string()]))
            .await
            .unwrap();

        assert!(plaintext.starts_with("pc_"));
        assert!(plaintext.starts_with(&record.token_prefix));
        assert_ne!(record.token_hash, plaintext);
        assert!(record.expires_at.is_some());

        let (user, token) = service.validate_token(&plaintext).await.unwrap().unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(token.id, record.id);

        let touched = store.get_api_token(record.id).await.unwrap().unwrap();
        assert!(touched.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_or_foreign_shapes_are_rejected() {
        let (_, service, _) = setup().await;
        assert!(service.validate_token("pc_doesnotexist").await.unwrap().is_none());
        assert!(service.validate_token("eyJhbGciOiJIUzI1NiJ9.e30.x").await.unwrap().is_none());
        assert!(service.validate_token("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revocation_is_monotonic_and_idempotent() {
        let (_, service, user_id) = setup().await;
        let (plaintext, record) = service.create_token(user_id, "ci", None, None).await.unwrap();

        assert!(service.revoke_token(record.id, user_id).await.unwrap());
        assert!(service.validate_token(&plaintext).await.unwrap().is_none());
        assert!(service.revoke_token(record.id, user_id).await.unwrap());
        assert!(service.validate_token(&plaintext).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_day_token_is_born_expired() {
        let (_, service, user_id) = setup().await;
        let (plaintext, record) = service.create_token(user_id, "short", Some(0), None).await.unwrap();

        assert!(!record.is_revoked);
        assert!(service.validate_token(&plaintext).await.unwrap().is_none());

        let stats = service.token_stats(user_id).await.unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_inactive_user_tokens_stop_resolving() {
        let (store, service, user_id) = setup().await;
        let (plaintext, _) = service.create_token(user_id, "ci", None, None).await.unwrap();

        store.set_user_active(user_id, false).await.unwrap();
        assert!(service.validate_token(&plaintext).await.unwrap().is_none());

        let err = service.create_token(user_id, "again", None, None).await.unwrap_err();
        assert!(matches!(err, CredentialError::Validation(msg) if msg == "User is not active"));
    }

    #[tokio::test]
    async fn test_create_for_unknown_user_fails() {
        let (_, service, _) = setup().await;
        let err = service.create_token(Uuid::new_v4(), "ci", None, None).await.unwrap_err();
        assert!(matches!(err, CredentialError::Validation(msg) if msg == "User not found"));
    }

    #[tokio::test]
    async fn test_ownership_is_enforced() {
        let (store, service, owner) = setup().await;
        let intruder = store
            .create_user(&UserCreateDBRequest {
                email: "other@example.com".to_string(),
                display_name: None,
                is_global_admin: false,
            })
            .await
            .unwrap()
            .id;
        let (plaintext, record) = service.create_token(owner, "ci", None, None).await.unwrap();

        assert!(service.get_token(record.id, intruder).await.unwrap().is_none());
        assert!(!service.revoke_token(record.id, intruder).await.unwrap());
        assert!(!service.delete_token(record.id, intruder).await.unwrap());
        assert!(service.validate_token(&plaintext).await.unwrap().is_some());

        assert!(service.delete_token(record.id, owner).await.unwrap());
        assert!(service.list_tokens(owner, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_all_and_list_filters() {
        let (_, service, user_id) = setup().await;
        service.create_token(user_id, "a", None, None).await.unwrap();
        service.create_token(user_id, "b", None, None).await.unwrap();

        assert_eq!(service.revoke_all_for_user(user_id).await.unwrap(), 2);
        assert_eq!(service.revoke_all_for_user(user_id).await.unwrap(), 0);
        assert!(service.list_tokens(user_id, false).await.unwrap().is_empty());
        assert_eq!(service.list_tokens(user_id, true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cluster_token_lifecycle() {
        let (store, service, _) = setup().await;
        let env = store
            .create_environment(&EnvironmentCreateDBRequest {
                name: "prod".to_string(),
                admin_url: "http://pulsar:8080".to_string(),
                rbac_enabled: false,
            })
            .await
            .unwrap();

        assert!(!service.can_generate_cluster_tokens(env.id).await.unwrap());
        let err = service.generate_cluster_token(env.id, "svc", None).await.unwrap_err();
        assert!(
            matches!(err, CredentialError::Validation(msg) if msg == "Pulsar token secret key not configured for this environment")
        );

        assert!(service.set_cluster_token_secret(env.id, "cluster-signing-key").await.unwrap());
        let stored = store.get_environment(env.id).await.unwrap().unwrap();
        assert_ne!(stored.pulsar_token_secret_key_encrypted.as_deref(), Some("cluster-signing-key"));
        assert!(service.can_generate_cluster_tokens(env.id).await.unwrap());

        let token = service.generate_cluster_token(env.id, "svc", Some(7)).await.unwrap();
        let claims = decode::<serde_json::Value>(
            &token,
            &DecodingKey::from_secret(b"cluster-signing-key"),
            &Validation::new(Algorithm::HS256),
        )
        .unwrap()
        .claims;
        assert_eq!(claims["sub"], "svc");

        assert!(service.remove_cluster_token_secret(env.id).await.unwrap());
        assert!(!service.can_generate_cluster_tokens(env.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unrepresentable_expiry_is_a_validation_error() {
        let (store, service, user_id) = setup().await;
        for days in [1_000_000_000, i64::MAX, i64::MIN] {
            let err = service.create_token(user_id, "big", Some(days), None).await.unwrap_err();
            assert!(matches!(err, CredentialError::Validation(msg) if msg == "expires_in_days is out of range"));
        }
        assert!(service.list_tokens(user_id, true).await.unwrap().is_empty());

        let env = store
            .create_environment(&EnvironmentCreateDBRequest {
                name: "prod".to_string(),
                admin_url: "http://pulsar:8080".to_string(),
                rbac_enabled: false,
            })
            .await
            .unwrap();
        service.set_cluster_token_secret(env.id, "cluster-signing-key").await.unwrap();
        let err = service
            .generate_cluster_token(env.id, "svc", Some(1_000_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Validation(msg) if msg == "expires_in_days is out of range"));
    }

    #[tokio::test]
    async fn test_cluster_token_for_unknown_environment() {
        let (_, service, _) = setup().await;
        let err = service.generate_cluster_token(Uuid::new_v4(), "svc", None).await.unwrap_err();
        assert!(matches!(err, CredentialError::Validation(msg) if msg == "Environment not found"));
        assert!(!service.set_cluster_token_secret(Uuid::new_v4(), "k").await.unwrap());
    }
}
