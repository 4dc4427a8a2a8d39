//! Interactive sessions.
//!
//! A session row is created for every signed access/refresh pair. The row holds the SHA-256 of
//! the access token, the refresh token's random id and the refresh token itself encrypted, and is
//! the thing revocation acts on: a correctly signed access token whose session is revoked or
//! expired does not authenticate.
//!
//! Refresh is single-use. [`SessionService::refresh_session`] revokes the session holding the
//! presented refresh id and creates its successor in one atomic store operation, so a replayed
//! refresh token finds nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{CredentialError, Result};
use crate::{
    auth::tokens::TokenIssuer,
    crypto::{self, SecretCipher},
    db::models::{
        sessions::{Session, SessionCreateDBRequest},
        users::UserDBResponse,
    },
    store::AuthStore,
    types::{SessionId, UserId, abbrev_uuid},
};

/// A freshly issued credential pair. Both tokens are returned to the client once.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    #[serde(skip)]
    pub session_id: SessionId,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn AuthStore>,
    issuer: TokenIssuer,
    cipher: SecretCipher,
}

impl SessionService {
    pub fn new(store: Arc<dyn AuthStore>, issuer: TokenIssuer, cipher: SecretCipher) -> Self {
        Self { store, issuer, cipher }
    }

    /// Start a session for an active user.
    #[instrument(skip(self, ip_address, user_agent), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn create_session(
        &self,
        user_id: UserId,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<TokenPair> {
        match self.store.get_user(user_id).await? {
            None => return Err(CredentialError::Validation("User not found".to_string())),
            Some(user) if !user.is_active => return Err(CredentialError::Validation("User is not active".to_string())),
            Some(_) => {}
        }

        let (request, pair) = self.issue(user_id, ip_address, user_agent)?;
        let session = self.store.create_session(&request).await?;

        info!(session_id = %abbrev_uuid(&session.id), "Created session");
        Ok(TokenPair {
            session_id: session.id,
            ..pair
        })
    }

    /// Resolve an access token to its live session and active user. `None` for anything else.
    pub async fn validate_access_token(&self, token: &str) -> Result<Option<(UserDBResponse, Session)>> {
        let Ok(claims) = self.issuer.verify_access_token(token) else {
            return Ok(None);
        };

        let Some(session) = self
            .store
            .find_valid_session_by_access_hash(&crypto::hash_value(token), Utc::now())
            .await?
        else {
            return Ok(None);
        };

        if claims.sub != session.user_id.to_string() {
            warn!(session_id = %abbrev_uuid(&session.id), "Access token subject does not match its session");
            return Ok(None);
        }

        match self.store.get_user(session.user_id).await? {
            Some(user) if user.is_active => Ok(Some((user, session))),
            _ => Ok(None),
        }
    }

    /// Exchange a refresh token for a new pair, revoking the session it belonged to.
    ///
    /// Every failure, including a replayed or revoked refresh token, is
    /// [`CredentialError::InvalidCredential`].
    #[instrument(skip_all, err)]
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<TokenPair> {
        let claims = self
            .issuer
            .verify_refresh_token(refresh_token)
            .map_err(|_| CredentialError::InvalidCredential)?;
        let refresh_token_id = claims.jti.ok_or(CredentialError::InvalidCredential)?;
        let user_id: UserId = Uuid::parse_str(&claims.sub).map_err(|_| CredentialError::InvalidCredential)?;

        match self.store.get_user(user_id).await? {
            Some(user) if user.is_active => {}
            _ => return Err(CredentialError::InvalidCredential),
        }

        let (request, pair) = self.issue(user_id, ip_address, user_agent)?;
        let Some(session) = self
            .store
            .rotate_session(&refresh_token_id, Utc::now(), &request)
            .await?
        else {
            warn!(user_id = %abbrev_uuid(&user_id), "Refresh token rejected: no live session");
            return Err(CredentialError::InvalidCredential);
        };

        info!(session_id = %abbrev_uuid(&session.id), user_id = %abbrev_uuid(&user_id), "Rotated session");
        Ok(TokenPair {
            session_id: session.id,
            ..pair
        })
    }

    pub async fn list_sessions(&self, user_id: UserId, include_expired: bool) -> Result<Vec<Session>> {
        Ok(self.store.list_sessions(user_id, include_expired, Utc::now()).await?)
    }

    /// The session if it exists and belongs to `owner`.
    pub async fn get_session(&self, session_id: SessionId, owner: UserId) -> Result<Option<Session>> {
        Ok(self
            .store
            .get_session(session_id)
            .await?
            .filter(|s| s.user_id == owner))
    }

    /// Revoke one of `owner`'s sessions. Idempotent; sessions of other users read as missing.
    #[instrument(skip(self), fields(session_id = %abbrev_uuid(&session_id)), err)]
    pub async fn revoke_session(&self, session_id: SessionId, owner: UserId) -> Result<bool> {
        if self.get_session(session_id, owner).await?.is_none() {
            return Ok(false);
        }
        let revoked = self.store.revoke_session(session_id).await?;
        info!("Revoked session");
        Ok(revoked)
    }

    /// Revoke the session an access token belongs to (logout).
    pub async fn revoke_by_access_hash(&self, owner: UserId, access_token_hash: &str) -> Result<bool> {
        match self
            .store
            .find_valid_session_by_access_hash(access_token_hash, Utc::now())
            .await?
        {
            Some(session) if session.user_id == owner => self.revoke_session(session.id, owner).await,
            _ => Ok(false),
        }
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn revoke_all_sessions(&self, user_id: UserId) -> Result<u64> {
        let count = self.store.revoke_user_sessions(user_id, None).await?;
        info!(count, "Revoked all sessions");
        Ok(count)
    }

    /// Revoke every session of the user except the one identified by `current_access_hash`.
    #[instrument(skip(self, current_access_hash), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn revoke_other_sessions(&self, user_id: UserId, current_access_hash: &str) -> Result<u64> {
        let count = self
            .store
            .revoke_user_sessions(user_id, Some(current_access_hash))
            .await?;
        info!(count, "Revoked other sessions");
        Ok(count)
    }

    pub async fn active_session_count(&self, user_id: UserId) -> Result<usize> {
        Ok(self.list_sessions(user_id, false).await?.len())
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        Ok(self.store.delete_expired_sessions(Utc::now()).await?)
    }

    pub async fn cleanup_revoked(&self) -> Result<u64> {
        Ok(self.store.delete_revoked_sessions().await?)
    }

    fn issue(
        &self,
        user_id: UserId,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(SessionCreateDBRequest, TokenPair)> {
        let subject = user_id.to_string();
        let access_token = self.issuer.create_access_token(&subject, None)?;
        let (refresh_token, refresh_token_id) = self.issuer.create_refresh_token(&subject, None)?;
        let expires_at: DateTime<Utc> = Utc::now()
            + chrono::Duration::from_std(self.issuer.refresh_ttl())
                .map_err(|e| CredentialError::Validation(format!("invalid refresh lifetime: {e}")))?;

        let request = SessionCreateDBRequest {
            user_id,
            access_token_hash: crypto::hash_value(&access_token),
            refresh_token_id,
            refresh_token_encrypted: Some(self.cipher.encrypt(&refresh_token)?),
            expires_at,
            ip_address,
            user_agent,
        };
        let pair = TokenPair {
            access_token,
            refresh_token,
            token_type: "bearer",
            expires_in: self.issuer.access_ttl().as_secs(),
            session_id: Uuid::nil(),
        };
        Ok((request, pair))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::models::users::UserCreateDBRequest, store::MemoryStore};
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryStore>, SessionService, UserId) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(&UserCreateDBRequest {
                email: "dev@example.com".to_string(),
                display_name: None,
                is_global_admin: false,
            })
            .await
            .unwrap();
        let issuer = TokenIssuer::new("session-secret", Duration::from_secs(1800), Duration::from_secs(7 * 86400));
        let service = SessionService::new(store.clone(), issuer, SecretCipher::new("encryption-key"));
        (store, service, user.id)
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (store, service, user_id) = setup().await;
        let pair = service
            .create_session(user_id, Some("10.0.0.1".to_string()), Some("curl".to_string()))
            .await
            .unwrap();
        assert_eq!(pair.token_type, "bearer");
        assert_eq!(pair.expires_in, 1800);

        let (user, session) = service.validate_access_token(&pair.access_token).await.unwrap().unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(session.id, pair.session_id);
        assert_eq!(session.ip_address.as_deref(), Some("10.0.0.1"));

        // Only digests and ciphertext are stored
        let stored = store.get_session(pair.session_id).await.unwrap().unwrap();
        assert_ne!(stored.access_token_hash, pair.access_token);
        assert_ne!(stored.refresh_token_encrypted.as_deref(), Some(pair.refresh_token.as_str()));
        assert!(stored.refresh_token_encrypted.is_some());

        assert!(service.revoke_session(pair.session_id, user_id).await.unwrap());
        assert!(service.validate_access_token(&pair.access_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_is_single_use() {
        let (_, service, user_id) = setup().await;
        let first = service.create_session(user_id, None, None).await.unwrap();

        let second = service.refresh_session(&first.refresh_token, None, None).await.unwrap();
        assert_ne!(first.session_id, second.session_id);
        assert!(service.validate_access_token(&first.access_token).await.unwrap().is_none());
        assert!(service.validate_access_token(&second.access_token).await.unwrap().is_some());

        let replay = service.refresh_session(&first.refresh_token, None, None).await;
        assert!(matches!(replay, Err(CredentialError::InvalidCredential)));
        assert_eq!(service.active_session_count(user_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_token_kinds_are_not_interchangeable() {
        let (_, service, user_id) = setup().await;
        let pair = service.create_session(user_id, None, None).await.unwrap();

        assert!(matches!(
            service.refresh_session(&pair.access_token, None, None).await,
            Err(CredentialError::InvalidCredential)
        ));
        assert!(service.validate_access_token(&pair.refresh_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_after_revocation_fails() {
        let (_, service, user_id) = setup().await;
        let pair = service.create_session(user_id, None, None).await.unwrap();
        service.revoke_all_sessions(user_id).await.unwrap();

        assert!(matches!(
            service.refresh_session(&pair.refresh_token, None, None).await,
            Err(CredentialError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_use_or_refresh() {
        let (store, service, user_id) = setup().await;
        let pair = service.create_session(user_id, None, None).await.unwrap();
        store.set_user_active(user_id, false).await.unwrap();

        assert!(service.validate_access_token(&pair.access_token).await.unwrap().is_none());
        assert!(matches!(
            service.refresh_session(&pair.refresh_token, None, None).await,
            Err(CredentialError::InvalidCredential)
        ));
        assert!(matches!(
            service.create_session(user_id, None, None).await,
            Err(CredentialError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_other_sessions_keeps_current() {
        let (_, service, user_id) = setup().await;
        let current = service.create_session(user_id, None, None).await.unwrap();
        service.create_session(user_id, None, None).await.unwrap();
        service.create_session(user_id, None, None).await.unwrap();

        let revoked = service
            .revoke_other_sessions(user_id, &crypto::hash_value(&current.access_token))
            .await
            .unwrap();
        assert_eq!(revoked, 2);
        assert_eq!(service.active_session_count(user_id).await.unwrap(), 1);
        assert!(service.validate_access_token(&current.access_token).await.unwrap().is_some());

        assert_eq!(service.cleanup_revoked().await.unwrap(), 2);
        assert_eq!(service.list_sessions(user_id, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_logout_and_foreign_session_access() {
        let (store, service, user_id) = setup().await;
        let other = store
            .create_user(&UserCreateDBRequest {
                email: "other@example.com".to_string(),
                display_name: None,
                is_global_admin: false,
            })
            .await
            .unwrap()
            .id;
        let pair = service.create_session(user_id, None, None).await.unwrap();

        assert!(service.get_session(pair.session_id, other).await.unwrap().is_none());
        assert!(!service.revoke_session(pair.session_id, other).await.unwrap());

        let hash = crypto::hash_value(&pair.access_token);
        assert!(!service.revoke_by_access_hash(other, &hash).await.unwrap());
        assert!(service.revoke_by_access_hash(user_id, &hash).await.unwrap());
        assert!(service.validate_access_token(&pair.access_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(&UserCreateDBRequest {
                email: "dev@example.com".to_string(),
                display_name: None,
                is_global_admin: false,
            })
            .await
            .unwrap();
        // Zero refresh lifetime: the session is expired as soon as it exists
        let issuer = TokenIssuer::new("s", Duration::from_secs(60), Duration::ZERO);
        let service = SessionService::new(store.clone(), issuer, SecretCipher::new("k"));

        let pair = service.create_session(user.id, None, None).await.unwrap();
        assert!(service.validate_access_token(&pair.access_token).await.unwrap().is_none());
        assert_eq!(service.cleanup_expired().await.unwrap(), 1);
        assert!(store.get_session(pair.session_id).await.unwrap().is_none());
    }
}
