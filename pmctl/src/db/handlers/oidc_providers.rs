//! Database repository for OIDC providers and their pending logins.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::Result,
        models::oidc_providers::{OidcLoginState, OidcLoginStateCreateDBRequest, OidcProvider, OidcProviderUpsertDBRequest},
    },
    types::{EnvironmentId, OidcProviderId, abbrev_uuid},
};

const PROVIDER_COLUMNS: &str = "id, environment_id, issuer_url, client_id, client_secret_encrypted, use_pkce, scopes, \
     role_claim, auto_create_users, default_role_name, is_enabled, created_at, updated_at";

const LOGIN_STATE_COLUMNS: &str = "state_hash, provider_id, code_challenge, redirect_uri, expires_at, created_at";

pub struct OidcProviders<'c> {
    db: &'c mut PgConnection,
}

impl<'c> OidcProviders<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(provider_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: OidcProviderId) -> Result<Option<OidcProvider>> {
        let provider =
            sqlx::query_as::<_, OidcProvider>(&format!("SELECT {PROVIDER_COLUMNS} FROM oidc_providers WHERE id = $1"))
                .bind(id)
                .fetch_optional(&mut *self.db)
                .await?;

        Ok(provider)
    }

    #[instrument(skip(self), fields(environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn get_for_environment(&mut self, environment_id: EnvironmentId) -> Result<Option<OidcProvider>> {
        let provider = sqlx::query_as::<_, OidcProvider>(&format!(
            "SELECT {PROVIDER_COLUMNS} FROM oidc_providers WHERE environment_id = $1"
        ))
        .bind(environment_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(provider)
    }

    #[instrument(skip(self), err)]
    pub async fn list_enabled(&mut self) -> Result<Vec<OidcProvider>> {
        let providers = sqlx::query_as::<_, OidcProvider>(&format!(
            "SELECT {PROVIDER_COLUMNS} FROM oidc_providers WHERE is_enabled ORDER BY created_at"
        ))
        .fetch_all(&mut *self.db)
        .await?;

        Ok(providers)
    }

    /// One provider per environment: a second upsert replaces the configuration in place. A
    /// `NULL` secret keeps the stored one.
    #[instrument(skip(self, request), fields(environment_id = %abbrev_uuid(&request.environment_id)), err)]
    pub async fn upsert(&mut self, request: &OidcProviderUpsertDBRequest) -> Result<OidcProvider> {
        let provider = sqlx::query_as::<_, OidcProvider>(&format!(
            r#"
            INSERT INTO oidc_providers (environment_id, issuer_url, client_id, client_secret_encrypted, use_pkce, scopes,
                                        role_claim, auto_create_users, default_role_name, is_enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (environment_id) DO UPDATE SET
                issuer_url = EXCLUDED.issuer_url,
                client_id = EXCLUDED.client_id,
                client_secret_encrypted = COALESCE(EXCLUDED.client_secret_encrypted, oidc_providers.client_secret_encrypted),
                use_pkce = EXCLUDED.use_pkce,
                scopes = EXCLUDED.scopes,
                role_claim = EXCLUDED.role_claim,
                auto_create_users = EXCLUDED.auto_create_users,
                default_role_name = EXCLUDED.default_role_name,
                is_enabled = EXCLUDED.is_enabled,
                updated_at = NOW()
            RETURNING {PROVIDER_COLUMNS}
            "#
        ))
        .bind(request.environment_id)
        .bind(&request.issuer_url)
        .bind(&request.client_id)
        .bind(&request.client_secret_encrypted)
        .bind(request.use_pkce)
        .bind(&request.scopes)
        .bind(&request.role_claim)
        .bind(request.auto_create_users)
        .bind(&request.default_role_name)
        .bind(request.is_enabled)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(provider)
    }

    #[instrument(skip(self), fields(provider_id = %abbrev_uuid(&id)), err)]
    pub async fn set_enabled(&mut self, id: OidcProviderId, is_enabled: bool) -> Result<Option<OidcProvider>> {
        let provider = sqlx::query_as::<_, OidcProvider>(&format!(
            "UPDATE oidc_providers SET is_enabled = $2, updated_at = NOW() WHERE id = $1 RETURNING {PROVIDER_COLUMNS}"
        ))
        .bind(id)
        .bind(is_enabled)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(provider)
    }

    /// `None` clears the secret.
    #[instrument(skip(self, client_secret_encrypted), fields(provider_id = %abbrev_uuid(&id)), err)]
    pub async fn update_client_secret(
        &mut self,
        id: OidcProviderId,
        client_secret_encrypted: Option<&str>,
    ) -> Result<Option<OidcProvider>> {
        let provider = sqlx::query_as::<_, OidcProvider>(&format!(
            "UPDATE oidc_providers SET client_secret_encrypted = $2, updated_at = NOW() WHERE id = $1 RETURNING {PROVIDER_COLUMNS}"
        ))
        .bind(id)
        .bind(client_secret_encrypted)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(provider)
    }

    #[instrument(skip(self), fields(environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn delete_for_environment(&mut self, environment_id: EnvironmentId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM oidc_providers WHERE environment_id = $1")
            .bind(environment_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(provider_id = %abbrev_uuid(&request.provider_id)), err)]
    pub async fn create_login_state(&mut self, request: &OidcLoginStateCreateDBRequest) -> Result<OidcLoginState> {
        let state = sqlx::query_as::<_, OidcLoginState>(&format!(
            r#"
            INSERT INTO oidc_login_states (state_hash, provider_id, code_challenge, redirect_uri, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {LOGIN_STATE_COLUMNS}
            "#
        ))
        .bind(&request.state_hash)
        .bind(request.provider_id)
        .bind(&request.code_challenge)
        .bind(&request.redirect_uri)
        .bind(request.expires_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(state)
    }

    /// Delete and return the unexpired login state. A second call with the same hash finds nothing.
    #[instrument(skip(self, state_hash), err)]
    pub async fn take_login_state(&mut self, state_hash: &str, now: DateTime<Utc>) -> Result<Option<OidcLoginState>> {
        let state = sqlx::query_as::<_, OidcLoginState>(&format!(
            "DELETE FROM oidc_login_states WHERE state_hash = $1 RETURNING {LOGIN_STATE_COLUMNS}"
        ))
        .bind(state_hash)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(state.filter(|s| s.expires_at > now))
    }

    #[instrument(skip(self), err)]
    pub async fn delete_expired_login_states(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM oidc_login_states WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
