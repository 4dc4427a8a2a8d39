//! Database repository for console API tokens.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::Result,
        models::api_tokens::{ApiToken, ApiTokenCreateDBRequest, ApiTokenStats},
    },
    types::{ApiTokenId, UserId, abbrev_uuid},
};

const API_TOKEN_COLUMNS: &str =
    "id, user_id, name, token_hash, token_prefix, expires_at, last_used_at, is_revoked, scopes, created_at";

pub struct ApiTokens<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ApiTokens<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), prefix = %request.token_prefix), err)]
    pub async fn create(&mut self, request: &ApiTokenCreateDBRequest) -> Result<ApiToken> {
        let token = sqlx::query_as::<_, ApiToken>(&format!(
            r#"
            INSERT INTO api_tokens (user_id, name, token_hash, token_prefix, expires_at, scopes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {API_TOKEN_COLUMNS}
            "#
        ))
        .bind(request.user_id)
        .bind(&request.name)
        .bind(&request.token_hash)
        .bind(&request.token_prefix)
        .bind(request.expires_at)
        .bind(&request.scopes)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(token)
    }

    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: ApiTokenId) -> Result<Option<ApiToken>> {
        let token = sqlx::query_as::<_, ApiToken>(&format!("SELECT {API_TOKEN_COLUMNS} FROM api_tokens WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(token)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId, include_revoked: bool) -> Result<Vec<ApiToken>> {
        let tokens = sqlx::query_as::<_, ApiToken>(&format!(
            "SELECT {API_TOKEN_COLUMNS} FROM api_tokens WHERE user_id = $1 AND ($2 OR NOT is_revoked) ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .bind(include_revoked)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(tokens)
    }

    /// Look up a token that is simultaneously unrevoked and unexpired.
    #[instrument(skip(self, token_hash), err)]
    pub async fn find_valid_by_hash(&mut self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<ApiToken>> {
        let token = sqlx::query_as::<_, ApiToken>(&format!(
            r#"
            SELECT {API_TOKEN_COLUMNS} FROM api_tokens
            WHERE token_hash = $1 AND NOT is_revoked AND (expires_at IS NULL OR expires_at > $2)
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(token)
    }

    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    pub async fn touch(&mut self, id: ApiTokenId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE api_tokens SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&mut *self.db)
            .await?;

        Ok(())
    }

    /// Returns whether the token exists; an already-revoked token stays revoked.
    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    pub async fn revoke(&mut self, id: ApiTokenId) -> Result<bool> {
        let result = sqlx::query("UPDATE api_tokens SET is_revoked = TRUE WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn revoke_for_user(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE api_tokens SET is_revoked = TRUE WHERE user_id = $1 AND NOT is_revoked")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: ApiTokenId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn stats_for_user(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<ApiTokenStats> {
        let stats = sqlx::query_as::<_, ApiTokenStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE NOT is_revoked AND (expires_at IS NULL OR expires_at > $2)) AS active,
                COUNT(*) FILTER (WHERE is_revoked) AS revoked,
                COUNT(*) FILTER (WHERE NOT is_revoked AND expires_at IS NOT NULL AND expires_at <= $2) AS expired
            FROM api_tokens
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(stats)
    }
}
