//! Database repository for interactive sessions.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::Result,
        models::sessions::{Session, SessionCreateDBRequest},
    },
    types::{SessionId, UserId, abbrev_uuid},
};

const SESSION_COLUMNS: &str = "id, user_id, access_token_hash, refresh_token_id, refresh_token_encrypted, expires_at, \
     ip_address, user_agent, is_revoked, created_at";

pub struct Sessions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Sessions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    pub async fn create(&mut self, request: &SessionCreateDBRequest) -> Result<Session> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            INSERT INTO sessions (user_id, access_token_hash, refresh_token_id, refresh_token_encrypted, expires_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(request.user_id)
        .bind(&request.access_token_hash)
        .bind(&request.refresh_token_id)
        .bind(&request.refresh_token_encrypted)
        .bind(request.expires_at)
        .bind(&request.ip_address)
        .bind(&request.user_agent)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(session)
    }

    #[instrument(skip(self), fields(session_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: SessionId) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(session)
    }

    #[instrument(skip(self, access_token_hash), err)]
    pub async fn find_valid_by_access_hash(&mut self, access_token_hash: &str, now: DateTime<Utc>) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE access_token_hash = $1 AND NOT is_revoked AND expires_at > $2"
        ))
        .bind(access_token_hash)
        .bind(now)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(session)
    }

    /// Locks the row so concurrent refreshes of one token cannot both rotate it.
    #[instrument(skip(self, refresh_token_id), err)]
    pub async fn find_valid_by_refresh_id_for_update(
        &mut self,
        refresh_token_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token_id = $1 AND NOT is_revoked AND expires_at > $2 FOR UPDATE"
        ))
        .bind(refresh_token_id)
        .bind(now)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(session)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId, include_expired: bool, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE user_id = $1 AND ($2 OR (NOT is_revoked AND expires_at > $3))
            ORDER BY created_at DESC
            "#
        ))
        .bind(user_id)
        .bind(include_expired)
        .bind(now)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(sessions)
    }

    /// Returns whether the session exists; revoking twice is a no-op.
    #[instrument(skip(self), fields(session_id = %abbrev_uuid(&id)), err)]
    pub async fn revoke(&mut self, id: SessionId) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET is_revoked = TRUE WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Revoke every live session of the user except the one holding `keep_access_hash`.
    #[instrument(skip(self, keep_access_hash), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn revoke_for_user(&mut self, user_id: UserId, keep_access_hash: Option<&str>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET is_revoked = TRUE
            WHERE user_id = $1 AND NOT is_revoked AND ($2::text IS NULL OR access_token_hash <> $2)
            "#,
        )
        .bind(user_id)
        .bind(keep_access_hash)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    pub async fn delete_expired(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    pub async fn delete_revoked(&mut self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE is_revoked")
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
