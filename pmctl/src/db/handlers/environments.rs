//! Database repository for environments.

use std::collections::HashMap;

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::Result,
        handlers::repository::Repository,
        models::environments::{
            EnvironmentCreateDBRequest, EnvironmentDBResponse, EnvironmentFilter, EnvironmentUpdateDBRequest,
        },
    },
    types::{EnvironmentId, abbrev_uuid},
};

const ENVIRONMENT_COLUMNS: &str = "id, name, admin_url, is_active, rbac_enabled, token_encrypted, \
     pulsar_token_secret_key_encrypted, created_at, updated_at";

pub struct Environments<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Environments<'c> {
    type CreateRequest = EnvironmentCreateDBRequest;
    type UpdateRequest = EnvironmentUpdateDBRequest;
    type Response = EnvironmentDBResponse;
    type Id = EnvironmentId;
    type Filter = EnvironmentFilter;

    /// New environments start inactive; activation is a separate atomic switch.
    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let environment = sqlx::query_as::<_, EnvironmentDBResponse>(&format!(
            "INSERT INTO environments (name, admin_url, rbac_enabled) VALUES ($1, $2, $3) RETURNING {ENVIRONMENT_COLUMNS}"
        ))
        .bind(&request.name)
        .bind(&request.admin_url)
        .bind(request.rbac_enabled)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(environment)
    }

    #[instrument(skip(self), fields(environment_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let environment =
            sqlx::query_as::<_, EnvironmentDBResponse>(&format!("SELECT {ENVIRONMENT_COLUMNS} FROM environments WHERE id = $1"))
                .bind(id)
                .fetch_optional(&mut *self.db)
                .await?;

        Ok(environment)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        let environments = sqlx::query_as::<_, EnvironmentDBResponse>(&format!(
            "SELECT {ENVIRONMENT_COLUMNS} FROM environments WHERE id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(environments.into_iter().map(|e| (e.id, e)).collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let environments = sqlx::query_as::<_, EnvironmentDBResponse>(&format!(
            "SELECT {ENVIRONMENT_COLUMNS} FROM environments ORDER BY name LIMIT $1 OFFSET $2"
        ))
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(environments)
    }

    #[instrument(skip(self), fields(environment_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM environments WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(environment_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let (set_secret, secret) = match &request.pulsar_token_secret_key_encrypted {
            Some(value) => (true, value.clone()),
            None => (false, None),
        };

        let environment = sqlx::query_as::<_, EnvironmentDBResponse>(&format!(
            r#"
            UPDATE environments SET
                admin_url = COALESCE($2, admin_url),
                rbac_enabled = COALESCE($3, rbac_enabled),
                pulsar_token_secret_key_encrypted = CASE WHEN $4 THEN $5 ELSE pulsar_token_secret_key_encrypted END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ENVIRONMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.admin_url)
        .bind(request.rbac_enabled)
        .bind(set_secret)
        .bind(secret)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(environment)
    }
}

impl<'c> Environments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get_active(&mut self) -> Result<Option<EnvironmentDBResponse>> {
        let environment = sqlx::query_as::<_, EnvironmentDBResponse>(&format!(
            "SELECT {ENVIRONMENT_COLUMNS} FROM environments WHERE is_active"
        ))
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(environment)
    }

    #[instrument(skip(self, name), err)]
    pub async fn get_by_name(&mut self, name: &str) -> Result<Option<EnvironmentDBResponse>> {
        let environment = sqlx::query_as::<_, EnvironmentDBResponse>(&format!(
            "SELECT {ENVIRONMENT_COLUMNS} FROM environments WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(environment)
    }

    /// Deactivate every environment, then activate `id`. Must run inside a transaction; the
    /// partial unique index rejects any interleaving that would leave two rows active.
    #[instrument(skip(self), fields(environment_id = %abbrev_uuid(&id)), err)]
    pub async fn activate(&mut self, id: EnvironmentId) -> Result<Option<EnvironmentDBResponse>> {
        sqlx::query("UPDATE environments SET is_active = FALSE, updated_at = NOW() WHERE is_active AND id <> $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        let environment = sqlx::query_as::<_, EnvironmentDBResponse>(&format!(
            "UPDATE environments SET is_active = TRUE, updated_at = NOW() WHERE id = $1 RETURNING {ENVIRONMENT_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(environment)
    }
}
